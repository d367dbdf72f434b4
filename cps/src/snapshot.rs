//! Persisting a suspended run.
//!
//! Every frame stores its resume entry as a `(group, method)` name pair and
//! its scope as an index into a shared scope table, so a parked run can be
//! written to disk and resumed by a different process. Restoring resolves the
//! names through a [`DispatchTable`]; no concrete continuation type is needed.

use crate::continuation::{Captured, Continuation};
use crate::dispatch::DispatchTable;
use crate::environment::Env;
use crate::error::{EngineError, EngineResult};
use crate::trampoline::Suspension;
use crate::values::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeRecord {
    /// Index of the parent scope; always lower than this scope's own index.
    pub parent: Option<usize>,
    pub bindings: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub group: String,
    pub method: String,
    pub scope: usize,
    pub captured: Captured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspensionSnapshot {
    pub request: Value,
    pub scopes: Vec<ScopeRecord>,
    /// Innermost frame first.
    pub frames: Vec<FrameRecord>,
}

#[derive(Default)]
struct ScopeInterner {
    index: HashMap<usize, usize>,
    records: Vec<ScopeRecord>,
}

impl ScopeInterner {
    fn intern(&mut self, env: &Env) -> usize {
        if let Some(&found) = self.index.get(&env.scope_id()) {
            return found;
        }
        // Collect the not-yet-seen ancestors, then intern them root first.
        let mut chain = vec![env];
        let mut cursor = env.parent();
        while let Some(parent) = cursor {
            if self.index.contains_key(&parent.scope_id()) {
                break;
            }
            chain.push(parent);
            cursor = parent.parent();
        }
        let mut parent_index = cursor.and_then(|p| self.index.get(&p.scope_id()).copied());
        let mut own = 0;
        for scope in chain.into_iter().rev() {
            let at = self.records.len();
            self.records.push(ScopeRecord {
                parent: parent_index,
                bindings: scope.local_bindings(),
            });
            self.index.insert(scope.scope_id(), at);
            parent_index = Some(at);
            own = at;
        }
        own
    }
}

impl SuspensionSnapshot {
    pub fn capture(suspension: &Suspension) -> Self {
        let mut scopes = ScopeInterner::default();
        let mut frames = Vec::new();
        let mut cursor = suspension.k.peek();
        while let Some(frame) = cursor {
            frames.push(FrameRecord {
                group: frame.tag.group.to_string(),
                method: frame.tag.method.to_string(),
                scope: scopes.intern(&frame.env),
                captured: frame.captured.clone(),
            });
            cursor = frame.next.peek();
        }
        SuspensionSnapshot {
            request: suspension.request.clone(),
            scopes: scopes.records,
            frames,
        }
    }

    pub fn restore(&self, table: &DispatchTable) -> EngineResult<Suspension> {
        let mut envs: Vec<Env> = Vec::with_capacity(self.scopes.len());
        for (at, record) in self.scopes.iter().enumerate() {
            let env = match record.parent {
                None => Env::with_bindings(record.bindings.clone()),
                Some(parent) if parent < at => Env::child_with(&envs[parent], record.bindings.clone()),
                Some(parent) => {
                    return Err(EngineError::MalformedSnapshot(format!(
                        "scope {} names parent {} which does not precede it",
                        at, parent
                    )))
                }
            };
            envs.push(env);
        }

        let mut k = Continuation::halt();
        for record in self.frames.iter().rev() {
            let tag = table.resolve(&record.group, &record.method)?;
            let env = envs.get(record.scope).ok_or_else(|| {
                EngineError::MalformedSnapshot(format!(
                    "frame {} refers to missing scope {}",
                    tag, record.scope
                ))
            })?;
            k = Continuation::frame(tag, env.clone(), record.captured.clone(), k);
        }
        Ok(Suspension {
            request: self.request.clone(),
            k,
        })
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{control, logical, BlockId, LogicalOp};

    fn sample() -> Suspension {
        let root = Env::new();
        root.declare("a", Value::Int(1));
        let inner = root.child();
        inner.declare("b", Value::from("x"));
        let k = Continuation::frame(
            logical::DECIDE,
            inner.clone(),
            Captured::Logical {
                op: LogicalOp::And,
                rhs: BlockId(1),
            },
            Continuation::frame(
                control::SEQUENCE,
                root,
                Captured::Sequence {
                    body: vec![BlockId(0), BlockId(1)],
                    index: 1,
                },
                Continuation::halt(),
            ),
        );
        Suspension {
            request: Value::from("ask"),
            k,
        }
    }

    #[test]
    fn shared_scopes_are_recorded_once_parents_first() {
        let snapshot = SuspensionSnapshot::capture(&sample());
        assert_eq!(snapshot.scopes.len(), 2);
        assert_eq!(snapshot.scopes[0].parent, None);
        assert_eq!(snapshot.scopes[1].parent, Some(0));
        assert_eq!(snapshot.frames[0].scope, 1);
        assert_eq!(snapshot.frames[1].scope, 0);
    }

    #[test]
    fn restored_chain_keeps_tags_and_scope_links() {
        let table = DispatchTable::standard();
        let json = SuspensionSnapshot::capture(&sample()).to_json().expect("encode");
        let restored = SuspensionSnapshot::from_json(&json)
            .expect("decode")
            .restore(&table)
            .expect("restore");
        assert_eq!(restored.k.tags(), vec![logical::DECIDE, control::SEQUENCE]);
        let inner = &restored.k.peek().expect("frame").env;
        assert_eq!(inner.lookup("a"), Some(Value::Int(1)));
        assert_eq!(inner.lookup("b"), Some(Value::from("x")));
    }

    #[test]
    fn forward_parent_reference_is_rejected() {
        let snapshot = SuspensionSnapshot {
            request: Value::Null,
            scopes: vec![ScopeRecord {
                parent: Some(0),
                bindings: BTreeMap::new(),
            }],
            frames: vec![],
        };
        let err = snapshot.restore(&DispatchTable::standard()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedSnapshot(_)));
    }
}
