//! Continuation dispatch table.
//!
//! A suspended computation is persisted as data: a [`DispatchTag`] naming the
//! continuation type and entry point, the captured environment and the
//! captured operands. The table maps each tag to the function that resumes
//! it, so resuming never needs a live call frame or knowledge of concrete
//! continuation types.

use crate::blocks;
use crate::continuation::{Captured, Continuation, Step};
use crate::environment::Env;
use crate::error::{EngineError, EngineResult};
use crate::values::Signal;
use std::collections::HashMap;
use std::fmt;

/// Identifies one resumable entry point of one continuation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchTag {
    pub group: &'static str,
    pub method: &'static str,
}

impl DispatchTag {
    pub const fn new(group: &'static str, method: &'static str) -> Self {
        DispatchTag { group, method }
    }
}

impl fmt::Display for DispatchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.method)
    }
}

/// What a resume function receives: the frame minus its tag.
pub struct Resume {
    pub env: Env,
    pub captured: Captured,
    pub next: Continuation,
}

pub type ResumeFn = fn(Resume, Signal) -> EngineResult<Step>;

#[derive(Clone, Copy)]
pub struct Entry {
    pub resume: ResumeFn,
    /// Entries that do not intercept failures never see `Signal::Thrown`;
    /// the table forwards the failure to the next frame instead.
    pub intercepts_failure: bool,
}

impl Entry {
    pub fn values(resume: ResumeFn) -> Self {
        Entry {
            resume,
            intercepts_failure: false,
        }
    }

    pub fn signals(resume: ResumeFn) -> Self {
        Entry {
            resume,
            intercepts_failure: true,
        }
    }
}

/// Implemented once per continuation type to register its entry points.
pub trait ContinuationGroup {
    const NAME: &'static str;

    fn entries() -> Vec<(DispatchTag, Entry)>;
}

#[derive(Clone, Default)]
pub struct DispatchTable {
    entries: HashMap<DispatchTag, Entry>,
    by_name: HashMap<(String, String), DispatchTag>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table covering every block shipped with the engine.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register::<blocks::logical::LogicalGroup>();
        table.register::<blocks::operators::OperatorGroup>();
        table.register::<blocks::variables::VariableGroup>();
        table.register::<blocks::control::ControlGroup>();
        table.register::<blocks::access::AccessGroup>();
        table.register::<blocks::exceptions::ExceptionGroup>();
        table.register::<blocks::suspend::SuspendGroup>();
        table
    }

    pub fn register<G: ContinuationGroup>(&mut self) {
        for (tag, entry) in G::entries() {
            debug_assert_eq!(tag.group, G::NAME);
            self.by_name
                .insert((tag.group.to_string(), tag.method.to_string()), tag);
            self.entries.insert(tag, entry);
        }
    }

    pub fn contains(&self, tag: &DispatchTag) -> bool {
        self.entries.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maps a persisted `(group, method)` pair back to its canonical tag.
    pub fn resolve(&self, group: &str, method: &str) -> EngineResult<DispatchTag> {
        self.by_name
            .get(&(group.to_string(), method.to_string()))
            .copied()
            .ok_or_else(|| EngineError::UnknownEntry {
                group: group.to_string(),
                method: method.to_string(),
            })
    }

    /// Delivers `signal` to the innermost frame of `k`.
    pub fn deliver(&self, mut k: Continuation, signal: Signal) -> EngineResult<Delivery> {
        let Some(frame) = k.take_frame() else {
            return Ok(Delivery::Halted(signal));
        };
        let frame = *frame;
        let entry = self
            .entries
            .get(&frame.tag)
            .ok_or(EngineError::UnknownTag(frame.tag))?;
        if signal.is_thrown() && !entry.intercepts_failure {
            return Ok(Delivery::Next(Step::resume(frame.next, signal)));
        }
        let resume = Resume {
            env: frame.env,
            captured: frame.captured,
            next: frame.next,
        };
        (entry.resume)(resume, signal).map(Delivery::Next)
    }
}

/// Result of delivering a signal.
#[derive(Debug)]
pub enum Delivery {
    Next(Step),
    /// The continuation was the end of the chain; the run is over.
    Halted(Signal),
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<String> = self.entries.keys().map(|t| t.to_string()).collect();
        tags.sort();
        f.debug_struct("DispatchTable").field("tags", &tags).finish()
    }
}

/// Error for a resume function handed state that belongs to another entry.
pub(crate) fn mismatch(tag: DispatchTag, captured: &Captured) -> EngineError {
    EngineError::CapturedMismatch {
        tag,
        found: captured.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::{Failure, Value};

    #[test]
    fn standard_table_resolves_persisted_names() {
        let table = DispatchTable::standard();
        let tag = table.resolve("LogicalOp", "decide").expect("registered");
        assert_eq!(tag, blocks::logical::DECIDE);
        assert!(table.resolve("LogicalOp", "nope").is_err());
    }

    #[test]
    fn failures_skip_frames_that_do_not_intercept_them() {
        let table = DispatchTable::standard();
        let k = Continuation::frame(
            blocks::logical::DECIDE,
            Env::new(),
            Captured::Logical {
                op: blocks::LogicalOp::And,
                rhs: crate::blocks::BlockId(0),
            },
            Continuation::halt(),
        );
        let failure = Failure::new("Boom", "bad");
        let step = table
            .deliver(k, Signal::Thrown(failure.clone()))
            .expect("deliver");
        match step {
            Delivery::Next(Step::Resume { k, signal }) => {
                assert!(k.is_halt());
                assert_eq!(signal, Signal::Thrown(failure));
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn unregistered_tag_is_an_engine_error() {
        let table = DispatchTable::new();
        let k = Continuation::frame(
            blocks::logical::DECIDE,
            Env::new(),
            Captured::Not,
            Continuation::halt(),
        );
        let err = table.deliver(k, Signal::Value(Value::Null)).unwrap_err();
        assert!(matches!(err, EngineError::UnknownTag(_)));
    }
}
