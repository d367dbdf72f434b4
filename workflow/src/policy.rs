//! Sandbox access policies.
//!
//! A policy is part of the cache key: the same source compiled under two
//! different policies yields two entries.

use cps::invoker::Invocation;
use cps::{Failure, Invoker, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const REJECTED_ACCESS: &str = "RejectedAccess";

const ANY: &str = "*";

/// Named allow-list of `Type.member` signatures. `Type.*` admits every
/// member of a type and `*` admits everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessPolicy {
    name: String,
    allowed: BTreeSet<String>,
}

impl AccessPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        AccessPolicy {
            name: name.into(),
            allowed: BTreeSet::new(),
        }
    }

    /// The policy of trusted scripts.
    pub fn unrestricted() -> Self {
        AccessPolicy::new("unrestricted").allow(ANY)
    }

    pub fn allow(mut self, signature: impl Into<String>) -> Self {
        self.allowed.insert(signature.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permits(&self, call: &Invocation) -> bool {
        if self.allowed.contains(ANY) || self.allowed.contains(&call.signature()) {
            return true;
        }
        self.allowed.contains(&format!("{}.{}", call.receiver_type(), ANY))
    }
}

/// Rejects every invocation the policy does not permit. Rejections are script
/// failures, so a `try`/`catch` inside the script can handle them.
#[derive(Debug)]
pub struct SandboxInvoker<I> {
    policy: AccessPolicy,
    delegate: I,
}

impl<I: Invoker> SandboxInvoker<I> {
    pub fn new(policy: AccessPolicy, delegate: I) -> Self {
        SandboxInvoker { policy, delegate }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }
}

impl<I: Invoker> Invoker for SandboxInvoker<I> {
    fn method_call(&self, receiver: &Value, method: &str, args: &[Value]) -> Result<Value, Failure> {
        self.invoke(&Invocation::MethodCall {
            receiver: receiver.clone(),
            method: method.to_string(),
            args: args.to_vec(),
        })
    }

    fn get_property(&self, receiver: &Value, name: &str) -> Result<Value, Failure> {
        self.invoke(&Invocation::GetProperty {
            receiver: receiver.clone(),
            name: name.to_string(),
        })
    }

    fn set_property(&self, receiver: &Value, name: &str, value: Value) -> Result<Value, Failure> {
        self.invoke(&Invocation::SetProperty {
            receiver: receiver.clone(),
            name: name.to_string(),
            value,
        })
    }

    fn invoke(&self, call: &Invocation) -> Result<Value, Failure> {
        if self.policy.permits(call) {
            return self.delegate.invoke(call);
        }
        let signature = call.signature();
        tracing::warn!(policy = %self.policy.name, "rejected {}", signature);
        Err(Failure::new(
            REJECTED_ACCESS,
            format!("Scripts not permitted to use {}", signature),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use cps::{Builder, CatchClause, DefaultInvoker};
    use std::sync::Arc;

    fn shell_call(guarded: bool) -> Script {
        let mut b = Builder::new();
        let cmd = b.constant("rm -rf /");
        let call = b.call(None, "sh", vec![cmd]);
        let root = if guarded {
            let e = b.local("e");
            let kind = b.property(e, "kind");
            b.try_catch(
                call,
                vec![CatchClause {
                    kind: Some(REJECTED_ACCESS.to_string()),
                    var: "e".into(),
                    body: kind,
                }],
                None,
            )
        } else {
            call
        };
        Script::new("Shell", b.finish(root).expect("valid"))
    }

    fn sandboxed() -> Arc<dyn Invoker> {
        let policy = AccessPolicy::new("strict").allow("Map.*");
        let delegate = DefaultInvoker::new().with_function("sh", |_| Ok(Value::from("ran")));
        Arc::new(SandboxInvoker::new(policy, delegate))
    }

    #[test]
    fn unlisted_call_is_rejected_as_a_script_failure() {
        let failure = shell_call(false).run(sandboxed()).failed().expect("rejected");
        assert_eq!(failure.kind, REJECTED_ACCESS);
        assert!(failure.message.contains("Script.sh"));
    }

    #[test]
    fn rejection_can_be_caught_by_the_script() {
        let outcome = shell_call(true).run(sandboxed());
        assert_eq!(outcome.completed(), Some(Value::from(REJECTED_ACCESS)));
    }

    #[test]
    fn wildcards_admit_members_of_a_type() {
        let policy = AccessPolicy::new("maps").allow("Map.*");
        let call = Invocation::GetProperty {
            receiver: Value::Map(Default::default()),
            name: "anything".into(),
        };
        assert!(policy.permits(&call));
        assert!(AccessPolicy::unrestricted().permits(&call));
    }

    #[test]
    fn policies_with_different_entries_differ() {
        let a = AccessPolicy::new("p").allow("String.trim");
        let b = AccessPolicy::new("p");
        assert_ne!(a, b);
    }
}
