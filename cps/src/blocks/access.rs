//! Property, attribute and method access.
//!
//! Operands are evaluated through continuations; the access itself is not
//! performed here but returned as a [`Step::Invoke`] for the driver's
//! invoker, so host calls never run inside block evaluation.

use super::{then, BlockId};
use crate::continuation::{Captured, Continuation, Step};
use crate::dispatch::{mismatch, ContinuationGroup, DispatchTag, Entry, Resume};
use crate::environment::Env;
use crate::error::EngineResult;
use crate::invoker::Invocation;
use crate::values::{Failure, Signal, Value};

pub const PROPERTY: DispatchTag = DispatchTag::new(AccessGroup::NAME, "property");
pub const PROPERTY_STORE: DispatchTag = DispatchTag::new(AccessGroup::NAME, "property_store");
pub const STORE_RECEIVER: DispatchTag = DispatchTag::new(AccessGroup::NAME, "store_receiver");
pub const CALL_RECEIVER: DispatchTag = DispatchTag::new(AccessGroup::NAME, "call_receiver");
pub const CALL_ARGUMENT: DispatchTag = DispatchTag::new(AccessGroup::NAME, "call_argument");

pub fn eval_property(receiver: BlockId, name: &str, attribute: bool, env: Env, k: Continuation) -> Step {
    then(
        receiver,
        env,
        PROPERTY,
        Captured::Property {
            name: name.to_string(),
            attribute,
        },
        k,
    )
}

/// `target.name = value`: the invoker returns the updated receiver, which is
/// stored back into the `target` variable.
pub fn eval_set_property(
    target: &str,
    name: &str,
    value: BlockId,
    attribute: bool,
    env: Env,
    k: Continuation,
) -> Step {
    then(
        value,
        env,
        PROPERTY_STORE,
        Captured::PropertyStore {
            target: target.to_string(),
            name: name.to_string(),
            attribute,
        },
        k,
    )
}

pub fn eval_call(receiver: Option<BlockId>, method: &str, args: &[BlockId], env: Env, k: Continuation) -> Step {
    match receiver {
        Some(receiver) => then(
            receiver,
            env,
            CALL_RECEIVER,
            Captured::Call {
                method: method.to_string(),
                args: args.to_vec(),
                receiver: None,
                evaluated: Vec::new(),
            },
            k,
        ),
        // Calls without a receiver go to the script itself.
        None => next_argument(method.to_string(), args.to_vec(), Value::Null, Vec::new(), env, k),
    }
}

fn next_argument(
    method: String,
    args: Vec<BlockId>,
    receiver: Value,
    evaluated: Vec<Value>,
    env: Env,
    k: Continuation,
) -> Step {
    match args.get(evaluated.len()).copied() {
        None => Step::Invoke {
            call: Invocation::MethodCall {
                receiver,
                method,
                args: evaluated,
            },
            k,
        },
        Some(arg) => then(
            arg,
            env,
            CALL_ARGUMENT,
            Captured::Call {
                method,
                args,
                receiver: Some(receiver),
                evaluated,
            },
            k,
        ),
    }
}

fn property(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (name, attribute) = match r.captured {
        Captured::Property { name, attribute } => (name, attribute),
        other => return Err(mismatch(PROPERTY, &other)),
    };
    let Signal::Value(receiver) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    let call = if attribute {
        Invocation::GetAttribute { receiver, name }
    } else {
        Invocation::GetProperty { receiver, name }
    };
    Ok(Step::Invoke { call, k: r.next })
}

fn property_store(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (target, name, attribute) = match r.captured {
        Captured::PropertyStore {
            target,
            name,
            attribute,
        } => (target, name, attribute),
        other => return Err(mismatch(PROPERTY_STORE, &other)),
    };
    let Signal::Value(value) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    let Some(receiver) = r.env.lookup(&target) else {
        return Ok(Step::thrown(r.next, Failure::missing_variable(&target)));
    };
    let call = if attribute {
        Invocation::SetAttribute {
            receiver,
            name,
            value: value.clone(),
        }
    } else {
        Invocation::SetProperty {
            receiver,
            name,
            value: value.clone(),
        }
    };
    let k = Continuation::frame(
        STORE_RECEIVER,
        r.env,
        Captured::StoreReceiver { target, value },
        r.next,
    );
    Ok(Step::Invoke { call, k })
}

fn store_receiver(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (target, value) = match r.captured {
        Captured::StoreReceiver { target, value } => (target, value),
        other => return Err(mismatch(STORE_RECEIVER, &other)),
    };
    let Signal::Value(updated) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    r.env.assign(&target, updated);
    Ok(Step::value(r.next, value))
}

fn call_receiver(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (method, args, evaluated) = match r.captured {
        Captured::Call {
            method,
            args,
            evaluated,
            ..
        } => (method, args, evaluated),
        other => return Err(mismatch(CALL_RECEIVER, &other)),
    };
    let Signal::Value(receiver) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    Ok(next_argument(method, args, receiver, evaluated, r.env, r.next))
}

fn call_argument(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (method, args, receiver, mut evaluated) = match r.captured {
        Captured::Call {
            method,
            args,
            receiver,
            evaluated,
        } => (method, args, receiver.unwrap_or_default(), evaluated),
        other => return Err(mismatch(CALL_ARGUMENT, &other)),
    };
    let Signal::Value(arg) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    evaluated.push(arg);
    Ok(next_argument(method, args, receiver, evaluated, r.env, r.next))
}

pub struct AccessGroup;

impl ContinuationGroup for AccessGroup {
    const NAME: &'static str = "Access";

    fn entries() -> Vec<(DispatchTag, Entry)> {
        vec![
            (PROPERTY, Entry::values(property)),
            (PROPERTY_STORE, Entry::values(property_store)),
            (STORE_RECEIVER, Entry::values(store_receiver)),
            (CALL_RECEIVER, Entry::values(call_receiver)),
            (CALL_ARGUMENT, Entry::values(call_argument)),
        ]
    }
}
