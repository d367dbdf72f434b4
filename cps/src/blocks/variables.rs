// Variable reads, declarations and assignments

use super::{then, BlockId};
use crate::continuation::{Captured, Continuation, Step};
use crate::dispatch::{mismatch, ContinuationGroup, DispatchTag, Entry, Resume};
use crate::environment::Env;
use crate::error::EngineResult;
use crate::values::{Failure, Signal, Value};

pub const DECLARE: DispatchTag = DispatchTag::new(VariableGroup::NAME, "declare");
pub const ASSIGN: DispatchTag = DispatchTag::new(VariableGroup::NAME, "assign");

pub fn eval_local_var(name: &str, env: Env, k: Continuation) -> Step {
    match env.lookup(name) {
        Some(value) => Step::value(k, value),
        None => Step::thrown(k, Failure::missing_variable(name)),
    }
}

pub fn eval_declare(name: &str, init: Option<BlockId>, env: Env, k: Continuation) -> Step {
    match init {
        Some(init) => then(
            init,
            env,
            DECLARE,
            Captured::Declare {
                name: name.to_string(),
            },
            k,
        ),
        None => {
            env.declare(name, Value::Null);
            Step::value(k, Value::Null)
        }
    }
}

pub fn eval_assign(name: &str, value: BlockId, env: Env, k: Continuation) -> Step {
    then(
        value,
        env,
        ASSIGN,
        Captured::Assign {
            name: name.to_string(),
        },
        k,
    )
}

fn declare(r: Resume, signal: Signal) -> EngineResult<Step> {
    let name = match r.captured {
        Captured::Declare { name } => name,
        other => return Err(mismatch(DECLARE, &other)),
    };
    let Signal::Value(value) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    r.env.declare(&name, value.clone());
    Ok(Step::value(r.next, value))
}

fn assign(r: Resume, signal: Signal) -> EngineResult<Step> {
    let name = match r.captured {
        Captured::Assign { name } => name,
        other => return Err(mismatch(ASSIGN, &other)),
    };
    let Signal::Value(value) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    r.env.assign(&name, value.clone());
    Ok(Step::value(r.next, value))
}

pub struct VariableGroup;

impl ContinuationGroup for VariableGroup {
    const NAME: &'static str = "Variable";

    fn entries() -> Vec<(DispatchTag, Entry)> {
        vec![
            (DECLARE, Entry::values(declare)),
            (ASSIGN, Entry::values(assign)),
        ]
    }
}
