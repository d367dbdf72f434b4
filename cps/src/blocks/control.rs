// Control statements: if/else, while, sequences

use super::{then, BlockId};
use crate::continuation::{Captured, Continuation, Step};
use crate::dispatch::{mismatch, ContinuationGroup, DispatchTag, Entry, Resume};
use crate::environment::Env;
use crate::error::EngineResult;
use crate::values::{Signal, Value};

pub const BRANCH: DispatchTag = DispatchTag::new(ControlGroup::NAME, "branch");
pub const LOOP_TEST: DispatchTag = DispatchTag::new(ControlGroup::NAME, "loop_test");
pub const LOOP_BODY: DispatchTag = DispatchTag::new(ControlGroup::NAME, "loop_body");
pub const SEQUENCE: DispatchTag = DispatchTag::new(ControlGroup::NAME, "sequence");

pub fn eval_if(
    cond: BlockId,
    then_branch: BlockId,
    else_branch: Option<BlockId>,
    env: Env,
    k: Continuation,
) -> Step {
    then(
        cond,
        env,
        BRANCH,
        Captured::Branch {
            then_branch,
            else_branch,
        },
        k,
    )
}

pub fn eval_while(cond: BlockId, body: BlockId, env: Env, k: Continuation) -> Step {
    then(cond, env, LOOP_TEST, Captured::Loop { cond, body }, k)
}

/// Evaluates each block in order; the last one runs in tail position and
/// its value is the value of the sequence.
pub fn eval_sequence(body: &[BlockId], env: Env, k: Continuation) -> Step {
    match body {
        [] => Step::value(k, Value::Null),
        [only] => Step::eval(*only, env, k),
        [first, ..] => then(
            *first,
            env,
            SEQUENCE,
            Captured::Sequence {
                body: body.to_vec(),
                index: 1,
            },
            k,
        ),
    }
}

fn branch(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (then_branch, else_branch) = match r.captured {
        Captured::Branch {
            then_branch,
            else_branch,
        } => (then_branch, else_branch),
        other => return Err(mismatch(BRANCH, &other)),
    };
    let Signal::Value(cond) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    Ok(match (cond.truthy(), else_branch) {
        (true, _) => Step::eval(then_branch, r.env, r.next),
        (false, Some(else_branch)) => Step::eval(else_branch, r.env, r.next),
        (false, None) => Step::value(r.next, Value::Null),
    })
}

fn loop_test(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (cond, body) = match r.captured {
        Captured::Loop { cond, body } => (cond, body),
        other => return Err(mismatch(LOOP_TEST, &other)),
    };
    let Signal::Value(test) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    if test.truthy() {
        Ok(then(body, r.env, LOOP_BODY, Captured::Loop { cond, body }, r.next))
    } else {
        Ok(Step::value(r.next, Value::Null))
    }
}

fn loop_body(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (cond, body) = match r.captured {
        Captured::Loop { cond, body } => (cond, body),
        other => return Err(mismatch(LOOP_BODY, &other)),
    };
    if signal.is_thrown() {
        return Ok(Step::resume(r.next, signal));
    }
    Ok(then(cond, r.env, LOOP_TEST, Captured::Loop { cond, body }, r.next))
}

fn sequence(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (body, index) = match r.captured {
        Captured::Sequence { body, index } => (body, index),
        other => return Err(mismatch(SEQUENCE, &other)),
    };
    if signal.is_thrown() {
        return Ok(Step::resume(r.next, signal));
    }
    let Some(&current) = body.get(index) else {
        return Ok(Step::resume(r.next, signal));
    };
    if index + 1 == body.len() {
        return Ok(Step::eval(current, r.env, r.next));
    }
    Ok(then(
        current,
        r.env,
        SEQUENCE,
        Captured::Sequence {
            body,
            index: index + 1,
        },
        r.next,
    ))
}

pub struct ControlGroup;

impl ContinuationGroup for ControlGroup {
    const NAME: &'static str = "Control";

    fn entries() -> Vec<(DispatchTag, Entry)> {
        vec![
            (BRANCH, Entry::values(branch)),
            (LOOP_TEST, Entry::values(loop_test)),
            (LOOP_BODY, Entry::values(loop_body)),
            (SEQUENCE, Entry::values(sequence)),
        ]
    }
}
