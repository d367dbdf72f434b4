//! Logical operators (`&&` and `||`).
//!
//! `lhs` is evaluated first; the decision frame then either short-circuits
//! with a boolean or evaluates `rhs` in tail position, so its value becomes
//! the value of the whole expression.

use super::{then, BlockId, LogicalOp};
use crate::continuation::{Captured, Continuation, Step};
use crate::dispatch::{mismatch, ContinuationGroup, DispatchTag, Entry, Resume};
use crate::environment::Env;
use crate::error::EngineResult;
use crate::values::Signal;

pub const DECIDE: DispatchTag = DispatchTag::new(LogicalGroup::NAME, "decide");

pub fn eval(op: LogicalOp, lhs: BlockId, rhs: BlockId, env: Env, k: Continuation) -> Step {
    then(lhs, env, DECIDE, Captured::Logical { op, rhs }, k)
}

fn decide(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (op, rhs) = match r.captured {
        Captured::Logical { op, rhs } => (op, rhs),
        other => return Err(mismatch(DECIDE, &other)),
    };
    let Signal::Value(lhs) = signal else {
        return Ok(Step::resume(r.next, signal));
    };
    let v = lhs.truthy();
    Ok(match op {
        LogicalOp::And if !v => Step::value(r.next, false), // false && ...
        LogicalOp::Or if v => Step::value(r.next, true),    // true || ...
        _ => Step::eval(rhs, r.env, r.next),
    })
}

pub struct LogicalGroup;

impl ContinuationGroup for LogicalGroup {
    const NAME: &'static str = "LogicalOp";

    fn entries() -> Vec<(DispatchTag, Entry)> {
        vec![(DECIDE, Entry::values(decide))]
    }
}
