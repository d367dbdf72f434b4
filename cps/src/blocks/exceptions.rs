//! `throw` and `try`/`catch`/`finally`.
//!
//! Failures are values delivered through the continuation chain. The frames
//! registered here are the only ones that intercept `Signal::Thrown`; every
//! other frame forwards it untouched.

use super::{then, BlockId, CatchClause};
use crate::continuation::{Captured, Continuation, Step};
use crate::dispatch::{mismatch, ContinuationGroup, DispatchTag, Entry, Resume};
use crate::environment::Env;
use crate::error::EngineResult;
use crate::values::{Failure, Signal};

pub const THROW: DispatchTag = DispatchTag::new(ExceptionGroup::NAME, "throw");
pub const GUARDED: DispatchTag = DispatchTag::new(ExceptionGroup::NAME, "guarded");
pub const HANDLER: DispatchTag = DispatchTag::new(ExceptionGroup::NAME, "handler");
pub const FINALLY: DispatchTag = DispatchTag::new(ExceptionGroup::NAME, "finally");

pub fn eval_throw(value: BlockId, env: Env, k: Continuation) -> Step {
    then(value, env, THROW, Captured::Throw, k)
}

pub fn eval_try(
    body: BlockId,
    catches: &[CatchClause],
    finally: Option<BlockId>,
    env: Env,
    k: Continuation,
) -> Step {
    then(
        body,
        env,
        GUARDED,
        Captured::Guarded {
            catches: catches.to_vec(),
            finally,
        },
        k,
    )
}

fn throw(r: Resume, signal: Signal) -> EngineResult<Step> {
    match (r.captured, signal) {
        (Captured::Throw, Signal::Value(v)) => Ok(Step::thrown(r.next, Failure::from_thrown(v))),
        (Captured::Throw, thrown) => Ok(Step::resume(r.next, thrown)),
        (other, _) => Err(mismatch(THROW, &other)),
    }
}

/// Runs `finally` (if any) before letting `pending` continue.
fn leave(finally: Option<BlockId>, pending: Signal, env: Env, next: Continuation) -> Step {
    match finally {
        Some(finally) => then(finally, env, FINALLY, Captured::Finally { pending }, next),
        None => Step::resume(next, pending),
    }
}

fn guarded(r: Resume, signal: Signal) -> EngineResult<Step> {
    let (catches, finally) = match r.captured {
        Captured::Guarded { catches, finally } => (catches, finally),
        other => return Err(mismatch(GUARDED, &other)),
    };
    let failure = match signal {
        Signal::Thrown(failure) => failure,
        normal => return Ok(leave(finally, normal, r.env, r.next)),
    };
    let clause = catches
        .iter()
        .find(|c| c.kind.as_deref().map_or(true, |kind| kind == failure.kind));
    match clause {
        Some(clause) => {
            let scope = r.env.child();
            scope.declare(&clause.var, failure.to_value());
            let k = Continuation::frame(HANDLER, r.env, Captured::Handler { finally }, r.next);
            Ok(Step::eval(clause.body, scope, k))
        }
        None => Ok(leave(finally, Signal::Thrown(failure), r.env, r.next)),
    }
}

fn handler(r: Resume, signal: Signal) -> EngineResult<Step> {
    match r.captured {
        Captured::Handler { finally } => Ok(leave(finally, signal, r.env, r.next)),
        other => Err(mismatch(HANDLER, &other)),
    }
}

fn finally(r: Resume, signal: Signal) -> EngineResult<Step> {
    let pending = match r.captured {
        Captured::Finally { pending } => pending,
        other => return Err(mismatch(FINALLY, &other)),
    };
    // A failure raised by the finally block replaces whatever was pending.
    Ok(match signal {
        Signal::Thrown(_) => Step::resume(r.next, signal),
        Signal::Value(_) => Step::resume(r.next, pending),
    })
}

pub struct ExceptionGroup;

impl ContinuationGroup for ExceptionGroup {
    const NAME: &'static str = "Exception";

    fn entries() -> Vec<(DispatchTag, Entry)> {
        vec![
            (THROW, Entry::values(throw)),
            (GUARDED, Entry::signals(guarded)),
            (HANDLER, Entry::signals(handler)),
            (FINALLY, Entry::signals(finally)),
        ]
    }
}
