// `yield`: hands a request to the host and suspends until it answers.
// This is how a blocking external operation is expressed without blocking a worker.

use super::{then, BlockId};
use crate::continuation::{Captured, Continuation, Step};
use crate::dispatch::{mismatch, ContinuationGroup, DispatchTag, Entry, Resume};
use crate::environment::Env;
use crate::error::EngineResult;
use crate::values::Signal;

pub const REQUEST: DispatchTag = DispatchTag::new(SuspendGroup::NAME, "request");

pub fn eval_yield(request: BlockId, env: Env, k: Continuation) -> Step {
    then(request, env, REQUEST, Captured::Yield, k)
}

fn request(r: Resume, signal: Signal) -> EngineResult<Step> {
    match (r.captured, signal) {
        (Captured::Yield, Signal::Value(request)) => Ok(Step::Yield { request, k: r.next }),
        (Captured::Yield, thrown) => Ok(Step::resume(r.next, thrown)),
        (other, _) => Err(mismatch(REQUEST, &other)),
    }
}

pub struct SuspendGroup;

impl ContinuationGroup for SuspendGroup {
    const NAME: &'static str = "Suspend";

    fn entries() -> Vec<(DispatchTag, Entry)> {
        vec![(REQUEST, Entry::values(request))]
    }
}
