//! The driver loop.
//!
//! [`Trampoline::run`] repeatedly takes a [`Step`] and advances it by one
//! unit: evaluating a block, delivering a signal to a frame, or performing a
//! host call. Native stack depth stays constant no matter how deeply the
//! program nests. Between steps the loop checks for cancellation and an
//! optional step budget.

use crate::blocks::Program;
use crate::continuation::{Continuation, Step};
use crate::dispatch::{Delivery, DispatchTable};
use crate::invoker::Invoker;
use crate::values::{kinds, Failure, Signal, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, observed between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A run parked at a `yield`, waiting for the host's answer.
#[derive(Debug)]
pub struct Suspension {
    pub request: Value,
    pub k: Continuation,
}

impl Suspension {
    pub fn resume(self, value: impl Into<Value>) -> Step {
        Step::value(self.k, value)
    }

    pub fn resume_with_failure(self, failure: Failure) -> Step {
        Step::thrown(self.k, failure)
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    Completed(Value),
    Failed(Failure),
    Suspended(Suspension),
    Cancelled,
    /// The step budget ran out; run the returned step to continue.
    OutOfBudget(Step),
}

impl Outcome {
    pub fn completed(self) -> Option<Value> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }

    pub fn failed(self) -> Option<Failure> {
        match self {
            Outcome::Failed(f) => Some(f),
            _ => None,
        }
    }

    pub fn suspended(self) -> Option<Suspension> {
        match self {
            Outcome::Suspended(s) => Some(s),
            _ => None,
        }
    }
}

pub struct Trampoline {
    program: Arc<Program>,
    table: Arc<DispatchTable>,
    invoker: Arc<dyn Invoker>,
    cancel: CancelToken,
    budget: Option<u64>,
}

impl Trampoline {
    pub fn new(program: Arc<Program>, invoker: Arc<dyn Invoker>) -> Self {
        Trampoline {
            program,
            table: Arc::new(DispatchTable::standard()),
            invoker,
            cancel: CancelToken::new(),
            budget: None,
        }
    }

    pub fn with_table(mut self, table: Arc<DispatchTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bounds each `run` call to `steps` steps.
    pub fn with_budget(mut self, steps: u64) -> Self {
        self.budget = Some(steps);
        self
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn table(&self) -> &Arc<DispatchTable> {
        &self.table
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The step that evaluates the program root in `env`.
    pub fn start(&self, env: crate::environment::Env) -> Step {
        Step::eval(self.program.root(), env, Continuation::halt())
    }

    pub fn run(&self, mut step: Step) -> Outcome {
        let mut taken: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!(steps = taken, "run cancelled");
                return Outcome::Cancelled;
            }
            if let Some(budget) = self.budget {
                if taken >= budget {
                    return Outcome::OutOfBudget(step);
                }
            }
            taken += 1;

            step = match step {
                Step::Eval { block, env, k } => self.program.evaluate(block, env, k),
                Step::Resume { k, signal } => match self.table.deliver(k, signal) {
                    Ok(Delivery::Next(next)) => next,
                    Ok(Delivery::Halted(Signal::Value(v))) => return Outcome::Completed(v),
                    Ok(Delivery::Halted(Signal::Thrown(f))) => {
                        tracing::debug!(kind = %f.kind, message = %f.message, "uncaught failure");
                        return Outcome::Failed(f);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "engine fault");
                        return Outcome::Failed(Failure::new(kinds::ENGINE_FAULT, err.to_string()));
                    }
                },
                Step::Invoke { call, k } => match self.invoker.invoke(&call) {
                    Ok(v) => Step::value(k, v),
                    Err(f) => Step::thrown(k, f),
                },
                Step::Yield { request, k } => {
                    tracing::debug!(steps = taken, request = %request, "suspended");
                    return Outcome::Suspended(Suspension { request, k });
                }
            };
        }
    }
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trampoline")
            .field("blocks", &self.program.len())
            .field("budget", &self.budget)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
