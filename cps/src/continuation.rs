//! Continuations and steps: the trampoline protocol.
//!
//! Evaluation never returns a value directly. A block returns the next
//! [`Step`] to run, and the driver loop in [`crate::trampoline`] is the only
//! place that advances steps. A continuation is a linked chain of
//! [`Frame`]s, each naming the resume entry to call by [`DispatchTag`] and
//! carrying the minimal state that entry needs as plain data.

use crate::blocks::{BinaryOp, BlockId, CatchClause, LogicalOp};
use crate::dispatch::DispatchTag;
use crate::environment::Env;
use crate::invoker::Invocation;
use crate::values::{Signal, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single-use resumption capability. `Continuation::halt()` is the end of
/// the chain: delivering a signal to it terminates the run.
#[derive(Default)]
pub struct Continuation(Option<Box<Frame>>);

/// One pending resumption point.
pub struct Frame {
    pub tag: DispatchTag,
    pub env: Env,
    pub captured: Captured,
    pub next: Continuation,
}

impl Continuation {
    pub fn halt() -> Self {
        Continuation(None)
    }

    pub fn frame(tag: DispatchTag, env: Env, captured: Captured, next: Continuation) -> Self {
        Continuation(Some(Box::new(Frame {
            tag,
            env,
            captured,
            next,
        })))
    }

    pub fn is_halt(&self) -> bool {
        self.0.is_none()
    }

    /// Detaches the innermost frame, leaving this continuation empty.
    pub fn take_frame(&mut self) -> Option<Box<Frame>> {
        self.0.take()
    }

    pub fn peek(&self) -> Option<&Frame> {
        self.0.as_deref()
    }

    /// Number of frames in the chain.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.peek();
        while let Some(frame) = cursor {
            depth += 1;
            cursor = frame.next.peek();
        }
        depth
    }

    /// Tags of every frame, innermost first.
    pub fn tags(&self) -> Vec<DispatchTag> {
        let mut tags = Vec::new();
        let mut cursor = self.peek();
        while let Some(frame) = cursor {
            tags.push(frame.tag);
            cursor = frame.next.peek();
        }
        tags
    }
}

// Chains can be as deep as the program is nested; unlink them one frame at a
// time instead of letting `Box` drop recurse.
impl Drop for Continuation {
    fn drop(&mut self) {
        let mut pending = self.0.take();
        while let Some(mut frame) = pending {
            pending = frame.next.0.take();
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peek() {
            None => write!(f, "Halt"),
            Some(frame) => write!(f, "Continuation({} +{})", frame.tag, self.depth() - 1),
        }
    }
}

/// State captured by a frame. One variant per resumable point; each variant
/// holds only what its resume entry needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Captured {
    Logical {
        op: LogicalOp,
        rhs: BlockId,
    },
    Not,
    BinaryLhs {
        op: BinaryOp,
        rhs: BlockId,
    },
    BinaryRhs {
        op: BinaryOp,
        lhs: Value,
    },
    Declare {
        name: String,
    },
    Assign {
        name: String,
    },
    Branch {
        then_branch: BlockId,
        else_branch: Option<BlockId>,
    },
    Loop {
        cond: BlockId,
        body: BlockId,
    },
    Sequence {
        body: Vec<BlockId>,
        index: usize,
    },
    Property {
        name: String,
        attribute: bool,
    },
    PropertyStore {
        target: String,
        name: String,
        attribute: bool,
    },
    StoreReceiver {
        target: String,
        value: Value,
    },
    Call {
        method: String,
        args: Vec<BlockId>,
        receiver: Option<Value>,
        evaluated: Vec<Value>,
    },
    Throw,
    Guarded {
        catches: Vec<CatchClause>,
        finally: Option<BlockId>,
    },
    Handler {
        finally: Option<BlockId>,
    },
    Finally {
        pending: Signal,
    },
    Yield,
}

impl Captured {
    pub fn kind(&self) -> &'static str {
        match self {
            Captured::Logical { .. } => "logical",
            Captured::Not => "not",
            Captured::BinaryLhs { .. } => "binary_lhs",
            Captured::BinaryRhs { .. } => "binary_rhs",
            Captured::Declare { .. } => "declare",
            Captured::Assign { .. } => "assign",
            Captured::Branch { .. } => "branch",
            Captured::Loop { .. } => "loop",
            Captured::Sequence { .. } => "sequence",
            Captured::Property { .. } => "property",
            Captured::PropertyStore { .. } => "property_store",
            Captured::StoreReceiver { .. } => "store_receiver",
            Captured::Call { .. } => "call",
            Captured::Throw => "throw",
            Captured::Guarded { .. } => "guarded",
            Captured::Handler { .. } => "handler",
            Captured::Finally { .. } => "finally",
            Captured::Yield => "yield",
        }
    }
}

/// An explicit unit of future work.
#[derive(Debug)]
pub enum Step {
    /// Evaluate `block` in `env`, delivering its result to `k`.
    Eval {
        block: BlockId,
        env: Env,
        k: Continuation,
    },
    /// Deliver `signal` to `k`.
    Resume { k: Continuation, signal: Signal },
    /// Perform a host call through the invoker and deliver its result to `k`.
    Invoke { call: Invocation, k: Continuation },
    /// Suspend: hand `request` to the host, which resumes `k` later.
    Yield { request: Value, k: Continuation },
}

impl Step {
    pub fn eval(block: BlockId, env: Env, k: Continuation) -> Self {
        Step::Eval { block, env, k }
    }

    pub fn resume(k: Continuation, signal: Signal) -> Self {
        Step::Resume { k, signal }
    }

    pub fn value(k: Continuation, value: impl Into<Value>) -> Self {
        Step::Resume {
            k,
            signal: Signal::Value(value.into()),
        }
    }

    pub fn thrown(k: Continuation, failure: crate::values::Failure) -> Self {
        Step::Resume {
            k,
            signal: Signal::Thrown(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::logical;

    #[test]
    fn dropping_a_very_deep_chain_does_not_recurse() {
        let env = Env::new();
        let mut k = Continuation::halt();
        for _ in 0..200_000 {
            k = Continuation::frame(logical::DECIDE, env.clone(), Captured::Not, k);
        }
        assert_eq!(k.depth(), 200_000);
        let handle = std::thread::Builder::new()
            .stack_size(64 * 1024)
            .spawn(move || drop(k))
            .expect("spawn");
        handle.join().expect("drop on a small stack");
    }

    #[test]
    fn take_frame_leaves_halt_behind() {
        let mut k = Continuation::frame(
            logical::DECIDE,
            Env::new(),
            Captured::Not,
            Continuation::halt(),
        );
        let frame = k.take_frame().expect("frame");
        assert!(k.is_halt());
        assert_eq!(frame.tag, logical::DECIDE);
        assert!(frame.next.is_halt());
    }
}
