//! A continuation-passing interpreter for workflow scripts.
//!
//! Programs are flat arenas of blocks. Evaluating a block never recurses on
//! the native stack: it returns the next [`Step`] and the [`Trampoline`]
//! drives steps until the run completes, fails, or parks at a `yield`.
//! Continuation frames name their resume entry by [`DispatchTag`], so a
//! parked run can be serialized with [`SuspensionSnapshot`] and resumed
//! elsewhere.

pub mod blocks;
pub mod continuation;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod invoker;
pub mod snapshot;
pub mod trampoline;
pub mod values;

pub use blocks::{Block, BlockId, Builder, CatchClause, Program};
pub use continuation::{Captured, Continuation, Frame, Step};
pub use dispatch::{ContinuationGroup, Delivery, DispatchTable, DispatchTag};
pub use environment::Env;
pub use error::{EngineError, EngineResult};
pub use invoker::{DefaultInvoker, Invocation, Invoker, LoggingInvoker};
pub use snapshot::SuspensionSnapshot;
pub use trampoline::{CancelToken, Outcome, Suspension, Trampoline};
pub use values::{kinds, Failure, Signal, Value};
