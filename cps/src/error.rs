// Error handling for the CPS engine
//
// These are faults of the engine or of its inputs (programs, snapshots), never
// script-level failures; the latter are `Failure` values routed through continuations.

use crate::blocks::BlockId;
use crate::dispatch::DispatchTag;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no resume entry registered for {0}")]
    UnknownTag(DispatchTag),

    #[error("no continuation type registered as {group}.{method}")]
    UnknownEntry { group: String, method: String },

    #[error("captured state of kind {found} cannot resume {tag}")]
    CapturedMismatch { tag: DispatchTag, found: &'static str },

    #[error("block {block} referenced by block {parent} is out of order or outside the program (len {len})")]
    BlockOutOfRange {
        block: BlockId,
        parent: BlockId,
        len: usize,
    },

    #[error("program has no root block")]
    EmptyProgram,

    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
