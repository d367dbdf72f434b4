// Error types for the script cache and flow definitions

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CacheError>;

/// Failures of the cache machinery. None of these ever reach a workflow:
/// the cache degrades to an uncached compile instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Found classpath {} can't be cached because it isn't a library", .0.display())]
    NotALibrary(PathBuf),

    #[error("Script cache is corrupted. Libraries cache dir isn't exist - {}", .0.display())]
    Corrupted(PathBuf),

    #[error("Path {} cannot be expressed as a classpath URL", .0.display())]
    InvalidPath(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Adapter for `map_err` that remembers which path failed.
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| CacheError::Io { path, source }
    }
}

/// Producing a `Script` from source text.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Invalid program encoding: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid program: {0}")]
    Invalid(#[from] cps::EngineError),
}

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("{} references a location that is not inside {}", .script.display(), .checkout.display())]
    OutsideCheckout { script: PathBuf, checkout: PathBuf },

    #[error("Unable to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),
}
