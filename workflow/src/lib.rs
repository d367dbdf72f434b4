// Workflow scripts on top of the `cps` engine
//
// Compiling a script is expensive and most jobs run the same script over and
// over. The artifact cache keeps one compiled template per (policy, source)
// and hands each run a private clone, with the shared libraries the first run
// loaded copied into the new run's directory.

pub mod cache;
pub mod config;
pub mod definition;
pub mod error;
pub mod execution;
pub mod policy;
pub mod runtime;
pub mod script;

pub use cache::{ArtifactCache, CacheEntry, CacheJanitor, CacheKey, CacheStats, CodeSource, SweepReport};
pub use config::CacheConfig;
pub use definition::FlowDefinition;
pub use error::{CacheError, CompileError, DefinitionError, Result};
pub use execution::{FlowExecution, JobOwner, RunAction, RunLog};
pub use policy::{AccessPolicy, SandboxInvoker};
pub use runtime::CpsRuntime;
pub use script::{compile_json, Binding, Script};
