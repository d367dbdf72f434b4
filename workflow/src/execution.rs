//! The execution context a script runs in.
//!
//! A [`FlowExecution`] is one run of a job: it owns a private directory, the
//! trusted classpath its libraries were resolved onto, the actions recorded
//! against the run, and a [`RunLog`] that mirrors what an operator would see
//! in the run's console.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;
use uuid::Uuid;

/// Metadata recorded against a run. Libraries actions are replayed onto every
/// run that reuses a cached script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunAction {
    /// Shared libraries the script loaded, by logical name.
    Libraries { names: Vec<String> },
    Note(String),
}

/// Per-run console log.
#[derive(Debug, Clone, Default)]
pub struct RunLog(Arc<Mutex<Vec<String>>>);

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn println(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|line| line.contains(needle))
    }
}

/// The job a run belongs to. Runs of the same job serialize their cache
/// misses on this owner's lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobOwner {
    name: String,
}

impl JobOwner {
    pub fn new(name: impl Into<String>) -> Self {
        JobOwner { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock_key(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
pub struct FlowExecution {
    id: Uuid,
    owner: JobOwner,
    root_dir: PathBuf,
    trusted_classpath: Mutex<Vec<Url>>,
    actions: Mutex<Vec<RunAction>>,
    /// Calls the script made on internal types, by signature.
    internal_calls: Mutex<BTreeMap<String, u64>>,
    log: RunLog,
}

impl FlowExecution {
    pub fn new(owner: JobOwner, root_dir: impl Into<PathBuf>) -> Self {
        FlowExecution {
            id: Uuid::new_v4(),
            owner,
            root_dir: root_dir.into(),
            trusted_classpath: Mutex::new(Vec::new()),
            actions: Mutex::new(Vec::new()),
            internal_calls: Mutex::new(BTreeMap::new()),
            log: RunLog::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner(&self) -> &JobOwner {
        &self.owner
    }

    /// The run's private directory; libraries are unpacked under `libs/`.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn add_classpath(&self, url: Url) {
        self.trusted_classpath
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url);
    }

    pub fn trusted_classpath(&self) -> Vec<Url> {
        self.trusted_classpath
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn add_action(&self, action: RunAction) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }

    pub fn actions(&self) -> Vec<RunAction> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn record_internal_call(&self, signature: &str) {
        *self
            .internal_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(signature.to_string())
            .or_insert(0) += 1;
    }

    pub fn internal_calls(&self) -> BTreeMap<String, u64> {
        self.internal_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The first libraries action recorded on this run, if any.
    pub fn libraries_action(&self) -> Option<RunAction> {
        self.actions()
            .into_iter()
            .find(|action| matches!(action, RunAction::Libraries { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn libraries_action_skips_notes() {
        let execution = FlowExecution::new(JobOwner::new("job"), "/tmp/run");
        execution.add_action(RunAction::Note("started".into()));
        execution.add_action(RunAction::Libraries {
            names: vec!["shared".into()],
        });
        assert_eq!(
            execution.libraries_action(),
            Some(RunAction::Libraries {
                names: vec!["shared".into()]
            })
        );
    }

    #[test]
    fn run_log_is_shared_between_handles() {
        let log = RunLog::new();
        let alias = log.clone();
        alias.println("Store script in cache");
        assert!(log.contains("Store script"));
        assert_eq!(log.lines().len(), 1);
    }

    #[test]
    fn internal_calls_from_a_script_land_on_its_execution() {
        use cps::{Builder, DefaultInvoker, LoggingInvoker, Value};

        let execution = Arc::new(FlowExecution::new(JobOwner::new("job"), "/tmp/run"));
        let mut b = Builder::new();
        let first = b.call(None, "echo", vec![]);
        let second = b.call(None, "echo", vec![]);
        let text = b.constant("abc");
        let size = b.call(Some(text), "size", vec![]);
        let root = b.sequence(vec![first, second, size]);
        let script = crate::script::Script::new("Calls", b.finish(root).expect("valid"));

        let sink = Arc::clone(&execution);
        let invoker = LoggingInvoker::new(DefaultInvoker::new().with_function("echo", |_| Ok(Value::Null)))
            .with_recorder(move |sig| sink.record_internal_call(sig));
        assert_eq!(script.run(Arc::new(invoker)).completed(), Some(Value::Int(3)));
        assert_eq!(
            execution.internal_calls().into_iter().collect::<Vec<_>>(),
            vec![("Script.echo".to_string(), 2)]
        );
    }
}
