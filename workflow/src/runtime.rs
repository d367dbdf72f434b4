//! Process-wide runtime context.
//!
//! Owns the artifact cache (present only when caching is enabled) and its
//! janitor. Consumers receive the cache through this context instead of a
//! global.

use crate::cache::{ArtifactCache, CacheJanitor, CodeSource, JanitorHandle, LibraryStore, SweepReport};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::execution::FlowExecution;
use crate::policy::AccessPolicy;
use crate::script::{Binding, Script};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug)]
pub struct CpsRuntime {
    config: CacheConfig,
    store: LibraryStore,
    cache: Option<Arc<ArtifactCache>>,
    janitor: Mutex<Option<JanitorHandle>>,
}

impl CpsRuntime {
    pub fn new(config: CacheConfig) -> Self {
        let store = LibraryStore::new(config.library_root());
        let cache = config
            .enabled
            .then(|| Arc::new(ArtifactCache::new(store.clone(), config.capacity_hint)));
        tracing::info!(
            enabled = config.enabled,
            store = %store.root().display(),
            "script cache initialised"
        );
        CpsRuntime {
            config,
            store,
            cache,
            janitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&Arc<ArtifactCache>> {
        self.cache.as_ref()
    }

    pub fn janitor(&self) -> CacheJanitor {
        CacheJanitor::new(self.store.clone(), self.cache.clone(), self.config.janitor_period)
    }

    /// Loads a script through the cache, or straight from `producer` when
    /// caching is disabled.
    pub fn load_script<E, F>(
        &self,
        policy: &AccessPolicy,
        source: &CodeSource,
        binding: Binding,
        execution: &Arc<FlowExecution>,
        producer: F,
    ) -> std::result::Result<Script, E>
    where
        F: FnOnce() -> std::result::Result<Script, E>,
    {
        match &self.cache {
            Some(cache) => cache.acquire_artifact(policy, source, binding, execution, producer),
            None => producer(),
        }
    }

    /// Starts the periodic janitor. Must be called inside a tokio runtime;
    /// a second call while one is running does nothing.
    pub fn start_janitor(&self) {
        let mut slot = self.janitor.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(self.janitor().spawn());
        }
    }

    pub fn sweep_now(&self) -> Result<SweepReport> {
        self.janitor().sweep()
    }

    /// Stops the janitor and drops every cache entry.
    pub async fn shutdown(&self) {
        let handle = self
            .janitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}
