//! Periodic cleanup of unreferenced library directories.
//!
//! Runs as a background task that periodically sweeps the library store and
//! deletes every child no live cache entry refers to, stray files included. With caching
//! disabled the whole store is removed. A missed sweep only wastes disk.

use super::libraries::{remove_tree, LibraryStore};
use super::ArtifactCache;
use crate::error::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub kept: Vec<String>,
    pub deleted: Vec<PathBuf>,
    /// The whole store was removed because caching is disabled.
    pub purged: bool,
}

#[derive(Debug, Clone)]
pub struct CacheJanitor {
    store: LibraryStore,
    /// `None` when caching is disabled.
    cache: Option<Arc<ArtifactCache>>,
    period: Duration,
}

impl CacheJanitor {
    pub fn new(store: LibraryStore, cache: Option<Arc<ArtifactCache>>, period: Duration) -> Self {
        Self { store, cache, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn sweep(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let Some(cache) = &self.cache else {
            tracing::info!("Cache is disabled, clean all libraries cached");
            self.store.purge()?;
            report.purged = true;
            return Ok(report);
        };

        // Order matters: a directory listed here is either still leased, or
        // its lease was released after the owning entry was installed.
        let children = self.store.list_children()?;
        let pending = self.store.pending();
        let referenced = cache.referenced_directories();

        for (id, path) in children {
            if referenced.contains(&id) || pending.contains(&id) {
                report.kept.push(id);
                continue;
            }
            tracing::info!("Delete library not existed in cache - {}", path.display());
            remove_tree(&path)?;
            report.deleted.push(path);
        }
        Ok(report)
    }

    /// Run the sweep loop until `shutdown` flips to `true` or its sender is
    /// dropped. The first sweep happens one period after start.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let janitor = self.clone();
                    match tokio::task::spawn_blocking(move || janitor.sweep()).await {
                        Ok(Ok(report)) => tracing::debug!(
                            kept = report.kept.len(),
                            deleted = report.deleted.len(),
                            purged = report.purged,
                            "library cache sweep finished"
                        ),
                        Ok(Err(e)) => tracing::warn!("Library cache sweep failed: {}", e),
                        Err(e) => tracing::warn!("Library cache sweep panicked: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("library cache janitor stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Spawns [`CacheJanitor::run`] on the current tokio runtime.
    pub fn spawn(self) -> JanitorHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        JanitorHandle { shutdown, task }
    }
}

#[derive(Debug)]
pub struct JanitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Library cache janitor did not stop cleanly: {}", e);
        }
    }
}
