//! Compiled-script cache.
//!
//! Maps `(access policy, code source)` to a template script plus the library
//! resources and run actions it needs. The first run compiling a source
//! installs the template; later runs get a private clone with the cached
//! libraries unpacked into their own directory.
//!
//! Reads go straight to the concurrent map. Only a miss takes a lock, and the
//! lock belongs to the job owner, so unrelated jobs never contend.

pub mod janitor;
pub mod libraries;

pub use janitor::{CacheJanitor, JanitorHandle, SweepReport};
pub use libraries::{
    ClasspathPartition, DirectoryLease, LibrariesCache, LibraryStore, Placement, PrefixPartition,
};

use crate::error::Result;
use crate::execution::{FlowExecution, JobOwner, RunAction};
use crate::policy::AccessPolicy;
use crate::script::{Binding, Script};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Identity of a piece of script source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeSource {
    text: String,
    name: String,
    cacheable: bool,
}

impl CodeSource {
    pub fn new(text: impl Into<String>, name: impl Into<String>, cacheable: bool) -> Self {
        CodeSource {
            text: text.into(),
            name: name.into(),
            cacheable,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }
}

/// Equal iff policy, text, name and cacheability are all equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    policy: AccessPolicy,
    source: CodeSource,
}

impl CacheKey {
    pub fn new(policy: AccessPolicy, source: CodeSource) -> Self {
        CacheKey { policy, source }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub fn source(&self) -> &CodeSource {
        &self.source
    }
}

/// A cached template. Never mutated once installed.
#[derive(Debug)]
pub struct CacheEntry {
    script: Script,
    actions: Vec<RunAction>,
    libraries: LibrariesCache,
}

impl CacheEntry {
    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn actions(&self) -> &[RunAction] {
        &self.actions
    }

    pub fn libraries(&self) -> &LibrariesCache {
        &self.libraries
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub population_failures: u64,
    pub size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, {} hits, {} misses, {} stores, {} evictions, {} population failures",
            self.size, self.hits, self.misses, self.stores, self.evictions, self.population_failures
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    population_failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// A job's miss lock. The map entry is dropped with the last handle, so the
/// map only holds jobs that are compiling right now.
struct OwnerLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for OwnerLock<'_> {
    fn drop(&mut self) {
        // One count for the map, one for this handle.
        self.locks
            .remove_if(&self.key, |_, lock| Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2);
    }
}

pub struct ArtifactCache {
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    owner_locks: DashMap<String, Arc<Mutex<()>>>,
    store: LibraryStore,
    partition: Arc<dyn ClasspathPartition>,
    capacity_hint: usize,
    counters: Counters,
}

impl ArtifactCache {
    pub fn new(store: LibraryStore, capacity_hint: usize) -> Self {
        ArtifactCache {
            entries: DashMap::with_capacity(capacity_hint),
            owner_locks: DashMap::new(),
            store,
            partition: Arc::new(PrefixPartition),
            capacity_hint,
            counters: Counters::default(),
        }
    }

    pub fn with_partition(mut self, partition: Arc<dyn ClasspathPartition>) -> Self {
        self.partition = partition;
        self
    }

    pub fn store(&self) -> &LibraryStore {
        &self.store
    }

    /// Returns a script for `source` compiled under `policy`, calling
    /// `producer` only when no usable template exists.
    ///
    /// The run that compiles gets the produced script itself. Every other run
    /// gets a clone bound to `binding` and `execution`, with the template's
    /// libraries copied into its directory and its actions replayed. Errors
    /// from `producer` are returned unchanged; cache failures are logged and
    /// degrade to an uncached compile.
    pub fn acquire_artifact<E, F>(
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
        let key = CacheKey::new(policy.clone(), source.clone());
        let log = execution.log();

        let existing = self.lookup(&key);
        let entry = match existing {
            Some(entry) => entry,
            None => {
                let owner = self.owner_lock(execution.owner());
                let _guard = owner.lock.lock().unwrap_or_else(PoisonError::into_inner);
                let rechecked = self.lookup(&key);
                match rechecked {
                    Some(entry) => entry,
                    None => {
                        bump(&self.counters.misses);
                        let script = producer()?;
                        match self.create_entry(execution, &script) {
                            Ok((entry, lease)) => {
                                log.println("Store script in cache");
                                self.install(key, entry);
                                drop(lease);
                            }
                            Err(err) => {
                                bump(&self.counters.population_failures);
                                tracing::warn!(script = %source.name(), "Not caching script: {}", err);
                            }
                        }
                        // The compiling run keeps its own artifact; nothing to clone.
                        return Ok(script);
                    }
                }
            }
        };

        log.println("Extract script from cache");
        match self.extract_entry(execution, binding, &entry) {
            Ok(script) => {
                bump(&self.counters.hits);
                Ok(script)
            }
            Err(err) => {
                tracing::warn!(script = %source.name(), "Clone script failed: {}", err);
                self.evict_entry(&key, &entry);
                producer()
            }
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    fn owner_lock(&self, owner: &JobOwner) -> OwnerLock<'_> {
        let key = owner.lock_key().to_string();
        let lock = Arc::clone(
            self.owner_locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        OwnerLock {
            locks: &self.owner_locks,
            key,
            lock,
        }
    }

    /// Jobs with a miss in flight.
    pub fn tracked_owners(&self) -> usize {
        self.owner_locks.len()
    }

    fn install(&self, key: CacheKey, entry: CacheEntry) {
        // Racing owners may both compile; the first template installed stays.
        match self.entries.entry(key) {
            Entry::Occupied(_) => {
                tracing::debug!("script already cached by another job");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entry));
            }
        }
        bump(&self.counters.stores);
        let size = self.entries.len();
        if size > self.capacity_hint {
            tracing::debug!(size, capacity_hint = self.capacity_hint, "script cache above capacity hint");
        }
    }

    fn create_entry(
        &self,
        execution: &FlowExecution,
        script: &Script,
    ) -> Result<(CacheEntry, Option<DirectoryLease>)> {
        let log = execution.log();
        log.println("Create script cache entry");
        let template = script.clone_script(Binding::new(), None);
        let action = execution.libraries_action();

        let (libraries, lease) = match &action {
            Some(RunAction::Libraries { names }) => {
                match self.store.cache_libraries(self.partition.as_ref(), execution, names) {
                    Ok(cached) => cached,
                    Err(err) => {
                        log.println(format!("Error during caching libraries: {}", err));
                        return Err(err);
                    }
                }
            }
            _ => (LibrariesCache::empty(), None),
        };

        Ok((
            CacheEntry {
                script: template,
                actions: action.into_iter().collect(),
                libraries,
            },
            lease,
        ))
    }

    fn extract_entry(
        &self,
        execution: &Arc<FlowExecution>,
        binding: Binding,
        entry: &CacheEntry,
    ) -> Result<Script> {
        for url in self.store.extract(&entry.libraries, execution)? {
            execution.add_classpath(url);
        }
        for action in &entry.actions {
            execution.add_action(action.clone());
        }
        Ok(entry.script.clone_script(binding, Some(Arc::clone(execution))))
    }

    /// Removes `key` only while it still maps to `entry`.
    fn evict_entry(&self, key: &CacheKey, entry: &Arc<CacheEntry>) {
        if self
            .entries
            .remove_if(key, |_, current| Arc::ptr_eq(current, entry))
            .is_some()
        {
            bump(&self.counters.evictions);
        }
    }

    pub fn evict(&self, key: &CacheKey) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            bump(&self.counters.evictions);
        }
        removed
    }

    /// Point-in-time copy of the entries.
    pub fn list_entries(&self) -> Vec<(CacheKey, Arc<CacheEntry>)> {
        self.entries
            .iter()
            .map(|item| (item.key().clone(), Arc::clone(item.value())))
            .collect()
    }

    /// Store directory ids referenced by live entries.
    pub fn referenced_directories(&self) -> HashSet<String> {
        self.entries
            .iter()
            .filter_map(|item| item.value().libraries.directory.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.owner_locks.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            population_failures: self.counters.population_failures.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}

impl fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("entries", &self.entries.len())
            .field("store", &self.store.root())
            .field("partition", &self.partition)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_differ_by_any_component() {
        let policy = AccessPolicy::new("sandbox");
        let base = CacheKey::new(policy.clone(), CodeSource::new("x", "Script1", true));
        assert_eq!(base, CacheKey::new(policy.clone(), CodeSource::new("x", "Script1", true)));
        assert_ne!(base, CacheKey::new(policy.clone(), CodeSource::new("y", "Script1", true)));
        assert_ne!(base, CacheKey::new(policy.clone(), CodeSource::new("x", "Script2", true)));
        assert_ne!(base, CacheKey::new(policy, CodeSource::new("x", "Script1", false)));
        assert_ne!(
            base,
            CacheKey::new(AccessPolicy::unrestricted(), CodeSource::new("x", "Script1", true))
        );
    }

    #[test]
    fn owner_locks_are_released_after_a_miss() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = ArtifactCache::new(LibraryStore::new(tmp.path().join("store")), 50);
        let policy = AccessPolicy::unrestricted();
        for job in ["a", "b", "c"] {
            let execution = Arc::new(FlowExecution::new(JobOwner::new(job), tmp.path().join(job)));
            let source = CodeSource::new(job, "WorkflowScript", true);
            cache
                .acquire_artifact(&policy, &source, Binding::new(), &execution, || {
                    let mut b = cps::Builder::new();
                    let root = b.constant(1i64);
                    b.finish(root).map(|program| Script::new("WorkflowScript", program))
                })
                .expect("compiled");
            assert_eq!(cache.tracked_owners(), 0);
        }

        let held = cache.owner_lock(&JobOwner::new("a"));
        let second = cache.owner_lock(&JobOwner::new("a"));
        drop(held);
        assert_eq!(cache.tracked_owners(), 1);
        drop(second);
        assert_eq!(cache.tracked_owners(), 0);
    }

    #[test]
    fn hit_rate_of_an_unused_cache_is_zero() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
    }
}
