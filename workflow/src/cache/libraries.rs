//! Disk-backed store for shared-library resource trees.
//!
//! Layout: `<root>/<namespace>/<uuid>/<library>/...`. A directory is written
//! completely before any cache entry refers to it and is never modified
//! afterwards; only the janitor deletes it.

use crate::error::{CacheError, Result};
use crate::execution::FlowExecution;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use url::Url;
use uuid::Uuid;
use walkdir::WalkDir;

/// Resource roots exported onto the classpath of a run, when present.
const RESOURCE_ROOTS: [&str; 2] = ["src", "vars"];

/// Where a classpath entry of a run belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Shared location; recorded as-is.
    External,
    /// Inside the run's own copy of library `name`, rooted at `path`.
    Library { name: String, path: PathBuf },
}

/// Decides which classpath URLs of a run are its private library copies.
pub trait ClasspathPartition: Send + Sync + fmt::Debug {
    fn classify(&self, url: &Url, root_dir: &Path, libraries: &[String]) -> Result<Placement>;
}

/// Anything under the run's root directory is private and must lie under
/// `<root>/libs/<name>` for a declared library; everything else is external.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixPartition;

impl ClasspathPartition for PrefixPartition {
    fn classify(&self, url: &Url, root_dir: &Path, libraries: &[String]) -> Result<Placement> {
        let Ok(path) = url.to_file_path() else {
            return Ok(Placement::External);
        };
        if !path.starts_with(root_dir) {
            return Ok(Placement::External);
        }
        let libs = root_dir.join("libs");
        libraries
            .iter()
            .map(|name| (name, libs.join(name)))
            .filter(|(_, lib)| path.starts_with(lib))
            .max_by_key(|(_, lib)| lib.components().count())
            .map(|(name, lib)| Placement::Library {
                name: name.clone(),
                path: lib,
            })
            .ok_or(CacheError::NotALibrary(path))
    }
}

/// Library resources harvested for one cache entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibrariesCache {
    /// Store directory id, `None` when nothing was copied.
    pub directory: Option<String>,
    /// External classpath entries passed through unchanged.
    pub urls: Vec<Url>,
    pub library_names: BTreeSet<String>,
}

impl LibrariesCache {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Marks a store directory as being populated. The janitor leaves leased
/// directories alone; the lease is released on drop.
#[derive(Debug)]
pub struct DirectoryLease {
    id: String,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl DirectoryLease {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for DirectoryLease {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

#[derive(Debug, Clone)]
pub struct LibraryStore {
    root: PathBuf,
    pending: Arc<Mutex<HashSet<String>>>,
}

impl LibraryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LibraryStore {
            root: root.into(),
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Reserves a fresh directory id.
    pub fn lease(&self) -> DirectoryLease {
        let id = Uuid::new_v4().to_string();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone());
        DirectoryLease {
            id,
            pending: Arc::clone(&self.pending),
        }
    }

    pub fn pending(&self) -> HashSet<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(name, path)` of every child of the store root, directories and stray
    /// files alike. A missing root is empty.
    pub fn list_children(&self) -> Result<Vec<(String, PathBuf)>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::Io { path: self.root.clone(), source: e }),
        };
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(CacheError::io(&self.root))?;
            children.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
        children.sort();
        Ok(children)
    }

    /// Deletes the whole store.
    pub fn purge(&self) -> Result<()> {
        remove_tree(&self.root)
    }

    /// Copies every library of `names` found on the run's classpath into a new
    /// store directory. The returned lease must be held until the entry that
    /// refers to the directory is installed.
    pub fn cache_libraries(
        &self,
        partition: &dyn ClasspathPartition,
        execution: &FlowExecution,
        names: &[String],
    ) -> Result<(LibrariesCache, Option<DirectoryLease>)> {
        let lease = self.lease();
        let cache_dir = self.dir(lease.id());
        let mut urls = Vec::new();
        let mut cached = BTreeSet::new();

        for url in execution.trusted_classpath() {
            match partition.classify(&url, execution.root_dir(), names)? {
                Placement::External => urls.push(url),
                Placement::Library { name, path } => {
                    if cached.contains(&name) {
                        continue;
                    }
                    let target = cache_dir.join(&name);
                    execution.log().println(format!(
                        "Cache library {} to {}",
                        path.display(),
                        target.display()
                    ));
                    copy_tree(&path, &target)?;
                    cached.insert(name);
                }
            }
        }

        if cached.is_empty() {
            return Ok((
                LibrariesCache {
                    directory: None,
                    urls,
                    library_names: cached,
                },
                None,
            ));
        }
        Ok((
            LibrariesCache {
                directory: Some(lease.id().to_string()),
                urls,
                library_names: cached,
            },
            Some(lease),
        ))
    }

    /// Copies the cached libraries into the run's `libs/` directory and returns
    /// the classpath to add: external URLs, then each library's resource roots.
    pub fn extract(&self, libraries: &LibrariesCache, execution: &FlowExecution) -> Result<Vec<Url>> {
        let Some(directory) = &libraries.directory else {
            return Ok(libraries.urls.clone());
        };
        let cache_dir = self.dir(directory);
        if !cache_dir.is_dir() {
            let err = CacheError::Corrupted(cache_dir);
            execution.log().println(err.to_string());
            return Err(err);
        }

        let job_libs = execution.root_dir().join("libs");
        let mut urls = libraries.urls.clone();
        for name in &libraries.library_names {
            let cached = cache_dir.join(name);
            let target = job_libs.join(name);
            execution.log().println(format!(
                "Extract cached library from {} to {}",
                cached.display(),
                target.display()
            ));
            copy_tree(&cached, &target)?;
            for root in RESOURCE_ROOTS {
                let dir = target.join(root);
                if dir.is_dir() {
                    urls.push(directory_url(&dir)?);
                }
            }
        }
        Ok(urls)
    }
}

pub fn directory_url(path: &Path) -> Result<Url> {
    Url::from_directory_path(path).map_err(|_| CacheError::InvalidPath(path.to_path_buf()))
}

/// Recursively copies `from` into `to`, creating `to`. Returns the number of
/// files copied.
pub fn copy_tree(from: &Path, to: &Path) -> Result<u64> {
    fs::create_dir_all(to).map_err(CacheError::io(to))?;
    let mut copied = 0;
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.map_err(|e| CacheError::Io {
            path: from.to_path_buf(),
            source: e.into(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|_| CacheError::InvalidPath(entry.path().to_path_buf()))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(CacheError::io(&target))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(CacheError::io(parent))?;
            }
            fs::copy(entry.path(), &target).map_err(CacheError::io(entry.path()))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// `rm -rf`; an already missing tree is fine. Files and symlinks are unlinked.
pub(crate) fn remove_tree(path: &Path) -> Result<()> {
    let removed = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match removed {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::JobOwner;

    fn libs() -> Vec<String> {
        vec!["shared".to_string(), "shared-extra".to_string()]
    }

    #[test]
    fn urls_outside_the_run_are_external() {
        let root = Path::new("/runs/1");
        let url = Url::parse("https://repo.example/lib.jar").expect("url");
        assert_eq!(PrefixPartition.classify(&url, root, &libs()).expect("ok"), Placement::External);
        let url = Url::from_file_path("/opt/shared/lib.jar").expect("url");
        assert_eq!(PrefixPartition.classify(&url, root, &libs()).expect("ok"), Placement::External);
    }

    #[test]
    fn longest_matching_library_wins() {
        let root = Path::new("/runs/1");
        let url = Url::from_directory_path("/runs/1/libs/shared-extra/src").expect("url");
        let placement = PrefixPartition.classify(&url, root, &libs()).expect("ok");
        assert_eq!(
            placement,
            Placement::Library {
                name: "shared-extra".into(),
                path: PathBuf::from("/runs/1/libs/shared-extra"),
            }
        );
    }

    #[test]
    fn private_url_outside_libraries_is_not_cacheable() {
        let root = Path::new("/runs/1");
        let url = Url::from_directory_path("/runs/1/workspace/classes").expect("url");
        let err = PrefixPartition.classify(&url, root, &libs()).unwrap_err();
        assert!(matches!(err, CacheError::NotALibrary(_)));
    }

    #[test]
    fn copy_tree_preserves_nested_layout() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let from = tmp.path().join("from");
        fs::create_dir_all(from.join("src/org/example")).expect("mkdir");
        fs::write(from.join("src/org/example/Util.groovy"), "class Util {}").expect("write");
        fs::write(from.join("README"), "hi").expect("write");

        let to = tmp.path().join("to");
        assert_eq!(copy_tree(&from, &to).expect("copy"), 2);
        assert_eq!(
            fs::read_to_string(to.join("src/org/example/Util.groovy")).expect("read"),
            "class Util {}"
        );
    }

    #[test]
    fn lease_is_released_on_drop() {
        let store = LibraryStore::new("/nonexistent");
        let lease = store.lease();
        assert!(store.pending().contains(lease.id()));
        let id = lease.id().to_string();
        drop(lease);
        assert!(!store.pending().contains(&id));
    }

    #[test]
    fn library_without_resources_is_cached_but_exports_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = LibraryStore::new(tmp.path().join("store"));
        let run = tmp.path().join("run");
        fs::create_dir_all(run.join("libs/shared/resources")).expect("mkdir");
        fs::write(run.join("libs/shared/resources/data.txt"), "x").expect("write");
        let execution = FlowExecution::new(JobOwner::new("job"), &run);
        execution.add_classpath(directory_url(&run.join("libs/shared/resources")).expect("url"));

        let (cached, lease) = store
            .cache_libraries(&PrefixPartition, &execution, &["shared".to_string()])
            .expect("cached");
        assert!(lease.is_some());
        assert!(cached.urls.is_empty());

        let next = FlowExecution::new(JobOwner::new("job"), tmp.path().join("run2"));
        let urls = store.extract(&cached, &next).expect("extract");
        assert!(urls.is_empty());
        assert!(tmp.path().join("run2/libs/shared/resources/data.txt").is_file());
    }
}
