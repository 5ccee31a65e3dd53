//! File catalogs: snapshots of a directory tree.
//!
//! A catalog lists every regular file under the synchronized root with its
//! modification time and content hash. Catalogs are built by walking a
//! [`FileSystem`] and are never mutated afterwards; each walk yields a new one.

use crate::fs::{FileSystem, Result};
use crate::hash::{ContentHash, HashCache};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Directory names whose contents are never synchronized.
pub const VCS_MARKERS: &[&str] = &[".git", ".svn", ".hg"];

/// One file in a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    /// Path relative to the root, `/`-separated, no leading slash
    pub path: String,
    /// Modification time in milliseconds since epoch
    pub mod_time: u64,
    pub content_hash: ContentHash,
}

/// Snapshot of a directory tree, in walk order.
///
/// Paths are unique within a catalog. Deserialization goes through
/// [`FromIterator`], so a peer catalog that repeats a path keeps its first
/// entry only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FileCatalog {
    files: Vec<FileDescriptor>,
}

impl FileCatalog {
    /// An empty catalog (nothing seen yet).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.files.iter()
    }

    /// Look up a descriptor by path. Linear scan; use [`FileCatalog::index`]
    /// for repeated lookups.
    pub fn get(&self, path: &str) -> Option<&FileDescriptor> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Index descriptors by path.
    pub fn index(&self) -> HashMap<&str, &FileDescriptor> {
        self.files.iter().map(|f| (f.path.as_str(), f)).collect()
    }
}

impl FromIterator<FileDescriptor> for FileCatalog {
    /// Collect descriptors, keeping the first occurrence of any duplicate path.
    fn from_iter<I: IntoIterator<Item = FileDescriptor>>(iter: I) -> Self {
        let mut seen = std::collections::HashSet::new();
        let files = iter
            .into_iter()
            .filter(|f| seen.insert(f.path.clone()))
            .collect();
        Self { files }
    }
}

impl<'de> Deserialize<'de> for FileCatalog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let files = Vec::<FileDescriptor>::deserialize(deserializer)?;
        Ok(files.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FileCatalog {
    type Item = &'a FileDescriptor;
    type IntoIter = std::slice::Iter<'a, FileDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Whether a relative path passes through a version-control metadata directory.
pub fn is_vcs_path(path: &str) -> bool {
    path.split('/').any(|segment| VCS_MARKERS.contains(&segment))
}

/// Join a relative directory and an entry name into a `/`-separated path.
fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Walks a filesystem root and produces catalogs.
///
/// Owns the [`HashCache`] so unchanged files are not rehashed between cycles.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    cache: HashCache,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &HashCache {
        &self.cache
    }

    /// Walk the whole tree and return a fresh catalog.
    ///
    /// Fails if the root is missing or any directory cannot be listed, or if
    /// a file disappears between listing and hashing.
    pub async fn build<F>(&self, fs: &F) -> Result<FileCatalog>
    where
        F: FileSystem + ?Sized,
    {
        let mut files = Vec::new();
        let mut pending = vec![String::new()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs.list(&dir).await?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));

            let mut subdirs = Vec::new();
            for entry in entries {
                if VCS_MARKERS.contains(&entry.name.as_str()) {
                    continue;
                }
                let path = join(&dir, &entry.name);
                if entry.is_dir {
                    subdirs.push(path);
                    continue;
                }

                let fingerprint = self.cache.get(fs, &path).await?;
                files.push(FileDescriptor {
                    path,
                    mod_time: fingerprint.mtime_millis,
                    content_hash: fingerprint.hash,
                });
            }
            // Stack: push in reverse so subdirectories are visited by name
            pending.extend(subdirs.into_iter().rev());
        }

        debug!("Built catalog with {} file(s)", files.len());
        Ok(FileCatalog { files })
    }
}
