//! Filesystem abstraction the catalog builder and sessions work through.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in filesync-daemon) - Uses tokio::fs
//!
//! All paths are relative to the synchronized root and use `/` as separator.
//! The empty path is the root itself.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl FsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FsError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// File metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    /// Modification time in milliseconds since epoch
    pub mtime_millis: u64,
    pub size: u64,
    pub is_dir: bool,
}

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Entry name within its directory (not a full path)
    pub name: String,
    pub is_dir: bool,
}

/// The filesystem operations sync needs: walk, hash, apply.
///
/// One filesystem is shared by every session and catalog build in the
/// process, hence `Send + Sync`.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Create or replace a file, creating missing parent directories.
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// Entries directly inside a directory, in no particular order.
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Remove a file or an empty directory.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn stat(&self, path: &str) -> Result<FileStat>;
}

enum Node {
    Dir,
    File { content: Vec<u8>, mtime_millis: u64 },
}

/// In-memory tree for tests.
///
/// Every write stamps a modification time strictly greater than the last,
/// so "newer" comparisons are deterministic even within one millisecond.
/// Reads are counted so tests can observe hash-cache hits.
#[derive(Default)]
pub struct InMemoryFs {
    /// Full path -> node; the root is implicit
    nodes: RwLock<BTreeMap<String, Node>>,
    clock: AtomicU64,
    reads: AtomicUsize,
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// Every proper ancestor of `path`, shallowest first, excluding the root.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(i, _)| &path[..i])
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn nodes(&self) -> RwLockReadGuard<'_, BTreeMap<String, Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn nodes_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Node>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a file or directory exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        let path = normalize(path);
        path.is_empty() || self.nodes().contains_key(path)
    }

    /// Create an empty directory and any missing ancestors.
    pub fn create_dir(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut nodes = self.nodes_mut();
        for dir in ancestors(path).chain(std::iter::once(path)) {
            match nodes.get(dir) {
                Some(Node::File { .. }) => return Err(FsError::NotDirectory(dir.to_string())),
                Some(Node::Dir) => {}
                None if dir.is_empty() => {}
                None => {
                    nodes.insert(dir.to_string(), Node::Dir);
                }
            }
        }
        Ok(())
    }

    /// Override a file's modification time. No-op for missing paths.
    pub fn set_mtime(&self, path: &str, mtime: u64) {
        if let Some(Node::File { mtime_millis, .. }) = self.nodes_mut().get_mut(normalize(path)) {
            *mtime_millis = mtime;
        }
    }

    /// Number of file reads performed so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn next_mtime(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut last = self.clock.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .clock
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path);
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.nodes().get(path) {
            Some(Node::File { content, .. }) => Ok(content.clone()),
            Some(Node::Dir) => Err(FsError::IsDirectory(path.to_string())),
            None if path.is_empty() => Err(FsError::IsDirectory(String::new())),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = normalize(path);
        if path.is_empty() {
            return Err(FsError::IsDirectory(String::new()));
        }
        if let Some(parent) = ancestors(path).last() {
            self.create_dir(parent)?;
        }

        let mtime_millis = self.next_mtime();
        let mut nodes = self.nodes_mut();
        if let Some(Node::Dir) = nodes.get(path) {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        nodes.insert(
            path.to_string(),
            Node::File {
                content: content.to_vec(),
                mtime_millis,
            },
        );
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = normalize(path);
        let nodes = self.nodes();
        match nodes.get(path) {
            Some(Node::Dir) => {}
            None if path.is_empty() => {}
            Some(Node::File { .. }) => return Err(FsError::NotDirectory(path.to_string())),
            None => return Err(FsError::NotFound(path.to_string())),
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        // Keys sharing the prefix are contiguous in the map
        let entries = nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, node)| {
                let name = &key[prefix.len()..];
                (!name.contains('/')).then(|| FileEntry {
                    name: name.to_string(),
                    is_dir: matches!(node, Node::Dir),
                })
            })
            .collect();
        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let mut nodes = self.nodes_mut();
        match nodes.get(path) {
            None => return Err(FsError::NotFound(path.to_string())),
            Some(Node::Dir) => {
                let prefix = format!("{}/", path);
                let has_children = nodes
                    .range(prefix.clone()..)
                    .next()
                    .is_some_and(|(key, _)| key.starts_with(&prefix));
                if has_children {
                    return Err(FsError::Io(format!("{}: directory not empty", path)));
                }
            }
            Some(Node::File { .. }) => {}
        }
        nodes.remove(path);
        Ok(())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = normalize(path);
        match self.nodes().get(path) {
            Some(Node::File {
                content,
                mtime_millis,
            }) => Ok(FileStat {
                mtime_millis: *mtime_millis,
                size: content.len() as u64,
                is_dir: false,
            }),
            Some(Node::Dir) => Ok(FileStat {
                mtime_millis: 0,
                size: 0,
                is_dir: true,
            }),
            None if path.is_empty() => Ok(FileStat {
                mtime_millis: 0,
                size: 0,
                is_dir: true,
            }),
            None => Err(FsError::NotFound(path.to_string())),
        }
    }
}

// Lets tests hand the same filesystem to a session and keep a handle to it.
#[async_trait]
impl<T: FileSystem + ?Sized> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }
}
