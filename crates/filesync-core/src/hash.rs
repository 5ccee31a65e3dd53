//! Content hashing with an mtime-validated memo.
//!
//! A file is only rehashed when its modification time differs from the one
//! recorded alongside its cached hash. Size and inode are not consulted, so a
//! rewrite that lands within the filesystem's timestamp resolution can be
//! missed until the next mtime change.

use crate::fs::{FileSystem, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::trace;

/// SHA-256 digest of a file's contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute hash from content bytes.
    pub fn from_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &hex::encode(self.0)[..12])
    }
}

/// A content hash and the modification time it was computed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub mtime_millis: u64,
    pub hash: ContentHash,
}

/// Memoizes content hashes keyed by path.
///
/// Shared by every catalog build over the same root. Entries are never
/// evicted; the cache grows with the number of distinct paths seen.
#[derive(Debug, Default)]
pub struct HashCache {
    entries: RwLock<HashMap<String, Fingerprint>>,
}

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint `path`, reading the file only on a miss or when its
    /// mtime no longer matches the cached entry.
    ///
    /// The returned mtime is the one the hash is keyed by, so a catalog built
    /// from it never pairs an old timestamp with new content.
    pub async fn get<F>(&self, fs: &F, path: &str) -> Result<Fingerprint>
    where
        F: FileSystem + ?Sized,
    {
        let stat = fs.stat(path).await?;
        if let Some(hash) = self.lookup(path, stat.mtime_millis) {
            return Ok(Fingerprint {
                mtime_millis: stat.mtime_millis,
                hash,
            });
        }

        let content = fs.read(path).await?;
        let hash = ContentHash::from_content(&content);
        trace!("Hashed {} ({} bytes): {}", path, content.len(), hash);

        let fingerprint = Fingerprint {
            mtime_millis: stat.mtime_millis,
            hash,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), fingerprint);
        Ok(fingerprint)
    }

    fn lookup(&self, path: &str, mtime_millis: u64) -> Option<ContentHash> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(path)
            .filter(|cached| cached.mtime_millis == mtime_millis)
            .map(|cached| cached.hash)
    }

    /// Number of paths with a cached hash.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
