//! The sync root on local disk, seen through [`FileSystem`].
//!
//! Paths from the core are `/`-separated and relative to the root; they are
//! joined segment by segment so the platform separator never leaks into them.

use async_trait::async_trait;
use filesync_core::fs::{FileEntry, FileStat, FileSystem, FsError, Result};
use std::fs::Metadata;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tokio::fs;

pub struct NativeFs {
    root: PathBuf,
}

impl NativeFs {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |full, segment| full.join(segment))
    }
}

/// Attach the relative path to an io error while converting it.
trait IoContext<T> {
    fn at(self, path: &str) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &str) -> Result<T> {
        self.map_err(|e| match e.kind() {
            ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            ErrorKind::IsADirectory => FsError::IsDirectory(path.to_string()),
            ErrorKind::NotADirectory => FsError::NotDirectory(path.to_string()),
            _ => FsError::Io(format!("{}: {}", path, e)),
        })
    }
}

/// Modification time in ms since the epoch; 0 where the platform has none.
fn mtime_millis(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_millis() as u64)
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(path)).await.at(path)
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent().filter(|p| *p != self.root) {
            fs::create_dir_all(parent).await.at(path)?;
        }
        fs::write(&target, content).await.at(path)
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let mut dir = fs::read_dir(self.resolve(path)).await.at(path)?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await.at(path)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            // fs::metadata follows symlinks, so a linked directory is walked
            let is_dir = match fs::metadata(entry.path()).await {
                // Dangling link, or removed since read_dir
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                other => other.at(&name)?.is_dir(),
            };
            entries.push(FileEntry { name, is_dir });
        }

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path);
        if fs::metadata(&target).await.at(path)?.is_dir() {
            fs::remove_dir(&target).await.at(path)
        } else {
            fs::remove_file(&target).await.at(path)
        }
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let metadata = fs::metadata(self.resolve(path)).await.at(path)?;
        Ok(FileStat {
            mtime_millis: mtime_millis(&metadata),
            size: metadata.len(),
            is_dir: metadata.is_dir(),
        })
    }
}
