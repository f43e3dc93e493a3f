//! File access used by the verifier to collect snapshot artifacts and clean
//! the shared working directory.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

/// Minimal async file system seam.
#[async_trait]
pub trait FileStore: Send + Sync + 'static {
    async fn exists(&self, path: &Path) -> bool;

    async fn read_text(&self, path: &Path) -> io::Result<String>;

    /// Immediate subdirectories of `dir`. A missing `dir` yields an empty list.
    async fn list_subdirectories(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Deletes `dir` and everything below it. A missing `dir` is not an error.
    async fn delete_recursive(&self, dir: &Path) -> io::Result<()>;
}

/// [`FileStore`] backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

#[async_trait]
impl FileStore for LocalFileStore {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_text(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn list_subdirectories(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut dirs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    async fn delete_recursive(&self, dir: &Path) -> io::Result<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
