//! Filesystem seam used by the handlers

use bridge_protocol::DirEntry;
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Filesystem calls a handler may make
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait FileSystem: Send + Sync {
    /// Whether anything exists at `path`
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Create `path` and every missing parent
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Create `path` (parent must exist), failing with `AlreadyExists` if it does
    async fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Create or truncate `path` and write `contents`
    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Create `path` and write `contents`, failing with `AlreadyExists` if it
    /// is already there; the check and the create are one step
    async fn create_new(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Read `path` as UTF-8
    async fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Remove a file
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory and everything below it
    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Entries of a directory, in no particular order
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
}

/// [`FileSystem`] backed by `tokio::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

#[async_trait::async_trait]
impl FileSystem for TokioFileSystem {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        tokio::fs::try_exists(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_dir(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(path, contents).await
    }

    async fn create_new(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(contents).await?;
        file.flush().await
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        tokio::fs::read_to_string(path).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().to_string_lossy().into_owned(),
                is_directory: entry.file_type().await?.is_dir(),
            });
        }
        Ok(entries)
    }
}
