//! Spill files for request data that should not stay in memory.
//!
//! Every session owns one [`TempFileManager`], created by the server's
//! [`TempFileManagerFactory`] when the connection is accepted. The session
//! clears it after each request and once more when the connection ends, so a
//! spill file never outlives the request that produced it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tracing::{trace, warn};

/// A freshly created, empty, writable temp file.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    file: File,
}

impl TempFile {
    pub fn new(path: PathBuf, file: File) -> Self {
        Self { path, file }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn into_parts(self) -> (PathBuf, File) {
        (self.path, self.file)
    }
}

/// Hands out temp files for one session and deletes them again on [`clear`](TempFileManager::clear).
#[async_trait]
pub trait TempFileManager: Send {
    /// Creates a new temp file that is tracked until the next `clear`.
    async fn create(&mut self) -> io::Result<TempFile>;

    /// Deletes every file created since the last `clear`.
    async fn clear(&mut self);
}

/// Creates the [`TempFileManager`] of each new session.
pub trait TempFileManagerFactory: Send + Sync {
    fn create(&self) -> Box<dyn TempFileManager>;
}

impl<F, M> TempFileManagerFactory for F
where
    F: Fn() -> M + Send + Sync,
    M: TempFileManager + 'static,
{
    fn create(&self) -> Box<dyn TempFileManager> {
        Box::new(self())
    }
}

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

/// Creates files named `nano-http-<pid>-<n>.tmp` in a directory.
#[derive(Debug)]
pub struct DefaultTempFileManager {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl DefaultTempFileManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), files: Vec::new() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files currently tracked.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for DefaultTempFileManager {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

#[async_trait]
impl TempFileManager for DefaultTempFileManager {
    async fn create(&mut self) -> io::Result<TempFile> {
        let id = NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed);
        let path = self.dir.join(format!("nano-http-{}-{id}.tmp", std::process::id()));

        let file = OpenOptions::new().read(true).write(true).create_new(true).open(&path).await?;
        trace!(path = %path.display(), "created temp file");

        self.files.push(path.clone());
        Ok(TempFile::new(path, file))
    }

    async fn clear(&mut self) {
        for path in self.files.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => trace!(path = %path.display(), "removed temp file"),
                // the handler may have moved the file away
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), cause = %e, "failed to remove temp file"),
            }
        }
    }
}

/// Gives every session a [`DefaultTempFileManager`] over the same directory.
#[derive(Debug, Clone)]
pub struct DefaultTempFileManagerFactory {
    dir: PathBuf,
}

impl DefaultTempFileManagerFactory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for DefaultTempFileManagerFactory {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl TempFileManagerFactory for DefaultTempFileManagerFactory {
    fn create(&self) -> Box<dyn TempFileManager> {
        Box::new(DefaultTempFileManager::new(self.dir.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn clear_removes_created_files() {
        let mut manager = DefaultTempFileManager::default();

        let mut first = manager.create().await.unwrap();
        first.file_mut().write_all(b"spilled").await.unwrap();
        first.file_mut().flush().await.unwrap();
        let second = manager.create().await.unwrap();

        assert_ne!(first.path(), second.path());
        assert_eq!(manager.len(), 2);
        assert!(first.path().exists());

        let paths = [first.path().to_path_buf(), second.path().to_path_buf()];
        drop(first);
        drop(second);

        manager.clear().await;
        assert!(manager.is_empty());
        for path in paths {
            assert!(!path.exists());
        }
    }

    #[tokio::test]
    async fn clear_tolerates_missing_files() {
        let mut manager = DefaultTempFileManager::default();
        let file = manager.create().await.unwrap();
        let (path, file) = file.into_parts();
        drop(file);
        tokio::fs::remove_file(&path).await.unwrap();

        manager.clear().await;
        assert!(manager.is_empty());
    }

    #[test]
    fn closures_are_factories() {
        let factory = || DefaultTempFileManager::new(std::env::temp_dir());
        let _manager: Box<dyn TempFileManager> = TempFileManagerFactory::create(&factory);
    }
}
