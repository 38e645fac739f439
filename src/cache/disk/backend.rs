//! Backend trait for filesystem operations

use super::error::DiskCacheError;
use super::types::{BodyIdentity, SpoolFile};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::File;

/// Abstraction over filesystem operations used by the store.
///
/// Commit safety relies on two properties of the implementation:
/// `rename` onto an existing name is atomic for readers, and a handle
/// returned by `open_read` keeps seeing the file it opened after the name
/// is renamed over.
#[async_trait]
pub trait DiskBackend: Send + Sync {
    /// Read entire file contents
    async fn read_file(&self, path: &Path) -> Result<Bytes, DiskCacheError>;

    /// Open a file for streaming reads
    async fn open_read(&self, path: &Path) -> Result<File, DiskCacheError>;

    /// Write file contents atomically (unique temp file in `temp_dir` + rename)
    async fn write_file_atomic(
        &self,
        temp_dir: &Path,
        path: &Path,
        data: Bytes,
    ) -> Result<(), DiskCacheError>;

    /// Create a uniquely named temp file in `dir`
    async fn create_spool(&self, dir: &Path) -> Result<SpoolFile, DiskCacheError>;

    /// Append bytes to a spool file
    async fn append(&self, spool: &mut SpoolFile, data: &[u8]) -> Result<(), DiskCacheError>;

    /// Flush a spool file's contents to stable storage
    async fn finish(&self, spool: &mut SpoolFile) -> Result<(), DiskCacheError>;

    /// Atomically rename `from` onto `to`, replacing any existing file
    async fn rename(&self, from: &Path, to: &Path) -> Result<(), DiskCacheError>;

    /// Delete a file; a missing file is not an error
    async fn delete_file(&self, path: &Path) -> Result<(), DiskCacheError>;

    /// Create directory and all parent directories
    async fn create_dir_all(&self, path: &Path) -> Result<(), DiskCacheError>;

    /// Identity and length of an open file. The identity must survive a
    /// rename of the file, so a header can be checked against its body.
    async fn file_identity(&self, file: &mut File) -> Result<(BodyIdentity, u64), DiskCacheError>;

    /// Last modification time
    async fn modified(&self, path: &Path) -> Result<SystemTime, DiskCacheError>;

    /// List all entries of a directory
    async fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, DiskCacheError>;

    /// Remove a directory tree
    async fn remove_dir_all(&self, path: &Path) -> Result<(), DiskCacheError>;
}
