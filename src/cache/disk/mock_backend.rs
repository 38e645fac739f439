//! Fault-injecting disk backend for testing
//!
//! Wraps the real tokio backend and fails selected operations on demand so
//! tests can observe how transactions behave on disk-full and rename errors.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs::File;

use super::backend::DiskBackend;
use super::error::DiskCacheError;
use super::tokio_backend::TokioFsBackend;
use super::types::{BodyIdentity, SpoolFile};

#[derive(Debug, Default)]
struct Faults {
    storage_full: bool,
    /// Fail renames whose target carries this extension
    fail_rename_to: Option<String>,
    renames: usize,
}

/// Backend that behaves like `TokioFsBackend` until told to fail
#[derive(Clone, Default)]
pub struct MockDiskBackend {
    inner: TokioFsBackend,
    faults: Arc<RwLock<Faults>>,
}

impl MockDiskBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every append fail with `StorageFull`
    pub fn set_storage_full(&self, enabled: bool) {
        self.faults.write().storage_full = enabled;
    }

    /// Make renames onto `*.{extension}` fail; `None` clears the fault
    pub fn fail_renames_to(&self, extension: Option<&str>) {
        self.faults.write().fail_rename_to = extension.map(str::to_string);
    }

    /// Number of successful renames so far
    pub fn rename_count(&self) -> usize {
        self.faults.read().renames
    }
}

#[async_trait]
impl DiskBackend for MockDiskBackend {
    async fn read_file(&self, path: &Path) -> Result<Bytes, DiskCacheError> {
        self.inner.read_file(path).await
    }

    async fn open_read(&self, path: &Path) -> Result<File, DiskCacheError> {
        self.inner.open_read(path).await
    }

    async fn write_file_atomic(
        &self,
        temp_dir: &Path,
        path: &Path,
        data: Bytes,
    ) -> Result<(), DiskCacheError> {
        if self.faults.read().storage_full {
            return Err(DiskCacheError::StorageFull);
        }
        self.inner.write_file_atomic(temp_dir, path, data).await
    }

    async fn create_spool(&self, dir: &Path) -> Result<SpoolFile, DiskCacheError> {
        self.inner.create_spool(dir).await
    }

    async fn append(&self, spool: &mut SpoolFile, data: &[u8]) -> Result<(), DiskCacheError> {
        if self.faults.read().storage_full {
            return Err(DiskCacheError::StorageFull);
        }
        self.inner.append(spool, data).await
    }

    async fn finish(&self, spool: &mut SpoolFile) -> Result<(), DiskCacheError> {
        self.inner.finish(spool).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), DiskCacheError> {
        let blocked = {
            let faults = self.faults.read();
            match (&faults.fail_rename_to, to.extension()) {
                (Some(wanted), Some(ext)) => ext.to_string_lossy() == wanted.as_str(),
                _ => false,
            }
        };
        if blocked {
            return Err(DiskCacheError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Simulated rename failure",
            )));
        }

        self.inner.rename(from, to).await?;
        self.faults.write().renames += 1;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<(), DiskCacheError> {
        self.inner.delete_file(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), DiskCacheError> {
        self.inner.create_dir_all(path).await
    }

    async fn file_identity(&self, file: &mut File) -> Result<(BodyIdentity, u64), DiskCacheError> {
        self.inner.file_identity(file).await
    }

    async fn modified(&self, path: &Path) -> Result<SystemTime, DiskCacheError> {
        self.inner.modified(path).await
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, DiskCacheError> {
        self.inner.read_dir(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<(), DiskCacheError> {
        self.inner.remove_dir_all(path).await
    }
}
