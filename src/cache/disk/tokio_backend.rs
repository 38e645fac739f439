//! Tokio-based filesystem backend (portable, works on all platforms)

use super::backend::DiskBackend;
use super::error::DiskCacheError;
use super::types::{BodyIdentity, SpoolFile};
use crate::constants::{TEMPFILE_BASE, TEMPFILE_RAND_LEN};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Portable filesystem backend using tokio::fs
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioFsBackend;

impl TokioFsBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Map ENOSPC to `StorageFull` so callers can tell it from other I/O errors
fn classify(err: std::io::Error) -> DiskCacheError {
    if err.kind() == std::io::ErrorKind::StorageFull {
        DiskCacheError::StorageFull
    } else {
        DiskCacheError::Io(err)
    }
}

#[async_trait]
impl DiskBackend for TokioFsBackend {
    async fn read_file(&self, path: &Path) -> Result<Bytes, DiskCacheError> {
        let data = tokio::fs::read(path).await?;
        Ok(Bytes::from(data))
    }

    async fn open_read(&self, path: &Path) -> Result<File, DiskCacheError> {
        Ok(File::open(path).await?)
    }

    async fn write_file_atomic(
        &self,
        temp_dir: &Path,
        path: &Path,
        data: Bytes,
    ) -> Result<(), DiskCacheError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut spool = self.create_spool(temp_dir).await?;
        self.append(&mut spool, &data).await?;
        self.finish(&mut spool).await?;
        self.rename(spool.path(), path).await?;
        spool.disarm();

        Ok(())
    }

    async fn create_spool(&self, dir: &Path) -> Result<SpoolFile, DiskCacheError> {
        let dir = dir.to_path_buf();
        let named = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(TEMPFILE_BASE)
                .rand_bytes(TEMPFILE_RAND_LEN)
                .tempfile_in(dir)
        })
        .await
        .map_err(|e| DiskCacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
        .map_err(classify)?;
        let (file, path) = named.into_parts();
        Ok(SpoolFile::new(File::from_std(file), path))
    }

    async fn append(&self, spool: &mut SpoolFile, data: &[u8]) -> Result<(), DiskCacheError> {
        spool.file.write_all(data).await.map_err(classify)?;
        Ok(())
    }

    async fn finish(&self, spool: &mut SpoolFile) -> Result<(), DiskCacheError> {
        spool.file.flush().await.map_err(classify)?;
        spool.file.sync_all().await.map_err(classify)?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), DiskCacheError> {
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<(), DiskCacheError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> Result<(), DiskCacheError> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    #[cfg(unix)]
    async fn file_identity(&self, file: &mut File) -> Result<(BodyIdentity, u64), DiskCacheError> {
        let metadata = file.metadata().await?;
        Ok((BodyIdentity::from_metadata(&metadata), metadata.len()))
    }

    #[cfg(not(unix))]
    async fn file_identity(&self, file: &mut File) -> Result<(BodyIdentity, u64), DiskCacheError> {
        use std::io::SeekFrom;
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        file.seek(SeekFrom::Start(0)).await?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;
        file.seek(SeekFrom::Start(0)).await?;
        Ok((BodyIdentity::digest_of(&data), data.len() as u64))
    }

    async fn modified(&self, path: &Path) -> Result<SystemTime, DiskCacheError> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(metadata.modified()?)
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, DiskCacheError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        Ok(entries)
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<(), DiskCacheError> {
        tokio::fs::remove_dir_all(path).await?;
        Ok(())
    }
}
