//! Write transaction: staged creation or replacement of one entry
//!
//! ```text
//! Open ──write_body──▶ Buffering ──commit──▶ Committed
//!   │                      │
//!   └──────abort / error───┴──────────────▶ Aborted
//! ```
//!
//! Body bytes are set aside in memory and spilled to a temp data file once
//! `readsize` bytes are held or `readtime` has elapsed since the first held
//! byte. Commit moves the body to a data file named after its identity,
//! which no live header references yet, then renames the header into
//! place. That header rename is the only step readers can observe. A
//! changed vary record is published after it, and superseded files are
//! removed last. Any failure drops the temp files and leaves the
//! previously live entry alone.

use bytes::{Bytes, BytesMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use super::backend::DiskBackend;
use super::header::{self, HeaderRecord};
use super::path_mapper::EntryPaths;
use super::types::{BodyIdentity, CacheFile, SpoolFile};
use super::vary::VariantIndex;
use crate::cache::config::EntryLimits;
use crate::cache::stats::CacheCounters;
use crate::cache::{CacheControl, CacheError, CacheKey, RejectReason, ResponseMeta};
use crate::constants::DISK_FORMAT_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Buffering,
    Committed,
    Aborted,
}

/// Everything the store decided before the first body byte arrives
#[derive(Debug)]
pub(crate) struct TransactionPlan {
    pub key: CacheKey,
    pub paths: EntryPaths,
    pub meta: ResponseMeta,
    pub limits: EntryLimits,
    /// Version the new header will carry
    pub entity_version: u64,
    /// Vary record to publish once the entry is live, when it changed
    pub vary: Option<(PathBuf, VariantIndex)>,
    /// Files made stale by this store, removed after commit
    pub obsolete: Vec<PathBuf>,
}

/// In-flight store of one response
pub struct WriteTransaction {
    backend: Arc<dyn DiskBackend>,
    counters: Arc<CacheCounters>,
    root: PathBuf,
    plan: TransactionPlan,
    state: TransactionState,
    buffer: BytesMut,
    buffered_since: Option<Instant>,
    body_len: u64,
    data: Option<SpoolFile>,
    header: CacheFile,
}

impl std::fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("key", &self.plan.key)
            .field("state", &self.state)
            .field("body_len", &self.body_len)
            .field("entity_version", &self.plan.entity_version)
            .finish()
    }
}

impl WriteTransaction {
    /// Allocate the temp files under `root` and enter the Open state
    pub(crate) async fn begin(
        backend: Arc<dyn DiskBackend>,
        counters: Arc<CacheCounters>,
        root: PathBuf,
        plan: TransactionPlan,
    ) -> Result<Self, CacheError> {
        let data = if plan.meta.header_only {
            None
        } else {
            Some(backend.create_spool(&root).await?)
        };
        let header = CacheFile::with_temp(plan.paths.header.clone(), backend.create_spool(&root).await?);

        tracing::debug!(
            key = %plan.key,
            entity_version = plan.entity_version,
            "Opened write transaction"
        );

        Ok(Self {
            backend,
            counters,
            root,
            plan,
            state: TransactionState::Open,
            buffer: BytesMut::new(),
            buffered_since: None,
            body_len: 0,
            data,
            header,
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.plan.key
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Version the entry will have once committed
    pub fn entity_version(&self) -> u64 {
        self.plan.entity_version
    }

    /// Body bytes received so far
    pub fn body_len(&self) -> u64 {
        self.body_len
    }

    /// Bytes currently held in memory
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append a body chunk. Exceeding `maxfs` rejects the store; a write
    /// error aborts it. Either way the transaction is finished afterwards.
    pub async fn write_body(&mut self, chunk: Bytes) -> Result<(), CacheError> {
        self.ensure_active()?;
        if self.plan.meta.header_only || chunk.is_empty() {
            return Ok(());
        }

        self.state = TransactionState::Buffering;
        self.body_len += chunk.len() as u64;
        if self.body_len > self.plan.limits.maxfs {
            let reason = RejectReason::TooLarge {
                len: self.body_len,
                max: self.plan.limits.maxfs,
            };
            return Err(self.reject(reason));
        }

        self.buffered_since.get_or_insert_with(Instant::now);
        self.buffer.extend_from_slice(&chunk);

        if self.should_spill() {
            if let Err(e) = self.spill().await {
                return Err(self.fail(e));
            }
        }
        Ok(())
    }

    /// Make the entry live and return its entity version
    pub async fn commit(mut self) -> Result<u64, CacheError> {
        self.ensure_active()?;

        if !self.plan.meta.header_only && self.body_len < self.plan.limits.minfs {
            let reason = RejectReason::TooSmall {
                len: self.body_len,
                min: self.plan.limits.minfs,
            };
            return Err(self.reject(reason));
        }

        match self.write_entry().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                self.counters.record_stored();
                tracing::info!(
                    key = %self.plan.key,
                    entity_version = self.plan.entity_version,
                    body_len = self.body_len,
                    "Committed cache entry"
                );
                Ok(self.plan.entity_version)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Give up on the store; temp files are removed
    pub fn abort(mut self, reason: &str) {
        if self.is_active() {
            tracing::debug!(key = %self.plan.key, reason = reason, "Aborted write transaction");
            self.finish_aborted();
        }
    }

    async fn write_entry(&mut self) -> Result<(), CacheError> {
        let has_body = !self.plan.meta.header_only && self.body_len > 0;

        let mut identity = BodyIdentity::None;
        if has_body {
            if !self.buffer.is_empty() {
                self.spill().await?;
            }
            let spool = self
                .data
                .as_mut()
                .ok_or_else(|| CacheError::TransactionAbort("data spool missing".to_string()))?;
            self.backend.finish(spool).await?;
            let (id, len) = self.backend.file_identity(&mut spool.file).await?;
            if len != self.body_len {
                return Err(CacheError::TransactionAbort(format!(
                    "short write: {} of {} bytes on disk",
                    len, self.body_len
                )));
            }
            identity = id;
        }
        let data_path = self.plan.paths.data_for(&identity);

        let meta = &self.plan.meta;
        let record = HeaderRecord {
            format: DISK_FORMAT_VERSION,
            status: meta.status,
            entity_version: self.plan.entity_version,
            date: meta.date,
            expire: meta.expire,
            request_time: meta.request_time,
            response_time: meta.response_time,
            identity,
            body_len: if has_body { self.body_len } else { 0 },
            has_body,
            header_only: meta.header_only,
            control: CacheControl::from_headers(&meta.headers_out),
        };
        let encoded = header::encode(
            &record,
            &self.plan.key.name,
            &self.plan.key.key(),
            &meta.headers_out,
            &meta.headers_in,
        );

        let spool = self
            .header
            .temp
            .as_mut()
            .ok_or_else(|| CacheError::TransactionAbort("header spool missing".to_string()))?;
        self.backend.append(spool, &encoded).await?;
        self.backend.finish(spool).await?;

        self.backend.create_dir_all(self.plan.paths.dir()).await?;
        let previous = self.previous_data().await;

        // No live header points at `data_path` yet
        if let (Some(spool), Some(path)) = (self.data.take(), data_path.as_ref()) {
            self.backend.rename(spool.path(), path).await?;
            spool.disarm();
        }

        let header_spool = self
            .header
            .temp
            .take()
            .ok_or_else(|| CacheError::TransactionAbort("header spool missing".to_string()))?;
        if let Err(e) = self.backend.rename(header_spool.path(), &self.header.path).await {
            if let Some(path) = data_path.as_ref().filter(|p| previous.as_ref() != Some(*p)) {
                self.delete_quietly(path).await;
            }
            return Err(e.into());
        }
        header_spool.disarm();

        if let Some((path, index)) = &self.plan.vary {
            if let Err(e) = self
                .backend
                .write_file_atomic(&self.root, path, index.encode())
                .await
            {
                // Without its mapping the new variant is unreachable; clear the slot
                self.delete_quietly(&self.header.path).await;
                for stale in data_path.iter().chain(previous.iter()) {
                    self.delete_quietly(stale).await;
                }
                return Err(e.into());
            }
        }

        if let Some(path) = previous.as_ref().filter(|p| data_path.as_ref() != Some(*p)) {
            self.delete_quietly(path).await;
        }
        for path in &self.plan.obsolete {
            self.delete_quietly(path).await;
        }
        Ok(())
    }

    /// Data file of the header currently at the entry's slot, whatever key
    /// it belongs to
    async fn previous_data(&self) -> Option<PathBuf> {
        let raw = self.backend.read_file(&self.plan.paths.header).await.ok()?;
        let decoded = header::decode(&raw).ok()?;
        self.plan.paths.data_for(&decoded.record.identity)
    }

    async fn delete_quietly(&self, path: &Path) {
        if let Err(e) = self.backend.delete_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale cache file");
        }
    }

    fn should_spill(&self) -> bool {
        let limits = &self.plan.limits;
        let size_hit = self.buffer.len() as u64 > limits.readsize;
        let time_hit = !limits.readtime.is_zero()
            && self
                .buffered_since
                .map_or(false, |since| since.elapsed() >= limits.readtime);
        size_hit || time_hit
    }

    async fn spill(&mut self) -> Result<(), CacheError> {
        let Some(spool) = self.data.as_mut() else {
            return Ok(());
        };
        self.backend.append(spool, &self.buffer).await?;
        self.buffer.clear();
        self.buffered_since = None;
        Ok(())
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state,
            TransactionState::Open | TransactionState::Buffering
        )
    }

    fn ensure_active(&self) -> Result<(), CacheError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CacheError::TransactionAbort(format!(
                "transaction already {:?}",
                self.state
            )))
        }
    }

    fn finish_aborted(&mut self) {
        self.state = TransactionState::Aborted;
        self.data = None;
        self.header.temp = None;
        self.buffer.clear();
        self.counters.record_aborted();
    }

    fn reject(&mut self, reason: RejectReason) -> CacheError {
        tracing::debug!(key = %self.plan.key, reason = %reason, "Store rejected by policy");
        self.state = TransactionState::Aborted;
        self.data = None;
        self.header.temp = None;
        self.buffer.clear();
        self.counters.record_rejected();
        CacheError::Rejected(reason)
    }

    fn fail(&mut self, err: CacheError) -> CacheError {
        tracing::warn!(key = %self.plan.key, error = %err, "Write transaction aborted");
        self.finish_aborted();
        match err {
            CacheError::TransactionAbort(_) => err,
            other => CacheError::TransactionAbort(other.to_string()),
        }
    }
}

impl Drop for WriteTransaction {
    fn drop(&mut self) {
        if self.is_active() {
            tracing::debug!(key = %self.plan.key, "Write transaction dropped before commit");
            self.finish_aborted();
        }
    }
}
