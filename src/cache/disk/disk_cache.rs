//! Main DiskCache implementation
//!
//! The store composes the path mapper, the header and vary codecs and the
//! write transaction. It holds no per-entry state and takes no locks:
//! every call reads what is on disk, and writers publish by rename.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::HeaderMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::backend::DiskBackend;
use super::error::{DecodeError, DiskCacheError};
use super::header::{self, DecodedHeader};
use super::layout::{self, Layout};
use super::path_mapper::{EntryPaths, PathMapper};
use super::reader::CachedEntry;
use super::tokio_backend::TokioFsBackend;
use super::transaction::{TransactionPlan, WriteTransaction};
use super::types::CacheFile;
use super::vary::{self, VariantIndex};
use crate::cache::config::DiskCacheConfig;
use crate::cache::stats::{CacheCounters, CacheStats};
use crate::cache::{CacheError, CacheKey, MissReason, RejectReason, ResponseMeta};
use crate::constants::{LAYOUT_MARKER, TEMPFILE_BASE};

/// Result of a complete store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored { entity_version: u64 },
    /// Refused by size or vary policy
    Rejected(RejectReason),
    /// Failed part way; nothing changed on disk
    Aborted(String),
}

impl StoreOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, StoreOutcome::Stored { .. })
    }
}

impl From<CacheError> for StoreOutcome {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Rejected(reason) => StoreOutcome::Rejected(reason),
            other => StoreOutcome::Aborted(other.to_string()),
        }
    }
}

/// Disk-based cache implementation
#[derive(Clone)]
pub struct DiskCache {
    config: Arc<DiskCacheConfig>,
    backend: Arc<dyn DiskBackend>,
    mapper: PathMapper,
    counters: Arc<CacheCounters>,
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("cache_root", &self.config.cache_root)
            .field("mapper", &self.mapper)
            .finish()
    }
}

impl DiskCache {
    /// Open a store on the local filesystem
    pub async fn open(config: DiskCacheConfig) -> Result<Self, CacheError> {
        Self::open_with_backend(config, Arc::new(TokioFsBackend::new())).await
    }

    pub async fn open_with_backend(
        config: DiskCacheConfig,
        backend: Arc<dyn DiskBackend>,
    ) -> Result<Self, CacheError> {
        let mapper = PathMapper::new(config.dirlevels, config.dirlength);
        Self::open_with(config, backend, mapper).await
    }

    /// Open with an explicit backend and path mapper.
    ///
    /// Validates the configuration, creates the root, checks that it is
    /// writable and that its layout marker matches, then sweeps temp
    /// files left by crashed writers.
    pub async fn open_with(
        config: DiskCacheConfig,
        backend: Arc<dyn DiskBackend>,
        mapper: PathMapper,
    ) -> Result<Self, CacheError> {
        config.validate().map_err(CacheError::Config)?;
        let root = config.cache_root.clone();

        backend.create_dir_all(&root).await.map_err(|e| {
            tracing::error!(root = %root.display(), error = %e, "Cannot create cache root");
            CacheError::Config(format!("cannot create cache root {}: {}", root.display(), e))
        })?;
        backend.create_spool(&root).await.map_err(|e| {
            tracing::error!(root = %root.display(), error = %e, "Cache root is not writable");
            CacheError::Config(format!("cache root {} is not writable: {}", root.display(), e))
        })?;

        let cache = Self {
            config: Arc::new(config),
            backend,
            mapper,
            counters: Arc::new(CacheCounters::new()),
        };
        cache.check_layout().await?;

        let max_age = Duration::from_secs(cache.config.stale_temp_secs);
        let swept = cache.sweep_temp_files(max_age).await?;

        tracing::info!(
            root = %cache.root().display(),
            dirlevels = mapper.dirlevels(),
            dirlength = mapper.dirlength(),
            swept_temp_files = swept,
            "Disk cache opened"
        );
        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.config.cache_root
    }

    pub fn config(&self) -> &DiskCacheConfig {
        &self.config
    }

    pub fn path_mapper(&self) -> &PathMapper {
        &self.mapper
    }

    /// File paths used for `key`
    pub fn entry_paths(&self, key: &CacheKey) -> EntryPaths {
        self.mapper.entry_paths(self.root(), &key.key())
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Look up `name`, selecting a variant from `request` when the resource
    /// is negotiated. Every failure is classified; see `fetch` for the
    /// variant that degrades to `None`.
    pub async fn try_open_for_read(
        &self,
        name: &str,
        request: &HeaderMap,
    ) -> Result<CachedEntry, CacheError> {
        let result = self.open_for_read_inner(name, request).await;
        match &result {
            Ok(entry) => {
                self.counters.record_hit();
                tracing::debug!(key = %entry.key(), entity_version = entry.entity_version(), "Cache hit");
            }
            Err(CacheError::CorruptEntry(reason)) => {
                self.counters.record_corrupt();
                tracing::warn!(name = name, reason = %reason, "Corrupt cache entry");
            }
            Err(e) => {
                self.counters.record_miss();
                tracing::debug!(name = name, reason = %e, "Cache miss");
            }
        }
        result
    }

    /// Look up `name`; anything but a verified entry is `None`
    pub async fn fetch(&self, name: &str, request: &HeaderMap) -> Option<CachedEntry> {
        match self.try_open_for_read(name, request).await {
            Ok(entry) => Some(entry),
            Err(CacheError::Io(e)) => {
                tracing::warn!(name = name, error = %e, "Cache read failed, serving without cache");
                None
            }
            Err(_) => None,
        }
    }

    async fn open_for_read_inner(
        &self,
        name: &str,
        request: &HeaderMap,
    ) -> Result<CachedEntry, CacheError> {
        let key = match self.load_vary(name).await? {
            Some((_, index)) => index
                .resolve(request)
                .ok_or(CacheError::Miss(MissReason::NoVariant))?,
            None => CacheKey::new(name),
        };
        self.open_key(key).await
    }

    async fn open_key(&self, key: CacheKey) -> Result<CachedEntry, CacheError> {
        let paths = self.entry_paths(&key);

        let raw = match self.backend.read_file(&paths.header).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Err(CacheError::Miss(MissReason::NotFound)),
            Err(e) => return Err(e.into()),
        };

        let decoded = match header::decode(&raw) {
            Ok(decoded) => decoded,
            Err(e @ DecodeError::FormatMismatch { .. }) => return Err(e.into()),
            Err(e) => {
                self.discard_header(&paths.header, &raw).await;
                return Err(e.into());
            }
        };

        if decoded.key != key.key() {
            return Err(CacheError::Miss(MissReason::KeyMismatch {
                stored: decoded.name,
            }));
        }

        if !decoded.record.has_body {
            return Ok(CachedEntry::new(key, decoded, None));
        }

        let Some(data_path) = paths.data_for(&decoded.record.identity) else {
            self.discard_header(&paths.header, &raw).await;
            return Err(CacheError::CorruptEntry(
                "body recorded without identity".to_string(),
            ));
        };
        let mut file = match self.backend.open_read(&data_path).await {
            Ok(file) => file,
            Err(e) if e.is_not_found() => {
                self.discard_header(&paths.header, &raw).await;
                return Err(CacheError::CorruptEntry("data file missing".to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let (identity, len) = self.backend.file_identity(&mut file).await?;

        if identity != decoded.record.identity {
            self.discard_header(&paths.header, &raw).await;
            return Err(CacheError::CorruptEntry(
                "body identity does not match header".to_string(),
            ));
        }
        if len != decoded.record.body_len {
            self.discard_header(&paths.header, &raw).await;
            self.delete_quietly(&data_path).await;
            return Err(CacheError::CorruptEntry(format!(
                "data file holds {} bytes, header recorded {}",
                len, decoded.record.body_len
            )));
        }

        Ok(CachedEntry::new(
            key,
            decoded,
            Some(CacheFile::opened(data_path, file)),
        ))
    }

    /// Start storing a response under `name`.
    ///
    /// The variant key, limits and next entity version are settled here,
    /// before any body byte is accepted.
    pub async fn open_for_write(
        &self,
        name: &str,
        meta: ResponseMeta,
    ) -> Result<WriteTransaction, CacheError> {
        match self.plan_write(name, meta).await {
            Ok(plan) => {
                WriteTransaction::begin(
                    self.backend.clone(),
                    self.counters.clone(),
                    self.root().to_path_buf(),
                    plan,
                )
                .await
            }
            Err(e) => {
                match &e {
                    CacheError::Rejected(reason) => {
                        self.counters.record_rejected();
                        tracing::debug!(name = name, reason = %reason, "Store rejected by policy");
                    }
                    other => {
                        self.counters.record_aborted();
                        tracing::warn!(name = name, error = %other, "Cannot open write transaction");
                    }
                }
                Err(e)
            }
        }
    }

    async fn plan_write(&self, name: &str, meta: ResponseMeta) -> Result<TransactionPlan, CacheError> {
        let limits = self.config.limits_for(name);

        if !meta.header_only {
            if let Some(len) = meta.content_length() {
                if len > limits.maxfs {
                    return Err(CacheError::Rejected(RejectReason::TooLarge {
                        len,
                        max: limits.maxfs,
                    }));
                }
                if len < limits.minfs {
                    return Err(CacheError::Rejected(RejectReason::TooSmall {
                        len,
                        min: limits.minfs,
                    }));
                }
            }
        }

        let names = vary::vary_names(&meta.headers_out);
        if names.iter().any(|n| n == "*") {
            return Err(CacheError::Rejected(RejectReason::VaryStar));
        }

        let canonical = self.mapper.entry_paths(self.root(), name);
        let existing_vary = self.load_vary(name).await.unwrap_or(None);
        let mut obsolete = Vec::new();

        let (key, vary) = if names.is_empty() {
            if let Some((path, index)) = existing_vary {
                // The resource is no longer negotiated: its variants go too
                obsolete.push(path);
                for variant in index.keys() {
                    obsolete.extend(self.entry_files(&variant).await);
                }
            }
            (CacheKey::new(name), None)
        } else {
            let selector = vary::selector(&names, &meta.headers_in);
            let key = CacheKey::with_variant(name, selector);
            let concrete = key.key();

            let vary = match existing_vary {
                Some((path, mut index)) if index.headers == names => {
                    let known = key
                        .variant
                        .as_deref()
                        .and_then(|selector| index.lookup(selector))
                        == Some(concrete.as_str());
                    if known {
                        None
                    } else {
                        index.insert(&key);
                        Some((path, index))
                    }
                }
                previous => {
                    // Variants selected by other headers become unreachable
                    if let Some((_, index)) = previous {
                        for variant in index.keys() {
                            if variant.key() != concrete {
                                obsolete.extend(self.entry_files(&variant).await);
                            }
                        }
                    }
                    let mut index = VariantIndex::new(name, names);
                    index.insert(&key);
                    Some((canonical.vary.clone(), index))
                }
            };

            // A plain entry stored before the resource started to vary
            obsolete.extend(self.entry_files(&CacheKey::new(name)).await);
            (key, vary)
        };

        let paths = self.entry_paths(&key);
        let previous = match self.backend.read_file(&paths.header).await {
            Ok(raw) => header::decode(&raw)
                .ok()
                .filter(|d| d.key == key.key())
                .map(|d| d.record.entity_version)
                .unwrap_or(0),
            Err(_) => 0,
        };

        Ok(TransactionPlan {
            key,
            paths,
            meta,
            limits,
            entity_version: previous + 1,
            vary,
            obsolete,
        })
    }

    /// Store a complete response. Never fails the caller: policy refusals
    /// and faults are reported in the outcome.
    pub async fn store<S>(&self, name: &str, meta: ResponseMeta, body: S) -> StoreOutcome
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send,
    {
        let mut tx = match self.open_for_write(name, meta).await {
            Ok(tx) => tx,
            Err(e) => return e.into(),
        };

        futures::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let reason = format!("body stream failed: {}", e);
                    tx.abort(&reason);
                    return StoreOutcome::Aborted(reason);
                }
            };
            if let Err(e) = tx.write_body(chunk).await {
                return e.into();
            }
        }

        match tx.commit().await {
            Ok(entity_version) => StoreOutcome::Stored { entity_version },
            Err(e) => e.into(),
        }
    }

    /// Remove an entry. A plain key also removes its vary record and every
    /// variant it maps; a variant key removes only that variant.
    ///
    /// Returns whether anything was removed.
    pub async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let removed = if key.is_variant() {
            let removed = self.remove_entry(key).await?;
            if let Some((path, mut index)) = self.load_vary(&key.name).await? {
                if index.remove(key) {
                    if index.variants.is_empty() {
                        self.backend.delete_file(&path).await?;
                    } else {
                        self.backend
                            .write_file_atomic(self.root(), &path, index.encode())
                            .await?;
                    }
                }
            }
            removed
        } else {
            let mut removed = self.remove_entry(key).await?;
            if let Some((path, index)) = self.load_vary(&key.name).await? {
                for variant in index.keys() {
                    self.remove_entry(&variant).await?;
                }
                self.backend.delete_file(&path).await?;
                removed = true;
            }
            removed
        };

        tracing::debug!(key = %key, removed = removed, "Removed cache entry");
        Ok(removed)
    }

    /// Delete the header and data of `key` if the slot holds that key
    async fn remove_entry(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let paths = self.entry_paths(key);
        let raw = match self.backend.read_file(&paths.header).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let data = match header::decode(&raw) {
            Ok(decoded) if decoded.key != key.key() => return Ok(false),
            Ok(decoded) => paths.data_for(&decoded.record.identity),
            Err(DecodeError::FormatMismatch { .. }) => return Ok(false),
            Err(_) => None,
        };
        self.backend.delete_file(&paths.header).await?;
        if let Some(data) = data {
            self.backend.delete_file(&data).await?;
        }
        Ok(true)
    }

    /// Decode the stored header for `key` without checking its body
    pub async fn inspect(&self, key: &CacheKey) -> Result<DecodedHeader, CacheError> {
        let paths = self.entry_paths(key);
        let raw = match self.backend.read_file(&paths.header).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Err(CacheError::Miss(MissReason::NotFound)),
            Err(e) => return Err(e.into()),
        };
        Ok(header::decode(&raw)?)
    }

    /// Data file of the entry stored under `key`, if it has one
    pub async fn data_path(&self, key: &CacheKey) -> Option<PathBuf> {
        let decoded = self.stored_header(&self.entry_paths(key).header).await?;
        if decoded.key != key.key() {
            return None;
        }
        self.entry_paths(key).data_for(&decoded.record.identity)
    }

    /// The vary record of `name`, if the resource is negotiated
    pub async fn variant_index(&self, name: &str) -> Result<Option<VariantIndex>, CacheError> {
        Ok(self.load_vary(name).await?.map(|(_, index)| index))
    }

    async fn load_vary(&self, name: &str) -> Result<Option<(PathBuf, VariantIndex)>, CacheError> {
        let path = self.mapper.entry_paths(self.root(), name).vary;
        let raw = match self.backend.read_file(&path).await {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match VariantIndex::decode(&raw) {
            Ok(index) if index.name == name => Ok(Some((path, index))),
            // Another name's record in a colliding slot
            Ok(_) => Ok(None),
            Err(e @ DecodeError::FormatMismatch { .. }) => {
                tracing::debug!(name = name, error = %e, "Ignoring vary record of another format");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(name = name, error = %e, "Corrupt vary record");
                Ok(None)
            }
        }
    }

    async fn stored_header(&self, header_path: &Path) -> Option<DecodedHeader> {
        let raw = self.backend.read_file(header_path).await.ok()?;
        header::decode(&raw).ok()
    }

    /// Header and data files of `key`, when its slot holds that key
    async fn entry_files(&self, key: &CacheKey) -> Vec<PathBuf> {
        let paths = self.entry_paths(key);
        let Some(decoded) = self.stored_header(&paths.header).await else {
            return Vec::new();
        };
        if decoded.key != key.key() {
            return Vec::new();
        }
        let mut files = vec![paths.header.clone()];
        files.extend(paths.data_for(&decoded.record.identity));
        files
    }

    /// Delete a header that failed its checks, unless it changed since
    /// it was read (a newer commit landed in between)
    async fn discard_header(&self, path: &Path, seen: &Bytes) {
        match self.backend.read_file(path).await {
            Ok(current) if current == *seen => self.delete_quietly(path).await,
            _ => {}
        }
    }

    async fn delete_quietly(&self, path: &Path) {
        if let Err(e) = self.backend.delete_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove corrupt cache file");
        }
    }

    /// Delete temp files in the root older than `max_age`. Returns how
    /// many were removed.
    pub async fn sweep_temp_files(&self, max_age: Duration) -> Result<usize, CacheError> {
        let now = SystemTime::now();
        let mut removed = 0;

        for path in self.backend.read_dir(self.root()).await? {
            let is_temp = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with(TEMPFILE_BASE))
                .unwrap_or(false);
            if !is_temp {
                continue;
            }
            let modified = match self.backend.modified(&path).await {
                Ok(modified) => modified,
                // Renamed or removed by its owner meanwhile
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age >= max_age {
                self.backend.delete_file(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed = removed, "Swept stale temp files");
        }
        Ok(removed)
    }

    async fn check_layout(&self) -> Result<(), CacheError> {
        let expected = Layout::current(self.mapper.dirlevels(), self.mapper.dirlength());
        let marker = self.root().join(LAYOUT_MARKER);

        let found = match self.backend.read_file(&marker).await {
            Ok(raw) => Some(Layout::parse(&String::from_utf8_lossy(&raw))),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(config_error(e)),
        };

        match found {
            Some(Ok(layout)) if layout == expected => return Ok(()),
            None => {}
            Some(found) if self.config.wipe_on_layout_change => {
                tracing::warn!(
                    root = %self.root().display(),
                    found = ?found,
                    "Cache layout changed, wiping cache root"
                );
                self.wipe().await?;
            }
            Some(found) => {
                let found = match found {
                    Ok(layout) => format!(
                        "format {} hash {} dirlevels {} dirlength {}",
                        layout.format, layout.hash, layout.dirlevels, layout.dirlength
                    ),
                    Err(e) => e,
                };
                tracing::error!(root = %self.root().display(), found = %found, "Cache layout mismatch");
                return Err(CacheError::Config(format!(
                    "cache root {} was written with {}; wipe it or enable wipe_on_layout_change",
                    self.root().display(),
                    found
                )));
            }
        }

        self.backend
            .write_file_atomic(self.root(), &marker, Bytes::from(expected.to_string()))
            .await
            .map_err(config_error)
    }

    async fn wipe(&self) -> Result<(), CacheError> {
        for path in self.backend.read_dir(self.root()).await.map_err(config_error)? {
            if layout::is_marker(&path) {
                continue;
            }
            let result = if path.is_dir() {
                self.backend.remove_dir_all(&path).await
            } else {
                self.backend.delete_file(&path).await
            };
            result.map_err(config_error)?;
        }
        Ok(())
    }
}

fn config_error(e: DiskCacheError) -> CacheError {
    CacheError::Config(e.to_string())
}
