//! Disk cache configuration types
//!
//! - `DiskCacheConfig`: engine-wide settings (root, fan-out) plus global limits
//! - `CacheLimits`: per-scope size/time limits where `None` means "inherit"
//! - `LocationConfig`: limits overriding the global ones for a name prefix
//!
//! The store takes the configuration once at construction and never
//! mutates it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_CACHE_ROOT, DEFAULT_DIRLENGTH, DEFAULT_DIRLEVELS, DEFAULT_MAX_FILE_SIZE,
    DEFAULT_MIN_FILE_SIZE, DEFAULT_READSIZE, DEFAULT_READTIME_MS, DEFAULT_STALE_TEMP_SECS,
    MAX_FANOUT_CHARS,
};

/// Engine-wide disk cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskCacheConfig {
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
    #[serde(default = "default_dirlevels")]
    pub dirlevels: usize,
    #[serde(default = "default_dirlength")]
    pub dirlength: usize,
    #[serde(default)]
    pub limits: CacheLimits,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    /// Wipe the cache instead of refusing to start when the fan-out changed
    #[serde(default)]
    pub wipe_on_layout_change: bool,
    /// Temp files older than this are swept when the store opens
    #[serde(default = "default_stale_temp_secs")]
    pub stale_temp_secs: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            dirlevels: default_dirlevels(),
            dirlength: default_dirlength(),
            limits: CacheLimits::default(),
            locations: Vec::new(),
            wipe_on_layout_change: false,
            stale_temp_secs: default_stale_temp_secs(),
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_ROOT)
}

fn default_dirlevels() -> usize {
    DEFAULT_DIRLEVELS
}

fn default_dirlength() -> usize {
    DEFAULT_DIRLENGTH
}

fn default_stale_temp_secs() -> u64 {
    DEFAULT_STALE_TEMP_SECS
}

impl DiskCacheConfig {
    /// Configuration rooted at `cache_root` with every other setting defaulted
    pub fn with_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Default::default()
        }
    }

    /// Validate disk cache configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_root.as_os_str().is_empty() {
            return Err("cache_root cannot be empty".to_string());
        }
        if self.dirlevels < 1 {
            return Err("dirlevels must be greater than 0".to_string());
        }
        if self.dirlength < 1 {
            return Err("dirlength must be greater than 0".to_string());
        }
        if self.dirlevels * self.dirlength > MAX_FANOUT_CHARS {
            return Err(format!(
                "dirlevels * dirlength ({} * {}) must not be higher than {}",
                self.dirlevels, self.dirlength, MAX_FANOUT_CHARS
            ));
        }

        self.limits.resolve().validate("limits")?;
        for location in &self.locations {
            if location.prefix.is_empty() {
                return Err("location prefix cannot be empty".to_string());
            }
            self.limits
                .merge(&location.limits)
                .resolve()
                .validate(&location.prefix)?;
        }
        Ok(())
    }

    /// Effective limits for a cache name: the longest matching location
    /// prefix is merged over the global limits.
    pub fn limits_for(&self, name: &str) -> EntryLimits {
        let location = self
            .locations
            .iter()
            .filter(|l| name.starts_with(l.prefix.as_str()))
            .max_by_key(|l| l.prefix.len());

        match location {
            Some(location) => self.limits.merge(&location.limits).resolve(),
            None => self.limits.resolve(),
        }
    }
}

/// Size and time limits for one configuration scope
///
/// Each field is independently settable; `None` is the explicit unset state
/// and inherits from the enclosing scope (or the engine default).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimits {
    /// Minimum body size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minfs: Option<u64>,
    /// Maximum body size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxfs: Option<u64>,
    /// Bytes to set aside in memory before spilling to the temp file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readsize: Option<u64>,
    /// Milliseconds to set aside in memory before spilling to the temp file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readtime_ms: Option<u64>,
}

impl CacheLimits {
    /// Overlay `child` on `self`: fields set in `child` win
    pub fn merge(&self, child: &CacheLimits) -> CacheLimits {
        CacheLimits {
            minfs: child.minfs.or(self.minfs),
            maxfs: child.maxfs.or(self.maxfs),
            readsize: child.readsize.or(self.readsize),
            readtime_ms: child.readtime_ms.or(self.readtime_ms),
        }
    }

    /// Fill unset fields with engine defaults
    pub fn resolve(&self) -> EntryLimits {
        EntryLimits {
            minfs: self.minfs.unwrap_or(DEFAULT_MIN_FILE_SIZE),
            maxfs: self.maxfs.unwrap_or(DEFAULT_MAX_FILE_SIZE),
            readsize: self.readsize.unwrap_or(DEFAULT_READSIZE),
            readtime: Duration::from_millis(self.readtime_ms.unwrap_or(DEFAULT_READTIME_MS)),
        }
    }
}

/// Fully resolved limits applied to one write transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLimits {
    pub minfs: u64,
    pub maxfs: u64,
    /// 0 spills every chunk immediately
    pub readsize: u64,
    /// Zero disables the time trigger
    pub readtime: Duration,
}

impl EntryLimits {
    fn validate(&self, scope: &str) -> Result<(), String> {
        if self.minfs > self.maxfs {
            return Err(format!(
                "{}: minfs ({}) cannot be greater than maxfs ({})",
                scope, self.minfs, self.maxfs
            ));
        }
        Ok(())
    }
}

impl Default for EntryLimits {
    fn default() -> Self {
        CacheLimits::default().resolve()
    }
}

/// Limits applied to cache names starting with `prefix`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub prefix: String,
    #[serde(default)]
    pub limits: CacheLimits,
}
