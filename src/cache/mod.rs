//! HTTP response cache
//!
//! - `entry`: cache keys and response metadata handed in by the caller
//! - `control`: parsed `Cache-Control` directives persisted with an entry
//! - `config`: immutable store configuration and per-location limits
//! - `disk`: the on-disk store itself
//! - `traits`: the `Cache` seam the request pipeline talks to

pub mod config;
pub mod control;
pub mod disk;
pub mod entry;
pub mod error;
pub mod stats;
pub mod traits;

pub use config::{CacheLimits, DiskCacheConfig, EntryLimits, LocationConfig};
pub use control::CacheControl;
pub use disk::{CachedEntry, DiskCache, StoreOutcome, WriteTransaction};
pub use entry::{CacheKey, ResponseMeta, VARIANT_SEPARATOR};
pub use error::{CacheError, MissReason, RejectReason};
pub use stats::{CacheCounters, CacheStats};
pub use traits::Cache;
