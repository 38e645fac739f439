//! Disk-backed HTTP response store
//!
//! Each entry is a file triplet below the cache root:
//! - `<hash>.header`: format-gated metadata record and header tables
//! - `<hash>.<identity>.data`: the response body, named after the file
//!   identity the header records
//! - `<hash>.vary`: variant table, only at the canonical name of a
//!   negotiated resource
//!
//! `<hash>` is derived from the entry key by [`PathMapper`] and fanned out
//! over `dirlevels` nested directories. Writers stage everything in temp
//! files in the root. A new body gets its own data file, so renaming the
//! header into place is the single step that switches readers over.
//!
//! All filesystem access goes through [`DiskBackend`]; [`TokioFsBackend`]
//! is the portable implementation.

pub use self::backend::DiskBackend;
pub use self::disk_cache::{DiskCache, StoreOutcome};
pub use self::error::{DecodeError, DiskCacheError};
pub use self::header::{DecodedHeader, HeaderRecord};
pub use self::layout::Layout;
pub use self::path_mapper::{fan_out, path_for, sha256_name, EntryPaths, KeyDigest, PathMapper};
pub use self::reader::CachedEntry;
pub use self::tokio_backend::TokioFsBackend;
pub use self::transaction::{TransactionState, WriteTransaction};
pub use self::types::{BodyIdentity, CacheFile, SpoolFile};
pub use self::vary::VariantIndex;

pub mod backend;
mod disk_cache;
mod error;
pub mod header;
mod layout;
mod path_mapper;
mod reader;
pub mod tokio_backend;
mod transaction;
mod types;
pub mod vary;

#[cfg(test)]
mod mock_backend;
