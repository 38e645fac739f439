//! Error types for disk cache operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiskCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage full: cannot store entry")]
    StorageFull,

    #[error("Backend unavailable")]
    BackendUnavailable,
}

impl DiskCacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DiskCacheError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Failure to decode a header or vary record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Checked first; nothing after the version field is interpreted
    #[error("format version {found}, expected {expected}")]
    FormatMismatch { found: u32, expected: u32 },

    #[error("record truncated")]
    Truncated,

    #[error("invalid HTTP status {0}")]
    InvalidStatus(u16),

    #[error("invalid header table entry")]
    InvalidHeader,

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("unknown body identity kind {0}")]
    UnknownIdentity(u32),
}

// Conversion to CacheError
impl From<DiskCacheError> for crate::cache::CacheError {
    fn from(err: DiskCacheError) -> Self {
        match err {
            DiskCacheError::Io(e) => crate::cache::CacheError::Io(e),
            DiskCacheError::StorageFull => {
                crate::cache::CacheError::TransactionAbort("storage full".to_string())
            }
            DiskCacheError::BackendUnavailable => crate::cache::CacheError::Io(
                std::io::Error::new(std::io::ErrorKind::Other, "Backend unavailable"),
            ),
        }
    }
}
