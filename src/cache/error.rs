//! Cache error types
//!
//! Every per-request failure falls into one of four classes:
//! - `Miss`: nothing usable is cached (absent, other key, foreign format)
//! - `Rejected` / `TransactionAbort`: a store did not happen, temp files are gone
//! - `CorruptEntry`: the header decoded but does not match its body
//! - `Config`: the cache root or its parameters are unusable (startup only)
//!
//! The façade turns all but `Config` into "serve without cache".

use thiserror::Error;

use super::disk::DecodeError;

/// Why a lookup found nothing usable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MissReason {
    #[error("no entry on disk")]
    NotFound,
    #[error("slot holds a different key: {stored}")]
    KeyMismatch { stored: String },
    #[error("header format {found}, expected {expected}")]
    FormatMismatch { found: u32, expected: u32 },
    #[error("no stored variant for this request")]
    NoVariant,
}

/// Why a store was refused by policy (not a fault)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("body of {len} bytes is below the minimum of {min}")]
    TooSmall { len: u64, min: u64 },
    #[error("body of {len} bytes exceeds the maximum of {max}")]
    TooLarge { len: u64, max: u64 },
    #[error("response varies on '*'")]
    VaryStar,
}

/// Cache error types
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache miss: {0}")]
    Miss(MissReason),

    #[error("store rejected: {0}")]
    Rejected(RejectReason),

    #[error("transaction aborted: {0}")]
    TransactionAbort(String),

    #[error("corrupt entry: {0}")]
    CorruptEntry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss(_))
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, CacheError::CorruptEntry(_))
    }
}

impl From<DecodeError> for CacheError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::FormatMismatch { found, expected } => {
                CacheError::Miss(MissReason::FormatMismatch { found, expected })
            }
            other => CacheError::CorruptEntry(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mismatch_classifies_as_miss() {
        // Test: A foreign layout is a miss, never a corrupt entry
        let err: CacheError = DecodeError::FormatMismatch {
            found: 5,
            expected: 6,
        }
        .into();
        assert!(err.is_miss());
        assert!(!err.is_corrupt());
    }

    #[test]
    fn test_other_decode_errors_classify_as_corrupt() {
        let err: CacheError = DecodeError::Truncated.into();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = CacheError::Rejected(RejectReason::TooLarge { len: 11, max: 10 });
        assert_eq!(
            err.to_string(),
            "store rejected: body of 11 bytes exceeds the maximum of 10"
        );

        let err = CacheError::Miss(MissReason::NotFound);
        assert!(err.to_string().contains("no entry"));
    }

    #[test]
    fn test_cache_error_converts_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let cache_err: CacheError = io_err.into();
        assert!(matches!(cache_err, CacheError::Io(_)));
    }
}
