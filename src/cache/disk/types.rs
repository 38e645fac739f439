//! Type definitions for disk cache

use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::File;

use super::error::DecodeError;

/// Identity of the data file a header record was written against.
///
/// On Unix this is the (device, inode) pair, which survives the commit
/// rename. Elsewhere it is a content fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyIdentity {
    /// Entry has no data file
    None,
    Inode { device: u64, inode: u64 },
    /// First 16 bytes of the SHA-256 of the body
    Digest([u8; 16]),
}

const IDENTITY_NONE: u32 = 0;
const IDENTITY_INODE: u32 = 1;
const IDENTITY_DIGEST: u32 = 2;

impl BodyIdentity {
    #[cfg(unix)]
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        BodyIdentity::Inode {
            device: meta.dev(),
            inode: meta.ino(),
        }
    }

    pub fn digest_of(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(data);
        let mut prefix = [0u8; 16];
        prefix.copy_from_slice(&digest[..16]);
        BodyIdentity::Digest(prefix)
    }

    /// Name fragment of the data file holding this body. Every committed
    /// body gets its own data file, so only the header rename changes what
    /// a reader sees. `None` when there is no data file.
    pub fn file_token(&self) -> Option<String> {
        match self {
            BodyIdentity::None => None,
            BodyIdentity::Inode { device, inode } => Some(format!("{:x}-{:x}", device, inode)),
            BodyIdentity::Digest(bytes) => Some(hex::encode(bytes)),
        }
    }

    /// Fixed-width on-disk form: kind plus two 64-bit words
    pub fn to_parts(&self) -> (u32, u64, u64) {
        match self {
            BodyIdentity::None => (IDENTITY_NONE, 0, 0),
            BodyIdentity::Inode { device, inode } => (IDENTITY_INODE, *device, *inode),
            BodyIdentity::Digest(bytes) => {
                let mut hi = [0u8; 8];
                let mut lo = [0u8; 8];
                hi.copy_from_slice(&bytes[..8]);
                lo.copy_from_slice(&bytes[8..]);
                (IDENTITY_DIGEST, u64::from_be_bytes(hi), u64::from_be_bytes(lo))
            }
        }
    }

    pub fn from_parts(kind: u32, a: u64, b: u64) -> Result<Self, DecodeError> {
        match kind {
            IDENTITY_NONE => Ok(BodyIdentity::None),
            IDENTITY_INODE => Ok(BodyIdentity::Inode {
                device: a,
                inode: b,
            }),
            IDENTITY_DIGEST => {
                let mut bytes = [0u8; 16];
                bytes[..8].copy_from_slice(&a.to_be_bytes());
                bytes[8..].copy_from_slice(&b.to_be_bytes());
                Ok(BodyIdentity::Digest(bytes))
            }
            other => Err(DecodeError::UnknownIdentity(other)),
        }
    }
}

/// Temporary file receiving bytes for an in-flight transaction.
///
/// The file is removed when this value is dropped unless it has been
/// renamed into place by the backend.
#[derive(Debug)]
pub struct SpoolFile {
    pub(crate) file: File,
    pub(crate) path: TempPath,
}

impl SpoolFile {
    pub fn new(file: File, path: TempPath) -> Self {
        Self { file, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop removing the file on drop (it has been renamed away)
    pub(crate) fn disarm(self) {
        let _ = self.path.keep();
    }
}

/// One file of an entry: its final path, a read handle when open for
/// reading, and a spool file while a write is in flight.
///
/// Owned by exactly one transaction or one reader.
#[derive(Debug)]
pub struct CacheFile {
    pub path: PathBuf,
    pub fd: Option<File>,
    pub temp: Option<SpoolFile>,
}

impl CacheFile {
    pub fn with_temp(path: PathBuf, temp: SpoolFile) -> Self {
        Self {
            path,
            fd: None,
            temp: Some(temp),
        }
    }

    pub fn opened(path: PathBuf, fd: File) -> Self {
        Self {
            path,
            fd: Some(fd),
            temp: None,
        }
    }
}
