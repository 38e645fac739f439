//! Key to file path mapping with directory fan-out
//!
//! A key is hashed to a fixed-length name; the first `dirlevels` groups of
//! `dirlength` characters become nested directories and the rest is the
//! file stem. Distinct keys may land on the same stem; readers and writers
//! resolve that by comparing the exact key stored in the header record.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use super::types::BodyIdentity;
use crate::constants::{
    CACHEFILE_LEN, CACHE_DATA_SUFFIX, CACHE_HEADER_SUFFIX, CACHE_VARY_SUFFIX,
};

/// Function turning an on-disk key into a hashed file name
pub type KeyDigest = fn(&str) -> String;

/// Default digest: first 11 bytes of SHA-256, hex encoded (22 characters)
pub fn sha256_name(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..CACHEFILE_LEN / 2])
}

/// Split a hashed name into `dirlevels` directories of `dirlength`
/// characters followed by the remaining stem.
pub fn fan_out(hashed: &str, dirlevels: usize, dirlength: usize) -> PathBuf {
    let mut path = PathBuf::new();
    let mut rest = hashed;

    for _ in 0..dirlevels {
        // Always leave at least one character for the stem
        if rest.len() <= dirlength {
            break;
        }
        let (dir, tail) = rest.split_at(dirlength);
        path.push(dir);
        rest = tail;
    }

    path.push(rest);
    path
}

/// Relative path (without suffix) for `key` under the given fan-out
pub fn path_for(key: &str, dirlevels: usize, dirlength: usize) -> PathBuf {
    fan_out(&sha256_name(key), dirlevels, dirlength)
}

/// Deterministic key to path mapper shared by every operation of a store
#[derive(Clone, Copy)]
pub struct PathMapper {
    dirlevels: usize,
    dirlength: usize,
    digest: KeyDigest,
}

impl std::fmt::Debug for PathMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathMapper")
            .field("dirlevels", &self.dirlevels)
            .field("dirlength", &self.dirlength)
            .finish()
    }
}

impl PathMapper {
    pub fn new(dirlevels: usize, dirlength: usize) -> Self {
        Self::with_digest(dirlevels, dirlength, sha256_name)
    }

    /// Mapper using a custom digest. The digest must be pure and return
    /// ASCII; collisions are tolerated.
    pub fn with_digest(dirlevels: usize, dirlength: usize, digest: KeyDigest) -> Self {
        Self {
            dirlevels,
            dirlength,
            digest,
        }
    }

    pub fn dirlevels(&self) -> usize {
        self.dirlevels
    }

    pub fn dirlength(&self) -> usize {
        self.dirlength
    }

    pub fn hashed_name(&self, key: &str) -> String {
        (self.digest)(key)
    }

    /// Absolute path stem for `key` below `root`
    pub fn path_for(&self, root: &Path, key: &str) -> PathBuf {
        root.join(fan_out(&self.hashed_name(key), self.dirlevels, self.dirlength))
    }

    /// Header and vary file paths for `key` below `root`; data paths
    /// come from [`EntryPaths::data_for`]
    pub fn entry_paths(&self, root: &Path, key: &str) -> EntryPaths {
        let stem = self.path_for(root, key);
        EntryPaths {
            header: stem.with_extension(CACHE_HEADER_SUFFIX),
            vary: stem.with_extension(CACHE_VARY_SUFFIX),
            stem,
        }
    }
}

/// The files belonging to one hashed name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPaths {
    pub stem: PathBuf,
    pub header: PathBuf,
    pub vary: PathBuf,
}

impl EntryPaths {
    /// Directory holding the entry files
    pub fn dir(&self) -> &Path {
        self.stem.parent().unwrap_or_else(|| Path::new(""))
    }

    /// `<hash>.<token>.data` for a body with `identity`, or `None` for a
    /// header without body
    pub fn data_for(&self, identity: &BodyIdentity) -> Option<PathBuf> {
        let token = identity.file_token()?;
        let mut name = self.stem.file_name()?.to_os_string();
        name.push(format!(".{}.{}", token, CACHE_DATA_SUFFIX));
        Some(self.stem.with_file_name(name))
    }
}
