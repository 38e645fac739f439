//! Cache root layout marker
//!
//! `<cache_root>/.layout` records the parameters that decide where entries
//! live. Opening a root written with different parameters would silently
//! orphan every entry, so a mismatch is refused (or the root is wiped when
//! configured to).

use std::fmt;
use std::path::Path;

use crate::constants::{DISK_FORMAT_VERSION, HASH_SCHEME, VARY_FORMAT_VERSION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub format: u32,
    pub vary_format: u32,
    pub hash: String,
    pub dirlevels: usize,
    pub dirlength: usize,
}

impl Layout {
    /// Layout written by this build for the given fan-out
    pub fn current(dirlevels: usize, dirlength: usize) -> Self {
        Self {
            format: DISK_FORMAT_VERSION,
            vary_format: VARY_FORMAT_VERSION,
            hash: HASH_SCHEME.to_string(),
            dirlevels,
            dirlength,
        }
    }

    /// Parse `key=value` lines; unknown keys are ignored, missing ones fail
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut format = None;
        let mut vary_format = None;
        let mut hash = None;
        let mut dirlevels = None;
        let mut dirlength = None;

        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "format" => format = value.parse().ok(),
                "vary_format" => vary_format = value.parse().ok(),
                "hash" => hash = Some(value.to_string()),
                "dirlevels" => dirlevels = value.parse().ok(),
                "dirlength" => dirlength = value.parse().ok(),
                _ => {}
            }
        }

        match (format, vary_format, hash, dirlevels, dirlength) {
            (Some(format), Some(vary_format), Some(hash), Some(dirlevels), Some(dirlength)) => {
                Ok(Self {
                    format,
                    vary_format,
                    hash,
                    dirlevels,
                    dirlength,
                })
            }
            _ => Err("incomplete layout marker".to_string()),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "format={}", self.format)?;
        writeln!(f, "vary_format={}", self.vary_format)?;
        writeln!(f, "hash={}", self.hash)?;
        writeln!(f, "dirlevels={}", self.dirlevels)?;
        writeln!(f, "dirlength={}", self.dirlength)
    }
}

/// Whether `path` is one of the store's own top-level files
pub(crate) fn is_marker(path: &Path) -> bool {
    path.file_name()
        .map(|n| n == crate::constants::LAYOUT_MARKER)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_text_parses_back() {
        let layout = Layout::current(2, 2);
        let text = layout.to_string();
        assert!(text.contains("dirlevels=2"));
        assert_eq!(Layout::parse(&text).unwrap(), layout);
    }

    #[test]
    fn test_fan_out_change_is_detected() {
        assert_ne!(Layout::current(2, 2), Layout::current(3, 2));
    }

    #[test]
    fn test_incomplete_marker_rejected() {
        assert!(Layout::parse("format=6\nhash=x\n").is_err());
        assert!(Layout::parse("").is_err());
    }

    #[test]
    fn test_is_marker() {
        assert!(is_marker(Path::new("/var/cache/kura/.layout")));
        assert!(!is_marker(Path::new("/var/cache/kura/ab")));
    }
}
