//! Cache-Control directives persisted with every header record.
//!
//! The engine does not decide freshness; it parses the response's
//! `Cache-Control` header once at store time and hands the parsed form back
//! on every hit so the negotiation layer does not have to re-parse it.
//!
//! Boolean directives are packed into a single bit field for the on-disk
//! record (see [`CacheControl::flag_bits`]).
//!
//! # Example
//!
//! ```rust
//! use kura::cache::CacheControl;
//!
//! let cc = CacheControl::parse("max-age=3600, must-revalidate");
//! assert_eq!(cc.max_age, Some(std::time::Duration::from_secs(3600)));
//! assert!(cc.must_revalidate);
//! ```

use http::header::CACHE_CONTROL;
use http::HeaderMap;
use std::time::Duration;

/// Parsed Cache-Control header directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// max-age directive
    pub max_age: Option<Duration>,
    /// s-maxage directive
    pub s_maxage: Option<Duration>,
    /// stale-while-revalidate directive
    pub stale_while_revalidate: Option<Duration>,
    /// stale-if-error directive
    pub stale_if_error: Option<Duration>,
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub proxy_revalidate: bool,
    pub no_transform: bool,
    pub immutable: bool,
}

const NO_STORE: u32 = 1 << 0;
const NO_CACHE: u32 = 1 << 1;
const PRIVATE: u32 = 1 << 2;
const PUBLIC: u32 = 1 << 3;
const MUST_REVALIDATE: u32 = 1 << 4;
const PROXY_REVALIDATE: u32 = 1 << 5;
const NO_TRANSFORM: u32 = 1 << 6;
const IMMUTABLE: u32 = 1 << 7;

impl CacheControl {
    /// Parse a Cache-Control header value into structured directives.
    ///
    /// Handles comma-separated directives, with optional values for directives
    /// like `max-age=3600`. Unknown directives are ignored.
    pub fn parse(header_value: &str) -> Self {
        let mut result = Self::default();

        for directive in header_value.split(',') {
            let directive = directive.trim().to_lowercase();
            if directive.is_empty() {
                continue;
            }

            if let Some((name, value)) = directive.split_once('=') {
                let seconds = value
                    .trim()
                    .trim_matches('"')
                    .parse::<u64>()
                    .ok()
                    .map(Duration::from_secs);

                match name.trim() {
                    "max-age" => result.max_age = seconds,
                    "s-maxage" => result.s_maxage = seconds,
                    "stale-while-revalidate" => result.stale_while_revalidate = seconds,
                    "stale-if-error" => result.stale_if_error = seconds,
                    _ => {}
                }
            } else {
                match directive.as_str() {
                    "no-store" => result.no_store = true,
                    "no-cache" => result.no_cache = true,
                    "private" => result.private = true,
                    "public" => result.public = true,
                    "must-revalidate" => result.must_revalidate = true,
                    "proxy-revalidate" => result.proxy_revalidate = true,
                    "no-transform" => result.no_transform = true,
                    "immutable" => result.immutable = true,
                    _ => {}
                }
            }
        }

        result
    }

    /// Parse every `Cache-Control` value present in a header table.
    ///
    /// Repeated headers are treated as one comma-joined list.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let joined = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        Self::parse(&joined)
    }

    /// Boolean directives packed as bits for the on-disk record
    pub fn flag_bits(&self) -> u32 {
        let mut bits = 0;
        for (set, bit) in [
            (self.no_store, NO_STORE),
            (self.no_cache, NO_CACHE),
            (self.private, PRIVATE),
            (self.public, PUBLIC),
            (self.must_revalidate, MUST_REVALIDATE),
            (self.proxy_revalidate, PROXY_REVALIDATE),
            (self.no_transform, NO_TRANSFORM),
            (self.immutable, IMMUTABLE),
        ] {
            if set {
                bits |= bit;
            }
        }
        bits
    }

    /// Rebuild directives from packed bits and the optional durations.
    ///
    /// Unknown bits are ignored so that a newer writer setting an extra
    /// flag does not make the record unreadable.
    pub fn from_parts(
        bits: u32,
        max_age: Option<Duration>,
        s_maxage: Option<Duration>,
        stale_while_revalidate: Option<Duration>,
        stale_if_error: Option<Duration>,
    ) -> Self {
        Self {
            max_age,
            s_maxage,
            stale_while_revalidate,
            stale_if_error,
            no_store: bits & NO_STORE != 0,
            no_cache: bits & NO_CACHE != 0,
            private: bits & PRIVATE != 0,
            public: bits & PUBLIC != 0,
            must_revalidate: bits & MUST_REVALIDATE != 0,
            proxy_revalidate: bits & PROXY_REVALIDATE != 0,
            no_transform: bits & NO_TRANSFORM != 0,
            immutable: bits & IMMUTABLE != 0,
        }
    }
}
