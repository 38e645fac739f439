//! Cache key and response metadata types
//!
//! - `CacheKey`: identity of a stored response (canonical name + optional variant selector)
//! - `ResponseMeta`: everything the collaborator knows about a response before its body

use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Separates the canonical name from the variant selector in the on-disk key.
/// U+001F cannot appear in a request URI, so plain keys never contain it.
pub const VARIANT_SEPARATOR: char = '\u{1f}';

/// Cache key for identifying stored responses
///
/// `name` is the request URI without any variant bits and is what humans
/// and the eviction collaborator deal with. `key()` is the on-disk identity
/// and includes the variant selector when the resource is negotiated.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKey {
    /// Canonical name (request URI without variant selector)
    pub name: String,
    /// Selector computed from the request headers named by `Vary`
    pub variant: Option<String>,
}

impl CacheKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variant: None,
        }
    }

    pub fn with_variant(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variant: Some(selector.into()),
        }
    }

    /// On-disk identity of this key
    pub fn key(&self) -> String {
        match &self.variant {
            Some(selector) => format!("{}{}{}", self.name, VARIANT_SEPARATOR, selector),
            None => self.name.clone(),
        }
    }

    pub fn is_variant(&self) -> bool {
        self.variant.is_some()
    }

    /// The canonical (non-variant) key for the same resource
    pub fn canonical(&self) -> CacheKey {
        CacheKey::new(self.name.clone())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            Some(selector) => write!(f, "{} [{}]", self.name, selector.replace('\n', "; ")),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Response metadata handed to a write transaction
///
/// HTTP delivers headers before the body, so all of this is known when the
/// transaction is opened; only the body is streamed afterwards.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    /// HTTP status to replay on a hit
    pub status: StatusCode,
    /// Response headers to persist
    pub headers_out: HeaderMap,
    /// Request headers to persist (and to select a variant from)
    pub headers_in: HeaderMap,
    /// Date the response was stored / generated
    pub date: SystemTime,
    /// When the response stops being fresh, if known
    pub expire: Option<SystemTime>,
    /// When the request was sent to the origin
    pub request_time: SystemTime,
    /// When the response arrived from the origin
    pub response_time: SystemTime,
    /// Response to a HEAD request: no body is stored
    pub header_only: bool,
}

impl ResponseMeta {
    /// Metadata with empty header tables and all timestamps set to now
    pub fn new(status: StatusCode) -> Self {
        let now = SystemTime::now();
        Self {
            status,
            headers_out: HeaderMap::new(),
            headers_in: HeaderMap::new(),
            date: now,
            expire: None,
            request_time: now,
            response_time: now,
            header_only: false,
        }
    }

    /// Append a response header (repeats are kept)
    pub fn with_response_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers_out.append(name, value);
        self
    }

    /// Append a request header (repeats are kept)
    pub fn with_request_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers_in.append(name, value);
        self
    }

    pub fn with_expire(mut self, expire: SystemTime) -> Self {
        self.expire = Some(expire);
        self
    }

    pub fn head(mut self) -> Self {
        self.header_only = true;
        self
    }

    /// Declared body length from `Content-Length`, when present and valid
    pub fn content_length(&self) -> Option<u64> {
        self.headers_out
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}
