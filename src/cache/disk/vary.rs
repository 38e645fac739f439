//! Vary variant index
//!
//! A negotiated resource keeps a `.vary` record next to its canonical
//! entry. The record lists the request headers that select a variant and
//! maps each selector seen so far to the concrete key it was stored under.
//!
//! Lookup recomputes the selector from the current request. A selector
//! that is not in the table is a miss for that variant only; the record
//! itself stays valid.
//!
//! Layout (big-endian): `format u32`, canonical name, `u32` header count
//! and names, `u32` variant count and (selector, key) pairs, every string
//! length-prefixed with a `u32`.

use bytes::{BufMut, Bytes, BytesMut};
use http::header::VARY;
use http::HeaderMap;

use super::error::DecodeError;
use super::header::{get_bytes, get_u32, put_bytes};
use crate::cache::CacheKey;
use crate::constants::VARY_FORMAT_VERSION;

/// Header names listed in the response's `Vary` headers, lowercased,
/// sorted and deduplicated so the selector does not depend on their order.
pub fn vary_names(headers_out: &HeaderMap) -> Vec<String> {
    let mut names: Vec<String> = headers_out
        .get_all(VARY)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|n| n.trim().to_ascii_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Selector for a request: one line per selecting header. An absent header
/// is written as its bare name so it differs from an empty value.
pub fn selector(names: &[String], request: &HeaderMap) -> String {
    names
        .iter()
        .map(|name| {
            let values: Vec<String> = request
                .get_all(name.as_str())
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).trim().to_string())
                .collect();
            if values.is_empty() {
                name.clone()
            } else {
                format!("{}:{}", name, values.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Persisted selector table of one negotiated resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantIndex {
    pub format: u32,
    /// Canonical name the record belongs to (checked on read)
    pub name: String,
    /// Selecting request headers, lowercased and sorted
    pub headers: Vec<String>,
    /// (selector, concrete key) pairs
    pub variants: Vec<(String, String)>,
}

impl VariantIndex {
    pub fn new(name: impl Into<String>, headers: Vec<String>) -> Self {
        Self {
            format: VARY_FORMAT_VERSION,
            name: name.into(),
            headers,
            variants: Vec::new(),
        }
    }

    pub fn selector_for(&self, request: &HeaderMap) -> String {
        selector(&self.headers, request)
    }

    /// Concrete key stored for `selector`, if any
    pub fn lookup(&self, selector: &str) -> Option<&str> {
        self.variants
            .iter()
            .find(|(s, _)| s == selector)
            .map(|(_, key)| key.as_str())
    }

    /// Resolve the concrete key for a request, or `None` when this
    /// combination of header values has not been stored.
    pub fn resolve(&self, request: &HeaderMap) -> Option<CacheKey> {
        let selector = self.selector_for(request);
        let stored = self.lookup(&selector)?;
        let key = CacheKey::with_variant(self.name.clone(), selector);
        (key.key() == stored).then_some(key)
    }

    /// Add or replace the mapping for `key`'s selector
    pub fn insert(&mut self, key: &CacheKey) {
        let Some(selector) = key.variant.clone() else {
            return;
        };
        let concrete = key.key();
        match self.variants.iter_mut().find(|(s, _)| *s == selector) {
            Some(slot) => slot.1 = concrete,
            None => self.variants.push((selector, concrete)),
        }
    }

    /// Drop the mapping pointing at `key`; returns whether one existed
    pub fn remove(&mut self, key: &CacheKey) -> bool {
        let concrete = key.key();
        let before = self.variants.len();
        self.variants.retain(|(_, k)| *k != concrete);
        self.variants.len() != before
    }

    /// Every concrete key currently mapped
    pub fn keys(&self) -> Vec<CacheKey> {
        self.variants
            .iter()
            .map(|(selector, _)| CacheKey::with_variant(self.name.clone(), selector.clone()))
            .collect()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_u32(self.format);
        put_bytes(&mut buf, self.name.as_bytes());
        buf.put_u32(self.headers.len() as u32);
        for header in &self.headers {
            put_bytes(&mut buf, header.as_bytes());
        }
        buf.put_u32(self.variants.len() as u32);
        for (selector, key) in &self.variants {
            put_bytes(&mut buf, selector.as_bytes());
            put_bytes(&mut buf, key.as_bytes());
        }
        buf.freeze()
    }

    /// Decode a `.vary` record; the format field is checked first
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = bytes;

        let format = get_u32(&mut buf)?;
        if format != VARY_FORMAT_VERSION {
            return Err(DecodeError::FormatMismatch {
                found: format,
                expected: VARY_FORMAT_VERSION,
            });
        }

        let name = utf8(get_bytes(&mut buf)?, "vary name")?;

        let header_count = get_u32(&mut buf)? as usize;
        let mut headers = Vec::new();
        for _ in 0..header_count {
            headers.push(utf8(get_bytes(&mut buf)?, "vary header")?);
        }

        let variant_count = get_u32(&mut buf)? as usize;
        let mut variants = Vec::new();
        for _ in 0..variant_count {
            let selector = utf8(get_bytes(&mut buf)?, "selector")?;
            let key = utf8(get_bytes(&mut buf)?, "variant key")?;
            variants.push((selector, key));
        }

        Ok(Self {
            format,
            name,
            headers,
            variants,
        })
    }
}

fn utf8(raw: &[u8], what: &'static str) -> Result<String, DecodeError> {
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{ACCEPT_ENCODING, ACCEPT_LANGUAGE};
    use http::HeaderValue;

    fn request(encoding: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = encoding {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_vary_names_are_normalized() {
        let mut headers = HeaderMap::new();
        headers.append(VARY, HeaderValue::from_static("Accept-Language, accept-encoding"));
        headers.append(VARY, HeaderValue::from_static("Accept-Encoding"));

        assert_eq!(
            vary_names(&headers),
            vec!["accept-encoding".to_string(), "accept-language".to_string()]
        );
    }

    #[test]
    fn test_selector_distinguishes_absent_from_empty() {
        let names = vec!["accept-encoding".to_string()];
        let absent = selector(&names, &request(None));
        let empty = selector(&names, &request(Some("")));
        assert_eq!(absent, "accept-encoding");
        assert_eq!(empty, "accept-encoding:");
        assert_ne!(absent, empty);
    }

    #[test]
    fn test_selector_covers_every_named_header_in_order() {
        let names = vec!["accept-encoding".to_string(), "accept-language".to_string()];
        let mut headers = request(Some("gzip"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en"));

        assert_eq!(
            selector(&names, &headers),
            "accept-encoding:gzip\naccept-language:en"
        );
    }

    #[test]
    fn test_resolve_finds_stored_combination_only() {
        let mut index = VariantIndex::new("http://example.com/a", vec!["accept-encoding".to_string()]);
        let gzip = CacheKey::with_variant("http://example.com/a", index.selector_for(&request(Some("gzip"))));
        index.insert(&gzip);

        assert_eq!(index.resolve(&request(Some("gzip"))), Some(gzip));
        assert_eq!(index.resolve(&request(Some("br"))), None);
        assert_eq!(index.resolve(&request(None)), None);
    }

    #[test]
    fn test_insert_replaces_existing_selector() {
        let mut index = VariantIndex::new("n", vec!["accept-encoding".to_string()]);
        let key = CacheKey::with_variant("n", "accept-encoding:gzip");
        index.insert(&key);
        index.insert(&key);
        assert_eq!(index.variants.len(), 1);

        // Plain keys carry no selector and are ignored
        index.insert(&CacheKey::new("n"));
        assert_eq!(index.variants.len(), 1);
    }

    #[test]
    fn test_remove_drops_mapping() {
        let mut index = VariantIndex::new("n", vec!["accept-encoding".to_string()]);
        let key = CacheKey::with_variant("n", "accept-encoding:gzip");
        index.insert(&key);

        assert!(index.remove(&key));
        assert!(!index.remove(&key));
        assert!(index.keys().is_empty());
    }

    #[test]
    fn test_encoded_record_decodes_identically() {
        let mut index = VariantIndex::new("http://example.com/a", vec!["accept-encoding".to_string()]);
        index.insert(&CacheKey::with_variant("http://example.com/a", "accept-encoding:gzip"));
        index.insert(&CacheKey::with_variant("http://example.com/a", "accept-encoding"));

        let decoded = VariantIndex::decode(&index.encode()).unwrap();
        assert_eq!(decoded, index);
        assert_eq!(decoded.keys().len(), 2);
    }

    #[test]
    fn test_vary_format_gate_is_independent() {
        let mut bytes = BytesMut::new();
        bytes.put_u32(crate::constants::DISK_FORMAT_VERSION);
        assert_eq!(
            VariantIndex::decode(&bytes),
            Err(DecodeError::FormatMismatch {
                found: crate::constants::DISK_FORMAT_VERSION,
                expected: VARY_FORMAT_VERSION,
            })
        );
    }

    #[test]
    fn test_truncated_vary_record_is_an_error() {
        let mut index = VariantIndex::new("n", vec!["accept".to_string()]);
        index.insert(&CacheKey::with_variant("n", "accept:x"));
        let bytes = index.encode();
        assert_eq!(
            VariantIndex::decode(&bytes[..bytes.len() - 2]),
            Err(DecodeError::Truncated)
        );
    }
}
