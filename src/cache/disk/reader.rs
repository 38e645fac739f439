//! Read handle for a verified cache entry

use bytes::Bytes;
use futures::stream::{self, Stream};
use http::{HeaderMap, StatusCode};
use std::time::SystemTime;
use tokio::io::AsyncReadExt;

use super::header::{DecodedHeader, HeaderRecord};
use super::types::CacheFile;
use crate::cache::{CacheError, CacheKey};
use crate::constants::BODY_CHUNK_SIZE;

/// An entry that passed the format, key and body-identity checks.
///
/// The body handle was opened before the identity check, so it keeps
/// reading the committed body even if the entry is replaced afterwards.
#[derive(Debug)]
pub struct CachedEntry {
    key: CacheKey,
    header: DecodedHeader,
    body: Option<CacheFile>,
}

impl CachedEntry {
    pub(crate) fn new(key: CacheKey, header: DecodedHeader, body: Option<CacheFile>) -> Self {
        Self { key, header, body }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn record(&self) -> &HeaderRecord {
        &self.header.record
    }

    pub fn status(&self) -> StatusCode {
        self.header.record.status
    }

    /// Stored response headers
    pub fn headers(&self) -> &HeaderMap {
        &self.header.headers_out
    }

    /// Stored request headers
    pub fn request_headers(&self) -> &HeaderMap {
        &self.header.headers_in
    }

    pub fn entity_version(&self) -> u64 {
        self.header.record.entity_version
    }

    pub fn date(&self) -> SystemTime {
        self.header.record.date
    }

    pub fn expire(&self) -> Option<SystemTime> {
        self.header.record.expire
    }

    pub fn body_len(&self) -> u64 {
        self.header.record.body_len
    }

    pub fn header_only(&self) -> bool {
        self.header.record.header_only
    }

    /// Read the whole body into memory
    pub async fn read_body(self) -> Result<Bytes, CacheError> {
        let capacity = self.body_len() as usize;
        let Some(mut file) = self.body.and_then(|b| b.fd) else {
            return Ok(Bytes::new());
        };
        let mut data = Vec::with_capacity(capacity);
        file.read_to_end(&mut data).await?;
        Ok(Bytes::from(data))
    }

    /// Stream the body in chunks of at most `BODY_CHUNK_SIZE` bytes
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
        let file = self.body.and_then(|b| b.fd);
        stream::unfold(file, |file| async move {
            let mut file = file?;
            let mut buf = vec![0u8; BODY_CHUNK_SIZE];
            match file.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(Bytes::from(buf)), Some(file)))
                }
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
