//! Cache trait definition
//!
//! This module defines the `Cache` trait the request pipeline uses to
//! consult and fill the cache. Every method degrades instead of failing:
//! a cache problem must never turn into a failed request.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::HeaderMap;

use super::disk::{CachedEntry, DiskCache, StoreOutcome};
use super::entry::{CacheKey, ResponseMeta};
use super::error::CacheError;
use super::stats::CacheStats;

/// Body stream handed to `Cache::store`
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Cache trait for response storage implementations
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a response by canonical name, selecting a variant from the
    /// request headers. Returns None on any kind of miss.
    async fn fetch(&self, name: &str, request: &HeaderMap) -> Option<CachedEntry>;

    /// Store a response; the outcome says whether caching happened
    async fn store(&self, name: &str, meta: ResponseMeta, body: BodyStream) -> StoreOutcome;

    /// Remove an entry (and its variants for a canonical key)
    /// Returns true if anything was removed
    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Get cache statistics
    async fn stats(&self) -> CacheStats;
}

#[async_trait]
impl Cache for DiskCache {
    async fn fetch(&self, name: &str, request: &HeaderMap) -> Option<CachedEntry> {
        DiskCache::fetch(self, name, request).await
    }

    async fn store(&self, name: &str, meta: ResponseMeta, body: BodyStream) -> StoreOutcome {
        DiskCache::store(self, name, meta, body).await
    }

    async fn remove(&self, key: &CacheKey) -> Result<bool, CacheError> {
        DiskCache::remove(self, key).await
    }

    async fn stats(&self) -> CacheStats {
        DiskCache::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiskCacheConfig;
    use futures::StreamExt;
    use http::StatusCode;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn body(data: &'static [u8]) -> BodyStream {
        futures::stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
    }

    #[tokio::test]
    async fn test_disk_cache_usable_as_trait_object() {
        // Test: the pipeline can hold the store as Arc<dyn Cache>
        let temp_dir = TempDir::new().unwrap();
        let cache: Arc<dyn Cache> = Arc::new(
            DiskCache::open(DiskCacheConfig::with_root(temp_dir.path()))
                .await
                .unwrap(),
        );

        let outcome = cache
            .store("http://example.com/t", ResponseMeta::new(StatusCode::OK), body(b"trait"))
            .await;
        assert_eq!(outcome, StoreOutcome::Stored { entity_version: 1 });

        let entry = cache
            .fetch("http://example.com/t", &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(entry.read_body().await.unwrap(), Bytes::from_static(b"trait"));

        assert!(cache.remove(&CacheKey::new("http://example.com/t")).await.unwrap());
        assert!(cache.fetch("http://example.com/t", &HeaderMap::new()).await.is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
