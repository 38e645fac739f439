// Disk cache integration tests
//
// Exercise the store through the public API only, the way a request
// pipeline would: open from configuration, store responses, fetch them back.

use bytes::Bytes;
use futures::StreamExt;
use http::header::{HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE, VARY};
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use kura::cache::disk::{header, path_for, VariantIndex};
use kura::cache::{
    Cache, CacheKey, CacheLimits, DiskCache, DiskCacheConfig, ResponseMeta, StoreOutcome,
};
use kura::config::Config;
use kura::constants::{DISK_FORMAT_VERSION, VARY_FORMAT_VERSION};

fn one_chunk(data: &'static [u8]) -> futures::stream::BoxStream<'static, std::io::Result<Bytes>> {
    futures::stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
}

fn html() -> ResponseMeta {
    ResponseMeta::new(StatusCode::OK)
        .with_response_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
}

fn language(value: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(value));
    headers
}

#[tokio::test]
async fn test_store_and_fetch_through_cache_trait() {
    // Test: the pipeline-facing trait round-trips a response
    let temp_dir = TempDir::new().unwrap();
    let cache: Arc<dyn Cache> = Arc::new(
        DiskCache::open(DiskCacheConfig::with_root(temp_dir.path()))
            .await
            .unwrap(),
    );

    let outcome = cache
        .store("http://example.com/index.html", html(), one_chunk(b"<h1>hi</h1>"))
        .await;
    assert_eq!(outcome, StoreOutcome::Stored { entity_version: 1 });

    let entry = cache
        .fetch("http://example.com/index.html", &HeaderMap::new())
        .await
        .unwrap();
    assert_eq!(entry.status(), StatusCode::OK);
    assert_eq!(entry.headers()[CONTENT_TYPE], "text/html");
    assert_eq!(entry.read_body().await.unwrap(), Bytes::from("<h1>hi</h1>"));
}

#[tokio::test]
async fn test_entries_survive_reopening_the_store() {
    // Test: a second store instance on the same root sees committed entries
    let temp_dir = TempDir::new().unwrap();
    let config = DiskCacheConfig::with_root(temp_dir.path());

    {
        let cache = DiskCache::open(config.clone()).await.unwrap();
        cache
            .store("http://example.com/persist", html(), one_chunk(b"kept"))
            .await;
    }

    let reopened = DiskCache::open(config).await.unwrap();
    let entry = reopened
        .fetch("http://example.com/persist", &HeaderMap::new())
        .await
        .unwrap();
    assert_eq!(entry.entity_version(), 1);
    assert_eq!(entry.read_body().await.unwrap(), Bytes::from("kept"));
}

#[tokio::test]
async fn test_on_disk_layout_follows_fan_out() {
    let temp_dir = TempDir::new().unwrap();
    let config = DiskCacheConfig {
        dirlevels: 3,
        dirlength: 1,
        ..DiskCacheConfig::with_root(temp_dir.path())
    };
    let cache = DiskCache::open(config).await.unwrap();
    let name = "http://example.com/layout";
    cache.store(name, html(), one_chunk(b"body")).await;

    let expected = temp_dir.path().join(path_for(name, 3, 1));
    assert!(expected.with_extension("header").is_file());
    let data = cache.data_path(&CacheKey::new(name)).await.unwrap();
    assert!(data.is_file());
    assert_eq!(data.parent(), expected.parent());
    assert!(data
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with(&*expected.file_name().unwrap().to_string_lossy()));
    assert_eq!(
        cache.entry_paths(&CacheKey::new(name)).stem,
        expected
    );

    let raw = std::fs::read(expected.with_extension("header")).unwrap();
    assert_eq!(header::peek_format(&raw), Some(DISK_FORMAT_VERSION));
}

#[tokio::test]
async fn test_negotiated_resource_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DiskCache::open(DiskCacheConfig::with_root(temp_dir.path()))
        .await
        .unwrap();
    let name = "http://example.com/greeting";

    for (lang, text) in [("en", &b"hello"[..]), ("fr", &b"bonjour"[..])] {
        let meta = html()
            .with_response_header(VARY, HeaderValue::from_static("Accept-Language"))
            .with_request_header(ACCEPT_LANGUAGE, HeaderValue::from_static(lang));
        let body = futures::stream::iter(vec![Ok(Bytes::copy_from_slice(text))]);
        assert!(cache.store(name, meta, body).await.is_stored());
    }

    let fr = cache.fetch(name, &language("fr")).await.unwrap();
    assert!(fr.key().is_variant());
    assert_eq!(fr.read_body().await.unwrap(), Bytes::from("bonjour"));
    assert!(cache.fetch(name, &language("de")).await.is_none());

    let vary_file = cache.entry_paths(&CacheKey::new(name)).vary;
    let index = VariantIndex::decode(&std::fs::read(vary_file).unwrap()).unwrap();
    assert_eq!(index.format, VARY_FORMAT_VERSION);
    assert_eq!(index.name, name);
    assert_eq!(index.variants.len(), 2);
}

#[tokio::test]
async fn test_rejected_and_aborted_stores_serve_without_cache() {
    // Test: policy refusals are outcomes, never errors
    let temp_dir = TempDir::new().unwrap();
    let config = DiskCacheConfig {
        limits: CacheLimits {
            maxfs: Some(8),
            ..Default::default()
        },
        ..DiskCacheConfig::with_root(temp_dir.path())
    };
    let cache = DiskCache::open(config).await.unwrap();

    let outcome = cache
        .store("http://example.com/big", html(), one_chunk(b"more than eight"))
        .await;
    assert!(matches!(outcome, StoreOutcome::Rejected(_)));
    assert!(cache
        .fetch("http://example.com/big", &HeaderMap::new())
        .await
        .is_none());

    let stats = cache.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_store_opened_from_yaml_config() {
    let temp_dir = TempDir::new().unwrap();
    let yaml = format!(
        r#"
cache:
  cache_root: "{}"
  dirlevels: 1
  dirlength: 2
  limits:
    minfs: 0
  locations:
    - prefix: "http://example.com/small/"
      limits:
        maxfs: 4
"#,
        temp_dir.path().display()
    );
    let config = Config::from_yaml_with_env(&yaml).unwrap();
    config.validate().unwrap();

    let cache = DiskCache::open(config.cache).await.unwrap();
    let outcome = cache
        .store("http://example.com/small/x", html(), one_chunk(b"12345"))
        .await;
    assert!(matches!(outcome, StoreOutcome::Rejected(_)));

    let outcome = cache
        .store("http://example.com/other", html(), one_chunk(b""))
        .await;
    assert!(outcome.is_stored());
}

#[tokio::test]
async fn test_sweep_after_simulated_crash() {
    // Test: temp files of a writer that never finished are cleaned on open
    let temp_dir = TempDir::new().unwrap();
    let config = DiskCacheConfig {
        stale_temp_secs: 0,
        ..DiskCacheConfig::with_root(temp_dir.path())
    };
    DiskCache::open(config.clone()).await.unwrap();

    let orphan = temp_dir.path().join("kuratmpAAAAAAAAAA");
    std::fs::write(&orphan, b"half a body").unwrap();

    DiskCache::open(config).await.unwrap();
    assert!(!orphan.exists());
}

#[tokio::test]
async fn test_fetch_stream_matches_stored_body() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DiskCache::open(DiskCacheConfig::with_root(temp_dir.path()))
        .await
        .unwrap();
    let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let chunks: Vec<std::io::Result<Bytes>> = body
        .chunks(10_000)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let outcome = cache
        .store("http://example.com/blob", html(), futures::stream::iter(chunks))
        .await;
    assert!(outcome.is_stored());

    let entry = cache
        .fetch("http://example.com/blob", &HeaderMap::new())
        .await
        .unwrap();
    let mut streamed = Vec::new();
    let mut stream = Box::pin(entry.into_stream());
    while let Some(chunk) = stream.next().await {
        streamed.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(streamed, body);
}

#[tokio::test]
async fn test_expire_is_returned_for_freshness_decisions() {
    let temp_dir = TempDir::new().unwrap();
    let cache = DiskCache::open(DiskCacheConfig::with_root(temp_dir.path()))
        .await
        .unwrap();

    let meta = html();
    let expire = meta.date + Duration::from_secs(300);
    cache
        .store("http://example.com/fresh", meta.with_expire(expire), one_chunk(b"x"))
        .await;

    let entry = cache
        .fetch("http://example.com/fresh", &HeaderMap::new())
        .await
        .unwrap();
    let lifetime = entry.expire().unwrap().duration_since(entry.date()).unwrap();
    // Stored at microsecond precision
    assert!(lifetime >= Duration::from_secs(299) && lifetime <= Duration::from_secs(301));
}
