//! Serving chain integration tests.
//!
//! Tests verify:
//! - Full chain write-through and cache reuse
//! - Local tier failures propagate, networked tier failures are absorbed
//! - Failed derivations are never cached
//! - Animated GIF processing and fallback to the general pipeline
//! - The admission limiter bounds concurrent work

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;

use imgserve::cache::{networked, CacheServer, ParamsHashKeyGenerator};
use imgserve::chain::compose::build_chain_with_source;
use imgserve::chain::{ImageServer, LimitServer};
use imgserve::config::Config;
use imgserve::error::{ServerError, StoreError};
use imgserve::model::{Image, Params};
use imgserve::process::{Dispatcher, ProcessServer};
use imgserve::server::parse_params;
use imgserve::source::SourceServer;

use super::test_utils::{
    animated_gif, dimensions, eventually, gif_frame_count, png_image, CountingServer, FlakyCache,
    MockSource,
};

fn config(args: &[&str]) -> Config {
    let mut argv = vec!["imgserve", "--source-path", "/unused"];
    argv.extend_from_slice(args);
    Config::parse_from(argv)
}

fn params(source: &str, query: &str) -> Params {
    parse_params(source, Some(query)).unwrap()
}

fn processing_chain(source: MockSource) -> (Arc<dyn ImageServer>, Arc<MockSource>) {
    let source = Arc::new(source);
    let server: Arc<dyn ImageServer> = Arc::new(SourceServer::new(source.clone()));
    let server: Arc<dyn ImageServer> = Arc::new(ProcessServer::new(server, Dispatcher::default()));
    (server, source)
}

// =============================================================================
// Composed Chain
// =============================================================================

#[tokio::test]
async fn test_full_chain_derives_and_caches() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MockSource::new().with_image("photo.png", png_image(64, 32)));
    let config = config(&["--file-cache-path", dir.path().to_str().unwrap()]);
    let chain = build_chain_with_source(&config, source.clone()).unwrap();
    assert_eq!(chain.tiers, vec!["memory", "file", "limit"]);

    let request = params("photo.png", "width=32&format=jpeg");
    let first = chain.server.get(&request).await.unwrap();
    assert_eq!(first.format, "jpeg");
    assert_eq!(dimensions(&first), (32, 16));

    let second = chain.server.get(&request).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(source.fetch_count(), 1);

    // The file tier holds the entry under the params hash.
    let key = ParamsHashKeyGenerator::hash(&request);
    assert!(dir.path().join(&key[..2]).join(&key).exists());
}

#[tokio::test]
async fn test_file_tier_survives_memory_loss() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&[
        "--file-cache-path",
        dir.path().to_str().unwrap(),
        "--memory-cache-size",
        "0",
    ]);
    let request = params("photo.png", "width=16");

    let source = Arc::new(MockSource::new().with_image("photo.png", png_image(64, 32)));
    let chain = build_chain_with_source(&config, source.clone()).unwrap();
    let first = chain.server.get(&request).await.unwrap();

    // A fresh chain over the same directory does not touch the source.
    let fresh = Arc::new(MockSource::new());
    let chain = build_chain_with_source(&config, fresh.clone()).unwrap();
    assert_eq!(chain.server.get(&request).await.unwrap(), first);
    assert_eq!(fresh.fetch_count(), 0);
}

#[tokio::test]
async fn test_distinct_params_are_distinct_entries() {
    let source = Arc::new(MockSource::new().with_image("photo.png", png_image(64, 32)));
    let chain = build_chain_with_source(&config(&[]), source.clone()).unwrap();

    let small = chain.server.get(&params("photo.png", "width=8")).await.unwrap();
    let large = chain.server.get(&params("photo.png", "width=48")).await.unwrap();
    assert_eq!(dimensions(&small), (8, 4));
    assert_eq!(dimensions(&large), (48, 24));
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn test_missing_source_is_not_found() {
    let source = Arc::new(MockSource::new());
    let chain = build_chain_with_source(&config(&[]), source).unwrap();
    let err = chain.server.get(&params("nope.png", "")).await.unwrap_err();
    assert!(matches!(err, ServerError::SourceNotFound(_)));
}

// =============================================================================
// Fault Handling
// =============================================================================

#[tokio::test]
async fn test_local_tier_failure_propagates() {
    let inner = CountingServer::new(png_image(4, 4));
    let store = FlakyCache::failing();
    let server = CacheServer::new(
        "file",
        store.clone(),
        Arc::new(ParamsHashKeyGenerator),
        inner.clone(),
    );

    let err = server.get(&params("a.png", "")).await.unwrap_err();
    assert!(matches!(err, ServerError::Store(StoreError::Connection(_))));
    assert_eq!(inner.calls(), 0);
}

#[tokio::test]
async fn test_networked_tier_failure_is_absorbed() {
    let image = png_image(4, 4);
    let inner = CountingServer::new(image.clone());
    let store = FlakyCache::failing();
    let server = CacheServer::new(
        "redis",
        networked(store.clone()),
        Arc::new(ParamsHashKeyGenerator),
        inner.clone(),
    );

    let request = params("a.png", "");
    assert_eq!(server.get(&request).await.unwrap(), image);
    assert_eq!(inner.calls(), 1);

    // Once the store recovers, writes land again (in the background).
    store.set_failing(false);
    assert_eq!(server.get(&request).await.unwrap(), image);
    let key = ParamsHashKeyGenerator::hash(&request);
    let probe = store.clone();
    eventually(|| {
        let probe = probe.clone();
        let key = key.clone();
        async move { probe.contains(&key).await }
    })
    .await;

    assert_eq!(server.get(&request).await.unwrap(), image);
    assert_eq!(inner.calls(), 2);
}

#[tokio::test]
async fn test_failed_derivation_is_not_cached() {
    let inner = CountingServer::failing(ServerError::Processing("boom".to_string()));
    let store = FlakyCache::new();
    let server = CacheServer::new(
        "memory",
        store.clone(),
        Arc::new(ParamsHashKeyGenerator),
        inner.clone(),
    );

    for _ in 0..2 {
        assert!(server.get(&params("a.png", "")).await.is_err());
    }
    assert_eq!(inner.calls(), 2);
    assert_eq!(store.set_count(), 0);
    assert_eq!(store.len().await, 0);
}

// =============================================================================
// GIF Handling
// =============================================================================

#[tokio::test]
async fn test_animated_gif_keeps_frames() {
    let (server, _) = processing_chain(MockSource::new().with_image("a.gif", animated_gif(3, 40, 20)));

    let out = server.get(&params("a.gif", "width=20")).await.unwrap();
    assert_eq!(out.format, "gif");
    assert_eq!(gif_frame_count(&out), 3);
    assert_eq!(dimensions(&out), (20, 10));
}

#[tokio::test]
async fn test_gif_to_png_falls_back_to_general_pipeline() {
    let (server, _) = processing_chain(MockSource::new().with_image("a.gif", animated_gif(3, 40, 20)));

    let out = server.get(&params("a.gif", "format=png&width=10")).await.unwrap();
    assert_eq!(out.format, "png");
    assert_eq!(dimensions(&out), (10, 5));
}

#[tokio::test]
async fn test_still_gif_uses_general_pipeline() {
    let (server, _) = processing_chain(MockSource::new().with_image("a.gif", animated_gif(1, 40, 20)));

    let out = server.get(&params("a.gif", "width=20")).await.unwrap();
    assert_eq!(out.format, "gif");
    assert_eq!(dimensions(&out), (20, 10));
}

#[tokio::test]
async fn test_unchanged_request_returns_original() {
    let original = png_image(16, 16);
    let (server, _) = processing_chain(MockSource::new().with_image("a.png", original.clone()));

    let out = server.get(&params("a.png", "")).await.unwrap();
    assert_eq!(out, original);
}

// =============================================================================
// Admission Limiter
// =============================================================================

/// Inner node recording the highest number of overlapping calls.
#[derive(Default)]
struct ConcurrencyProbe {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ImageServer for ConcurrencyProbe {
    async fn get(&self, _params: &Params) -> Result<Image, ServerError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(Image::new("png", vec![0u8]))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_limiter_bounds_concurrency() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let limiter = Arc::new(LimitServer::new(probe.clone(), 2));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.get(&params(&format!("{}.png", i), "")).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
    assert_eq!(limiter.available(), 2);
}
