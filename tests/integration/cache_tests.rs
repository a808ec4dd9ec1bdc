//! Cache tier integration tests.
//!
//! Tests verify:
//! - Memory tier hits, byte-budget eviction and stats
//! - Key generation is deterministic and namespaced
//! - Peer group nodes exchange entries over HTTP

use std::sync::Arc;

use imgserve::cache::{
    Cache, CacheServer, KeyGenerator, MemoryCache, ParamsHashKeyGenerator, PeerCache,
    PrefixKeyGenerator,
};
use imgserve::chain::ImageServer;
use imgserve::model::{Image, Params};
use imgserve::server::{create_router_with_state, AppState, RouterConfig};

use super::test_utils::{png_image, CountingServer};

// =============================================================================
// Memory Tier
// =============================================================================

#[tokio::test]
async fn test_memory_tier_serves_repeats() {
    let inner = CountingServer::new(png_image(8, 8));
    let memory = Arc::new(MemoryCache::with_capacity(1 << 20));
    let server = CacheServer::new(
        "memory",
        memory.clone(),
        Arc::new(ParamsHashKeyGenerator),
        inner.clone(),
    );

    let params = Params::new().with("source", "a.png").with("width", 8i64);
    for _ in 0..3 {
        server.get(&params).await.unwrap();
    }

    assert_eq!(inner.calls(), 1);
    let stats = memory.stats().await;
    assert_eq!(stats.items, 1);
    assert_eq!(stats.gets, 3);
    assert_eq!(stats.hits, 2);
}

#[tokio::test]
async fn test_memory_tier_evicts_to_budget() {
    let image = Image::new("png", vec![0u8; 400]);
    let inner = CountingServer::new(image);
    let memory = Arc::new(MemoryCache::with_capacity(1000));
    let server = CacheServer::new(
        "memory",
        memory.clone(),
        Arc::new(ParamsHashKeyGenerator),
        inner.clone(),
    );

    for i in 0..5i64 {
        let params = Params::new().with("source", "a.png").with("width", i + 1);
        server.get(&params).await.unwrap();
    }

    let stats = memory.stats().await;
    assert!(stats.bytes <= 1000);
    assert!(stats.items < 5);
    assert!(stats.evictions > 0);

    // The most recent entry survives.
    let last = Params::new().with("source", "a.png").with("width", 5i64);
    server.get(&last).await.unwrap();
    assert_eq!(inner.calls(), 5);
}

// =============================================================================
// Keys
// =============================================================================

#[test]
fn test_keys_ignore_insertion_order() {
    let a = Params::new().with("source", "a.png").with("width", 10i64).with("format", "png");
    let b = Params::new().with("format", "png").with("width", 10i64).with("source", "a.png");
    let generator = ParamsHashKeyGenerator;
    assert_eq!(generator.key(&a), generator.key(&b));
}

#[test]
fn test_keys_distinguish_value_types() {
    let int = Params::new().with("width", 10i64);
    let text = Params::new().with("width", "10");
    assert_ne!(ParamsHashKeyGenerator::hash(&int), ParamsHashKeyGenerator::hash(&text));
}

#[test]
fn test_prefixed_keys() {
    let params = Params::new().with("source", "a.png");
    let generator = PrefixKeyGenerator::new("image:", ParamsHashKeyGenerator);
    let key = generator.key(&params);
    assert_eq!(key, format!("image:{}", ParamsHashKeyGenerator::hash(&params)));
}

// =============================================================================
// Peer Group
// =============================================================================

/// Start a node serving the peer protocol; returns its peer cache.
async fn spawn_node(
    listener: tokio::net::TcpListener,
    self_addr: &str,
    peer_addr: &str,
) -> Arc<PeerCache> {
    let peer = Arc::new(PeerCache::new("group", self_addr, [peer_addr], 1 << 20));
    let state = AppState::new(CountingServer::new(png_image(2, 2)))
        .with_peer_cache(Some(peer.clone()));
    let router = create_router_with_state(state, RouterConfig::new().with_tracing(false));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    peer
}

/// A key `cache` assigns to `node`.
fn key_owned_by(cache: &PeerCache, node: &str) -> String {
    (0..10_000)
        .map(|i| format!("key{:05}", i))
        .find(|k| cache.owner(k) == node)
        .unwrap()
}

#[tokio::test]
async fn test_peer_group_never_writes_to_owner() {
    let listener_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = listener_a.local_addr().unwrap().to_string();
    let addr_b = listener_b.local_addr().unwrap().to_string();

    let a = spawn_node(listener_a, &addr_a, &addr_b).await;
    let b = spawn_node(listener_b, &addr_b, &addr_a).await;

    // A derives an entry owned by B and keeps it only as a hot copy.
    let key = key_owned_by(&a, &format!("http://{}", addr_b));
    let image = png_image(3, 3);
    a.set(&key, &image).await.unwrap();
    assert_eq!(b.serve_get(&key).await, None);

    let stats = b.stats().await;
    assert_eq!(stats.group.server_requests, 1);
    assert_eq!(stats.caches.main.items, 0);

    assert_eq!(a.get(&key).await.unwrap(), Some(image));
    let stats = a.stats().await;
    assert_eq!(stats.group.peer_loads, 0);
    assert_eq!(stats.caches.hot.items, 1);
}

#[tokio::test]
async fn test_peer_group_fetches_from_owner() {
    let listener_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = listener_a.local_addr().unwrap().to_string();
    let addr_b = listener_b.local_addr().unwrap().to_string();

    let a = spawn_node(listener_a, &addr_a, &addr_b).await;
    let b = spawn_node(listener_b, &addr_b, &addr_a).await;

    let key = key_owned_by(&b, &format!("http://{}", addr_b));
    let image = png_image(5, 5);
    b.set(&key, &image).await.unwrap();

    assert_eq!(a.get(&key).await.unwrap(), Some(image.clone()));
    assert_eq!(a.stats().await.group.peer_loads, 1);

    // The second read is served from A's hot copy.
    assert_eq!(a.get(&key).await.unwrap(), Some(image));
    let stats = a.stats().await;
    assert_eq!(stats.group.peer_loads, 1);
    assert_eq!(stats.group.cache_hits, 1);
    assert_eq!(stats.caches.hot.items, 1);
}

#[tokio::test]
async fn test_peer_miss_is_a_miss() {
    let listener_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = listener_a.local_addr().unwrap().to_string();
    let addr_b = listener_b.local_addr().unwrap().to_string();

    let a = spawn_node(listener_a, &addr_a, &addr_b).await;
    let _b = spawn_node(listener_b, &addr_b, &addr_a).await;

    let key = key_owned_by(&a, &format!("http://{}", addr_b));
    assert_eq!(a.get(&key).await.unwrap(), None);
    assert_eq!(a.stats().await.group.peer_errors, 0);
}
