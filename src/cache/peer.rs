//! Peer group store.
//!
//! A fixed group of nodes shares one logical cache. Every key has a single
//! owner chosen by rendezvous hashing over the node list (this node plus
//! the configured peers):
//!
//! ```text
//!                    ┌── owner is self ──▶ main LRU
//!   key ──▶ owner ───┤
//!                    └── owner is peer ──▶ hot LRU ──miss──▶ GET peer
//! ```
//!
//! Owners keep entries in their "main" LRU, filled only by their own chain.
//! Non-owners keep a small "hot" copy of what they fetched from peers or
//! derived themselves. Peers only read from each other, over
//! `GET /_peercache/{name}/{key}`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::StoreError;
use crate::model::Image;

use super::memory::{CacheStats, MemoryCache};
use super::Cache;

/// Path prefix of the peer protocol.
pub const PEER_PATH_PREFIX: &str = "/_peercache";

pub const DEFAULT_PEER_GROUP_NAME: &str = "imgserve";

const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Share of the byte budget given to the hot cache (1/8).
const HOT_CACHE_DIVISOR: usize = 8;

// =============================================================================
// Stats
// =============================================================================

/// Group-level counters.
#[derive(Debug, Default)]
struct GroupCounters {
    gets: AtomicU64,
    cache_hits: AtomicU64,
    peer_loads: AtomicU64,
    peer_errors: AtomicU64,
    local_loads: AtomicU64,
    server_requests: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GroupStats {
    pub gets: u64,
    pub cache_hits: u64,
    pub peer_loads: u64,
    pub peer_errors: u64,
    pub local_loads: u64,
    pub server_requests: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CachesStats {
    pub main: CacheStats,
    pub hot: CacheStats,
}

/// Snapshot served by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerStats {
    pub name: String,
    pub group: GroupStats,
    pub caches: CachesStats,
}

// =============================================================================
// PeerCache
// =============================================================================

/// One node of a peer group.
pub struct PeerCache {
    name: String,
    self_url: String,
    nodes: Vec<String>,
    main: MemoryCache,
    hot: MemoryCache,
    client: reqwest::Client,
    counters: GroupCounters,
}

impl PeerCache {
    /// Node `self_addr` in group `name` with the given peers.
    ///
    /// Addresses are `host:port` or full `http://` URLs. `max_size` bytes are
    /// split between the main and hot caches.
    pub fn new<I, S>(name: impl Into<String>, self_addr: &str, peers: I, max_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let self_url = normalize(self_addr);
        let mut nodes = vec![self_url.clone()];
        for peer in peers {
            let peer = peer.as_ref().trim();
            if peer.is_empty() {
                continue;
            }
            let url = normalize(peer);
            if !nodes.contains(&url) {
                nodes.push(url);
            }
        }

        let hot_size = max_size / HOT_CACHE_DIVISOR;
        let client = reqwest::Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            self_url,
            nodes,
            main: MemoryCache::with_capacity(max_size - hot_size),
            hot: MemoryCache::with_capacity(hot_size),
            client,
            counters: GroupCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every node of the group, this one first.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Node owning `key`: highest SHA-256 score of node and key.
    pub fn owner(&self, key: &str) -> &str {
        self.nodes
            .iter()
            .max_by_key(|node| score(node, key))
            .map(String::as_str)
            .unwrap_or(self.self_url.as_str())
    }

    fn is_local(&self, key: &str) -> bool {
        self.owner(key) == self.self_url
    }

    fn peer_url(&self, node: &str, key: &str) -> String {
        format!("{}{}/{}/{}", node, PEER_PATH_PREFIX, self.name, key)
    }

    /// Answer a peer's lookup from the main cache.
    pub async fn serve_get(&self, key: &str) -> Option<Image> {
        self.counters.server_requests.fetch_add(1, Ordering::Relaxed);
        self.main.lookup(key).await
    }

    pub async fn stats(&self) -> PeerStats {
        let c = &self.counters;
        PeerStats {
            name: self.name.clone(),
            group: GroupStats {
                gets: c.gets.load(Ordering::Relaxed),
                cache_hits: c.cache_hits.load(Ordering::Relaxed),
                peer_loads: c.peer_loads.load(Ordering::Relaxed),
                peer_errors: c.peer_errors.load(Ordering::Relaxed),
                local_loads: c.local_loads.load(Ordering::Relaxed),
                server_requests: c.server_requests.load(Ordering::Relaxed),
            },
            caches: CachesStats {
                main: self.main.stats().await,
                hot: self.hot.stats().await,
            },
        }
    }

    async fn fetch_from_peer(&self, node: &str, key: &str) -> Result<Option<Image>, StoreError> {
        let url = self.peer_url(node, key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Connection(format!("{}: {}", url, e)))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| StoreError::Connection(format!("{}: {}", url, e)))?;
                Image::from_bytes(&body).map(Some)
            }
            status => Err(StoreError::Protocol(format!("{}: peer answered {}", url, status))),
        }
    }
}

#[async_trait]
impl Cache for PeerCache {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);

        let owner = self.owner(key).to_string();
        if owner == self.self_url {
            let found = self.main.lookup(key).await;
            if found.is_some() {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(found);
        }

        if let Some(image) = self.hot.lookup(key).await {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(image));
        }

        match self.fetch_from_peer(&owner, key).await {
            Ok(Some(image)) => {
                self.counters.peer_loads.fetch_add(1, Ordering::Relaxed);
                self.hot.insert(key, image.clone()).await;
                debug!(peer = %owner, key = %key, "loaded from peer");
                Ok(Some(image))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.counters.peer_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        if self.is_local(key) {
            self.counters.local_loads.fetch_add(1, Ordering::Relaxed);
            self.main.insert(key, image.clone()).await;
            return Ok(());
        }

        // The owner derives its own copy; entries never travel to it.
        self.hot.insert(key, image.clone()).await;
        Ok(())
    }
}

fn normalize(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

fn score(node: &str, key: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(node.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

// =============================================================================
// Tests
// =============================================================================
