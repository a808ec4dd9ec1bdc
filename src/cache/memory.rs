//! In-process LRU store.
//!
//! # Size-Based Eviction
//!
//! The store tracks the total encoded size of its entries and evicts
//! least-recently-used entries when the byte capacity is exceeded. An entry
//! count bound keeps LRU bookkeeping small when images are tiny.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::Image;

use super::Cache;

/// Default capacity: 128 MiB
pub const DEFAULT_MEMORY_CACHE_SIZE: usize = 128 * 1024 * 1024;

/// Default maximum number of entries
const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Counters for one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub bytes: u64,
    pub items: u64,
    pub gets: u64,
    pub hits: u64,
    pub evictions: u64,
}

struct Entries {
    lru: LruCache<String, Image>,
    size: usize,
}

/// Byte-bounded LRU of images.
pub struct MemoryCache {
    entries: Mutex<Entries>,
    max_size: usize,
    gets: AtomicU64,
    hits: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CACHE_SIZE)
    }

    /// Store bounded to `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::new(max_entries),
                size: 0,
            }),
            max_size,
            gets: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Entry lookup that marks it recently used.
    pub async fn lookup(&self, key: &str) -> Option<Image> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.lock().await;
        let found = entries.lru.get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert, evicting least-recently-used entries past capacity.
    ///
    /// An image larger than the whole capacity is not stored.
    pub async fn insert(&self, key: &str, image: Image) {
        let new_size = entry_size(key, &image);
        if new_size > self.max_size {
            return;
        }

        let mut guard = self.entries.lock().await;
        let entries = &mut *guard;
        if let Some(old) = entries.lru.peek(key) {
            let old_size = entry_size(key, old);
            entries.size = entries.size.saturating_sub(old_size);
        }

        if let Some((evicted_key, evicted)) = entries.lru.push(key.to_string(), image) {
            // Entry-count bound hit; push hands back the dropped LRU entry.
            if evicted_key != key {
                entries.size = entries.size.saturating_sub(entry_size(&evicted_key, &evicted));
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.size += new_size;

        while entries.size > self.max_size {
            match entries.lru.pop_lru() {
                Some((evicted_key, evicted)) => {
                    entries.size = entries.size.saturating_sub(entry_size(&evicted_key, &evicted));
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.lru.contains(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.lru.is_empty()
    }

    /// Current total size in bytes.
    pub async fn size(&self) -> usize {
        self.entries.lock().await.size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().await;
        CacheStats {
            bytes: entries.size as u64,
            items: entries.lru.len() as u64,
            gets: self.gets.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_size(key: &str, image: &Image) -> usize {
    key.len() + image.format.len() + image.len()
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        Ok(self.lookup(key).await)
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        self.insert(key, image.clone()).await;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
