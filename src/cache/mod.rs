//! Cache tiers.
//!
//! A [`Cache`] is a key/value store for images. A [`CacheServer`] puts one in
//! front of an inner chain node:
//!
//! ```text
//!  params ──▶ key ──▶ cache.get ──hit──▶ image
//!                        │
//!                       miss
//!                        ▼
//!                   inner.get ──▶ cache.set ──▶ image
//! ```
//!
//! Networked stores are wrapped in [`IgnoreErrorCache`] then [`AsyncCache`]
//! so their failures degrade to misses and their writes never block.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::chain::ImageServer;
use crate::error::{ServerError, StoreError};
use crate::model::{Image, Params};

mod decorators;
mod file;
pub mod key;
mod memcache;
mod memory;
pub mod peer;
mod redis;

pub use decorators::{AsyncCache, IgnoreErrorCache};
pub use file::FileCache;
pub use key::{KeyGenerator, ParamsHashKeyGenerator, PrefixKeyGenerator};
pub use memcache::MemcacheCache;
pub use memory::{CacheStats, MemoryCache, DEFAULT_MEMORY_CACHE_SIZE};
pub use peer::{PeerCache, PeerStats, DEFAULT_PEER_GROUP_NAME, PEER_PATH_PREFIX};
pub use self::redis::{RedisCache, REDIS_EXPIRE_SECONDS};

/// A key/value image store.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up an entry. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError>;

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError>;
}

#[async_trait]
impl<C: Cache + ?Sized> Cache for Arc<C> {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        (**self).set(key, image).await
    }
}

/// Wrap a networked store so it never fails or blocks the chain.
pub fn networked(cache: impl Cache + 'static) -> Arc<dyn Cache> {
    Arc::new(AsyncCache::new(Arc::new(IgnoreErrorCache::new(cache))))
}

// =============================================================================
// CacheServer
// =============================================================================

/// Chain node serving from a cache, filling it from `inner` on a miss.
pub struct CacheServer {
    name: &'static str,
    cache: Arc<dyn Cache>,
    key_generator: Arc<dyn KeyGenerator>,
    inner: Arc<dyn ImageServer>,
}

impl CacheServer {
    pub fn new(
        name: &'static str,
        cache: Arc<dyn Cache>,
        key_generator: Arc<dyn KeyGenerator>,
        inner: Arc<dyn ImageServer>,
    ) -> Self {
        Self {
            name,
            cache,
            key_generator,
            inner,
        }
    }

    /// Tier name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[async_trait]
impl ImageServer for CacheServer {
    async fn get(&self, params: &Params) -> Result<Image, ServerError> {
        let key = self.key_generator.key(params);

        if let Some(image) = self.cache.get(&key).await? {
            debug!(tier = self.name, key = %key, "cache hit");
            return Ok(image);
        }
        debug!(tier = self.name, key = %key, "cache miss");

        let image = self.inner.get(params).await?;
        self.cache.set(&key, &image).await?;
        Ok(image)
    }
}

// =============================================================================
// Tests
// =============================================================================
