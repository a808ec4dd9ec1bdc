//! Wrappers for networked stores.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::model::Image;

use super::Cache;

/// Turns store failures into misses and no-op saves.
pub struct IgnoreErrorCache<C> {
    inner: C,
}

impl<C: Cache> IgnoreErrorCache<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: Cache> Cache for IgnoreErrorCache<C> {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        match self.inner.get(key).await {
            Ok(found) => Ok(found),
            Err(e) => {
                warn!(key = %key, error = %e, "cache lookup failed, treating as miss");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        if let Err(e) = self.inner.set(key, image).await {
            warn!(key = %key, error = %e, "cache save failed");
        }
        Ok(())
    }
}

/// Runs saves as detached tasks.
///
/// `set` returns immediately. The outcome of the write is discarded and a
/// pending write may be lost on shutdown.
pub struct AsyncCache {
    inner: Arc<dyn Cache>,
}

impl AsyncCache {
    pub fn new(inner: Arc<dyn Cache>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Cache for AsyncCache {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let image = image.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.set(&key, &image).await {
                debug!(key = %key, error = %e, "async cache save failed");
            }
        });
        Ok(())
    }
}
