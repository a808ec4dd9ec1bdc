//! Concurrency limiter for uncached derivations.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::trace;

use crate::error::ServerError;
use crate::model::{Image, Params};

use super::ImageServer;

/// Default limiter capacity: twice the available parallelism.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// Bounds the number of requests executing in the inner server at once.
///
/// Callers past the limit wait for a permit; there is no queue cap and no
/// timeout. The permit is dropped on every exit path of the inner call,
/// including unwinding.
pub struct LimitServer {
    inner: Arc<dyn ImageServer>,
    semaphore: Semaphore,
    capacity: usize,
}

impl LimitServer {
    /// Wrap `inner` with an admission gate of `capacity` permits.
    ///
    /// A capacity of zero is raised to one so requests can make progress.
    pub fn new(inner: Arc<dyn ImageServer>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            semaphore: Semaphore::new(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl ImageServer for LimitServer {
    async fn get(&self, params: &Params) -> Result<Image, ServerError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ServerError::Internal("concurrency limiter closed".to_string()))?;
        trace!(available = self.available(), "limiter admitted request");
        self.inner.get(params).await
    }
}
