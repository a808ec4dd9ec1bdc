//! Redis store.
//!
//! Entries are written with `SET key value EX 604800` and read with `GET`.
//! The connection is opened on first use and shared; the connection manager
//! reconnects on its own after failures.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::StoreError;
use crate::model::Image;

use super::Cache;

/// Entry lifetime: 7 days
pub const REDIS_EXPIRE_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Redis-backed store.
pub struct RedisCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    expire_seconds: u64,
}

impl RedisCache {
    /// Store for `host`, either `host:port` or a full `redis://` URL.
    pub fn new(host: &str) -> Result<Self, StoreError> {
        let url = if host.contains("://") {
            host.to_string()
        } else {
            format!("redis://{}/", host)
        };
        let client = redis::Client::open(url.as_str())
            .map_err(|e| StoreError::Connection(format!("{}: {}", url, e)))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            expire_seconds: REDIS_EXPIRE_SECONDS,
        })
    }

    pub fn with_expire_seconds(mut self, seconds: u64) -> Self {
        self.expire_seconds = seconds;
        self
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                info!(url = ?self.client.get_connection_info().addr, "connected to redis");
                Ok::<_, redis::RedisError>(manager)
            })
            .await
            .map_err(redis_error)?;
        Ok(manager.clone())
    }
}

fn redis_error(err: redis::RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Protocol(err.to_string())
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        let mut connection = self.connection().await?;
        let raw: Option<Vec<u8>> = connection.get(key).await.map_err(redis_error)?;
        raw.map(|raw| Image::from_bytes(&raw)).transpose()
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        let mut connection = self.connection().await?;
        let value = image.to_bytes();
        connection
            .set_ex::<_, _, ()>(key, value.as_ref(), self.expire_seconds)
            .await
            .map_err(redis_error)
    }
}
