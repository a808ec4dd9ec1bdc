//! Memcached store speaking the text protocol.
//!
//! Connections are checked out of a small idle pool for one exchange each,
//! so slow replies only hold up their own request. A connection that saw
//! any error is dropped instead of being returned.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::model::Image;

use super::Cache;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;

/// Largest value accepted from the server (memcached's default item limit).
pub const MAX_VALUE_LEN: usize = 1024 * 1024;

/// Idle connections kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 8;

type Connection = BufStream<TcpStream>;

/// Memcached-backed store.
pub struct MemcacheCache {
    host: String,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
}

impl MemcacheCache {
    /// Store for a `host:port` address. Nothing is dialed until first use.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            idle: Mutex::new(Vec::new()),
            max_idle: DEFAULT_MAX_IDLE,
        }
    }

    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Number of idle connections in the pool.
    pub async fn idle_connections(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// An idle connection, or a freshly dialed one.
    async fn checkout(&self) -> Result<Connection, StoreError> {
        if let Some(connection) = self.idle.lock().await.pop() {
            return Ok(connection);
        }
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.host))
            .await
            .map_err(|_| StoreError::Connection(format!("{}: connect timed out", self.host)))?
            .map_err(|e| StoreError::Connection(format!("{}: {}", self.host, e)))?;
        debug!(host = %self.host, "connected to memcached");
        Ok(BufStream::new(stream))
    }

    async fn checkin(&self, connection: Connection) {
        let mut idle = self.idle.lock().await;
        if idle.len() < self.max_idle {
            idle.push(connection);
        }
    }

    async fn timed<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(IO_TIMEOUT, op)
            .await
            .unwrap_or_else(|_| Err(StoreError::Connection(format!("{}: timed out", self.host))))
    }
}

fn check_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.len() > MAX_KEY_LEN || key.bytes().any(|b| b <= b' ' || b == 0x7f) {
        return Err(StoreError::Protocol(format!("invalid memcached key {:?}", key)));
    }
    Ok(())
}

async fn read_line(connection: &mut Connection) -> Result<String, StoreError> {
    let mut line = String::new();
    let n = connection.read_line(&mut line).await?;
    if n == 0 {
        return Err(StoreError::Connection("connection closed".to_string()));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn get_value(connection: &mut Connection, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    connection
        .write_all(format!("get {}\r\n", key).as_bytes())
        .await?;
    connection.flush().await?;

    let header = read_line(connection).await?;
    if header == "END" {
        return Ok(None);
    }

    // VALUE <key> <flags> <bytes>
    let mut parts = header.split_ascii_whitespace();
    let (Some("VALUE"), Some(_), Some(_), Some(len)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(StoreError::Protocol(format!("unexpected reply {:?}", header)));
    };
    let len: usize = len
        .parse()
        .map_err(|_| StoreError::Protocol(format!("bad value length in {:?}", header)))?;
    if len > MAX_VALUE_LEN {
        return Err(StoreError::Protocol(format!(
            "value of {} bytes exceeds {}",
            len, MAX_VALUE_LEN
        )));
    }

    let mut data = vec![0u8; len + 2];
    connection.read_exact(&mut data).await?;
    if &data[len..] != b"\r\n" {
        return Err(StoreError::Protocol("value not terminated by CRLF".to_string()));
    }
    data.truncate(len);

    let end = read_line(connection).await?;
    if end != "END" {
        return Err(StoreError::Protocol(format!("expected END, got {:?}", end)));
    }
    Ok(Some(data))
}

async fn set_value(connection: &mut Connection, key: &str, value: &[u8]) -> Result<(), StoreError> {
    connection
        .write_all(format!("set {} 0 0 {}\r\n", key, value.len()).as_bytes())
        .await?;
    connection.write_all(value).await?;
    connection.write_all(b"\r\n").await?;
    connection.flush().await?;

    let reply = read_line(connection).await?;
    if reply == "STORED" {
        Ok(())
    } else {
        Err(StoreError::Protocol(format!("set rejected: {}", reply)))
    }
}

// A failed exchange may leave a half-read reply on the socket, so only
// connections that completed cleanly go back to the pool.
#[async_trait]
impl Cache for MemcacheCache {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        check_key(key)?;
        let mut connection = self.checkout().await?;
        let raw = self.timed(get_value(&mut connection, key)).await?;
        self.checkin(connection).await;
        raw.map(|raw| Image::from_bytes(&raw)).transpose()
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        check_key(key)?;
        let value = image.to_bytes();
        if value.len() > MAX_VALUE_LEN {
            return Err(StoreError::Protocol(format!(
                "value of {} bytes exceeds {}",
                value.len(),
                MAX_VALUE_LEN
            )));
        }
        let mut connection = self.checkout().await?;
        self.timed(set_value(&mut connection, key, &value)).await?;
        self.checkin(connection).await;
        Ok(())
    }
}
