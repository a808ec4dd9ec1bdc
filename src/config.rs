//! Configuration management for imgserve.
//!
//! Every option can be given on the command line or through an environment
//! variable with the `IMGSERVE_` prefix:
//!
//! - `IMGSERVE_HOST`, `IMGSERVE_PORT` - bind address (default: 0.0.0.0:8080)
//! - `IMGSERVE_SOURCE_PATH` - serve originals from this directory
//! - `IMGSERVE_SOURCE_URL_PREFIX` - fetch originals from `<prefix><source>`
//! - `IMGSERVE_MEMORY_CACHE_SIZE` - in-process cache bytes (default: 128 MiB, 0 disables)
//! - `IMGSERVE_FILE_CACHE_PATH` - on-disk cache directory
//! - `IMGSERVE_REDIS_HOST`, `IMGSERVE_MEMCACHED_HOST` - remote caches
//! - `IMGSERVE_PEER_CACHE_PEERS` - comma-separated peer group members
//! - `IMGSERVE_PNGQUANT_COMMAND` - compress PNG output with pngquant
//!
//! Caches whose option is unset are left out of the chain.

use clap::Parser;

use crate::cache::peer::DEFAULT_PEER_GROUP_NAME;
use crate::cache::DEFAULT_MEMORY_CACHE_SIZE;
use crate::process::{
    DEFAULT_GIF_MAX_HEIGHT, DEFAULT_GIF_MAX_WIDTH, DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH,
    DEFAULT_PNGQUANT_SPEED,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default HTTP cache max-age in seconds (7 days).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 7 * 24 * 60 * 60;

/// Slowest and fastest pngquant speeds.
const PNGQUANT_SPEED_RANGE: std::ops::RangeInclusive<u8> = 1..=11;

// =============================================================================
// CLI Arguments
// =============================================================================

/// imgserve - on-demand image derivation server.
///
/// Fetches originals from a directory or an HTTP origin, crops, rotates,
/// resizes and re-encodes them per request, and caches the results in
/// memory, on disk, in redis/memcached or across a peer group.
#[derive(Parser, Debug, Clone)]
#[command(name = "imgserve")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "IMGSERVE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "IMGSERVE_PORT")]
    pub port: u16,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "IMGSERVE_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // =========================================================================
    // Source Configuration
    // =========================================================================
    /// Directory to serve originals from. Takes precedence over the URL prefix.
    #[arg(long, env = "IMGSERVE_SOURCE_PATH")]
    pub source_path: Option<String>,

    /// URL prefix prepended to the requested source to fetch originals.
    #[arg(long, env = "IMGSERVE_SOURCE_URL_PREFIX")]
    pub source_url_prefix: Option<String>,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// In-process cache size in bytes (0 disables).
    #[arg(long, default_value_t = DEFAULT_MEMORY_CACHE_SIZE, env = "IMGSERVE_MEMORY_CACHE_SIZE")]
    pub memory_cache_size: usize,

    /// Directory for the on-disk cache.
    #[arg(long, env = "IMGSERVE_FILE_CACHE_PATH")]
    pub file_cache_path: Option<String>,

    /// Redis address (`host:port` or `redis://` URL).
    #[arg(long, env = "IMGSERVE_REDIS_HOST")]
    pub redis_host: Option<String>,

    /// Memcached address (`host:port`).
    #[arg(long, env = "IMGSERVE_MEMCACHED_HOST")]
    pub memcached_host: Option<String>,

    /// Other members of the peer cache group (comma-separated `host:port`).
    #[arg(long, env = "IMGSERVE_PEER_CACHE_PEERS", value_delimiter = ',')]
    pub peer_cache_peers: Option<Vec<String>>,

    /// Peer cache group name, shared by all members.
    #[arg(long, default_value = DEFAULT_PEER_GROUP_NAME, env = "IMGSERVE_PEER_CACHE_NAME")]
    pub peer_cache_name: String,

    /// Peer cache size in bytes on this node.
    #[arg(long, default_value_t = 0, env = "IMGSERVE_PEER_CACHE_SIZE")]
    pub peer_cache_size: usize,

    /// Path serving peer cache statistics as JSON.
    #[arg(long, env = "IMGSERVE_PEER_CACHE_STATS_PATH")]
    pub peer_cache_stats_path: Option<String>,

    // =========================================================================
    // Processing Configuration
    // =========================================================================
    /// Maximum output width of the general pipeline.
    #[arg(long, default_value_t = DEFAULT_MAX_WIDTH, env = "IMGSERVE_MAX_WIDTH")]
    pub max_width: u32,

    /// Maximum output height of the general pipeline.
    #[arg(long, default_value_t = DEFAULT_MAX_HEIGHT, env = "IMGSERVE_MAX_HEIGHT")]
    pub max_height: u32,

    /// Maximum output width of animated GIFs.
    #[arg(long, default_value_t = DEFAULT_GIF_MAX_WIDTH, env = "IMGSERVE_GIF_MAX_WIDTH")]
    pub gif_max_width: u32,

    /// Maximum output height of animated GIFs.
    #[arg(long, default_value_t = DEFAULT_GIF_MAX_HEIGHT, env = "IMGSERVE_GIF_MAX_HEIGHT")]
    pub gif_max_height: u32,

    /// Maximum derivations running at once (0 = twice the CPU count).
    #[arg(long, default_value_t = 0, env = "IMGSERVE_CONCURRENCY")]
    pub concurrency: usize,

    /// pngquant executable; PNG output is compressed when set.
    #[arg(long, env = "IMGSERVE_PNGQUANT_COMMAND")]
    pub pngquant_command: Option<String>,

    /// pngquant speed, 1 (best) to 11 (fastest).
    #[arg(long, default_value_t = DEFAULT_PNGQUANT_SPEED, env = "IMGSERVE_PNGQUANT_SPEED")]
    pub pngquant_speed: u8,

    /// Skip pngquant for images larger than this many pixels.
    #[arg(long, env = "IMGSERVE_PNGQUANT_MAX_AREA")]
    pub pngquant_max_area: Option<u64>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_path().is_none() && self.source_url_prefix().is_none() {
            return Err(
                "No image source configured. \
                 Set --source-path or --source-url-prefix (IMGSERVE_SOURCE_PATH / IMGSERVE_SOURCE_URL_PREFIX)"
                    .to_string(),
            );
        }

        if self.port == 0 {
            return Err("port must be greater than 0".to_string());
        }

        if !PNGQUANT_SPEED_RANGE.contains(&self.pngquant_speed) {
            return Err("pngquant_speed must be between 1 and 11".to_string());
        }

        if !self.peers().is_empty() && self.peer_cache_size == 0 {
            return Err(
                "peer_cache_size must be greater than 0 when peer cache peers are set".to_string(),
            );
        }

        if self.max_width == 0 || self.max_height == 0 {
            return Err("max_width and max_height must be greater than 0".to_string());
        }
        if self.gif_max_width == 0 || self.gif_max_height == 0 {
            return Err("gif_max_width and gif_max_height must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn source_path(&self) -> Option<&str> {
        non_empty(&self.source_path)
    }

    pub fn source_url_prefix(&self) -> Option<&str> {
        non_empty(&self.source_url_prefix)
    }

    pub fn file_cache_path(&self) -> Option<&str> {
        non_empty(&self.file_cache_path)
    }

    pub fn redis_host(&self) -> Option<&str> {
        non_empty(&self.redis_host)
    }

    pub fn memcached_host(&self) -> Option<&str> {
        non_empty(&self.memcached_host)
    }

    pub fn pngquant_command(&self) -> Option<&str> {
        non_empty(&self.pngquant_command)
    }

    pub fn peer_cache_stats_path(&self) -> Option<&str> {
        non_empty(&self.peer_cache_stats_path)
    }

    /// Configured peers with blanks removed.
    pub fn peers(&self) -> Vec<&str> {
        self.peer_cache_peers
            .iter()
            .flatten()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// Treat empty strings like unset options, as env files often do.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Tests
// =============================================================================
