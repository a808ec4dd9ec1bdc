//! Composition root: builds the serving chain from configuration.

use std::sync::Arc;

use tracing::info;

use crate::cache::{
    networked, CacheServer, FileCache, MemcacheCache, MemoryCache, ParamsHashKeyGenerator,
    PeerCache, PrefixKeyGenerator, RedisCache,
};
use crate::config::Config;
use crate::process::{Dispatcher, GifPipeline, Pipeline, PngQuant, ProcessServer};
use crate::source::{FileSource, HttpSource, Source, SourceServer};

use super::{default_concurrency, ImageServer, LimitServer};

/// Namespace of keys written to redis.
pub const REDIS_KEY_PREFIX: &str = "image:";

/// The assembled chain and the handles the HTTP layer needs.
pub struct ChainComponents {
    /// Outermost node
    pub server: Arc<dyn ImageServer>,

    /// Peer group store, when that tier is configured
    pub peer_cache: Option<Arc<PeerCache>>,

    /// Tier names, outermost first
    pub tiers: Vec<&'static str>,
}

/// Build the chain with the source selected by `config`.
///
/// A source directory wins over a URL prefix.
pub fn build_chain(config: &Config) -> Result<ChainComponents, String> {
    let source: Arc<dyn Source> = match (config.source_path(), config.source_url_prefix()) {
        (Some(path), _) => Arc::new(FileSource::new(path)),
        (None, Some(prefix)) => Arc::new(HttpSource::new(prefix)),
        (None, None) => return Err("no image source configured".to_string()),
    };
    build_chain_with_source(config, source)
}

/// Build the chain on top of an explicit source.
pub fn build_chain_with_source(
    config: &Config,
    source: Arc<dyn Source>,
) -> Result<ChainComponents, String> {
    let mut tiers = Vec::new();
    let hash = Arc::new(ParamsHashKeyGenerator);

    let mut server: Arc<dyn ImageServer> = Arc::new(SourceServer::new(source));

    let dispatcher = Dispatcher::new(
        Pipeline::new(config.max_width, config.max_height),
        GifPipeline::new(config.gif_max_width, config.gif_max_height),
    );
    let mut process = ProcessServer::new(server, dispatcher);
    if let Some(command) = config.pngquant_command() {
        process = process.with_compressor(
            PngQuant::new(command)
                .with_speed(config.pngquant_speed)
                .with_max_area(config.pngquant_max_area),
        );
        tiers.push("pngquant");
    }
    server = Arc::new(process);

    let concurrency = match config.concurrency {
        0 => default_concurrency(),
        n => n,
    };
    server = Arc::new(LimitServer::new(server, concurrency));
    tiers.push("limit");

    if let Some(path) = config.file_cache_path() {
        server = Arc::new(CacheServer::new(
            "file",
            Arc::new(FileCache::new(path)),
            hash.clone(),
            server,
        ));
        tiers.push("file");
    }

    if let Some(host) = config.memcached_host() {
        server = Arc::new(CacheServer::new(
            "memcached",
            networked(MemcacheCache::new(host)),
            hash.clone(),
            server,
        ));
        tiers.push("memcached");
    }

    if let Some(host) = config.redis_host() {
        let redis = RedisCache::new(host).map_err(|e| format!("redis cache: {}", e))?;
        server = Arc::new(CacheServer::new(
            "redis",
            networked(redis),
            Arc::new(PrefixKeyGenerator::new(REDIS_KEY_PREFIX, ParamsHashKeyGenerator)),
            server,
        ));
        tiers.push("redis");
    }

    let peers = config.peers();
    let mut peer_cache = None;
    if !peers.is_empty() && config.peer_cache_size > 0 {
        let peer = Arc::new(PeerCache::new(
            config.peer_cache_name.clone(),
            &config.bind_address(),
            peers,
            config.peer_cache_size,
        ));
        server = Arc::new(CacheServer::new(
            "peer",
            networked(peer.clone()),
            hash.clone(),
            server,
        ));
        peer_cache = Some(peer);
        tiers.push("peer");
    }

    if config.memory_cache_size > 0 {
        server = Arc::new(CacheServer::new(
            "memory",
            Arc::new(MemoryCache::with_capacity(config.memory_cache_size)),
            hash,
            server,
        ));
        tiers.push("memory");
    }

    tiers.reverse();
    info!(tiers = ?tiers, concurrency, "serving chain built");

    Ok(ChainComponents {
        server,
        peer_cache,
        tiers,
    })
}
