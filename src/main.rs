//! imgserve - on-demand image derivation server.
//!
//! This binary parses the configuration, builds the serving chain and
//! starts the HTTP server.

use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imgserve::{
    chain::build_chain,
    config::Config,
    server::{create_router, RouterConfig},
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    log_config(&config);

    let components = match build_chain(&config) {
        Ok(components) => components,
        Err(e) => {
            error!("Failed to build serving chain: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let router = create_router(components, build_router_config(&config));

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("Server listening on: http://{}", addr);
    info!("  curl http://{}/health", addr);
    info!("  curl 'http://{}/<image>?width=200&format=png'", addr);

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "imgserve=debug,tower_http=debug"
    } else {
        "imgserve=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_config(config: &Config) {
    info!("imgserve v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    match (config.source_path(), config.source_url_prefix()) {
        (Some(path), _) => info!("  Source: directory {}", path),
        (None, Some(prefix)) => info!("  Source: {}", prefix),
        (None, None) => {}
    }
    info!(
        "  Limits: {}x{} (gif {}x{})",
        config.max_width, config.max_height, config.gif_max_width, config.gif_max_height
    );
    if config.memory_cache_size > 0 {
        info!("  Memory cache: {}MB", config.memory_cache_size / (1024 * 1024));
    }
    if let Some(path) = config.file_cache_path() {
        info!("  File cache: {}", path);
    }
    if let Some(host) = config.redis_host() {
        info!("  Redis: {}", host);
    }
    if let Some(host) = config.memcached_host() {
        info!("  Memcached: {}", host);
    }
    let peers = config.peers();
    if !peers.is_empty() {
        info!(
            "  Peer group '{}': {} peer(s), {}MB",
            config.peer_cache_name,
            peers.len(),
            config.peer_cache_size / (1024 * 1024)
        );
    }
    if let Some(command) = config.pngquant_command() {
        info!("  pngquant: {} (speed {})", command, config.pngquant_speed);
    }
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_cache_max_age(config.cache_max_age)
        .with_tracing(!config.no_tracing);

    if let Some(path) = config.peer_cache_stats_path() {
        router_config = router_config.with_stats_path(path);
    }

    router_config
}
