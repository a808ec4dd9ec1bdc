//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                          - Health check
//! /favicon.ico                     - Always 404
//! <stats-path>                     - Peer group statistics (optional)
//! /_peercache/{name}/{key}         - Peer lookups (GET)
//! /{*source}?<params>              - Derived image
//! ```
//!
//! # Example
//!
//! ```ignore
//! use imgserve::chain::build_chain;
//! use imgserve::server::{create_router, RouterConfig};
//!
//! let components = build_chain(&config)?;
//! let router = create_router(components, RouterConfig::new().with_cache_max_age(3600));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::warn;

use super::handlers::{
    favicon_handler, health_handler, image_handler, peer_get_handler, stats_handler, AppState,
};
use crate::cache::PEER_PATH_PREFIX;
use crate::chain::ChainComponents;
use crate::config::DEFAULT_CACHE_MAX_AGE;

const RESERVED_PATHS: [&str; 2] = ["/health", "/favicon.ico"];

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Path serving peer group statistics
    pub stats_path: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Defaults: 7 day max-age, tracing on, no stats endpoint.
    pub fn new() -> Self {
        Self {
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
            enable_tracing: true,
            stats_path: None,
        }
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Serve peer statistics at `path`. A missing leading `/` is added.
    pub fn with_stats_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.stats_path = Some(if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        });
        self
    }
}

// =============================================================================
// Router Creation
// =============================================================================

/// Create the router serving `components`.
pub fn create_router(components: ChainComponents, config: RouterConfig) -> Router {
    let state = AppState::new(components.server)
        .with_cache_max_age(config.cache_max_age)
        .with_peer_cache(components.peer_cache);
    create_router_with_state(state, config)
}

/// Create the router around prepared state.
pub fn create_router_with_state(state: AppState, config: RouterConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/favicon.ico", get(favicon_handler))
        .route(
            &format!("{}/{{name}}/{{key}}", PEER_PATH_PREFIX),
            get(peer_get_handler),
        );

    match config.stats_path.as_deref() {
        Some(path) if RESERVED_PATHS.contains(&path) || path.starts_with(PEER_PATH_PREFIX) => {
            warn!(path = %path, "stats path collides with a built-in route, not serving stats");
        }
        Some(path) => {
            router = router.route(path, get(stats_handler));
        }
        None => {}
    }

    let router = router
        .route("/{*source}", get(image_handler))
        .with_state(state);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}
