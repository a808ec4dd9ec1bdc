//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │                 GET /{*source}?width=..&format=..               │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │    query    │  │  handlers   │  │        routes           │  │
//! │  │  (params)   │  │ (requests)  │  │  (router config)        │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                      serving chain (ImageServer)
//! ```

pub mod handlers;
pub mod query;
pub mod routes;

pub use handlers::{
    favicon_handler, health_handler, image_handler, peer_get_handler, stats_handler, AppState,
    ErrorResponse, HandlerError, HealthResponse,
};
pub use query::parse_params;
pub use routes::{create_router, create_router_with_state, RouterConfig};
