//! # imgserve
//!
//! An on-demand image derivation server.
//!
//! Clients request an original image by identifier together with
//! transformation parameters (crop, rotate, resize, re-encode). The result
//! is produced by a chain of [`chain::ImageServer`] nodes: cache tiers in
//! front, an admission limiter, the processing dispatcher and finally the
//! source holding the originals.
//!
//! ## Modules
//!
//! - [`source`] - Original image sources (filesystem, HTTP)
//! - [`process`] - Decode/transform/encode pipelines and pngquant
//! - [`cache`] - Cache tiers, stores and key generation
//! - [`chain`] - The chain contract, limiter and composition root
//! - [`server`] - Axum HTTP front end
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use imgserve::{build_chain, create_router, Config, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::parse_from(["imgserve", "--source-path", "/srv/images"]);
//!     let components = build_chain(&config).unwrap();
//!     let router = create_router(components, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind(config.bind_address()).await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod model;
pub mod process;
pub mod server;
pub mod source;

// Re-export commonly used types
pub use cache::{Cache, CacheServer, KeyGenerator, ParamsHashKeyGenerator, PeerCache};
pub use chain::{build_chain, ChainComponents, ImageServer, LimitServer};
pub use config::Config;
pub use error::{ProcessError, ServerError, SourceError, StoreError};
pub use model::{Format, Image, ParamValue, Params};
pub use process::{Dispatcher, ProcessServer};
pub use server::{create_router, AppState, RouterConfig};
pub use source::{FileSource, HttpSource, Source, SourceServer};
