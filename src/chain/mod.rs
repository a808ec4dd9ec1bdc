//! The image serving chain.
//!
//! Every layer of the pipeline implements [`ImageServer`] and owns the
//! layer below it. The composition root in [`compose`] stacks them once at
//! startup:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ memory cache                 │  cheapest, checked first
//! ├──────────────────────────────┤
//! │ peer group cache             │
//! ├──────────────────────────────┤
//! │ redis / memcached            │
//! ├──────────────────────────────┤
//! │ file cache                   │
//! ├──────────────────────────────┤
//! │ LimitServer                  │  admission gate for uncached work
//! ├──────────────────────────────┤
//! │ ProcessServer (+ pngquant)   │
//! ├──────────────────────────────┤
//! │ SourceServer                 │  fetches the original
//! └──────────────────────────────┘
//! ```

use async_trait::async_trait;

use crate::error::ServerError;
use crate::model::{Image, Params};

pub mod compose;
mod limit;

pub use compose::{build_chain, ChainComponents};
pub use limit::{default_concurrency, LimitServer};

/// A node of the serving chain: given parameters, produce an image.
#[async_trait]
pub trait ImageServer: Send + Sync {
    async fn get(&self, params: &Params) -> Result<Image, ServerError>;
}
