//! Original image sources.
//!
//! A [`Source`] turns an identifier into the original encoded image. The
//! [`SourceServer`] adapts a source into the deepest node of the serving
//! chain by reading the `source` parameter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::chain::ImageServer;
use crate::error::{ProcessError, ServerError, SourceError};
use crate::model::{Image, Params};

mod file;
mod remote;

pub use file::FileSource;
pub use remote::HttpSource;

/// Name of the parameter carrying the source identifier.
pub const SOURCE_PARAM: &str = "source";

/// Fetches original images by identifier.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Image, SourceError>;
}

/// Chain node serving the unmodified original named by `source`.
pub struct SourceServer {
    source: Arc<dyn Source>,
}

impl SourceServer {
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl ImageServer for SourceServer {
    async fn get(&self, params: &Params) -> Result<Image, ServerError> {
        let id = params
            .get_str(SOURCE_PARAM)?
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProcessError::invalid_param(SOURCE_PARAM, "missing"))?;

        let image = self.source.fetch(id).await?;
        debug!(source = id, format = %image.format, bytes = image.len(), "fetched original");
        Ok(image)
    }
}
