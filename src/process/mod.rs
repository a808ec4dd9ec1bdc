//! Image processing.
//!
//! ```text
//!                 ┌──────────────┐
//!   Image ──────▶ │  Dispatcher  │
//!                 └──────┬───────┘
//!          gif?          │          otherwise
//!        ┌───────────────┴───────────────┐
//!        ▼                               ▼
//!  ┌─────────────┐   any error    ┌─────────────┐
//!  │ GifPipeline │ ─────────────▶ │  Pipeline   │
//!  └─────────────┘                └─────────────┘
//!                                        │
//!                         png output ─▶ pngquant
//! ```
//!
//! Decoding, transforming and encoding are CPU-bound and run on the blocking
//! thread pool. The pngquant step is a subprocess and stays async.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::chain::ImageServer;
use crate::error::{ProcessError, ServerError};
use crate::model::{Format, Image, Params};

mod gif;
mod pipeline;
mod pngquant;
pub mod transform;

pub use gif::GifPipeline;
pub use pipeline::{Pipeline, DEFAULT_JPEG_QUALITY, FORMAT, GAMMA_CORRECTION, QUALITY};
pub use pngquant::{
    PngQuant, DEFAULT_COMMAND as DEFAULT_PNGQUANT_COMMAND, DEFAULT_SPEED as DEFAULT_PNGQUANT_SPEED,
};

/// Default bounds of the general pipeline.
pub const DEFAULT_MAX_WIDTH: u32 = 2048;
pub const DEFAULT_MAX_HEIGHT: u32 = 2048;

/// Default bounds of the animated GIF pipeline.
pub const DEFAULT_GIF_MAX_WIDTH: u32 = 1024;
pub const DEFAULT_GIF_MAX_HEIGHT: u32 = 1024;

// =============================================================================
// Dispatcher
// =============================================================================

/// Routes an image to the pipeline matching its format.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    general: Pipeline,
    gif: GifPipeline,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(
            Pipeline::new(DEFAULT_MAX_WIDTH, DEFAULT_MAX_HEIGHT),
            GifPipeline::new(DEFAULT_GIF_MAX_WIDTH, DEFAULT_GIF_MAX_HEIGHT),
        )
    }
}

impl Dispatcher {
    pub fn new(general: Pipeline, gif: GifPipeline) -> Self {
        Self { general, gif }
    }

    pub fn process(&self, image: &Image, params: &Params) -> Result<Image, ProcessError> {
        match Format::parse(&image.format) {
            Some(Format::Gif) => match self.gif.process(image, params) {
                Ok(out) => Ok(out),
                Err(e) => {
                    debug!(error = %e, "gif pipeline declined, using general pipeline");
                    self.general.process(image, params)
                }
            },
            Some(_) => self.general.process(image, params),
            None => Err(ProcessError::UnsupportedFormat(image.format.clone())),
        }
    }
}

// =============================================================================
// ProcessServer
// =============================================================================

/// Chain node that fetches from `inner` and processes the result.
pub struct ProcessServer {
    inner: Arc<dyn ImageServer>,
    dispatcher: Arc<Dispatcher>,
    compressor: Option<PngQuant>,
}

impl ProcessServer {
    pub fn new(inner: Arc<dyn ImageServer>, dispatcher: Dispatcher) -> Self {
        Self {
            inner,
            dispatcher: Arc::new(dispatcher),
            compressor: None,
        }
    }

    /// Compress PNG output with `pngquant`.
    pub fn with_compressor(mut self, compressor: PngQuant) -> Self {
        self.compressor = Some(compressor);
        self
    }
}

#[async_trait]
impl ImageServer for ProcessServer {
    async fn get(&self, params: &Params) -> Result<Image, ServerError> {
        let original = self.inner.get(params).await?;

        let dispatcher = Arc::clone(&self.dispatcher);
        let owned = params.clone();
        let processed = tokio::task::spawn_blocking(move || dispatcher.process(&original, &owned))
            .await
            .map_err(|e| ServerError::Internal(format!("processing task failed: {}", e)))??;

        match &self.compressor {
            Some(tool) if tool.should_compress(&processed) => Ok(tool.compress(&processed).await?),
            _ => Ok(processed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
