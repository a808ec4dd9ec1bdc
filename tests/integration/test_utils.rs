//! Test utilities for integration tests.
//!
//! Mock sources, stores and chain nodes, plus helpers producing small
//! encoded images.

use async_trait::async_trait;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, ImageFormat, Rgba, RgbaImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use imgserve::cache::Cache;
use imgserve::chain::ImageServer;
use imgserve::error::{ServerError, SourceError, StoreError};
use imgserve::model::{Image, Params};
use imgserve::source::Source;

// =============================================================================
// Images
// =============================================================================

/// A `width` x `height` PNG with a horizontal gradient.
pub fn png_image(width: u32, height: u32) -> Image {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 255 / width.max(1)) as u8, (y % 256) as u8, 128, 255])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    Image::new("png", buf.into_inner())
}

/// An animated GIF with `count` solid-colored frames.
pub fn animated_gif(count: usize, width: u32, height: u32) -> Image {
    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        encoder.set_repeat(Repeat::Infinite).unwrap();
        for i in 0..count {
            let shade = (i * 60 % 256) as u8;
            let frame = RgbaImage::from_pixel(width, height, Rgba([shade, 0, 255 - shade, 255]));
            encoder
                .encode_frame(Frame::from_parts(
                    frame,
                    0,
                    0,
                    Delay::from_numer_denom_ms(100, 1),
                ))
                .unwrap();
        }
    }
    Image::new("gif", buf)
}

/// Decoded dimensions of an encoded image.
pub fn dimensions(image: &Image) -> (u32, u32) {
    let decoded = image::load_from_memory(&image.data).unwrap();
    (decoded.width(), decoded.height())
}

/// Number of frames in an encoded GIF.
pub fn gif_frame_count(image: &Image) -> usize {
    use image::codecs::gif::GifDecoder;
    use image::AnimationDecoder;

    let decoder = GifDecoder::new(Cursor::new(image.data.to_vec())).unwrap();
    decoder.into_frames().collect_frames().unwrap().len()
}

// =============================================================================
// MockSource
// =============================================================================

/// In-memory source counting fetches.
#[derive(Default)]
pub struct MockSource {
    images: HashMap<String, Image>,
    fetches: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, id: impl Into<String>, image: Image) -> Self {
        self.images.insert(id.into(), image);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for MockSource {
    async fn fetch(&self, id: &str) -> Result<Image, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.images
            .get(id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }
}

// =============================================================================
// FlakyCache
// =============================================================================

/// Store whose operations can be switched to fail.
#[derive(Default)]
pub struct FlakyCache {
    entries: RwLock<HashMap<String, Image>>,
    failing: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl FlakyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let cache = Self::default();
        cache.failing.store(true, Ordering::SeqCst);
        Arc::new(cache)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl Cache for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("flaky store is down".to_string()));
        }
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("flaky store is down".to_string()));
        }
        self.entries
            .write()
            .await
            .insert(key.to_string(), image.clone());
        Ok(())
    }
}

// =============================================================================
// CountingServer
// =============================================================================

/// Chain node returning a fixed image (or error) and recording calls.
pub struct CountingServer {
    result: Result<Image, ServerError>,
    calls: AtomicUsize,
    seen: Mutex<Vec<Params>>,
}

impl CountingServer {
    pub fn new(image: Image) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(image),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(err: ServerError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(err),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn seen(&self) -> Vec<Params> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl ImageServer for CountingServer {
    async fn get(&self, params: &Params) -> Result<Image, ServerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push(params.clone());
        self.result.clone()
    }
}

/// Wait until `condition` holds, polling the runtime.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
