//! General still-image pipeline.
//!
//! Decodes any supported format, applies crop, rotate and resize in
//! linear light, and re-encodes in the requested format.
//!
//! # Change contract
//!
//! When no step would modify the pixels, the output format equals the input
//! format and no quality is requested, the input image is returned as is.
//! Nothing is decoded in that case.

use std::io::Cursor;
use std::sync::OnceLock;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};

use crate::error::ProcessError;
use crate::model::{Format, Image, Params};

use super::transform::{Interpolation, Transform};

/// Requested output format.
pub const FORMAT: &str = "format";

/// Requested JPEG quality (1-100).
pub const QUALITY: &str = "quality";

/// Whether to resample in linear light. Defaults to true.
pub const GAMMA_CORRECTION: &str = "gamma_correction";

/// JPEG quality used when none is requested.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

pub const MIN_QUALITY: u8 = 1;
pub const MAX_QUALITY: u8 = 100;

const GAMMA: f64 = 2.2;

// =============================================================================
// Pipeline
// =============================================================================

/// The general decode, transform, encode pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    transform: Transform,
}

impl Pipeline {
    /// Pipeline with cubic rotation, Lanczos resampling and the given bounds.
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            transform: Transform::new(
                Interpolation::Cubic,
                FilterType::Lanczos3,
                max_width,
                max_height,
            ),
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn process(&self, image: &Image, params: &Params) -> Result<Image, ProcessError> {
        let input_format = Format::parse(&image.format)
            .ok_or_else(|| ProcessError::UnsupportedFormat(image.format.clone()))?;
        let output_format = output_format(params, input_format)?;
        let quality = quality(params)?;
        let gamma = params.get_bool(GAMMA_CORRECTION)?.unwrap_or(true);
        let changes = self.transform.changes(params)?;

        if !changes && output_format == input_format && quality.is_none() {
            return Ok(image.clone());
        }

        let mut pixels = decode(image, input_format)?;
        if changes {
            pixels = if gamma {
                let linear = to_linear(pixels);
                from_linear(self.transform.apply(linear, params)?)
            } else {
                self.transform.apply(pixels, params)?
            };
        }

        encode(&pixels, output_format, quality.unwrap_or(DEFAULT_JPEG_QUALITY))
    }
}

// =============================================================================
// Parameters
// =============================================================================

/// Output format from `format`, defaulting to the input format.
pub(crate) fn output_format(params: &Params, input: Format) -> Result<Format, ProcessError> {
    match params.get_str(FORMAT)? {
        None => Ok(input),
        Some(name) => Format::parse(name)
            .ok_or_else(|| ProcessError::invalid_param(FORMAT, format!("unsupported format {:?}", name))),
    }
}

pub(crate) fn quality(params: &Params) -> Result<Option<u8>, ProcessError> {
    match params.get_int(QUALITY)? {
        None => Ok(None),
        Some(q) if (i64::from(MIN_QUALITY)..=i64::from(MAX_QUALITY)).contains(&q) => Ok(Some(q as u8)),
        Some(q) => Err(ProcessError::invalid_param(
            QUALITY,
            format!("{} is outside {}-{}", q, MIN_QUALITY, MAX_QUALITY),
        )),
    }
}

// =============================================================================
// Codec helpers
// =============================================================================

/// Decode by content; the declared format is used only when sniffing fails.
pub(crate) fn decode(image: &Image, declared: Format) -> Result<DynamicImage, ProcessError> {
    let mut reader = ImageReader::new(Cursor::new(&image.data[..]))
        .with_guessed_format()
        .map_err(|e| ProcessError::Decode {
            message: e.to_string(),
        })?;
    if reader.format().is_none() {
        reader.set_format(declared.to_image_format());
    }
    reader.decode().map_err(|e| ProcessError::Decode {
        message: e.to_string(),
    })
}

pub(crate) fn encode(pixels: &DynamicImage, format: Format, quality: u8) -> Result<Image, ProcessError> {
    let mut output = Vec::new();
    match format {
        Format::Jpeg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
            encoder
                .encode_image(&pixels.to_rgb8())
                .map_err(|e| ProcessError::Encode {
                    message: e.to_string(),
                })?;
        }
        other => {
            DynamicImage::ImageRgba8(pixels.to_rgba8())
                .write_to(&mut Cursor::new(&mut output), other.to_image_format())
                .map_err(|e| ProcessError::Encode {
                    message: e.to_string(),
                })?;
        }
    }
    Ok(Image::new(format.name(), output))
}

// =============================================================================
// Gamma correction
// =============================================================================

fn lut(exponent: f64) -> Vec<u16> {
    (0..=u16::MAX)
        .map(|v| {
            let normalized = f64::from(v) / f64::from(u16::MAX);
            (normalized.powf(exponent) * f64::from(u16::MAX)).round() as u16
        })
        .collect()
}

fn to_linear_lut() -> &'static [u16] {
    static LUT: OnceLock<Vec<u16>> = OnceLock::new();
    LUT.get_or_init(|| lut(GAMMA))
}

fn from_linear_lut() -> &'static [u16] {
    static LUT: OnceLock<Vec<u16>> = OnceLock::new();
    LUT.get_or_init(|| lut(1.0 / GAMMA))
}

fn apply_lut(image: DynamicImage, table: &[u16]) -> DynamicImage {
    let mut buf = image.into_rgba16();
    for pixel in buf.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            *channel = table[usize::from(*channel)];
        }
    }
    DynamicImage::ImageRgba16(buf)
}

/// Convert to 16-bit linear light.
pub(crate) fn to_linear(image: DynamicImage) -> DynamicImage {
    apply_lut(image, to_linear_lut())
}

/// Convert 16-bit linear light back to gamma-encoded values.
pub(crate) fn from_linear(image: DynamicImage) -> DynamicImage {
    apply_lut(image, from_linear_lut())
}

// =============================================================================
// Tests
// =============================================================================
