//! Geometric steps shared by the general and gif pipelines.
//!
//! Each step reads its own parameters and is a no-op when they are absent.
//! Steps run in a fixed order: crop, rotate, resize.

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Pixel, Rgba};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation as ProcInterpolation};

use crate::error::ProcessError;
use crate::model::Params;

pub const CROP_MIN_X: &str = "crop_min_x";
pub const CROP_MIN_Y: &str = "crop_min_y";
pub const CROP_MAX_X: &str = "crop_max_x";
pub const CROP_MAX_Y: &str = "crop_max_y";
pub const ROTATION: &str = "rotation";
pub const ROTATION_BACKGROUND: &str = "rotation_background";
pub const ROTATION_INTERPOLATION: &str = "rotation_interpolation";
pub const WIDTH: &str = "width";
pub const HEIGHT: &str = "height";
pub const MODE: &str = "mode";
pub const RESAMPLING: &str = "resampling";

const CROP_PARAMS: [&str; 4] = [CROP_MIN_X, CROP_MIN_Y, CROP_MAX_X, CROP_MAX_Y];

// =============================================================================
// Interpolation and resampling names
// =============================================================================

/// Interpolation used when rotating by an arbitrary angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    NearestNeighbor,
    Linear,
    Cubic,
}

impl Interpolation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "nearest_neighbor" => Some(Interpolation::NearestNeighbor),
            "linear" => Some(Interpolation::Linear),
            "cubic" => Some(Interpolation::Cubic),
            _ => None,
        }
    }

    fn to_imageproc(self) -> ProcInterpolation {
        match self {
            Interpolation::NearestNeighbor => ProcInterpolation::Nearest,
            Interpolation::Linear => ProcInterpolation::Bilinear,
            Interpolation::Cubic => ProcInterpolation::Bicubic,
        }
    }
}

/// Resampling filter from its parameter name.
pub fn parse_resampling(name: &str) -> Option<FilterType> {
    match name {
        "nearest_neighbor" => Some(FilterType::Nearest),
        "linear" => Some(FilterType::Triangle),
        "cubic" => Some(FilterType::CatmullRom),
        "gaussian" => Some(FilterType::Gaussian),
        "lanczos" => Some(FilterType::Lanczos3),
        _ => None,
    }
}

/// Resize fitting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResizeMode {
    /// Stretch to exactly the target size
    Exact,
    /// Largest size that fits inside the box, aspect preserved
    Fit,
    /// Cover the box, aspect preserved, then center-crop
    Fill,
}

// =============================================================================
// Transform
// =============================================================================

/// Crop, rotate and resize with per-pipeline defaults and bounds.
#[derive(Debug, Clone)]
pub struct Transform {
    default_interpolation: Interpolation,
    default_resampling: FilterType,
    max_width: u32,
    max_height: u32,
}

impl Transform {
    pub fn new(
        default_interpolation: Interpolation,
        default_resampling: FilterType,
        max_width: u32,
        max_height: u32,
    ) -> Self {
        Self {
            default_interpolation,
            default_resampling,
            max_width,
            max_height,
        }
    }

    pub fn max_dimensions(&self) -> (u32, u32) {
        (self.max_width, self.max_height)
    }

    /// Whether any step would modify an image for these parameters.
    pub fn changes(&self, params: &Params) -> Result<bool, ProcessError> {
        let crop = CROP_PARAMS.iter().any(|name| params.contains(name));
        let rotate = rotation_degrees(params)?.is_some();
        let resize = target_size(params)?.is_some();
        Ok(crop || rotate || resize)
    }

    /// Run all steps in order.
    pub fn apply(&self, image: DynamicImage, params: &Params) -> Result<DynamicImage, ProcessError> {
        let image = crop(image, params)?;
        let image = self.rotate(image, params)?;
        self.resize(image, params)
    }

    fn rotate(&self, image: DynamicImage, params: &Params) -> Result<DynamicImage, ProcessError> {
        let Some(degrees) = rotation_degrees(params)? else {
            return Ok(image);
        };

        // Right angles are exact; image's rotate90 turns clockwise.
        if degrees == 90.0 {
            return Ok(image.rotate270());
        }
        if degrees == 180.0 {
            return Ok(image.rotate180());
        }
        if degrees == 270.0 {
            return Ok(image.rotate90());
        }

        let interpolation = match params.get_str(ROTATION_INTERPOLATION)? {
            Some(name) => Interpolation::parse(name).ok_or_else(|| {
                ProcessError::invalid_param(ROTATION_INTERPOLATION, format!("unknown value {:?}", name))
            })?,
            None => self.default_interpolation,
        };
        let background = match params.get_str(ROTATION_BACKGROUND)? {
            Some(hex) => parse_color(hex).ok_or_else(|| {
                ProcessError::invalid_param(ROTATION_BACKGROUND, format!("invalid color {:?}", hex))
            })?,
            None => Rgba([0, 0, 0, 0]),
        };

        // imageproc rotates clockwise, requests are counter-clockwise.
        let theta = -(degrees as f32).to_radians();
        let interpolation = interpolation.to_imageproc();
        let rotated = match image {
            DynamicImage::ImageRgba16(buf) => {
                let background = Rgba(background.0.map(|c| u16::from(c) * 257));
                let (w, h) = rotated_bounds(buf.width(), buf.height(), degrees);
                let canvas = pad_centered(&buf, w, h, background);
                DynamicImage::ImageRgba16(rotate_about_center(&canvas, theta, interpolation, background))
            }
            other => {
                let buf = other.to_rgba8();
                let (w, h) = rotated_bounds(buf.width(), buf.height(), degrees);
                let canvas = pad_centered(&buf, w, h, background);
                DynamicImage::ImageRgba8(rotate_about_center(&canvas, theta, interpolation, background))
            }
        };
        Ok(rotated)
    }

    fn resize(&self, image: DynamicImage, params: &Params) -> Result<DynamicImage, ProcessError> {
        let Some((width, height)) = target_size(params)? else {
            return Ok(image);
        };

        let mode = match params.get_str(MODE)? {
            None => ResizeMode::Exact,
            Some("fit") => ResizeMode::Fit,
            Some("fill") => ResizeMode::Fill,
            Some(other) => {
                return Err(ProcessError::invalid_param(MODE, format!("unknown value {:?}", other)))
            }
        };
        let filter = match params.get_str(RESAMPLING)? {
            Some(name) => parse_resampling(name).ok_or_else(|| {
                ProcessError::invalid_param(RESAMPLING, format!("unknown value {:?}", name))
            })?,
            None => self.default_resampling,
        };

        let (width, height) = fill_missing_axis(width, height, image.width(), image.height());
        let (width, height) = clamp_to_bounds(width, height, self.max_width, self.max_height);

        let resized = match mode {
            ResizeMode::Exact => image.resize_exact(width, height, filter),
            ResizeMode::Fit => image.resize(width, height, filter),
            ResizeMode::Fill => image.resize_to_fill(width, height, filter),
        };
        Ok(resized)
    }
}

// =============================================================================
// Step helpers
// =============================================================================

fn crop(image: DynamicImage, params: &Params) -> Result<DynamicImage, ProcessError> {
    if !CROP_PARAMS.iter().any(|name| params.contains(name)) {
        return Ok(image);
    }

    let mut bounds = [0i64; 4];
    for (slot, name) in bounds.iter_mut().zip(CROP_PARAMS) {
        *slot = params
            .get_int(name)?
            .ok_or_else(|| ProcessError::invalid_param(name, "missing crop coordinate"))?;
    }
    let [min_x, min_y, max_x, max_y] = bounds;
    if min_x >= max_x || min_y >= max_y {
        return Err(ProcessError::invalid_param(
            "crop",
            format!("empty rectangle ({},{})-({},{})", min_x, min_y, max_x, max_y),
        ));
    }

    let x0 = min_x.clamp(0, i64::from(image.width()));
    let y0 = min_y.clamp(0, i64::from(image.height()));
    let x1 = max_x.clamp(0, i64::from(image.width()));
    let y1 = max_y.clamp(0, i64::from(image.height()));
    if x0 >= x1 || y0 >= y1 {
        return Err(ProcessError::invalid_param(
            "crop",
            format!(
                "rectangle ({},{})-({},{}) is outside the {}x{} image",
                min_x,
                min_y,
                max_x,
                max_y,
                image.width(),
                image.height()
            ),
        ));
    }

    Ok(image.crop_imm(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}

/// Requested rotation normalized to (0, 360), or `None` for no rotation.
fn rotation_degrees(params: &Params) -> Result<Option<f64>, ProcessError> {
    let Some(degrees) = params.get_float(ROTATION)? else {
        return Ok(None);
    };
    if !degrees.is_finite() {
        return Err(ProcessError::invalid_param(ROTATION, "must be finite"));
    }
    let normalized = degrees.rem_euclid(360.0);
    if normalized == 0.0 {
        Ok(None)
    } else {
        Ok(Some(normalized))
    }
}

/// Requested `(width, height)`; zero means "derive from aspect ratio".
fn target_size(params: &Params) -> Result<Option<(u32, u32)>, ProcessError> {
    let width = dimension(params, WIDTH)?;
    let height = dimension(params, HEIGHT)?;
    if width == 0 && height == 0 {
        Ok(None)
    } else {
        Ok(Some((width, height)))
    }
}

fn dimension(params: &Params, name: &str) -> Result<u32, ProcessError> {
    match params.get_int(name)? {
        None => Ok(0),
        Some(v) if v < 0 => Err(ProcessError::invalid_param(name, "must not be negative")),
        Some(v) => u32::try_from(v).map_err(|_| ProcessError::invalid_param(name, "too large")),
    }
}

fn fill_missing_axis(width: u32, height: u32, src_width: u32, src_height: u32) -> (u32, u32) {
    let scale = |value: u32, num: u32, den: u32| -> u32 {
        let scaled = (u64::from(value) * u64::from(num) + u64::from(den) / 2) / u64::from(den.max(1));
        scaled.clamp(1, u64::from(u32::MAX)) as u32
    };
    match (width, height) {
        (0, h) => (scale(h, src_width, src_height), h),
        (w, 0) => (w, scale(w, src_height, src_width)),
        (w, h) => (w, h),
    }
}

/// Scale `(width, height)` down so neither exceeds its bound.
///
/// The requested aspect ratio is kept. A bound of zero means unbounded.
pub(crate) fn clamp_to_bounds(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let mut factor = 1.0f64;
    if max_width > 0 && width > max_width {
        factor = factor.min(f64::from(max_width) / f64::from(width));
    }
    if max_height > 0 && height > max_height {
        factor = factor.min(f64::from(max_height) / f64::from(height));
    }
    if factor >= 1.0 {
        return (width, height);
    }
    let w = ((f64::from(width) * factor).floor() as u32).max(1);
    let h = ((f64::from(height) * factor).floor() as u32).max(1);
    let w = if max_width > 0 { w.min(max_width) } else { w };
    let h = if max_height > 0 { h.min(max_height) } else { h };
    (w, h)
}

/// Size of the box enclosing a `width x height` image rotated by `degrees`.
fn rotated_bounds(width: u32, height: u32, degrees: f64) -> (u32, u32) {
    let radians = degrees.to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let (w, h) = (f64::from(width), f64::from(height));
    // Trim float noise so near-exact sizes do not gain a pixel.
    let new_w = (w * cos + h * sin - 1e-6).ceil().max(1.0) as u32;
    let new_h = (w * sin + h * cos - 1e-6).ceil().max(1.0) as u32;
    (new_w, new_h)
}

fn pad_centered<P: Pixel>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    width: u32,
    height: u32,
    fill: P,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let width = width.max(image.width());
    let height = height.max(image.height());
    let mut canvas = ImageBuffer::from_pixel(width, height, fill);
    let x = i64::from((width - image.width()) / 2);
    let y = i64::from((height - image.height()) / 2);
    image::imageops::replace(&mut canvas, image, x, y);
    canvas
}

/// Parse `rgb`, `rrggbb` or `rrggbbaa` hex colors.
fn parse_color(hex: &str) -> Option<Rgba<u8>> {
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if !hex.is_ascii() {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [0u8; 4];
            for (slot, c) in out.iter_mut().zip(hex.chars()) {
                let v = c.to_digit(16)? as u8;
                *slot = v * 17;
            }
            out[3] = 255;
            Some(Rgba(out))
        }
        6 => Some(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            255,
        ])),
        8 => Some(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            channel(&hex[6..8])?,
        ])),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
