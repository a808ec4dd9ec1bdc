//! Frame-by-frame pipeline for animated GIFs.
//!
//! Every frame goes through the same crop, rotate and resize steps with
//! nearest-neighbor defaults, then the animation is re-encoded. Any error
//! here sends the request to the general pipeline instead.

use std::io::Cursor;

use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, Frame};

use crate::error::ProcessError;
use crate::model::{Format, Image, Params};

use super::pipeline::output_format;
use super::transform::{Interpolation, Transform};

/// Animated GIF pipeline.
#[derive(Debug, Clone)]
pub struct GifPipeline {
    transform: Transform,
}

impl GifPipeline {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            transform: Transform::new(
                Interpolation::NearestNeighbor,
                FilterType::Nearest,
                max_width,
                max_height,
            ),
        }
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn process(&self, image: &Image, params: &Params) -> Result<Image, ProcessError> {
        if output_format(params, Format::Gif)? != Format::Gif {
            return Err(ProcessError::UnsupportedFormat(
                "animated output must be gif".to_string(),
            ));
        }

        let decoder = GifDecoder::new(Cursor::new(&image.data[..])).map_err(|e| ProcessError::Decode {
            message: e.to_string(),
        })?;
        let frames = decoder
            .into_frames()
            .collect_frames()
            .map_err(|e| ProcessError::Decode {
                message: e.to_string(),
            })?;
        if frames.len() < 2 {
            return Err(ProcessError::UnsupportedFormat(format!(
                "gif has {} frame(s), not animated",
                frames.len()
            )));
        }

        if !self.transform.changes(params)? {
            return Ok(image.clone());
        }

        let processed = frames
            .into_iter()
            .map(|frame| {
                let delay = frame.delay();
                let pixels = DynamicImage::ImageRgba8(frame.into_buffer());
                let pixels = self.transform.apply(pixels, params)?;
                Ok(Frame::from_parts(pixels.into_rgba8(), 0, 0, delay))
            })
            .collect::<Result<Vec<_>, ProcessError>>()?;

        let mut output = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut output);
            encoder
                .set_repeat(Repeat::Infinite)
                .and_then(|()| encoder.encode_frames(processed))
                .map_err(|e| ProcessError::Encode {
                    message: e.to_string(),
                })?;
        }
        Ok(Image::new(Format::Gif.name(), output))
    }
}
