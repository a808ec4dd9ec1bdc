//! Query string grammar.
//!
//! ```text
//! width=<int>  height=<int>  mode=exact|fit|fill  resampling=<filter>
//! rotation=<degrees>  rotation_background=<hex>  rotation_interpolation=<name>
//! crop=min_x,min_y|max_x,max_y
//! format=<name>  quality=<int>  gamma_correction=true|false|1|0
//! ```
//!
//! Values are only checked for type here; range and enum checks happen in
//! the processing layer. Unknown keys are ignored.

use crate::error::ProcessError;
use crate::model::Params;
use crate::process::transform::{
    CROP_MAX_X, CROP_MAX_Y, CROP_MIN_X, CROP_MIN_Y, HEIGHT, MODE, RESAMPLING, ROTATION,
    ROTATION_BACKGROUND, ROTATION_INTERPOLATION, WIDTH,
};
use crate::process::{FORMAT, GAMMA_CORRECTION, QUALITY};
use crate::source::SOURCE_PARAM;

const CROP: &str = "crop";

/// Build the parameter set for `source` from a raw query string.
pub fn parse_params(source: &str, query: Option<&str>) -> Result<Params, ProcessError> {
    let mut params = Params::new();
    params.insert(SOURCE_PARAM, source);

    let Some(query) = query else {
        return Ok(params);
    };

    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = value.as_ref();
        match name.as_ref() {
            WIDTH | HEIGHT | QUALITY => {
                params.insert(name.as_ref(), parse_int(&name, value)?);
            }
            ROTATION => {
                let degrees: f64 = value
                    .parse()
                    .ok()
                    .filter(|d: &f64| d.is_finite())
                    .ok_or_else(|| invalid(ROTATION, value, "a number"))?;
                params.insert(ROTATION, degrees);
            }
            MODE | RESAMPLING | ROTATION_BACKGROUND | ROTATION_INTERPOLATION | FORMAT => {
                if value.is_empty() {
                    return Err(ProcessError::invalid_param(name.as_ref(), "empty value"));
                }
                params.insert(name.as_ref(), value);
            }
            GAMMA_CORRECTION => {
                let enabled = match value {
                    "true" | "1" => true,
                    "false" | "0" => false,
                    _ => return Err(invalid(GAMMA_CORRECTION, value, "true|false|1|0")),
                };
                params.insert(GAMMA_CORRECTION, enabled);
            }
            CROP => {
                let [min_x, min_y, max_x, max_y] = parse_crop(value)?;
                params.insert(CROP_MIN_X, min_x);
                params.insert(CROP_MIN_Y, min_y);
                params.insert(CROP_MAX_X, max_x);
                params.insert(CROP_MAX_Y, max_y);
            }
            _ => {}
        }
    }

    Ok(params)
}

fn parse_int(name: &str, value: &str) -> Result<i64, ProcessError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, value, "an integer"))
}

/// `min_x,min_y|max_x,max_y`
fn parse_crop(value: &str) -> Result<[i64; 4], ProcessError> {
    let (min, max) = value
        .split_once('|')
        .ok_or_else(|| invalid(CROP, value, "min_x,min_y|max_x,max_y"))?;
    let point = |s: &str| -> Result<(i64, i64), ProcessError> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| invalid(CROP, value, "min_x,min_y|max_x,max_y"))?;
        Ok((parse_int(CROP, x)?, parse_int(CROP, y)?))
    };
    let (min_x, min_y) = point(min)?;
    let (max_x, max_y) = point(max)?;
    Ok([min_x, min_y, max_x, max_y])
}

fn invalid(name: &str, value: &str, expected: &str) -> ProcessError {
    ProcessError::invalid_param(name, format!("{:?} is not {}", value, expected))
}
