//! Values carried through the serving chain.
//!
//! - [`Image`]: an encoded image and its format tag
//! - [`Format`]: the closed set of formats the dispatcher understands
//! - [`Params`]: a parsed transformation request

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProcessError, StoreError};

// =============================================================================
// Image
// =============================================================================

/// An encoded image.
///
/// Images are never mutated; every transformation produces a new value.
/// Cloning is cheap because `data` is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// Format tag, e.g. "jpeg", "png", "gif"
    pub format: String,

    /// Encoded image bytes
    pub data: Bytes,
}

impl Image {
    pub fn new(format: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            format: format.into(),
            data: data.into(),
        }
    }

    /// Size of the encoded data in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Serialize for byte-oriented stores.
    ///
    /// Layout: `u32` big-endian format length, format bytes, image data.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.format.len() + self.data.len());
        buf.put_u32(self.format.len() as u32);
        buf.put_slice(self.format.as_bytes());
        buf.put_slice(&self.data);
        buf.freeze()
    }

    /// Deserialize a value produced by [`Image::to_bytes`].
    pub fn from_bytes(raw: &[u8]) -> Result<Self, StoreError> {
        let mut buf = raw;
        if buf.remaining() < 4 {
            return Err(StoreError::Corrupt(format!(
                "entry too short: {} bytes",
                raw.len()
            )));
        }
        let format_len = buf.get_u32() as usize;
        if buf.remaining() < format_len {
            return Err(StoreError::Corrupt(format!(
                "format length {} exceeds entry size {}",
                format_len,
                raw.len()
            )));
        }
        let format = std::str::from_utf8(&buf[..format_len])
            .map_err(|e| StoreError::Corrupt(format!("format is not UTF-8: {}", e)))?
            .to_string();
        buf.advance(format_len);
        Ok(Self {
            format,
            data: Bytes::copy_from_slice(buf),
        })
    }
}

// =============================================================================
// Format
// =============================================================================

/// Image formats understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Bmp,
    Tiff,
}

impl Format {
    /// Parse a format name, accepting the usual aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(Format::Jpeg),
            "png" => Some(Format::Png),
            "gif" => Some(Format::Gif),
            "bmp" => Some(Format::Bmp),
            "tiff" | "tif" => Some(Format::Tiff),
            _ => None,
        }
    }

    /// Canonical name used as the image format tag.
    pub fn name(self) -> &'static str {
        match self {
            Format::Jpeg => "jpeg",
            Format::Png => "png",
            Format::Gif => "gif",
            Format::Bmp => "bmp",
            Format::Tiff => "tiff",
        }
    }

    /// MIME type for HTTP responses.
    pub fn mime_type(self) -> &'static str {
        match self {
            Format::Jpeg => "image/jpeg",
            Format::Png => "image/png",
            Format::Gif => "image/gif",
            Format::Bmp => "image/bmp",
            Format::Tiff => "image/tiff",
        }
    }

    pub fn to_image_format(self) -> image::ImageFormat {
        match self {
            Format::Jpeg => image::ImageFormat::Jpeg,
            Format::Png => image::ImageFormat::Png,
            Format::Gif => image::ImageFormat::Gif,
            Format::Bmp => image::ImageFormat::Bmp,
            Format::Tiff => image::ImageFormat::Tiff,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(Format::Jpeg),
            image::ImageFormat::Png => Some(Format::Png),
            image::ImageFormat::Gif => Some(Format::Gif),
            image::ImageFormat::Bmp => Some(Format::Bmp),
            image::ImageFormat::Tiff => Some(Format::Tiff),
            _ => None,
        }
    }

    /// Detect the format of encoded bytes from their magic number.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        image::guess_format(data)
            .ok()
            .and_then(Self::from_image_format)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Params
// =============================================================================

/// A single parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value.into())
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Str(s) => write!(f, "{:?}", s),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// A parsed transformation request.
///
/// Entries are kept sorted by name, so two `Params` built in a different
/// order compare equal and serialize identically. The map is shared behind
/// an `Arc`, so clones handed to worker threads do not copy it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Arc<BTreeMap<String, ParamValue>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        Arc::make_mut(&mut self.values).insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over entries in sorted name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Read a string parameter. A non-string value is an error.
    pub fn get_str(&self, name: &str) -> Result<Option<&str>, ProcessError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ParamValue::Str(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(type_error(name, "string", other)),
        }
    }

    /// Read an integer parameter.
    pub fn get_int(&self, name: &str) -> Result<Option<i64>, ProcessError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ParamValue::Int(i)) => Ok(Some(*i)),
            Some(other) => Err(type_error(name, "integer", other)),
        }
    }

    /// Read a numeric parameter; integers are widened.
    pub fn get_float(&self, name: &str) -> Result<Option<f64>, ProcessError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ParamValue::Float(x)) => Ok(Some(*x)),
            Some(ParamValue::Int(i)) => Ok(Some(*i as f64)),
            Some(other) => Err(type_error(name, "number", other)),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, ProcessError> {
        match self.values.get(name) {
            None => Ok(None),
            Some(ParamValue::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(type_error(name, "boolean", other)),
        }
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        f.write_str("}")
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

fn type_error(name: &str, expected: &str, got: &ParamValue) -> ProcessError {
    ProcessError::invalid_param(name, format!("expected {}, got {}", expected, got))
}

// =============================================================================
// Tests
// =============================================================================
