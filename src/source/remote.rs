//! HTTP-fetched source.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;

use crate::error::SourceError;
use crate::model::{Format, Image};

use super::Source;

/// Fetches originals over HTTP.
///
/// The identifier is appended to `prefix` to form the URL. With an empty
/// prefix the identifier must itself be an absolute URL.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    prefix: String,
}

impl HttpSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), prefix)
    }

    pub fn with_client(client: reqwest::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// URL for `id`. It must stay on the prefix's origin.
    fn url(&self, id: &str) -> Result<url::Url, SourceError> {
        let raw = format!("{}{}", self.prefix, id);
        let url = url::Url::parse(&raw)
            .map_err(|e| SourceError::InvalidIdentifier(format!("{}: {}", raw, e)))?;
        if self.prefix.is_empty() {
            return Ok(url);
        }
        let prefix = url::Url::parse(&self.prefix)
            .map_err(|e| SourceError::InvalidIdentifier(format!("{}: {}", self.prefix, e)))?;
        if url.origin() != prefix.origin() {
            return Err(SourceError::InvalidIdentifier(format!(
                "{} leaves {}",
                id,
                prefix.origin().ascii_serialization()
            )));
        }
        Ok(url)
    }
}

/// Format named by an `image/<subtype>` content type, if recognized.
fn format_from_content_type(content_type: &str) -> Option<Format> {
    let mime = content_type.split(';').next()?.trim();
    let subtype = mime.strip_prefix("image/")?;
    Format::parse(subtype)
}

#[async_trait]
impl Source for HttpSource {
    async fn fetch(&self, id: &str) -> Result<Image, SourceError> {
        let url = self.url(id)?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SourceError::Fetch(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Fetch(format!("{}: upstream status {}", url, status)));
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(format_from_content_type);

        let data = response
            .bytes()
            .await
            .map_err(|e| SourceError::Fetch(format!("{}: {}", url, e)))?;

        let format = declared
            .or_else(|| Format::sniff(&data))
            .ok_or_else(|| SourceError::UnknownFormat(id.to_string()))?;

        Ok(Image::new(format.name(), data))
    }
}
