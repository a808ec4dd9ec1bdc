//! Lossy PNG compression through the external `pngquant` tool.
//!
//! The encoded PNG is piped to `pngquant - --speed <n>` and the tool's
//! standard output becomes the new image.

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;

use image::ImageReader;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ProcessError;
use crate::model::{Format, Image};

pub const DEFAULT_COMMAND: &str = "pngquant";
pub const DEFAULT_SPEED: u8 = 3;

/// Runs `pngquant` over PNG output.
#[derive(Debug, Clone)]
pub struct PngQuant {
    command: PathBuf,
    speed: u8,
    max_area: Option<u64>,
}

impl Default for PngQuant {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

impl PngQuant {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            speed: DEFAULT_SPEED,
            max_area: None,
        }
    }

    /// Speed/quality trade-off, 1 (slowest) to 11 (fastest).
    pub fn with_speed(mut self, speed: u8) -> Self {
        self.speed = speed;
        self
    }

    /// Skip images whose pixel area exceeds `max_area`.
    pub fn with_max_area(mut self, max_area: Option<u64>) -> Self {
        self.max_area = max_area.filter(|a| *a > 0);
        self
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Whether this image should go through the tool.
    ///
    /// Only PNG is eligible. An unreadable header does not prevent
    /// compression; the tool decides.
    pub fn should_compress(&self, image: &Image) -> bool {
        if Format::parse(&image.format) != Some(Format::Png) {
            return false;
        }
        let Some(max_area) = self.max_area else {
            return true;
        };
        let reader = ImageReader::with_format(Cursor::new(&image.data[..]), image::ImageFormat::Png);
        match reader.into_dimensions() {
            Ok((w, h)) => u64::from(w) * u64::from(h) <= max_area,
            Err(_) => true,
        }
    }

    /// Pipe the image through the tool and return its output.
    pub async fn compress(&self, image: &Image) -> Result<Image, ProcessError> {
        let mut child = Command::new(&self.command)
            .arg("-")
            .arg("--speed")
            .arg(self.speed.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::ExternalTool(format!("{}: {}", self.command.display(), e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::ExternalTool("stdin not captured".to_string()))?;
        let input = image.data.clone();
        // The tool may exit before reading everything; the exit status decides.
        let writer = tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!(error = %e, "pngquant closed stdin early");
            }
        });

        // Drains stdout and stderr together.
        let result = child
            .wait_with_output()
            .await
            .map_err(|e| ProcessError::ExternalTool(e.to_string()))?;
        let _ = writer.await;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            warn!(status = %result.status, stderr = %stderr.trim(), "pngquant failed");
            return Err(ProcessError::ExternalTool(format!(
                "{} exited with {}",
                self.command.display(),
                result.status
            )));
        }

        debug!(before = image.len(), after = result.stdout.len(), "pngquant compressed image");
        Ok(Image::new(image.format.clone(), result.stdout))
    }
}
