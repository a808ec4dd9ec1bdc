//! Filesystem-rooted source.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::SourceError;
use crate::model::{Format, Image};

use super::Source;

/// Reads originals from files below a root directory.
///
/// Identifiers are relative paths. Absolute paths and `..` components are
/// rejected so requests cannot escape the root.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> Result<PathBuf, SourceError> {
        let mut path = self.root.clone();
        let mut pushed = false;
        for component in Path::new(id).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    pushed = true;
                }
                Component::CurDir => {}
                _ => return Err(SourceError::InvalidIdentifier(id.to_string())),
            }
        }
        if !pushed {
            return Err(SourceError::InvalidIdentifier(id.to_string()));
        }
        Ok(path)
    }
}

#[async_trait]
impl Source for FileSource {
    async fn fetch(&self, id: &str) -> Result<Image, SourceError> {
        let path = self.resolve(id)?;
        let data = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => SourceError::NotFound(id.to_string()),
            _ => SourceError::Fetch(format!("{}: {}", path.display(), e)),
        })?;

        let format = Format::sniff(&data).ok_or_else(|| SourceError::UnknownFormat(id.to_string()))?;
        Ok(Image::new(format.name(), data))
    }
}
