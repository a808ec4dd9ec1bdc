//! Local disk store.
//!
//! One file per key at `root/<first two key chars>/<key>`. Writes go to a
//! temporary file in the same directory and are renamed into place, so a
//! reader never sees a partial entry.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::Image;

use super::Cache;

/// Stores serialized images as files below `root`.
#[derive(Debug)]
pub struct FileCache {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf, StoreError> {
        // Keys come from the key generator; anything else is a bug upstream.
        let safe = key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b':' | b'_' | b'-'));
        if key.len() < 2 || !safe {
            return Err(StoreError::Io(format!("unusable cache key {:?}", key)));
        }
        Ok(self.root.join(&key[..2]).join(key))
    }
}

#[async_trait]
impl Cache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<Image>, StoreError> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(raw) => Image::from_bytes(&raw).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(format!("{}: {}", path.display(), e))),
        }
    }

    async fn set(&self, key: &str, image: &Image) -> Result<(), StoreError> {
        let path = self.path(key)?;
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Io(format!("no parent for {}", path.display())))?;
        tokio::fs::create_dir_all(dir).await?;

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".{}.{}.{}.tmp", key, std::process::id(), n));
        tokio::fs::write(&tmp, image.to_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}
