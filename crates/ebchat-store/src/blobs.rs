//! Blob storage: upload-by-path returning a retrievable URL.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` under the relative object path and return its URL.
    async fn upload(&self, object_path: &str, data: Bytes) -> Result<String>;
}

/// Resolve `object_path` below `base`, refusing anything that would escape it.
fn ensure_within(base: &Path, object_path: &str) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    let mut pushed = 0usize;
    for component in Path::new(object_path).components() {
        match component {
            Component::Normal(c) => {
                resolved.push(c);
                pushed += 1;
            }
            Component::CurDir => {}
            _ => {
                return Err(StoreError::BlobStorage(format!(
                    "Path traversal detected in {object_path:?}"
                )));
            }
        }
    }
    if pushed == 0 {
        return Err(StoreError::BlobStorage("Empty object path".to_string()));
    }
    Ok(resolved)
}

/// Blob store writing into a local directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    base_url: String,
    max_size: usize,
}

impl FsBlobStore {
    /// Create the store, creating `base_path` if missing. Uploaded objects
    /// are reachable at `{base_url}/{object_path}`; with no base URL a
    /// `file://` URL into `base_path` is returned.
    pub async fn new(base_path: PathBuf, base_url: Option<String>, max_size: usize) -> Result<Self> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            StoreError::BlobStorage(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        let base_url = match base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("file://{}", base_path.display()),
        };

        info!(path = %base_path.display(), url = %base_url, "Blob store initialized");

        Ok(Self {
            base_path,
            base_url,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn read(&self, object_path: &str) -> Result<Vec<u8>> {
        let path = ensure_within(&self.base_path, object_path)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, object_path: &str, data: Bytes) -> Result<String> {
        if data.is_empty() {
            return Err(StoreError::BlobStorage("Empty blob".to_string()));
        }
        if data.len() > self.max_size {
            return Err(StoreError::BlobTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let path = ensure_within(&self.base_path, object_path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await.map_err(|e| {
            StoreError::BlobStorage(format!("Failed to write blob {object_path}: {e}"))
        })?;

        debug!(object = %object_path, size = data.len(), "Stored blob");
        Ok(format!("{}/{}", self.base_url, object_path.trim_start_matches('/')))
    }
}
