//! The narrow interface the core depends on for file bytes. Actual upload
//! and download transport is an external collaborator's concern; the core
//! only needs to allocate a server-side path and later probe whether the
//! blob still exists.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[async_trait]
pub trait FileBlobStore: Send + Sync {
    /// Allocates a collision-free server-side path for `original_name`.
    async fn allocate_path(&self, original_name: &str) -> AppResult<String>;
    /// Whether a blob still exists at `server_path`.
    async fn exists(&self, server_path: &str) -> bool;
    /// Best-effort delete of the underlying blob; a missing blob is not an error.
    async fn remove(&self, server_path: &str);
}

pub struct LocalDiskBlobStore {
    root: PathBuf,
}

impl LocalDiskBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileBlobStore for LocalDiskBlobStore {
    async fn allocate_path(&self, original_name: &str) -> AppResult<String> {
        let safe_name = Path::new(original_name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| AppError::Validation("invalid file name".into()))?;
        let unique_prefix = uuid::Uuid::new_v4();
        let path = self.root.join(format!("{unique_prefix}_{safe_name}"));
        path.to_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Validation("non-utf8 file path".into()))
    }

    async fn exists(&self, server_path: &str) -> bool {
        tokio::fs::metadata(server_path).await.is_ok()
    }

    async fn remove(&self, server_path: &str) {
        let _ = tokio::fs::remove_file(server_path).await;
    }
}
