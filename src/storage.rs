//! Blob store boundary. Jobs fetch their source upload from here and
//! push every produced artifact back through it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PipelineError;

/// Narrow capability contract for the artifact/object store.
pub trait BlobStore: Send + Sync {
    /// Copies the object at `key` to `dest` and returns the local path.
    fn fetch(&self, key: &str, dest: &Path) -> Result<PathBuf, PipelineError>;
    /// Stores `payload` under `key`, overwriting any previous object.
    fn store(&self, key: &str, payload: &[u8], mime_type: &str) -> Result<(), PipelineError>;
    /// Returns a temporary URL for `key`.
    fn sign(&self, key: &str) -> Result<String, PipelineError>;
}

/// Filesystem-backed store. Keys map directly to paths under the root;
/// the root and intermediate directories are created lazily.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, PipelineError> {
        // Keys are slash-separated and must stay inside the root.
        let mut path = self.root.clone();
        for part in key.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(PipelineError::Storage {
                    op: "resolve",
                    key: key.to_string(),
                    reason: "key contains an empty or traversal segment".to_string(),
                });
            }
            path.push(part);
        }
        Ok(path)
    }
}

impl BlobStore for LocalBlobStore {
    fn fetch(&self, key: &str, dest: &Path) -> Result<PathBuf, PipelineError> {
        let src = self.object_path(key)?;
        fs::copy(&src, dest).map_err(|e| PipelineError::Storage {
            op: "fetch",
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(dest.to_path_buf())
    }

    fn store(&self, key: &str, payload: &[u8], mime_type: &str) -> Result<(), PipelineError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::Storage {
                op: "store",
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        }
        fs::write(&path, payload).map_err(|e| PipelineError::Storage {
            op: "store",
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        debug!(key, mime_type, bytes = payload.len(), "stored blob");
        Ok(())
    }

    fn sign(&self, key: &str) -> Result<String, PipelineError> {
        let path = self.object_path(key)?;
        Ok(format!("file://{}", path.display()))
    }
}
