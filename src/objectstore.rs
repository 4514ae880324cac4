//! Landing-zone object access
//!
//! The trigger layer delivers object references, not bytes; the engine
//! reads artifact content through this seam. The shipped implementation is
//! a filesystem landing directory; cloud stores plug in behind the same
//! trait.

use crate::error::IngestError;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the raw bytes of a landed object by storage key.
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, IngestError>;
}

/// Filesystem landing zone rooted at a configured directory
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, IngestError> {
        // Keys are relative paths by contract; refuse anything that could
        // escape the landing root.
        if key.split('/').any(|seg| seg == "..") || key.starts_with('/') {
            return Err(IngestError::Load(format!(
                "storage key '{}' escapes the landing zone",
                key
            )));
        }

        let path = self.root.join(key);
        debug!(path = %path.display(), "fetching artifact");
        tokio::fs::read(&path).await.map_err(|e| {
            IngestError::Load(format!("artifact '{}' could not be read: {}", key, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_reads_landed_object() {
        let dir = std::env::temp_dir().join(format!("loadflow-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(dir.join("sales/append/orders"))
            .await
            .unwrap();
        tokio::fs::write(dir.join("sales/append/orders/jan.csv"), b"id\n1\n")
            .await
            .unwrap();

        let store = FsObjectStore::new(dir.clone());
        let bytes = store.fetch("sales/append/orders/jan.csv").await.unwrap();
        assert_eq!(bytes, b"id\n1\n");

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn missing_object_is_load_error() {
        let store = FsObjectStore::new(std::env::temp_dir());
        let err = store.fetch("nope/append/orders/x.csv").await.unwrap_err();
        assert_eq!(err.kind(), "LoadError");
    }

    #[tokio::test]
    async fn traversal_keys_are_refused() {
        let store = FsObjectStore::new(std::env::temp_dir());
        let err = store.fetch("../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), "LoadError");
        let err = store.fetch("/etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), "LoadError");
    }
}
