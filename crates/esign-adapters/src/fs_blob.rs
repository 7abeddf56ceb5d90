//! Filesystem artifact store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use esign_core::store::BlobStore;
use esign_core::SignError;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, SignError> {
        // Keys are internal, but reject traversal anyway.
        let relative = Path::new(key);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(SignError::Storage(format!("invalid blob key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), SignError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| SignError::Storage(format!("blob directory create failed: {err}")))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|err| SignError::Storage(format!("blob write failed: {err}")))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SignError> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SignError::Storage(format!("blob read failed: {err}"))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), SignError> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SignError::Storage(format!("blob delete failed: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put("signed/j1_0.pdf", b"%PDF-1.7 data", "application/pdf")
            .await
            .unwrap();
        assert_eq!(
            store.get("signed/j1_0.pdf").await.unwrap().unwrap(),
            b"%PDF-1.7 data"
        );

        store.delete("signed/j1_0.pdf").await.unwrap();
        assert!(store.get("signed/j1_0.pdf").await.unwrap().is_none());
        // Deleting again is fine.
        store.delete("signed/j1_0.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.get("../outside").await.is_err());
        assert!(store.put("/etc/passwd", b"x", "text/plain").await.is_err());
    }
}
