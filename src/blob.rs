//! Byte blob storage for card and profile pictures.

use crate::error::{AppError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Bucket holding card pictures.
pub const CARD_BUCKET: &str = "cards";
/// Bucket holding profile pictures.
pub const USER_BUCKET: &str = "users";

/// Key-value byte storage organised into named buckets.
pub trait BlobStore: Send + Sync {
    /// Create the bucket if it does not exist.
    fn ensure_bucket(&self, bucket: &str) -> Result<()>;

    /// Store `data` under `key`, replacing any previous object.
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()>;

    /// Read an object. Missing objects fail with `NotFound("picture")`.
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Byte length of an object. Missing objects fail with `NotFound("picture")`.
    fn size(&self, bucket: &str, key: &str) -> Result<u64>;

    /// Remove an object.
    fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Blob store backed by one directory per bucket.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a store rooted at `root`, creating the standard buckets.
    pub fn open(root: &Path) -> Result<Self> {
        let store = Self {
            root: root.to_path_buf(),
        };
        store.ensure_bucket(CARD_BUCKET)?;
        store.ensure_bucket(USER_BUCKET)?;
        Ok(store)
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        for part in [bucket, key] {
            if part.is_empty()
                || part == "."
                || part == ".."
                || part.contains(['/', '\\', '\0'])
            {
                return Err(AppError::Validation(format!("Invalid object name: {}", part)));
            }
        }
        Ok(self.root.join(bucket).join(key))
    }
}

fn missing_as_not_found(e: std::io::Error) -> AppError {
    if e.kind() == ErrorKind::NotFound {
        AppError::NotFound("picture".to_string())
    } else {
        AppError::Io(e)
    }
}

impl BlobStore for FsBlobStore {
    fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let dir = self.root.join(bucket);
        if !dir.is_dir() {
            std::fs::create_dir_all(&dir)?;
            tracing::debug!(bucket = %bucket, path = %dir.display(), "Created bucket");
        }
        Ok(())
    }

    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        std::fs::write(&path, data)?;
        tracing::debug!(bucket = %bucket, key = %key, bytes = data.len(), "Stored object");
        Ok(())
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        std::fs::read(&path).map_err(missing_as_not_found)
    }

    fn size(&self, bucket: &str, key: &str) -> Result<u64> {
        let path = self.object_path(bucket, key)?;
        let metadata = std::fs::metadata(&path).map_err(missing_as_not_found)?;
        Ok(metadata.len())
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        std::fs::remove_file(&path).map_err(missing_as_not_found)?;
        tracing::debug!(bucket = %bucket, key = %key, "Removed object");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_size_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();

        store.put(CARD_BUCKET, "c1_0_100", b"jpeg-bytes").unwrap();
        assert_eq!(store.size(CARD_BUCKET, "c1_0_100").unwrap(), 10);
        assert_eq!(store.get(CARD_BUCKET, "c1_0_100").unwrap(), b"jpeg-bytes");

        store.delete(CARD_BUCKET, "c1_0_100").unwrap();
        assert!(store.get(CARD_BUCKET, "c1_0_100").unwrap_err().is_missing_picture());
        assert!(store.size(CARD_BUCKET, "c1_0_100").unwrap_err().is_missing_picture());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();

        assert!(store.put(CARD_BUCKET, "../escape", b"x").is_err());
        assert!(store.put(CARD_BUCKET, "", b"x").is_err());
        assert!(store.get("..", "key").is_err());
    }
}
