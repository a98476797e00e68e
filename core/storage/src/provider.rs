//! Blob store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use markvault_common::{Error, Result};

/// Metadata for a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Key the blob is stored under.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Opaque key/value persistence for encrypted vault blobs.
///
/// Implementations must make `set` an atomic replace: a reader observes
/// either the previous blob or the new one, never a partial write.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name (e.g., "memory", "local").
    fn name(&self) -> &str;

    /// Read the blob stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `data` under `key`, replacing any previous blob atomically.
    ///
    /// # Errors
    /// - Invalid key
    /// - I/O errors
    async fn set(&self, key: &str, data: Vec<u8>) -> Result<BlobInfo>;

    /// Metadata for the blob under `key`, if any.
    async fn info(&self, key: &str) -> Result<Option<BlobInfo>>;

    /// Delete the blob under `key`.
    ///
    /// # Errors
    /// - `NotFound` if nothing is stored under `key`
    async fn remove(&self, key: &str) -> Result<()>;

    /// Check if a blob exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.info(key).await?.is_some())
    }
}

/// Check that a key is usable as a single flat name.
///
/// # Errors
/// - Key is empty, contains separators, or starts with a dot
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidInput("Blob key cannot be empty".to_string()));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(Error::InvalidInput(
            "Blob key cannot contain separators".to_string(),
        ));
    }
    if key.starts_with('.') {
        return Err(Error::InvalidInput(
            "Blob key cannot start with '.'".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_info_serialization() {
        let info = BlobInfo {
            key: "markvault".to_string(),
            size: 1024,
            modified: Utc::now(),
        };

        let json = serde_json::to_string(&info).unwrap();
        let deserialized: BlobInfo = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.key, info.key);
        assert_eq!(deserialized.size, info.size);
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("markvault").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("..").is_err());
    }
}
