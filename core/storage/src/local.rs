//! Local filesystem blob store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::provider::{validate_key, BlobInfo, BlobStore};
use markvault_common::{Error, Result};

/// File extension of stored blobs.
const BLOB_EXTENSION: &str = "json";

/// Local filesystem blob store.
///
/// Each blob is one file `<root>/<key>.json`. Writes go to a temporary
/// sibling file first and are moved into place with a rename, so the
/// previous blob is never left partially overwritten.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of the blob stored under `key`.
    pub fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, BLOB_EXTENSION))
    }

    fn create_info(key: &str, fs_meta: std::fs::Metadata) -> BlobInfo {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        BlobInfo {
            key: key.to_string(),
            size: fs_meta.len(),
            modified,
        }
    }
}

/// Write `data` to a new file and flush it to disk.
async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

#[async_trait]
impl BlobStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.blob_path(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> Result<BlobInfo> {
        validate_key(key)?;

        let target = self.blob_path(key);
        let staging = self
            .root
            .join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));

        let staged = match write_synced(&staging, &data).await {
            Ok(()) => fs::rename(&staging, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = staged {
            if let Err(cleanup) = fs::remove_file(&staging).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %staging.display(), error = %cleanup, "Staging file left behind");
                }
            }
            return Err(Error::Storage(format!(
                "Failed to replace {}: {}",
                target.display(),
                e
            )));
        }

        debug!(key, size = data.len(), "Blob written");

        let fs_meta = fs::metadata(&target).await?;
        Ok(Self::create_info(key, fs_meta))
    }

    async fn info(&self, key: &str) -> Result<Option<BlobInfo>> {
        validate_key(key)?;
        match fs::metadata(self.blob_path(key)).await {
            Ok(fs_meta) => Ok(Some(Self::create_info(key, fs_meta))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob not found: {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
