//! In-memory blob store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::provider::{validate_key, BlobInfo, BlobStore};
use markvault_common::{Error, Result};

/// In-memory blob store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Clones share the same storage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    storage: Arc<RwLock<HashMap<String, (Vec<u8>, BlobInfo)>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let storage = self
            .storage
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))?;
        Ok(storage.get(key).map(|(data, _)| data.clone()))
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> Result<BlobInfo> {
        validate_key(key)?;

        let info = BlobInfo {
            key: key.to_string(),
            size: data.len() as u64,
            modified: Utc::now(),
        };

        self.storage
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))?
            .insert(key.to_string(), (data, info.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(info)
    }

    async fn info(&self, key: &str) -> Result<Option<BlobInfo>> {
        validate_key(key)?;
        let storage = self
            .storage
            .read()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))?;
        Ok(storage.get(key).map(|(_, info)| info.clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.storage
            .write()
            .map_err(|_| Error::Storage("Memory store lock poisoned".to_string()))?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", key)))
    }
}
