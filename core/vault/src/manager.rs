//! Vault lifecycle: creation, unlock, backup and restore.

use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::blob::PersistedBlob;
use crate::config::VaultSettings;
use crate::import::convert_chromium;
use crate::keys::KeyManager;
use crate::session::Session;
use crate::tree::Tree;
use markvault_common::{Error, Result};
use markvault_crypto::Salt;
use markvault_storage::BlobStore;

/// Entry point to one encrypted vault in a blob store.
pub struct Vault {
    store: Arc<dyn BlobStore>,
    settings: VaultSettings,
}

impl Vault {
    pub fn new(store: Arc<dyn BlobStore>, settings: VaultSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    fn blob_key(&self) -> &str {
        &self.settings.blob_key
    }

    /// Whether a vault blob is stored.
    pub async fn exists(&self) -> Result<bool> {
        self.store.exists(self.blob_key()).await
    }

    async fn load(&self) -> Result<PersistedBlob> {
        let bytes = self
            .store
            .get(self.blob_key())
            .await?
            .ok_or_else(|| Error::NotFound("No vault found".to_string()))?;
        PersistedBlob::from_bytes(&bytes)
    }

    /// Create a new empty vault and return its unlocked session.
    ///
    /// # Preconditions
    /// - No vault is stored yet
    ///
    /// # Postconditions
    /// - An encrypted empty tree is stored under a fresh random salt
    ///
    /// # Errors
    /// - `AlreadyExists` if a vault is already stored
    /// - `InvalidInput` if the password is too short
    pub async fn create(&self, password: &str) -> Result<Session> {
        self.settings.check_password(password)?;
        if self.exists().await? {
            return Err(Error::AlreadyExists(
                "A vault already exists in this store".to_string(),
            ));
        }

        let salt = Salt::generate()?;
        let keys = KeyManager::new(self.settings.kdf);
        keys.init(password, salt).await?;

        let tree = Tree::new();
        let plaintext = Zeroizing::new(tree.to_json()?);
        let payload = keys.encrypt(&plaintext)?;
        let blob = PersistedBlob::new(salt, payload, keys.params());
        self.store.set(self.blob_key(), blob.to_bytes()?).await?;

        info!(store = self.store.name(), "Vault created");
        Ok(Session::new(
            self.store.clone(),
            self.settings.clone(),
            keys,
            tree,
        ))
    }

    /// Unlock the stored vault.
    ///
    /// # Errors
    /// - `NotFound` if no vault is stored
    /// - `MalformedPersistedData` if the blob or the decrypted tree is invalid
    /// - `AuthenticationFailure` if the password is wrong or empty
    pub async fn unlock(&self, password: &str) -> Result<Session> {
        if password.is_empty() {
            return Err(Error::AuthenticationFailure);
        }
        let blob = self.load().await?;
        let keys = KeyManager::new(blob.kdf_params());
        keys.init(password, blob.salt).await?;

        let tree = keys
            .decrypt(&blob.encrypted)
            .and_then(|plaintext| Tree::from_json(&plaintext));
        let tree = match tree {
            Ok(tree) => tree,
            Err(e) => {
                keys.clear();
                warn!(error = %e, "Unlock failed");
                return Err(e);
            }
        };

        info!(store = self.store.name(), folders = tree.roots().len(), "Vault unlocked");
        Ok(Session::new(
            self.store.clone(),
            self.settings.clone(),
            keys,
            tree,
        ))
    }

    /// Check a password against the stored vault without unlocking it.
    pub async fn verify_password(&self, password: &str) -> Result<bool> {
        let blob = self.load().await?;
        KeyManager::new(blob.kdf_params())
            .verify_password(password, &blob.salt, &blob.encrypted)
            .await
    }

    /// The stored blob as indented JSON, for backups.
    pub async fn export(&self) -> Result<Vec<u8>> {
        self.load().await?.to_pretty()
    }

    /// Replace the stored blob with a backup.
    ///
    /// The backup is validated first; a malformed one leaves the stored blob
    /// untouched. Its password is not checked.
    ///
    /// # Errors
    /// - `MalformedPersistedData` if the backup is not a valid blob
    pub async fn import(&self, bytes: &[u8]) -> Result<()> {
        let blob = PersistedBlob::from_bytes(bytes).map_err(|e| {
            warn!(error = %e, "Rejected vault backup");
            e
        })?;
        self.store.set(self.blob_key(), blob.to_bytes()?).await?;
        info!(store = self.store.name(), "Vault backup imported");
        Ok(())
    }

    /// Append the bookmarks of a Chromium `Bookmarks` file to a session.
    ///
    /// # Returns
    /// Number of top-level folders added.
    pub async fn import_chromium(&self, session: &Session, json: &[u8]) -> Result<usize> {
        let nodes = convert_chromium(json)?;
        let added = session.append_roots(nodes).await?;
        info!(folders = added, "Chromium bookmarks imported");
        Ok(added)
    }
}
