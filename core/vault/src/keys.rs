//! Session key management.
//!
//! The [`KeyManager`] owns the derived key of an unlocked session. Every
//! install or clear bumps a *generation* counter; asynchronous work captures
//! the generation when it starts and compares it before publishing results,
//! which is how a lock that happened in the meantime is detected.

use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use zeroize::Zeroizing;

use crate::blob::EncryptedPayload;
use markvault_common::{Error, Result};
use markvault_crypto::{decrypt, derive_key, encrypt, KdfParams, Key, Salt};

#[derive(Default)]
struct KeyState {
    key: Option<Arc<Key>>,
    salt: Option<Salt>,
    generation: u64,
}

/// Holder of the session key.
///
/// # Security
/// - The key is zeroized when the last snapshot of it is dropped
/// - Passwords are copied only into zeroizing buffers
pub struct KeyManager {
    params: KdfParams,
    state: RwLock<KeyState>,
}

impl KeyManager {
    /// Create an uninitialized key manager deriving with `params`.
    pub fn new(params: KdfParams) -> Self {
        Self {
            params,
            state: RwLock::new(KeyState::default()),
        }
    }

    /// KDF parameters used for derivation.
    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Derive a key on the blocking pool without installing it.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty password
    /// - `PrimitiveFailure` if derivation fails
    pub async fn derive(&self, password: &str, salt: &Salt) -> Result<Key> {
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let salt = *salt;
        let params = self.params;

        tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params))
            .await
            .map_err(|e| Error::PrimitiveFailure(format!("Key derivation task failed: {}", e)))?
    }

    /// Derive and install the session key.
    ///
    /// # Postconditions
    /// - `is_ready()` is true
    ///
    /// # Returns
    /// The new key generation.
    pub async fn init(&self, password: &str, salt: Salt) -> Result<u64> {
        let key = self.derive(password, &salt).await?;
        Ok(self.install(key, salt))
    }

    /// Install an already derived key.
    pub fn install(&self, key: Key, salt: Salt) -> u64 {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.key = Some(Arc::new(key));
        state.salt = Some(salt);
        state.generation += 1;
        debug!(generation = state.generation, "Session key installed");
        state.generation
    }

    /// Install `key` only if no install or clear happened since `expected`
    /// was captured.
    ///
    /// # Returns
    /// The new generation, or `None` if the generation moved.
    pub fn install_if(&self, expected: u64, key: Key, salt: Salt) -> Option<u64> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.generation != expected {
            debug!(expected, current = state.generation, "Stale key not installed");
            return None;
        }
        state.key = Some(Arc::new(key));
        state.salt = Some(salt);
        state.generation += 1;
        debug!(generation = state.generation, "Session key replaced");
        Some(state.generation)
    }

    /// Check a password by trying to open `probe` with the derived key.
    ///
    /// # Returns
    /// - `Ok(true)` if the password opens the payload
    /// - `Ok(false)` if it does not
    /// - `Err(_)` if derivation itself failed
    pub async fn verify_password(
        &self,
        password: &str,
        salt: &Salt,
        probe: &EncryptedPayload,
    ) -> Result<bool> {
        let candidate = match self.derive(password, salt).await {
            Ok(key) => key,
            Err(Error::InvalidInput(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        match decrypt(&candidate, &probe.nonce, &probe.ciphertext) {
            Ok(plaintext) => {
                drop(Zeroizing::new(plaintext));
                Ok(true)
            }
            Err(Error::AuthenticationFailure) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop the key and invalidate in-flight work. Idempotent.
    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let had_key = state.key.take().is_some();
        state.salt = None;
        state.generation += 1;
        if had_key {
            debug!(generation = state.generation, "Session key cleared");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .key
            .is_some()
    }

    /// Current key generation.
    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Salt the installed key was derived with.
    pub fn salt(&self) -> Option<Salt> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).salt
    }

    fn snapshot(&self) -> Result<Arc<Key>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .key
            .clone()
            .ok_or(Error::Locked)
    }

    /// Seal `plaintext` under the session key.
    ///
    /// # Errors
    /// - `Locked` if no key is installed
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let key = self.snapshot()?;
        Ok(encrypt(&key, plaintext)?.into())
    }

    /// Open a payload with the session key.
    ///
    /// # Errors
    /// - `Locked` if no key is installed
    /// - `AuthenticationFailure` if the payload does not open
    pub fn decrypt(&self, payload: &EncryptedPayload) -> Result<Zeroizing<Vec<u8>>> {
        let key = self.snapshot()?;
        decrypt(&key, &payload.nonce, &payload.ciphertext).map(Zeroizing::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new(KdfParams::new(1024, 1, 1))
    }

    #[tokio::test]
    async fn test_init_and_roundtrip() {
        let keys = manager();
        assert!(!keys.is_ready());
        assert!(matches!(keys.encrypt(b"x"), Err(Error::Locked)));

        let salt = Salt::generate().unwrap();
        let generation = keys.init("secret123", salt).await.unwrap();

        assert!(keys.is_ready());
        assert_eq!(keys.generation(), generation);
        assert_eq!(keys.salt(), Some(salt));

        let sealed = keys.encrypt(b"{\"folders\":[]}").unwrap();
        assert_eq!(keys.decrypt(&sealed).unwrap().as_slice(), b"{\"folders\":[]}");
    }

    #[tokio::test]
    async fn test_verify_password() {
        let keys = manager();
        let salt = Salt::generate().unwrap();
        keys.init("secret123", salt).await.unwrap();
        let probe = keys.encrypt(b"probe").unwrap();

        assert!(keys.verify_password("secret123", &salt, &probe).await.unwrap());
        assert!(!keys.verify_password("wrong", &salt, &probe).await.unwrap());
        assert!(!keys.verify_password("", &salt, &probe).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent_and_bumps_generation() {
        let keys = manager();
        keys.init("secret123", Salt::generate().unwrap()).await.unwrap();
        let generation = keys.generation();

        keys.clear();
        keys.clear();

        assert!(!keys.is_ready());
        assert!(keys.salt().is_none());
        assert!(keys.generation() > generation);
    }

    #[tokio::test]
    async fn test_snapshot_survives_clear() {
        let keys = manager();
        keys.init("secret123", Salt::generate().unwrap()).await.unwrap();
        let sealed = keys.encrypt(b"data").unwrap();

        let snapshot = keys.snapshot().unwrap();
        keys.clear();

        assert!(decrypt(&snapshot, &sealed.nonce, &sealed.ciphertext).is_ok());
        assert!(matches!(keys.decrypt(&sealed), Err(Error::Locked)));
    }

    #[tokio::test]
    async fn test_install_if_refuses_after_clear() {
        let keys = manager();
        keys.init("secret123", Salt::generate().unwrap()).await.unwrap();
        let generation = keys.generation();
        let salt = Salt::generate().unwrap();

        keys.clear();
        let stale = keys.derive("new-secret", &salt).await.unwrap();
        assert!(keys.install_if(generation, stale, salt).is_none());
        assert!(!keys.is_ready());
        assert!(keys.salt().is_none());

        let current = keys.generation();
        let fresh = keys.derive("new-secret", &salt).await.unwrap();
        assert_eq!(keys.install_if(current, fresh, salt), Some(current + 1));
        assert!(keys.is_ready());
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let first = manager();
        let second = manager();
        let salt = Salt::generate().unwrap();
        first.init("secret123", salt).await.unwrap();
        second.init("other-password", salt).await.unwrap();

        let sealed = first.encrypt(b"data").unwrap();
        assert!(matches!(second.decrypt(&sealed), Err(Error::AuthenticationFailure)));
    }
}
