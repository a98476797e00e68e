//! Vault settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::EvictionPolicy;
use markvault_common::{Error, Result};
use markvault_crypto::KdfParams;

/// Store key of the encrypted blob.
pub const DEFAULT_BLOB_KEY: &str = "markvault";

/// Inactivity before an unlocked session locks itself (10 minutes).
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 600;

/// Bookmarks per page of a paginated listing.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Entries kept by the site icon cache.
pub const DEFAULT_ICON_CACHE_CAPACITY: usize = 200;

/// Shortest accepted master password.
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;

/// Tunable behaviour of a vault and its sessions.
///
/// Missing fields take their defaults when loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Argon2id parameters for newly derived keys.
    pub kdf: KdfParams,
    /// Seconds of inactivity before auto-lock.
    pub inactivity_timeout_secs: u64,
    /// Bookmarks per page.
    pub page_size: usize,
    /// Capacity of the icon cache.
    pub icon_cache_capacity: usize,
    /// Eviction order of the icon cache.
    pub icon_eviction: EvictionPolicy,
    /// Minimum master password length, in characters.
    pub min_password_len: usize,
    /// Key under which the blob is stored.
    pub blob_key: String,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            inactivity_timeout_secs: DEFAULT_INACTIVITY_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            icon_cache_capacity: DEFAULT_ICON_CACHE_CAPACITY,
            icon_eviction: EvictionPolicy::default(),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            blob_key: DEFAULT_BLOB_KEY.to_string(),
        }
    }
}

impl VaultSettings {
    /// Inactivity timeout as a duration.
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    /// Check a candidate master password against the length policy.
    ///
    /// # Errors
    /// - `InvalidInput` if the password is too short
    pub fn check_password(&self, password: &str) -> Result<()> {
        if password.chars().count() < self.min_password_len {
            return Err(Error::InvalidInput(format!(
                "Password must be at least {} characters",
                self.min_password_len
            )));
        }
        Ok(())
    }

    /// Check that the settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidInput("page_size must be positive".to_string()));
        }
        if self.icon_cache_capacity == 0 {
            return Err(Error::InvalidInput(
                "icon_cache_capacity must be positive".to_string(),
            ));
        }
        if self.inactivity_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "inactivity_timeout_secs must be positive".to_string(),
            ));
        }
        self.kdf.validate()?;
        markvault_storage::validate_key(&self.blob_key)
    }

    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize and validate settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = VaultSettings::default();
        assert_eq!(settings.inactivity_timeout(), Duration::from_secs(600));
        assert_eq!(settings.page_size, 50);
        assert_eq!(settings.icon_cache_capacity, 200);
        assert_eq!(settings.icon_eviction, EvictionPolicy::InsertionOrder);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_password_policy() {
        let settings = VaultSettings::default();
        assert!(settings.check_password("secret123").is_ok());
        assert!(settings.check_password("short").is_err());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let settings =
            VaultSettings::from_json(r#"{"page_size": 20, "icon_eviction": "recency"}"#).unwrap();
        assert_eq!(settings.page_size, 20);
        assert_eq!(settings.icon_eviction, EvictionPolicy::Recency);
        assert_eq!(settings.blob_key, DEFAULT_BLOB_KEY);
    }

    #[test]
    fn test_json_roundtrip() {
        let settings = VaultSettings {
            kdf: KdfParams::moderate(),
            ..Default::default()
        };
        let restored = VaultSettings::from_json(&settings.to_json().unwrap()).unwrap();
        assert_eq!(restored, settings);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(VaultSettings::from_json(r#"{"page_size": 0}"#).is_err());
        assert!(VaultSettings::from_json(r#"{"blob_key": "../x"}"#).is_err());
        assert!(VaultSettings::from_json(
            r#"{"kdf": {"memory_cost": 1, "time_cost": 3, "parallelism": 4}}"#
        )
        .is_err());
    }
}
