//! Persisted blob format.
//!
//! The blob is a small JSON object holding everything needed to unlock the
//! vault except the password:
//!
//! ```json
//! { "salt": "<b64 16 bytes>",
//!   "encrypted": { "nonce": "<b64 12 bytes>", "ciphertext": "<b64>" },
//!   "kdf": { "memory_cost": 65536, "time_cost": 3, "parallelism": 4 } }
//! ```
//!
//! `kdf` is optional; blobs without it use the default parameters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use markvault_common::{Error, Result};
use markvault_crypto::aead::TAG_SIZE;
use markvault_crypto::{KdfParams, Nonce, Salt, Sealed};

/// Ciphertext and the nonce it was sealed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
}

impl From<Sealed> for EncryptedPayload {
    fn from(sealed: Sealed) -> Self {
        Self {
            nonce: sealed.nonce,
            ciphertext: sealed.ciphertext,
        }
    }
}

/// The encrypted vault as stored by a [`markvault_storage::BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedBlob {
    pub salt: Salt,
    pub encrypted: EncryptedPayload,
    pub kdf: Option<KdfParams>,
}

#[derive(Serialize, Deserialize)]
struct RawPayload {
    nonce: String,
    ciphertext: String,
}

#[derive(Serialize, Deserialize)]
struct RawBlob {
    salt: String,
    encrypted: RawPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kdf: Option<KdfParams>,
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::MalformedPersistedData(format!("Field '{}' is not base64: {}", name, e)))
}

impl PersistedBlob {
    pub fn new(salt: Salt, encrypted: EncryptedPayload, kdf: KdfParams) -> Self {
        Self {
            salt,
            encrypted,
            kdf: Some(kdf),
        }
    }

    /// KDF parameters recorded in the blob, or the defaults.
    pub fn kdf_params(&self) -> KdfParams {
        self.kdf.unwrap_or_default()
    }

    /// Parse and validate a blob.
    ///
    /// Checks presence and type of `salt`, `encrypted.nonce` and
    /// `encrypted.ciphertext`, then the decoded lengths and, when present,
    /// the `kdf` parameters.
    ///
    /// # Errors
    /// - `MalformedPersistedData` for any shape, encoding or length problem
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: RawBlob = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedPersistedData(format!("Invalid vault blob: {}", e)))?;

        let salt = Salt::from_slice(&decode_field("salt", &raw.salt)?)?;
        let nonce = Nonce::from_slice(&decode_field("encrypted.nonce", &raw.encrypted.nonce)?)?;
        let ciphertext = decode_field("encrypted.ciphertext", &raw.encrypted.ciphertext)?;
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::MalformedPersistedData(format!(
                "Ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        if let Some(kdf) = &raw.kdf {
            kdf.validate().map_err(|e| {
                Error::MalformedPersistedData(format!("Unusable KDF parameters: {}", e))
            })?;
        }

        Ok(Self {
            salt,
            encrypted: EncryptedPayload { nonce, ciphertext },
            kdf: raw.kdf,
        })
    }

    fn to_raw(&self) -> RawBlob {
        RawBlob {
            salt: STANDARD.encode(self.salt.as_bytes()),
            encrypted: RawPayload {
                nonce: STANDARD.encode(self.encrypted.nonce.as_bytes()),
                ciphertext: STANDARD.encode(&self.encrypted.ciphertext),
            },
            kdf: self.kdf,
        }
    }

    /// Compact JSON for the store.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_raw()).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Indented JSON for backups.
    pub fn to_pretty(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.to_raw()).map_err(|e| Error::Serialization(e.to_string()))
    }
}
