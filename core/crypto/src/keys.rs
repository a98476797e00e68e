//! Key types with secure memory handling.
//!
//! Key material zeroizes its memory on drop to prevent sensitive data from
//! persisting in memory.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use markvault_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Length of key derivation salts in bytes.
pub const SALT_LENGTH: usize = 16;

/// Length of AEAD nonces in bytes (96-bit).
pub const NONCE_LENGTH: usize = 12;

/// Fill `buf` from the operating system RNG.
///
/// # Errors
/// - `PrimitiveFailure` if the platform RNG is unavailable
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| Error::PrimitiveFailure(format!("OS random generator unavailable: {}", e)))
}

/// Symmetric key derived from the user password.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    key: [u8; KEY_LENGTH],
}

impl Key {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.key[..].ct_eq(&other.key[..]).into()
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Result<Self> {
        let mut salt = [0u8; SALT_LENGTH];
        fill_random(&mut salt)?;
        Ok(Self(salt))
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; SALT_LENGTH] = bytes.try_into().map_err(|_| {
            Error::MalformedPersistedData(format!(
                "salt must be {} bytes, got {}",
                SALT_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }
}

/// Nonce for a single AEAD encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nonce([u8; NONCE_LENGTH]);

impl Nonce {
    /// Generate a fresh random nonce.
    pub fn generate() -> Result<Self> {
        let mut nonce = [0u8; NONCE_LENGTH];
        fill_random(&mut nonce)?;
        Ok(Self(nonce))
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; NONCE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; NONCE_LENGTH] = bytes.try_into().map_err(|_| {
            Error::MalformedPersistedData(format!(
                "nonce must be {} bytes, got {}",
                NONCE_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    /// Get the nonce bytes.
    pub fn as_bytes(&self) -> &[u8; NONCE_LENGTH] {
        &self.0
    }
}
