//! Key derivation using Argon2id.
//!
//! Argon2id is a memory-hard password hashing function that provides
//! resistance to both GPU and time-memory trade-off attacks. It stands in for
//! a PBKDF2-SHA256 derivation with at least 600,000 iterations.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};

use crate::keys::{Key, Salt, KEY_LENGTH};
use markvault_common::{Error, Result};

/// Largest accepted memory cost in KiB (1 GiB).
pub const MAX_MEMORY_COST: u32 = 1024 * 1024;

/// Largest accepted iteration count.
pub const MAX_TIME_COST: u32 = 16;

/// Largest accepted degree of parallelism.
pub const MAX_PARALLELISM: u32 = 16;

/// Parameters for Argon2id key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (e.g., 65536 = 64 MiB).
    pub memory_cost: u32,
    /// Number of iterations.
    pub time_cost: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Explicit parameters.
    pub fn new(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }

    /// Create parameters suitable for interactive use.
    ///
    /// These parameters provide a balance between security and usability,
    /// targeting approximately 0.5-1 second of derivation time.
    pub fn interactive() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }

    /// Create parameters suitable for sensitive data.
    ///
    /// Higher security parameters that may take several seconds.
    pub fn sensitive() -> Self {
        Self {
            memory_cost: 262144, // 256 MiB
            time_cost: 4,
            parallelism: 4,
        }
    }

    /// Create moderate parameters for low-memory devices.
    pub fn moderate() -> Self {
        Self {
            memory_cost: 32768, // 32 MiB
            time_cost: 3,
            parallelism: 2,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "interactive" => Ok(Self::interactive()),
            "moderate" => Ok(Self::moderate()),
            "sensitive" => Ok(Self::sensitive()),
            other => Err(Error::InvalidInput(format!(
                "Unknown KDF preset '{}'. Use: interactive, moderate, or sensitive",
                other
            ))),
        }
    }
}

impl KdfParams {
    /// Check the parameters against Argon2's limits and our upper bounds.
    ///
    /// # Errors
    /// - `InvalidInput` if Argon2 rejects them or a bound is exceeded
    pub fn validate(&self) -> Result<()> {
        self.to_argon2().map(|_| ())
    }

    fn to_argon2(&self) -> Result<Params> {
        if self.memory_cost > MAX_MEMORY_COST {
            return Err(Error::InvalidInput(format!(
                "KDF memory cost {} KiB exceeds {} KiB",
                self.memory_cost, MAX_MEMORY_COST
            )));
        }
        if self.time_cost > MAX_TIME_COST || self.parallelism > MAX_PARALLELISM {
            return Err(Error::InvalidInput(format!(
                "KDF time cost and parallelism must not exceed {} and {}",
                MAX_TIME_COST, MAX_PARALLELISM
            )));
        }
        Params::new(
            self.memory_cost,
            self.time_cost,
            self.parallelism,
            Some(KEY_LENGTH),
        )
        .map_err(|e| Error::InvalidInput(format!("Invalid KDF parameters: {}", e)))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a key from a password and salt using Argon2id.
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
///
/// # Errors
/// - `InvalidInput` if the password is empty or the parameters are invalid
/// - `PrimitiveFailure` if the hash itself fails
///
/// # Security
/// - Password is not stored or logged
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> Result<Key> {
    if password.is_empty() {
        return Err(Error::InvalidInput("Password cannot be empty".to_string()));
    }

    let argon2_params = params.to_argon2()?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LENGTH];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut key_bytes)
        .map_err(|e| Error::PrimitiveFailure(format!("Key derivation failed: {}", e)))?;

    let key = Key::from_bytes(key_bytes);
    zeroize::Zeroize::zeroize(&mut key_bytes);
    Ok(key)
}
