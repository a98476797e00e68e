//! Cryptographic primitives for MarkVault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using ChaCha20-Poly1305
//! - Key, salt and nonce types with automatic zeroization
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Decryption failures never reveal whether the key or the data was wrong

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt, Sealed};
pub use kdf::{derive_key, KdfParams};
pub use keys::{Key, Nonce, Salt};
