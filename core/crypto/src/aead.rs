//! Authenticated encryption using ChaCha20-Poly1305.
//!
//! ChaCha20-Poly1305 provides both confidentiality and authenticity in one
//! primitive. Every call to [`encrypt`] draws a fresh 96-bit nonce from the
//! OS RNG, so a nonce is never reused under the same key in practice.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    ChaCha20Poly1305,
};

use crate::keys::{Key, Nonce};
use markvault_common::{Error, Result};

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Output of [`encrypt`]: the nonce and the ciphertext with its tag appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub nonce: Nonce,
    pub ciphertext: Vec<u8>,
}

/// Encrypt plaintext using ChaCha20-Poly1305.
///
/// # Postconditions
/// - The nonce is freshly generated
/// - `ciphertext.len() == plaintext.len() + TAG_SIZE`
///
/// # Errors
/// - `PrimitiveFailure` if the RNG or the cipher fails
pub fn encrypt(key: &Key, plaintext: &[u8]) -> Result<Sealed> {
    let nonce = Nonce::generate()?;
    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(nonce.as_bytes()), plaintext)
        .map_err(|e| Error::PrimitiveFailure(format!("Encryption failed: {}", e)))?;

    Ok(Sealed { nonce, ciphertext })
}

/// Decrypt ciphertext using ChaCha20-Poly1305.
///
/// # Errors
/// - `AuthenticationFailure` for a wrong key, a wrong nonce, a truncated or
///   a tampered ciphertext alike
///
/// # Security
/// - Authenticates before returning any plaintext
pub fn decrypt(key: &Key, nonce: &Nonce, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(Error::AuthenticationFailure);
    }

    let cipher = ChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(GenericArray::from_slice(nonce.as_bytes()), ciphertext)
        .map_err(|_| Error::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = Key::from_bytes([42u8; KEY_LENGTH]);
        let plaintext = b"Hello, World!";

        let sealed = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &sealed.nonce, &sealed.ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_ciphertext_size() {
        let key = Key::from_bytes([42u8; KEY_LENGTH]);
        let plaintext = b"Test message";

        let sealed = encrypt(&key, plaintext).unwrap();

        assert_eq!(sealed.ciphertext.len(), plaintext.len() + TAG_SIZE);
    }

    #[test]
    fn test_different_nonce_each_time() {
        let key = Key::from_bytes([42u8; KEY_LENGTH]);
        let plaintext = b"Same plaintext";

        let first = encrypt(&key, plaintext).unwrap();
        let second = encrypt(&key, plaintext).unwrap();

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = Key::from_bytes([1u8; KEY_LENGTH]);
        let key2 = Key::from_bytes([2u8; KEY_LENGTH]);

        let sealed = encrypt(&key1, b"Secret data").unwrap();
        let result = decrypt(&key2, &sealed.nonce, &sealed.ciphertext);

        assert!(matches!(result, Err(Error::AuthenticationFailure)));
    }

    #[test]
    fn test_tampered_ciphertext_fails_the_same_way() {
        let key = Key::from_bytes([42u8; KEY_LENGTH]);

        let mut sealed = encrypt(&key, b"Important data").unwrap();
        sealed.ciphertext[5] ^= 0xFF;

        let result = decrypt(&key, &sealed.nonce, &sealed.ciphertext);
        assert!(matches!(result, Err(Error::AuthenticationFailure)));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = Key::from_bytes([42u8; KEY_LENGTH]);
        let sealed = encrypt(&key, b"").unwrap();

        let result = decrypt(&key, &sealed.nonce, &sealed.ciphertext[..TAG_SIZE - 1]);
        assert!(matches!(result, Err(Error::AuthenticationFailure)));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = Key::from_bytes([42u8; KEY_LENGTH]);

        let sealed = encrypt(&key, b"").unwrap();
        let decrypted = decrypt(&key, &sealed.nonce, &sealed.ciphertext).unwrap();

        assert!(decrypted.is_empty());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(key in any::<[u8; KEY_LENGTH]>(), data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let key = Key::from_bytes(key);
            let sealed = encrypt(&key, &data).unwrap();
            prop_assert_eq!(decrypt(&key, &sealed.nonce, &sealed.ciphertext).unwrap(), data);
        }
    }
}
