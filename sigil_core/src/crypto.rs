//! Authenticated encryption for secret bearing columns.
//!
//! Every encrypted value is stored as `nonce (12 bytes) || ciphertext`, where the
//! ciphertext carries the Poly1305 tag. The 256 bit key is the SHA-256 digest of
//! the configured secret, so any configured string maps to a usable key.

use std::fmt;

use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Length of the random nonce prefixed to every ciphertext.
pub const NONCE_LEN: usize = 12;

/// Length of the Poly1305 authentication tag.
pub const TAG_LEN: usize = 16;

/// Minimum number of characters accepted for a configured encryption key.
pub const MIN_KEY_LENGTH: usize = 20;

/// Plaintext written as the encryption check value.
pub const CHECK_MARKER: &[u8] = b"sigil:encryption-check:v1";

/// Errors produced while encrypting or decrypting a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// The stored value is too short to contain a nonce and a tag.
    #[error("ciphertext is malformed: {0} bytes is shorter than nonce and tag")]
    Malformed(usize),

    /// The tag did not verify: wrong key or tampered data.
    #[error("ciphertext failed authentication")]
    Authentication,

    /// The cipher refused to encrypt the value.
    #[error("encryption failure")]
    Encryption,
}

/// Why a candidate key was rejected against the stored check value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCheckFailure {
    /// No check value is stored.
    Missing,
    /// The stored check value is truncated.
    Malformed,
    /// Authentication failed: wrong key or corrupted check value.
    Authentication,
    /// The check value decrypted but did not reproduce the marker.
    MarkerMismatch,
}

impl fmt::Display for KeyCheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            KeyCheckFailure::Missing => "the encryption check value is missing",
            KeyCheckFailure::Malformed => "the encryption check value is malformed",
            KeyCheckFailure::Authentication => {
                "the encryption check value could not be decrypted with this key"
            }
            KeyCheckFailure::MarkerMismatch => {
                "the encryption check value did not match the expected marker"
            }
        };
        f.write_str(reason)
    }
}

impl From<CryptoError> for KeyCheckFailure {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Malformed(_) => KeyCheckFailure::Malformed,
            CryptoError::Authentication | CryptoError::Encryption => {
                KeyCheckFailure::Authentication
            }
        }
    }
}

/// A symmetric key held only in memory.
///
/// The key material is wiped on drop and never shown by `Debug`.
#[derive(Clone)]
pub struct EncryptionKey {
    material: Zeroizing<[u8; 32]>,
}

impl EncryptionKey {
    /// Derives the key from a configured secret string.
    pub fn derive(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut material = Zeroizing::new([0u8; 32]);
        material.copy_from_slice(&digest);
        Self { material }
    }

    #[allow(deprecated)]
    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.material[..]))
    }

    /// Encrypts `plaintext` under a fresh random nonce.
    #[allow(deprecated)]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::Encryption)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypts a value produced by [`EncryptionKey::encrypt`].
    #[allow(deprecated)]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed(data.len()));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Authentication)
    }

    /// Produces a fresh check value for this key.
    pub fn check_value(&self) -> Result<Vec<u8>, CryptoError> {
        self.encrypt(CHECK_MARKER)
    }

    /// Verifies that `stored` was produced by [`EncryptionKey::check_value`] under this key.
    pub fn verify_check_value(&self, stored: &[u8]) -> Result<(), KeyCheckFailure> {
        let plaintext = Zeroizing::new(self.decrypt(stored)?);
        if plaintext.as_slice() == CHECK_MARKER {
            Ok(())
        } else {
            Err(KeyCheckFailure::MarkerMismatch)
        }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("material", &"[REDACTED]")
            .finish()
    }
}
