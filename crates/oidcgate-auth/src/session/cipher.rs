//! AES-256-GCM cookie encryption.
//!
//! Framing: `BASE64(nonce || ciphertext || tag)` with a fresh random 96-bit
//! nonce per encryption and the 128-bit GCM tag appended by the cipher.
//! Decryption splits the first 12 bytes off as the nonce. Any modification of
//! the framed value fails authentication.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;

/// Nonce size for AES-256-GCM (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
pub const KEY_SIZE: usize = 32;

/// GCM authentication tag size (128 bits)
const TAG_SIZE: usize = 16;

/// Errors from encrypting, decrypting or framing cookie values.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The configured key cannot be used.
    #[error("Invalid cookie encryption key: {0}")]
    InvalidKey(String),

    /// The value is not valid base64.
    #[error("Cookie value is not valid base64: {0}")]
    Encoding(String),

    /// The value is too short to hold a nonce and a tag.
    #[error("Cookie value is truncated")]
    Truncated,

    /// Authentication failed: wrong key or tampered value.
    #[error("Cookie value failed authentication")]
    Decrypt,

    /// Encryption failed.
    #[error("Cookie encryption failed: {0}")]
    Encrypt(String),

    /// The decrypted payload could not be decompressed.
    #[error("Cookie payload is not valid gzip: {0}")]
    Compression(String),

    /// The decrypted payload could not be (de)serialized.
    #[error("Cookie payload is not a valid document: {0}")]
    Serialization(String),
}

/// Symmetric cipher for cookie values.
#[derive(Clone)]
pub struct CookieCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CookieCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCipher").finish_non_exhaustive()
    }
}

impl CookieCipher {
    /// Creates a cipher from raw key bytes.
    #[must_use]
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Creates a cipher from a configured secret.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKey`] unless the secret is 64 hex
    /// characters, base64 of 32 bytes, or exactly 32 bytes of text.
    pub fn from_secret(secret: &str) -> Result<Self, CipherError> {
        parse_key(secret).map(|key| Self::new(&key))
    }

    /// Encrypts `plaintext` and returns the framed, base64 encoded value.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying cipher fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CipherError::Encrypt(e.to_string()))?;

        let mut framed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(framed))
    }

    /// Decrypts a value produced by [`CookieCipher::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not base64, is truncated, or fails
    /// authentication.
    pub fn decrypt(&self, value: &str) -> Result<Vec<u8>, CipherError> {
        let framed = BASE64
            .decode(value.trim())
            .map_err(|e| CipherError::Encoding(e.to_string()))?;

        if framed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CipherError::Truncated);
        }

        let (nonce_bytes, ciphertext) = framed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CipherError::Decrypt)
    }
}

/// Parses a key from hex, base64, or raw 32-byte text.
fn parse_key(secret: &str) -> Result<[u8; KEY_SIZE], CipherError> {
    let secret = secret.trim();
    if secret.is_empty() {
        return Err(CipherError::InvalidKey("key is empty".to_string()));
    }

    let bytes = if secret.len() == KEY_SIZE * 2
        && let Ok(bytes) = hex::decode(secret)
    {
        bytes
    } else if let Ok(bytes) = BASE64.decode(secret)
        && bytes.len() == KEY_SIZE
    {
        bytes
    } else {
        secret.as_bytes().to_vec()
    };

    <[u8; KEY_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
        CipherError::InvalidKey(format!(
            "expected {KEY_SIZE} bytes (raw, 64 hex characters or base64), got {}",
            bytes.len()
        ))
    })
}
