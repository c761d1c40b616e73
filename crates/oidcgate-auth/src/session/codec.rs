//! Cookie value codecs.
//!
//! Session cookie: `encrypt(BASE64(gzip(JSON(session))))`.
//! State cookie: `encrypt(JSON(auth_state))`, the payload is too small to be
//! worth compressing.
//!
//! Decoding runs the pipeline backwards. Every stage that fails yields a
//! [`CipherError`]; a partially decoded value is never returned.

use std::io::{Read, Write};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use flate2::{Compression, read::GzDecoder, write::GzEncoder};

use super::cipher::{CipherError, CookieCipher};
use super::PersistedSession;
use crate::pkce::AuthState;

/// Upper bound on a decompressed session payload.
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

/// Encodes and decodes the gate's cookie values.
#[derive(Debug, Clone)]
pub struct SessionCodec {
    cipher: CookieCipher,
}

impl SessionCodec {
    /// Creates a codec around a cipher.
    #[must_use]
    pub fn new(cipher: CookieCipher) -> Self {
        Self { cipher }
    }

    /// Encodes a session. `None` encodes to the empty string, which clears
    /// the cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, compression or encryption fails.
    pub fn encode(&self, session: Option<&PersistedSession>) -> Result<String, CipherError> {
        let Some(session) = session else {
            return Ok(String::new());
        };

        let json =
            serde_json::to_vec(session).map_err(|e| CipherError::Serialization(e.to_string()))?;
        let compressed = gzip(&json)?;
        self.cipher.encrypt(BASE64.encode(compressed).as_bytes())
    }

    /// Decodes a session cookie value.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage of the pipeline fails: the value is
    /// corrupt, was tampered with, or was encrypted under another key.
    pub fn decode(&self, value: &str) -> Result<PersistedSession, CipherError> {
        let decrypted = self.cipher.decrypt(value)?;
        let compressed = BASE64
            .decode(&decrypted)
            .map_err(|e| CipherError::Encoding(e.to_string()))?;
        let json = gunzip(&compressed)?;
        serde_json::from_slice(&json).map_err(|e| CipherError::Serialization(e.to_string()))
    }

    /// Encodes the PKCE state for the state cookie.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails.
    pub fn encode_state(&self, state: &AuthState) -> Result<String, CipherError> {
        let json =
            serde_json::to_vec(state).map_err(|e| CipherError::Serialization(e.to_string()))?;
        self.cipher.encrypt(&json)
    }

    /// Decodes a state cookie value.
    ///
    /// # Errors
    ///
    /// Returns an error if decryption or parsing fails.
    pub fn decode_state(&self, value: &str) -> Result<AuthState, CipherError> {
        let json = self.cipher.decrypt(value)?;
        serde_json::from_slice(&json).map_err(|e| CipherError::Serialization(e.to_string()))
    }
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| CipherError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CipherError::Compression(e.to_string()))
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut decompressed = Vec::new();
    GzDecoder::new(bytes)
        .take(MAX_DECOMPRESSED_SIZE + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| CipherError::Compression(e.to_string()))?;

    if decompressed.len() as u64 > MAX_DECOMPRESSED_SIZE {
        return Err(CipherError::Compression(format!(
            "payload exceeds {MAX_DECOMPRESSED_SIZE} bytes"
        )));
    }
    Ok(decompressed)
}
