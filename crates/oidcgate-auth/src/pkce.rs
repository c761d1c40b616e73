//! PKCE (Proof Key for Code Exchange) state for the login redirect.
//!
//! Implements the client side of RFC 7636 with the S256 method. One
//! [`AuthState`] lives for a single authorization attempt: it is created when
//! the browser is redirected to the provider, stored in a short-lived cookie,
//! and consumed when the provider redirects back with a code.
//!
//! # Example
//!
//! ```
//! use oidcgate_auth::pkce::AuthState;
//!
//! let stored = AuthState::generate();
//! // ... the provider echoes `state` back on the callback ...
//! assert!(stored.validate(&stored.state).is_ok());
//! assert!(stored.validate("forged").is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::discovery::ProviderMetadata;

/// Random bytes behind the `state` parameter.
const STATE_BYTES: usize = 16;

/// Random bytes behind the code verifier (86 characters once encoded).
const VERIFIER_BYTES: usize = 64;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PkceError {
    /// The `state` returned by the provider does not match the stored one.
    #[error("PKCE state mismatch: the authorization response does not belong to this login attempt")]
    StateMismatch,

    /// Unknown PKCE mode string.
    #[error("Invalid PKCE mode '{0}': expected auto, true or false")]
    InvalidMode(String),
}

// =============================================================================
// Auth State
// =============================================================================

/// Ephemeral PKCE triple for one authorization attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// Opaque anti-CSRF value echoed back by the provider.
    pub state: String,

    /// Secret sent to the token endpoint with the code.
    pub code_verifier: String,

    /// `BASE64URL(SHA256(code_verifier))`, sent on the authorization redirect.
    pub code_challenge: String,
}

impl AuthState {
    /// Generates a fresh state, verifier and derived challenge.
    #[must_use]
    pub fn generate() -> Self {
        let state = random_token(STATE_BYTES);
        let code_verifier = random_token(VERIFIER_BYTES);
        let code_challenge = challenge_for(&code_verifier);

        Self {
            state,
            code_verifier,
            code_challenge,
        }
    }

    /// Checks the `state` received on the callback against this stored state.
    ///
    /// # Errors
    ///
    /// Returns [`PkceError::StateMismatch`] unless the values are byte-for-byte
    /// equal.
    pub fn validate(&self, received_state: &str) -> Result<(), PkceError> {
        if self.state.as_bytes() == received_state.as_bytes() {
            Ok(())
        } else {
            Err(PkceError::StateMismatch)
        }
    }
}

/// Computes the S256 code challenge for a verifier.
#[must_use]
pub fn challenge_for(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// =============================================================================
// PKCE Policy
// =============================================================================

/// Configured PKCE mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PkceMode {
    /// Use PKCE iff the provider advertises a challenge method.
    #[default]
    Auto,
    /// Always use PKCE.
    Enabled,
    /// Never use PKCE; requires a client secret.
    Disabled,
}

impl FromStr for PkceMode {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "true" | "on" | "enabled" => Ok(Self::Enabled),
            "false" | "off" | "disabled" => Ok(Self::Disabled),
            other => Err(PkceError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for PkceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Enabled => write!(f, "true"),
            Self::Disabled => write!(f, "false"),
        }
    }
}

/// Decides whether PKCE is active for this provider.
#[must_use]
pub fn resolve_pkce(mode: PkceMode, metadata: &ProviderMetadata) -> bool {
    let enabled = match mode {
        PkceMode::Enabled => true,
        PkceMode::Disabled => false,
        PkceMode::Auto => metadata.supports_pkce(),
    };

    if enabled && !metadata.supports_s256() {
        tracing::warn!(
            mode = %mode,
            advertised = ?metadata.code_challenge_methods_supported,
            "PKCE is enabled but the provider does not advertise S256"
        );
    }

    tracing::info!(
        mode = %mode,
        advertised = ?metadata.code_challenge_methods_supported,
        enabled,
        "Resolved PKCE policy"
    );

    enabled
}
