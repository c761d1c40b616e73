//! Client-held session state.
//!
//! There is no server-side session store. The session lives in the browser as
//! an encrypted, compressed cookie, and the short-lived PKCE state for a login
//! attempt lives in a second encrypted cookie.
//!
//! - [`cipher`] - AES-256-GCM framing shared by both cookies
//! - [`codec`] - [`PersistedSession`] and [`AuthState`](crate::pkce::AuthState)
//!   encoding
//! - [`cookie`] - `Set-Cookie` construction with the configured attributes

pub mod cipher;
pub mod codec;
pub mod cookie;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::claims::Identity;
use crate::identity::IdentityStrategy;
use crate::token::RawToken;

pub use self::cipher::{CipherError, CookieCipher};
pub use self::codec::SessionCodec;
pub use self::cookie::CookieSettings;

/// What the session cookie carries between requests.
///
/// The raw access token is deliberately not part of it: only the identity
/// extracted from it, plus what is needed to refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Strategy used to derive the user id from `identity`.
    #[serde(default)]
    pub identity_provider: IdentityStrategy,

    /// Identity snapshot taken when the session was issued.
    pub identity: Identity,

    /// Refresh token, if the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Lifetime of the underlying access token in seconds.
    pub expires_in: u64,

    /// Absolute expiry, `issued_at + expires_in`.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl PersistedSession {
    /// Builds a session from a token response at time `now`.
    #[must_use]
    pub fn issue(
        token: &RawToken,
        identity: Identity,
        strategy: IdentityStrategy,
        now: OffsetDateTime,
    ) -> Self {
        let lifetime = time::Duration::seconds(i64::try_from(token.expires_in).unwrap_or(i64::MAX));
        let expires_at = now
            .checked_add(lifetime)
            .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc());

        Self {
            identity_provider: strategy,
            identity,
            refresh_token: token.refresh_token.clone().filter(|t| !t.is_empty()),
            expires_in: token.expires_in,
            expires_at,
        }
    }

    /// Returns `true` once `now` has reached `expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` if the session is expired now.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Returns `true` if the session can be refreshed.
    #[must_use]
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// The user id according to the session's own extraction strategy.
    #[must_use]
    pub fn user_id(&self) -> String {
        self.identity_provider.extract_id(&self.identity)
    }
}
