//! Error types for the gate.
//!
//! [`StartupError`] aborts initialization; a half-configured gate never
//! serves traffic. [`AuthError`] is scoped to one request and rendered as an
//! HTTP response by the middleware (see `middleware::error`).

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::token::TokenError;

/// Errors raised while initializing the gate.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Invalid or incomplete configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The provider metadata could not be fetched or is invalid.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// A provider-dependent component could not be created.
    #[error("Failed to initialize {component}: {message}")]
    Component {
        /// Which component failed.
        component: &'static str,
        /// Underlying cause.
        message: String,
    },
}

/// Request-scoped authentication failures.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The callback lacks a required query parameter.
    #[error("Missing required parameter '{0}' in the authorization response")]
    MissingParameter(&'static str),

    /// PKCE is active but the callback arrived without a usable state cookie.
    #[error("Missing or invalid login state; please start the login again")]
    MissingStateCookie,

    /// The `state` parameter does not match the state cookie.
    #[error("Login state mismatch; please start the login again")]
    StateMismatch,

    /// The provider redirected back with an `error` parameter.
    #[error("Authentication denied: {error} ({description})")]
    ProviderDenied {
        /// The `error` parameter.
        error: String,
        /// The `error_description` parameter, possibly empty.
        description: String,
    },

    /// The token endpoint rejected the request.
    #[error("Token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint {
        /// Status returned by the provider.
        status: u16,
        /// Response body returned by the provider.
        body: String,
    },

    /// The token endpoint could not be reached or answered garbage.
    #[error("Token request failed: {0}")]
    TokenTransport(String),

    /// No identity could be extracted from the token response.
    #[error("Invalid identity token: {0}")]
    InvalidIdentity(String),

    /// The identity strategy produced an empty user id.
    #[error("Unable to extract the user id from the access token")]
    EmptyUserId,

    /// The session cookie could not be produced.
    #[error("Failed to issue session: {0}")]
    Session(String),
}

impl From<TokenError> for AuthError {
    fn from(error: TokenError) -> Self {
        match error {
            TokenError::Endpoint { status, body } => Self::TokenEndpoint { status, body },
            TokenError::Transport(message) | TokenError::InvalidResponse(message) => {
                Self::TokenTransport(message)
            }
        }
    }
}
