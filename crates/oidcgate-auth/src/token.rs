//! Token endpoint client.
//!
//! Performs the two grants the gate needs against the provider's token
//! endpoint: the authorization code exchange after login and the refresh
//! grant when a session expires. Both are form-encoded POSTs with a bounded
//! timeout. A non-200 answer is returned as [`TokenError::Endpoint`] with the
//! provider's status and body; nothing is retried here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Default request and connect timeout for token endpoint calls.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 300;

/// Errors returned by the token endpoint client.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The provider answered with a non-200 status.
    #[error("Token endpoint returned HTTP {status}: {body}")]
    Endpoint {
        /// HTTP status returned by the provider.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The request did not complete (connect failure, timeout, ...).
    #[error("Token endpoint request failed: {0}")]
    Transport(String),

    /// The provider answered 200 with a body that is not a token response.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),
}

/// Token response returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawToken {
    /// The access token.
    pub access_token: String,

    /// Refresh token, if the provider issued one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Lifetime of the access token in seconds.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,

    /// Token type, usually `Bearer`.
    #[serde(default)]
    pub token_type: String,

    /// OpenID Connect id token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Granted scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

/// Client for the provider's token endpoint.
#[derive(Clone)]
pub struct TokenClient {
    http_client: reqwest::Client,
    token_endpoint: Url,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: String,
}

impl TokenClient {
    /// Creates a token client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        token_endpoint: Url,
        client_id: impl Into<String>,
        client_secret: Option<String>,
        redirect_uri: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TokenError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            token_endpoint,
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
        })
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// `code_verifier` is sent only when PKCE is active.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-200 status, or an
    /// unparseable body.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<RawToken, TokenError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code", code),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        tracing::debug!(
            pkce = code_verifier.is_some(),
            "Exchanging authorization code with token endpoint: {}",
            self.token_endpoint
        );
        self.post(&params).await
    }

    /// Obtains fresh tokens with a refresh token.
    ///
    /// # Errors
    ///
    /// Same as [`TokenClient::exchange_code`].
    pub async fn refresh(&self, refresh_token: &str) -> Result<RawToken, TokenError> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = self.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        tracing::debug!("Refreshing tokens at {}", self.token_endpoint);
        self.post(&params).await
    }

    async fn post(&self, params: &[(&str, &str)]) -> Result<RawToken, TokenError> {
        let response = self
            .http_client
            .post(self.token_endpoint.as_str())
            .header("Accept", "application/json")
            .form(params)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Endpoint {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<RawToken>()
            .await
            .map_err(|e| TokenError::InvalidResponse(e.to_string()))
    }
}
