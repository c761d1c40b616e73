//! OpenID Connect provider discovery.
//!
//! Fetches the provider's published capabilities from
//! `{issuer}/.well-known/openid-configuration` once at startup. A failure here
//! is fatal: the gate refuses to start rather than serve traffic with an
//! unknown provider.
//!
//! # Example
//!
//! ```ignore
//! use oidcgate_auth::discovery::{DiscoveryConfig, OidcDiscoveryClient};
//! use url::Url;
//!
//! let client = OidcDiscoveryClient::new(DiscoveryConfig::default())?;
//! let issuer = Url::parse("https://auth.example.com/realms/main")?;
//! let metadata = client.discover(&issuer).await?;
//! println!("Token endpoint: {}", metadata.token_endpoint);
//! ```
//!
//! # References
//!
//! - [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration for the discovery client.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// HTTP request and connect timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Whether to allow HTTP (non-HTTPS) issuer URLs.
    /// This should only be enabled for testing and local providers.
    pub allow_http: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl DiscoveryConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Allows HTTP (non-HTTPS) issuer URLs.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Errors that can occur during OIDC discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A network error occurred while fetching the discovery document.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The discovery document could not be parsed as JSON.
    #[error("Failed to parse discovery document: {0}")]
    ParseError(String),

    /// The issuer URL could not be parsed or is invalid.
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// The issuer in the discovery document does not match the expected issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// The configured issuer URL.
        expected: String,
        /// The issuer URL from the discovery document.
        actual: String,
    },

    /// The issuer URL scheme is not allowed.
    #[error("Invalid URL scheme: {0} (only HTTPS is allowed)")]
    InvalidScheme(String),

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

/// The subset of provider metadata the gate relies on.
///
/// Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier the provider asserts.
    pub issuer: String,

    /// Authorization endpoint the browser is redirected to.
    pub authorization_endpoint: Url,

    /// Token endpoint for code exchange and refresh.
    pub token_endpoint: Url,

    /// UserInfo endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<Url>,

    /// JSON Web Key Set document, required for verified claims decoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<Url>,

    /// Scopes the provider supports. `None` when not advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// PKCE challenge methods, empty when the provider does not offer PKCE.
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,

    /// JWS algorithms the provider signs tokens with.
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

impl ProviderMetadata {
    /// Returns `true` if the provider advertises any PKCE challenge method.
    #[must_use]
    pub fn supports_pkce(&self) -> bool {
        !self.code_challenge_methods_supported.is_empty()
    }

    /// Returns `true` if the provider advertises the `S256` challenge method.
    #[must_use]
    pub fn supports_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .iter()
            .any(|m| m.eq_ignore_ascii_case("S256"))
    }

    /// Returns the requested scopes the provider does not support, in request
    /// order. `None` if the provider does not advertise its scopes.
    #[must_use]
    pub fn unsupported_scopes(&self, requested: &[String]) -> Option<Vec<String>> {
        let supported: HashSet<&str> = self
            .scopes_supported
            .as_ref()?
            .iter()
            .map(String::as_str)
            .collect();

        Some(
            requested
                .iter()
                .filter(|scope| !supported.contains(scope.as_str()))
                .cloned()
                .collect(),
        )
    }

    /// Returns `true` if `alg` is listed among the provider's signing algorithms.
    #[must_use]
    pub fn supports_signing_alg(&self, alg: &str) -> bool {
        self.id_token_signing_alg_values_supported
            .iter()
            .any(|a| a == alg)
    }
}

/// Client for fetching OIDC discovery documents.
pub struct OidcDiscoveryClient {
    http_client: reqwest::Client,
    config: DiscoveryConfig,
}

impl OidcDiscoveryClient {
    /// Creates a new discovery client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| DiscoveryError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Discovers the provider metadata for an issuer.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The issuer URL is not HTTPS (unless `allow_http` is set)
    /// - The discovery document cannot be fetched or parsed
    /// - The issuer in the document does not match the configured issuer
    pub async fn discover(&self, issuer: &Url) -> Result<ProviderMetadata, DiscoveryError> {
        self.validate_issuer_scheme(issuer)?;

        let discovery_url = build_discovery_url(issuer);
        tracing::info!("Fetching OIDC provider metadata from {}", discovery_url);

        let response = self
            .http_client
            .get(discovery_url.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to fetch OIDC discovery from {}: {}", issuer, e);
                DiscoveryError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(DiscoveryError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let metadata: ProviderMetadata = response.json().await.map_err(|e| {
            tracing::warn!(
                "Failed to parse OIDC discovery document from {}: {}",
                issuer,
                e
            );
            DiscoveryError::ParseError(e.to_string())
        })?;

        validate_issuer(&metadata, issuer)?;

        tracing::info!(
            issuer = %metadata.issuer,
            authorization_endpoint = %metadata.authorization_endpoint,
            token_endpoint = %metadata.token_endpoint,
            jwks_uri = ?metadata.jwks_uri.as_ref().map(Url::as_str),
            pkce_methods = ?metadata.code_challenge_methods_supported,
            "Discovered OIDC provider"
        );

        Ok(metadata)
    }

    fn validate_issuer_scheme(&self, issuer: &Url) -> Result<(), DiscoveryError> {
        match issuer.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            other => Err(DiscoveryError::InvalidScheme(other.to_string())),
        }
    }
}

/// Builds `{issuer}/.well-known/openid-configuration`, keeping any issuer path.
fn build_discovery_url(issuer: &Url) -> Url {
    let mut discovery_url = issuer.clone();
    let path = issuer.path().trim_end_matches('/');
    discovery_url.set_path(&format!("{}/.well-known/openid-configuration", path));
    discovery_url.set_query(None);
    discovery_url
}

/// Compares issuers ignoring a trailing slash.
fn validate_issuer(metadata: &ProviderMetadata, expected: &Url) -> Result<(), DiscoveryError> {
    let document_issuer = Url::parse(&metadata.issuer).map_err(|e| {
        DiscoveryError::InvalidIssuer(format!(
            "Invalid issuer URL in document: {} - {}",
            metadata.issuer, e
        ))
    })?;

    let expected_normalized = expected.as_str().trim_end_matches('/');
    let document_normalized = document_issuer.as_str().trim_end_matches('/');

    if expected_normalized != document_normalized {
        return Err(DiscoveryError::IssuerMismatch {
            expected: expected_normalized.to_string(),
            actual: document_normalized.to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata_json(issuer: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/protocol/openid-connect/auth"),
            "token_endpoint": format!("{issuer}/protocol/openid-connect/token"),
            "userinfo_endpoint": format!("{issuer}/protocol/openid-connect/userinfo"),
            "jwks_uri": format!("{issuer}/protocol/openid-connect/certs"),
            "scopes_supported": ["openid", "email", "groups", "profile", "offline_access"],
            "code_challenge_methods_supported": ["plain", "S256"],
            "id_token_signing_alg_values_supported": ["RS256", "HS256"],
            "response_types_supported": ["code"]
        })
    }

    fn client() -> OidcDiscoveryClient {
        OidcDiscoveryClient::new(DiscoveryConfig::default().with_allow_http(true)).unwrap()
    }

    #[test]
    fn test_build_discovery_url() {
        let issuer = Url::parse("https://auth.example.com").unwrap();
        assert_eq!(
            build_discovery_url(&issuer).as_str(),
            "https://auth.example.com/.well-known/openid-configuration"
        );

        let issuer = Url::parse("https://auth.example.com/realms/main/").unwrap();
        assert_eq!(
            build_discovery_url(&issuer).as_str(),
            "https://auth.example.com/realms/main/.well-known/openid-configuration"
        );
    }

    #[test]
    fn test_unsupported_scopes() {
        let metadata: ProviderMetadata =
            serde_json::from_value(metadata_json("https://auth.example.com")).unwrap();

        let requested: Vec<String> = ["openid", "profile", "email", "groups", "offline_access"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(metadata.unsupported_scopes(&requested), Some(vec![]));

        let requested: Vec<String> = ["openid", "roles", "email"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            metadata.unsupported_scopes(&requested),
            Some(vec!["roles".to_string()])
        );
    }

    #[test]
    fn test_minimal_document_defaults() {
        let metadata: ProviderMetadata = serde_json::from_value(serde_json::json!({
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token"
        }))
        .unwrap();

        assert!(!metadata.supports_pkce());
        assert!(metadata.scopes_supported.is_none());
        assert!(metadata.unsupported_scopes(&["openid".to_string()]).is_none());
        assert!(metadata.jwks_uri.is_none());
    }

    #[tokio::test]
    async fn test_discover() {
        let server = MockServer::start().await;
        let issuer = format!("{}/realms/main", server.uri());

        Mock::given(method("GET"))
            .and(path("/realms/main/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata_json(&issuer)))
            .expect(1)
            .mount(&server)
            .await;

        let metadata = client()
            .discover(&Url::parse(&issuer).unwrap())
            .await
            .unwrap();

        assert_eq!(metadata.issuer, issuer);
        assert!(metadata.supports_pkce());
        assert!(metadata.supports_s256());
        assert!(metadata.supports_signing_alg("RS256"));
        assert!(!metadata.supports_signing_alg("none"));
    }

    #[tokio::test]
    async fn test_discover_issuer_mismatch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(metadata_json("https://other.example.com")),
            )
            .mount(&server)
            .await;

        let err = client()
            .discover(&Url::parse(&server.uri()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::IssuerMismatch { .. }));
    }

    #[tokio::test]
    async fn test_discover_http_error_and_malformed_json() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/missing/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let missing = Url::parse(&format!("{}/missing", server.uri())).unwrap();
        assert!(matches!(
            client().discover(&missing).await,
            Err(DiscoveryError::HttpError(404))
        ));

        let broken = Url::parse(&format!("{}/broken", server.uri())).unwrap();
        assert!(matches!(
            client().discover(&broken).await,
            Err(DiscoveryError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_discover_rejects_http_by_default() {
        let client = OidcDiscoveryClient::new(DiscoveryConfig::default()).unwrap();
        let err = client
            .discover(&Url::parse("http://auth.example.com").unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid URL scheme: http (only HTTPS is allowed)"
        );
    }
}
