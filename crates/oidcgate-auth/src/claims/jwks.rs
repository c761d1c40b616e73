//! Provider JWKS fetching and caching.
//!
//! Holds the signing keys of the single configured provider. Keys are fetched
//! lazily on first use, cached for the TTL advertised by the provider's
//! `Cache-Control: max-age` (clamped to configured bounds), and re-fetched
//! when a token names an unknown `kid`, which covers key rotation.
//!
//! Transient fetch failures (network errors and 5xx responses) are retried a
//! bounded number of times with a linear backoff.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;
use url::Url;

/// Configuration for the provider JWKS cache.
#[derive(Debug, Clone)]
pub struct ProviderJwksCacheConfig {
    /// Default TTL when Cache-Control header is absent (default: 1 hour).
    pub default_ttl: Duration,

    /// Maximum TTL regardless of Cache-Control (default: 24 hours).
    pub max_ttl: Duration,

    /// Minimum TTL regardless of Cache-Control (default: 5 minutes).
    pub min_ttl: Duration,

    /// HTTP request timeout (default: 10 seconds).
    pub request_timeout: Duration,

    /// Maximum response size in bytes (default: 1 MB).
    pub max_response_size: usize,

    /// Fetch attempts before giving up (default: 3).
    pub max_attempts: u32,

    /// Delay added per failed attempt (default: 200 ms).
    pub retry_backoff: Duration,

    /// Whether to allow HTTP (non-HTTPS) JWKS URIs.
    pub allow_http: bool,
}

impl Default for ProviderJwksCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),   // 1 hour
            max_ttl: Duration::from_secs(86400),      // 24 hours
            min_ttl: Duration::from_secs(300),        // 5 minutes
            request_timeout: Duration::from_secs(10), // 10 seconds
            max_response_size: 1024 * 1024,           // 1 MB
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            allow_http: false,
        }
    }
}

impl ProviderJwksCacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TTL bounds.
    #[must_use]
    pub fn with_ttl_bounds(mut self, min: Duration, default: Duration, max: Duration) -> Self {
        self.min_ttl = min;
        self.default_ttl = default;
        self.max_ttl = max;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    /// Allows HTTP (non-HTTPS) JWKS URIs.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

/// Errors that can occur during JWKS operations.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// A network error occurred while fetching the JWKS.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The HTTP request returned a non-success status code.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The JWKS response could not be parsed as JSON.
    #[error("Failed to parse JWKS: {0}")]
    ParseError(String),

    /// The requested key was not found in the JWKS.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// No signing keys were found in the JWKS.
    #[error("No signing keys found in JWKS")]
    NoSigningKeys,

    /// The JWKS URI scheme is not allowed.
    #[error("Invalid URL scheme: only HTTPS is allowed")]
    InvalidScheme,

    /// The response exceeded the maximum allowed size.
    #[error("Response exceeds maximum size of {max_size} bytes")]
    ResponseTooLarge {
        /// The maximum allowed size.
        max_size: usize,
    },
}

impl JwksError {
    /// Returns `true` if a later attempt may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::HttpError(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// A decoding key paired with the algorithm its JWK declares, if any.
pub type SigningKey = (DecodingKey, Option<Algorithm>);

struct CachedJwks {
    jwks: JwkSet,
    expires_at: Instant,
}

/// Cache for the signing keys published at one JWKS URI.
pub struct ProviderJwksCache {
    jwks_uri: Url,
    http_client: reqwest::Client,
    cached: RwLock<Option<CachedJwks>>,
    config: ProviderJwksCacheConfig,
}

impl ProviderJwksCache {
    /// Creates a cache for `jwks_uri`. Nothing is fetched until first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI scheme is not allowed or the HTTP client
    /// cannot be created.
    pub fn new(jwks_uri: Url, config: ProviderJwksCacheConfig) -> Result<Self, JwksError> {
        validate_scheme(&jwks_uri, config.allow_http)?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| JwksError::NetworkError(e.to_string()))?;

        Ok(Self {
            jwks_uri,
            http_client,
            cached: RwLock::new(None),
            config,
        })
    }

    /// The JWKS endpoint this cache reads from.
    #[must_use]
    pub fn jwks_uri(&self) -> &Url {
        &self.jwks_uri
    }

    /// Gets a decoding key by key ID, re-fetching once on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWKS cannot be fetched or has no usable key
    /// with this `kid`.
    pub async fn get_key(&self, kid: &str) -> Result<SigningKey, JwksError> {
        self.ensure_cached().await?;
        if let Some(key) = self.cached_key(kid).await {
            tracing::trace!("Cache hit for JWKS key: {} from {}", kid, self.jwks_uri);
            return Ok(key);
        }

        tracing::debug!("Unknown JWKS key {} from {}, re-fetching", kid, self.jwks_uri);
        self.refresh().await?;

        self.cached_key(kid)
            .await
            .ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))
    }

    async fn cached_key(&self, kid: &str) -> Option<SigningKey> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|c| Instant::now() < c.expires_at)?
            .jwks
            .keys
            .iter()
            .filter(|k| is_signing_key(k))
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .and_then(to_signing_key)
    }

    /// Gets all signing keys, for tokens without a `kid` header.
    ///
    /// Keys with `use: "enc"` are excluded.
    ///
    /// # Errors
    ///
    /// Returns an error if the JWKS cannot be fetched or holds no signing key.
    pub async fn find_signing_keys(&self) -> Result<Vec<SigningKey>, JwksError> {
        self.ensure_cached().await?;

        let cached = self.cached.read().await;
        let keys: Vec<_> = cached
            .as_ref()
            .map(|c| {
                c.jwks
                    .keys
                    .iter()
                    .filter(|k| is_signing_key(k))
                    .filter_map(to_signing_key)
                    .collect()
            })
            .unwrap_or_default();

        if keys.is_empty() {
            Err(JwksError::NoSigningKeys)
        } else {
            tracing::debug!("Found {} signing keys from {}", keys.len(), self.jwks_uri);
            Ok(keys)
        }
    }

    async fn ensure_cached(&self) -> Result<(), JwksError> {
        {
            let cached = self.cached.read().await;
            if cached.as_ref().is_some_and(|c| Instant::now() < c.expires_at) {
                return Ok(());
            }
        }
        self.refresh().await
    }

    /// Fetches the JWKS, retrying transient failures, and replaces the cache.
    ///
    /// # Errors
    ///
    /// Returns the last error once all attempts are exhausted, or the first
    /// non-transient error.
    pub async fn refresh(&self) -> Result<(), JwksError> {
        let mut attempt = 1;
        loop {
            match self.fetch().await {
                Ok((jwks, ttl)) => {
                    tracing::debug!(
                        "Cached JWKS from {} with {} keys, TTL {:?}",
                        self.jwks_uri,
                        jwks.keys.len(),
                        ttl
                    );
                    *self.cached.write().await = Some(CachedJwks {
                        jwks,
                        expires_at: Instant::now() + ttl,
                    });
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    tracing::warn!(
                        "JWKS fetch attempt {}/{} from {} failed: {}",
                        attempt,
                        self.config.max_attempts,
                        self.jwks_uri,
                        e
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch(&self) -> Result<(JwkSet, Duration), JwksError> {
        let response = self
            .http_client
            .get(self.jwks_uri.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| JwksError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::HttpError(response.status().as_u16()));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.config.max_response_size
        {
            return Err(JwksError::ResponseTooLarge {
                max_size: self.config.max_response_size,
            });
        }

        let ttl = self.parse_cache_control(response.headers());

        let jwks: JwkSet = response.json().await.map_err(|e| {
            tracing::warn!("Failed to parse JWKS from {}: {}", self.jwks_uri, e);
            JwksError::ParseError(e.to_string())
        })?;

        Ok((jwks, ttl))
    }

    /// Extracts `max-age` and clamps it between `min_ttl` and `max_ttl`.
    fn parse_cache_control(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',').find_map(|directive| {
                    directive
                        .trim()
                        .strip_prefix("max-age=")
                        .and_then(|s| s.parse::<u64>().ok())
                })
            })
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.min(self.config.max_ttl).max(self.config.min_ttl)
    }
}

fn validate_scheme(uri: &Url, allow_http: bool) -> Result<(), JwksError> {
    match uri.scheme() {
        "https" => Ok(()),
        "http" if allow_http => Ok(()),
        _ => Err(JwksError::InvalidScheme),
    }
}

fn is_signing_key(jwk: &Jwk) -> bool {
    !matches!(&jwk.common.public_key_use, Some(PublicKeyUse::Encryption))
}

fn to_signing_key(jwk: &Jwk) -> Option<SigningKey> {
    DecodingKey::from_jwk(jwk)
        .ok()
        .map(|dk| (dk, jwk_algorithm(jwk)))
}

fn jwk_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    jwk.common.key_algorithm.as_ref().and_then(|alg| match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    })
}
