//! Identity claims resolution.
//!
//! Turns the tokens returned by the provider into an [`Identity`], with one of
//! two interchangeable strategies:
//!
//! - [`ClaimsResolver::Local`] reads the JWT payload without checking the
//!   signature. The token was just received from the provider's token
//!   endpoint over TLS, so this is the lightweight default.
//! - [`ClaimsResolver::Verified`] runs full JWT validation against the
//!   provider's published keys: accepted `typ`, signing algorithm advertised
//!   by the provider, signature, issuer, and presence of `sub`, `iat`, `exp`
//!   and `jti`.
//!
//! Opaque (non-JWT) access tokens are common with some providers. When the
//! access token cannot be parsed and the token response carries an
//! `id_token`, the id token is used instead.

pub mod jwks;

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use self::jwks::{JwksError, ProviderJwksCache, ProviderJwksCacheConfig};
use crate::discovery::ProviderMetadata;
use crate::token::RawToken;

/// `typ` header values accepted by verified decoding. A missing `typ` is
/// accepted as well.
const ACCEPTED_TOKEN_TYPES: &[&str] = &["JWT", "at+jwt", "application/at+jwt"];

/// Claims that must be present in a verified token.
const REQUIRED_CLAIMS: &[&str] = &["sub", "iat", "exp", "jti"];

/// Clock skew tolerated on `exp`/`nbf`, in seconds.
const LEEWAY_SECS: u64 = 60;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while resolving an identity from a token.
#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    /// The token is not a well-formed JWT.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The `typ` header is not an accepted token type.
    #[error("Token type '{0}' is not accepted")]
    UnacceptedType(String),

    /// The signing algorithm is not one the provider advertises.
    #[error("Signing algorithm {0} is not supported by the provider")]
    UnsupportedAlgorithm(String),

    /// No published key verifies the signature.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// The `iss` claim does not match the configured issuer.
    #[error("Token issuer does not match {expected}")]
    IssuerMismatch {
        /// The expected issuer.
        expected: String,
    },

    /// A required claim is absent.
    #[error("Missing required claim: {0}")]
    MissingClaim(String),

    /// The token failed a time-based or other claim check.
    #[error("Token rejected: {0}")]
    Rejected(String),

    /// The provider's keys could not be obtained.
    #[error("JWKS error: {0}")]
    Jwks(#[from] JwksError),

    /// Verified decoding was requested but the provider publishes no JWKS.
    #[error("Provider metadata does not include a jwks_uri")]
    MissingJwksUri,
}

impl ClaimsError {
    /// Returns `true` if the token itself could not be parsed.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

// =============================================================================
// Identity
// =============================================================================

/// Identity attributes extracted from a token.
///
/// Every field defaults independently: a missing or mistyped claim leaves
/// that field empty rather than failing the whole extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Subject identifier.
    #[serde(default)]
    pub sub: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Email address.
    #[serde(default)]
    pub email: String,

    /// Group memberships.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Role memberships.
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Identity {
    /// Builds an identity from a JWT claims object.
    #[must_use]
    pub fn from_claims(claims: &Value) -> Self {
        let roles = match claims.get("roles") {
            Some(value) => string_list(value),
            None => claims
                .pointer("/realm_access/roles")
                .map(string_list)
                .unwrap_or_default(),
        };

        Self {
            sub: string_claim(claims, "sub"),
            name: string_claim(claims, "name"),
            email: string_claim(claims, "email"),
            groups: claims.get("groups").map(string_list).unwrap_or_default(),
            roles,
        }
    }

    /// Union of groups and roles, in first-seen order without duplicates.
    #[must_use]
    pub fn groups_and_roles(&self) -> Vec<String> {
        let mut merged: Vec<String> = Vec::with_capacity(self.groups.len() + self.roles.len());
        for entry in self.groups.iter().chain(&self.roles) {
            if !merged.contains(entry) {
                merged.push(entry.clone());
            }
        }
        merged
    }
}

fn string_claim(claims: &Value, name: &str) -> String {
    claims
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(single) => vec![single.clone()],
        _ => Vec::new(),
    }
}

/// Reads a JWT payload without verifying its signature.
///
/// # Errors
///
/// Returns [`ClaimsError::Malformed`] if the token does not have three
/// segments or the payload is not a base64url encoded JSON object.
pub fn decode_unverified(token: &str) -> Result<Value, ClaimsError> {
    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(ClaimsError::Malformed("expected three segments".to_string()));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ClaimsError::Malformed(format!("payload is not base64url: {e}")))?;

    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ClaimsError::Malformed(format!("payload is not JSON: {e}")))?;

    if claims.is_object() {
        Ok(claims)
    } else {
        Err(ClaimsError::Malformed("payload is not a JSON object".to_string()))
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Configured claims strategy name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimsMode {
    /// Decode without signature verification.
    #[default]
    Local,
    /// Verify against the provider's JWKS.
    Verified,
}

impl FromStr for ClaimsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Self::Local),
            "verified" | "jwks" => Ok(Self::Verified),
            other => Err(format!("unknown claims strategy '{other}', expected local or verified")),
        }
    }
}

impl fmt::Display for ClaimsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Verified => f.write_str("verified"),
        }
    }
}

/// Strategy used to extract an [`Identity`] from a token response.
pub enum ClaimsResolver {
    /// Decode the payload without signature verification.
    Local,
    /// Full JWT validation against the provider's keys.
    Verified(JwtVerifier),
}

impl ClaimsResolver {
    /// Builds a verifying resolver from provider metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider publishes no JWKS URI or the JWKS
    /// cache cannot be created.
    pub fn verified(
        metadata: &ProviderMetadata,
        config: ProviderJwksCacheConfig,
    ) -> Result<Self, ClaimsError> {
        let jwks_uri = metadata
            .jwks_uri
            .clone()
            .ok_or(ClaimsError::MissingJwksUri)?;
        Ok(Self::Verified(JwtVerifier::new(metadata, jwks_uri, config)?))
    }

    /// Resolves the identity carried by a token response.
    ///
    /// # Errors
    ///
    /// Returns a [`ClaimsError`] if neither the access token nor the id token
    /// yields an identity.
    pub async fn resolve(&self, token: &RawToken) -> Result<Identity, ClaimsError> {
        match self.resolve_token(&token.access_token).await {
            Err(e) if e.is_malformed() => match token.id_token.as_deref() {
                Some(id_token) => {
                    tracing::debug!("Access token is not a JWT, using the id token");
                    self.resolve_token(id_token).await
                }
                None => Err(e),
            },
            result => result,
        }
    }

    async fn resolve_token(&self, token: &str) -> Result<Identity, ClaimsError> {
        match self {
            Self::Local => decode_unverified(token).map(|claims| Identity::from_claims(&claims)),
            Self::Verified(verifier) => verifier.verify(token).await,
        }
    }
}

/// Validates JWTs against the provider's published keys.
pub struct JwtVerifier {
    issuer: String,
    algorithms: Vec<Algorithm>,
    jwks: ProviderJwksCache,
}

impl JwtVerifier {
    fn new(
        metadata: &ProviderMetadata,
        jwks_uri: Url,
        config: ProviderJwksCacheConfig,
    ) -> Result<Self, ClaimsError> {
        let algorithms = metadata
            .id_token_signing_alg_values_supported
            .iter()
            .filter_map(|alg| alg.parse::<Algorithm>().ok())
            .collect();

        Ok(Self {
            issuer: metadata.issuer.clone(),
            algorithms,
            jwks: ProviderJwksCache::new(jwks_uri, config)?,
        })
    }

    /// Verifies a token and extracts its identity.
    ///
    /// # Errors
    ///
    /// Returns the first check that fails.
    pub async fn verify(&self, token: &str) -> Result<Identity, ClaimsError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| ClaimsError::Malformed(e.to_string()))?;

        if let Some(typ) = header.typ.as_deref()
            && !ACCEPTED_TOKEN_TYPES
                .iter()
                .any(|accepted| accepted.eq_ignore_ascii_case(typ))
        {
            return Err(ClaimsError::UnacceptedType(typ.to_string()));
        }

        if !self.algorithms.contains(&header.alg) {
            return Err(ClaimsError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let keys = match header.kid.as_deref() {
            Some(kid) => vec![self.jwks.get_key(kid).await?],
            None => self.jwks.find_signing_keys().await?,
        };

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.validate_aud = false;
        validation.leeway = LEEWAY_SECS;

        let mut last_error = ClaimsError::InvalidSignature;
        for (key, key_alg) in keys {
            if key_alg.is_some_and(|alg| alg != header.alg) {
                continue;
            }
            match jsonwebtoken::decode::<Value>(token, &key, &validation) {
                Ok(data) => {
                    if let Some(missing) = REQUIRED_CLAIMS
                        .iter()
                        .find(|claim| data.claims.get(**claim).is_none_or(Value::is_null))
                    {
                        return Err(ClaimsError::MissingClaim((*missing).to_string()));
                    }
                    return Ok(Identity::from_claims(&data.claims));
                }
                Err(e) => {
                    last_error = match e.kind() {
                        ErrorKind::InvalidSignature => ClaimsError::InvalidSignature,
                        ErrorKind::InvalidIssuer => {
                            return Err(ClaimsError::IssuerMismatch {
                                expected: self.issuer.clone(),
                            });
                        }
                        ErrorKind::MissingRequiredClaim(claim) => {
                            return Err(ClaimsError::MissingClaim(claim.clone()));
                        }
                        _ => return Err(ClaimsError::Rejected(e.to_string())),
                    };
                }
            }
        }

        Err(last_error)
    }
}
