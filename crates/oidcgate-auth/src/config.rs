//! Gate configuration.
//!
//! [`AuthSettings`] is the raw, deserializable form read from the server
//! configuration, where every field is optional. [`ClientConfig::new`] is the
//! single validating constructor that turns settings plus the discovered
//! [`ProviderMetadata`] into the immutable configuration the gate runs with.
//!
//! # Example (TOML)
//!
//! ```toml
//! [auth]
//! issuer_uri = "https://keycloak.example.com/realms/main"
//! client_id = "dashboard"
//! redirect_uri = "https://dashboard.example.com/"
//! scope = "openid+profile+email+groups+offline_access"
//! use_pkce = "auto"
//! user_id = "email"
//! ```

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::claims::ClaimsMode;
use crate::discovery::ProviderMetadata;
use crate::identity::IdentityStrategy;
use crate::pkce::{PkceMode, resolve_pkce};
use crate::session::{CookieCipher, CookieSettings};

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "OIDCGATE_SESSION";

/// Default session lifetime in minutes (12 hours).
pub const DEFAULT_COOKIE_MAX_AGE_MINUTES: i64 = 720;

/// Static assets served without authentication by default.
pub const DEFAULT_BYPASS_PATTERNS: &[&str] = &[r".*/.*\.css", r".*/.*\.js", r".*/.*\.png", r".*/.*\.ico"];

// =============================================================================
// Errors
// =============================================================================

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required parameter has no value.
    #[error("Missing required parameter '{parameter}'")]
    Missing {
        /// The parameter name.
        parameter: &'static str,
    },

    /// A parameter has a malformed value.
    #[error("Invalid value for '{parameter}': {message}")]
    Invalid {
        /// The parameter name.
        parameter: &'static str,
        /// What is wrong with the value.
        message: String,
    },

    /// The provider does not support some of the requested scopes.
    #[error("Unsupported scopes: {} (provider supports: {})", .unsupported.join(", "), .supported.join(", "))]
    UnsupportedScopes {
        /// Requested scopes the provider does not support.
        unsupported: Vec<String>,
        /// Scopes the provider advertises.
        supported: Vec<String>,
    },

    /// PKCE is off and the client has no secret to authenticate with.
    #[error("PKCE is disabled and no 'client_secret' is configured; a public client requires PKCE")]
    ClientSecretRequired,

    /// The cookie is marked secure although the redirect URI is not HTTPS.
    #[error("'cookie_is_secure' must be false when 'redirect_uri' is not https ({redirect_uri})")]
    InsecureCookie {
        /// The offending redirect URI.
        redirect_uri: String,
    },

    /// No identity strategy exists under this name.
    #[error("Unknown identity strategy '{name}' for 'user_id' (expected one of: {expected})")]
    UnknownIdentityStrategy {
        /// The configured name.
        name: String,
        /// Accepted names.
        expected: String,
    },
}

impl ConfigError {
    fn invalid(parameter: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            parameter,
            message: message.into(),
        }
    }
}

// =============================================================================
// Raw Settings
// =============================================================================

/// Raw gate settings, as read from configuration sources.
///
/// Every parameter can also come from an environment variable fallback; see
/// [`AuthSettings::apply_env_fallbacks`].
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Provider issuer URI.
    pub issuer_uri: Option<String>,
    /// OAuth client id.
    pub client_id: Option<String>,
    /// OAuth client secret; absent for public clients.
    pub client_secret: Option<String>,
    /// Callback URI registered with the provider.
    pub redirect_uri: Option<String>,
    /// Requested scopes, separated by `+` or whitespace.
    pub scope: Option<String>,
    /// Session cookie name.
    pub cookie_name: Option<String>,
    /// `Secure` attribute of the cookies.
    pub cookie_is_secure: Option<bool>,
    /// Session cookie lifetime in minutes.
    pub cookie_max_age_minutes: Option<i64>,
    /// PKCE mode: `auto`, `true` or `false`.
    pub use_pkce: Option<String>,
    /// Cookie encryption key.
    pub cookie_cipher_secret_key: Option<String>,
    /// Identity strategy name: `email`, `sub` or `google`.
    pub user_id: Option<String>,
    /// Claims strategy: `local` or `verified`.
    pub claims_strategy: Option<String>,
    /// Full-match regexes of paths that bypass authentication.
    pub bypass_patterns: Option<Vec<String>>,
    /// Allow `http` issuer, discovery and JWKS URLs (local providers only).
    pub allow_insecure_issuer: bool,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("AuthSettings")
            .field("issuer_uri", &self.issuer_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field("cookie_name", &self.cookie_name)
            .field("cookie_is_secure", &self.cookie_is_secure)
            .field("cookie_max_age_minutes", &self.cookie_max_age_minutes)
            .field("use_pkce", &self.use_pkce)
            .field("cookie_cipher_secret_key", &redact(&self.cookie_cipher_secret_key))
            .field("user_id", &self.user_id)
            .field("claims_strategy", &self.claims_strategy)
            .field("bypass_patterns", &self.bypass_patterns)
            .field("allow_insecure_issuer", &self.allow_insecure_issuer)
            .finish()
    }
}

impl AuthSettings {
    /// Fills unset parameters from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a fallback variable holds an unparseable value.
    pub fn apply_env_fallbacks(&mut self) -> Result<(), ConfigError> {
        self.apply_fallbacks_from(|name| std::env::var(name).ok())
    }

    /// Fills unset parameters from `lookup`, which maps a variable name to
    /// its value.
    ///
    /// # Errors
    ///
    /// Returns an error if a fallback value is unparseable.
    pub fn apply_fallbacks_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        fill(&mut self.issuer_uri, || lookup("AUTH_ISSUER_URI"));
        fill(&mut self.client_id, || lookup("AUTH_CLIENT_ID"));
        fill(&mut self.client_secret, || lookup("AUTH_CLIENT_SECRET"));
        fill(&mut self.redirect_uri, || lookup("AUTH_REDIRECT_URI"));
        fill(&mut self.scope, || lookup("AUTH_SCOPE"));
        fill(&mut self.cookie_name, || lookup("AUTH_COOKIE_NAME"));
        fill(&mut self.use_pkce, || lookup("AUTH_USE_PKCE"));
        fill(&mut self.cookie_cipher_secret_key, || lookup("AUTH_COOKIE_ENCRYPTION_KEY"));
        fill(&mut self.user_id, || lookup("AUTH_USER_ID"));
        fill(&mut self.claims_strategy, || lookup("AUTH_CLAIMS_STRATEGY"));

        if self.cookie_is_secure.is_none()
            && let Some(value) = lookup("AUTH_COOKIE_IS_SECURE")
        {
            self.cookie_is_secure = Some(parse_bool(&value).ok_or_else(|| {
                ConfigError::invalid("cookie_is_secure", format!("'{value}' is not a boolean"))
            })?);
        }

        if self.cookie_max_age_minutes.is_none()
            && let Some(value) = lookup("AUTH_COOKIE_MAX_AGE_MINUTES")
        {
            self.cookie_max_age_minutes = Some(value.trim().parse().map_err(|_| {
                ConfigError::invalid("cookie_max_age_minutes", format!("'{value}' is not a number"))
            })?);
        }

        Ok(())
    }

    /// Checks everything that can be checked without the provider metadata.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve_static().map(|_| ())
    }

    /// The issuer URI, for discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if it is missing or not a URL.
    pub fn issuer(&self) -> Result<Url, ConfigError> {
        parse_url("issuer_uri", required("issuer_uri", &self.issuer_uri)?)
    }

    fn resolve_static(&self) -> Result<StaticConfig, ConfigError> {
        let issuer_uri = self.issuer()?;
        let client_id = required("client_id", &self.client_id)?.to_string();
        let redirect_uri = parse_url("redirect_uri", required("redirect_uri", &self.redirect_uri)?)?;
        let scope = required("scope", &self.scope)?;
        let secret = required("cookie_cipher_secret_key", &self.cookie_cipher_secret_key)?;

        let scopes = split_scopes(scope);
        if scopes.is_empty() {
            return Err(ConfigError::invalid("scope", "no scopes given"));
        }

        let cookie_is_secure = self.cookie_is_secure.unwrap_or(true);
        if cookie_is_secure && redirect_uri.scheme() != "https" {
            return Err(ConfigError::InsecureCookie {
                redirect_uri: redirect_uri.to_string(),
            });
        }

        let max_age_minutes = self
            .cookie_max_age_minutes
            .unwrap_or(DEFAULT_COOKIE_MAX_AGE_MINUTES);
        if max_age_minutes <= 0 {
            return Err(ConfigError::invalid(
                "cookie_max_age_minutes",
                "must be a positive number of minutes",
            ));
        }

        let cookie_name = self
            .cookie_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_COOKIE_NAME)
            .to_string();
        if !cookie_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConfigError::invalid(
                "cookie_name",
                "only ASCII letters, digits, '_' and '-' are allowed",
            ));
        }

        let cipher = CookieCipher::from_secret(secret)
            .map_err(|e| ConfigError::invalid("cookie_cipher_secret_key", e.to_string()))?;

        let pkce_mode = self
            .use_pkce
            .as_deref()
            .unwrap_or("auto")
            .parse::<PkceMode>()
            .map_err(|e| ConfigError::invalid("use_pkce", e.to_string()))?;

        let strategy_name = self.user_id.as_deref().unwrap_or("email");
        let identity_strategy = IdentityStrategy::from_name(strategy_name).ok_or_else(|| {
            ConfigError::UnknownIdentityStrategy {
                name: strategy_name.to_string(),
                expected: IdentityStrategy::names().join(", "),
            }
        })?;

        let claims_mode = self
            .claims_strategy
            .as_deref()
            .unwrap_or("local")
            .parse::<ClaimsMode>()
            .map_err(|e| ConfigError::invalid("claims_strategy", e))?;

        let patterns: Vec<String> = match &self.bypass_patterns {
            Some(patterns) => patterns.clone(),
            None => DEFAULT_BYPASS_PATTERNS.iter().map(|p| p.to_string()).collect(),
        };
        let bypass_patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("^(?:{p})$"))
                    .map_err(|e| ConfigError::invalid("bypass_patterns", format!("'{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let client_secret = self
            .client_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);

        Ok(StaticConfig {
            cookie: CookieSettings {
                name: cookie_name,
                secure: cookie_is_secure,
                domain: redirect_uri.host_str().map(str::to_string),
                max_age: time::Duration::minutes(max_age_minutes),
            },
            issuer_uri,
            client_id,
            client_secret,
            redirect_uri,
            scopes,
            pkce_mode,
            cipher,
            identity_strategy,
            claims_mode,
            bypass_patterns,
        })
    }
}

fn fill(slot: &mut Option<String>, fallback: impl FnOnce() -> Option<String>) {
    if slot.as_deref().is_none_or(|v| v.trim().is_empty()) {
        *slot = fallback();
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn required<'a>(parameter: &'static str, value: &'a Option<String>) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { parameter })
}

fn parse_url(parameter: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::invalid(parameter, e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::invalid(parameter, format!("unsupported scheme '{other}'"))),
    }
}

/// Splits a scope string on `+` and whitespace.
#[must_use]
pub fn split_scopes(scope: &str) -> Vec<String> {
    scope
        .split(|c: char| c == '+' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Settings that validate without the provider.
struct StaticConfig {
    issuer_uri: Url,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: Url,
    scopes: Vec<String>,
    pkce_mode: PkceMode,
    cookie: CookieSettings,
    cipher: CookieCipher,
    identity_strategy: IdentityStrategy,
    claims_mode: ClaimsMode,
    bypass_patterns: Vec<Regex>,
}

// =============================================================================
// Validated Configuration
// =============================================================================

/// Validated, immutable gate configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Provider issuer.
    pub issuer_uri: Url,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret; `None` for public clients.
    pub client_secret: Option<String>,
    /// Callback URI.
    pub redirect_uri: Url,
    /// Requested scopes.
    pub scopes: Vec<String>,
    /// Configured PKCE mode.
    pub pkce_mode: PkceMode,
    /// Whether PKCE is used, after resolving the mode against the provider.
    pub pkce_enabled: bool,
    /// Cookie attributes.
    pub cookie: CookieSettings,
    /// Cookie cipher.
    pub cipher: CookieCipher,
    /// User id extraction strategy.
    pub identity_strategy: IdentityStrategy,
    /// Claims resolution strategy.
    pub claims_mode: ClaimsMode,
    /// Anchored bypass regexes.
    pub bypass_patterns: Vec<Regex>,
    /// Whether `http` provider URLs are allowed.
    pub allow_insecure_issuer: bool,
}

impl ClientConfig {
    /// Validates settings against the provider metadata.
    ///
    /// # Errors
    ///
    /// Returns the first problem found: a missing or malformed parameter, a
    /// secure cookie on a plain-HTTP redirect URI, an unknown identity
    /// strategy, scopes the provider does not support, or PKCE disabled
    /// without a client secret.
    pub fn new(settings: &AuthSettings, metadata: &ProviderMetadata) -> Result<Self, ConfigError> {
        let config = settings.resolve_static()?;

        match metadata.unsupported_scopes(&config.scopes) {
            Some(unsupported) if !unsupported.is_empty() => {
                return Err(ConfigError::UnsupportedScopes {
                    unsupported,
                    supported: metadata.scopes_supported.clone().unwrap_or_default(),
                });
            }
            Some(_) => tracing::info!(scopes = ?config.scopes, "Requested scopes are supported"),
            None => tracing::warn!(
                scopes = ?config.scopes,
                "Provider does not advertise scopes_supported; skipping scope validation"
            ),
        }

        let pkce_enabled = resolve_pkce(config.pkce_mode, metadata);
        if !pkce_enabled && config.client_secret.is_none() {
            return Err(ConfigError::ClientSecretRequired);
        }

        Ok(Self {
            issuer_uri: config.issuer_uri,
            client_id: config.client_id,
            client_secret: config.client_secret,
            redirect_uri: config.redirect_uri,
            scopes: config.scopes,
            pkce_mode: config.pkce_mode,
            pkce_enabled,
            cookie: config.cookie,
            cipher: config.cipher,
            identity_strategy: config.identity_strategy,
            claims_mode: config.claims_mode,
            bypass_patterns: config.bypass_patterns,
            allow_insecure_issuer: settings.allow_insecure_issuer,
        })
    }

    /// Scope parameter for the authorization request.
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Returns `true` if `path` fully matches a bypass pattern.
    #[must_use]
    pub fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_patterns.iter().any(|re| re.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn settings() -> AuthSettings {
        AuthSettings {
            issuer_uri: Some("https://auth.example.com".to_string()),
            client_id: Some("dashboard".to_string()),
            redirect_uri: Some("https://app.example.com/".to_string()),
            scope: Some("openid+profile+email+groups+offline_access".to_string()),
            cookie_cipher_secret_key: Some(KEY.to_string()),
            ..AuthSettings::default()
        }
    }

    fn metadata(methods: &[&str]) -> ProviderMetadata {
        serde_json::from_value(serde_json::json!({
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": "https://auth.example.com/token",
            "scopes_supported": ["openid", "email", "groups", "profile", "offline_access"],
            "code_challenge_methods_supported": methods,
        }))
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new(&settings(), &metadata(&["S256"])).unwrap();
        assert!(config.pkce_enabled);
        assert_eq!(config.pkce_mode, PkceMode::Auto);
        assert_eq!(config.cookie.name, DEFAULT_COOKIE_NAME);
        assert!(config.cookie.secure);
        assert_eq!(config.cookie.domain.as_deref(), Some("app.example.com"));
        assert_eq!(config.cookie.max_age, time::Duration::minutes(720));
        assert_eq!(config.identity_strategy, IdentityStrategy::Email);
        assert_eq!(config.claims_mode, ClaimsMode::Local);
        assert_eq!(config.scope_param(), "openid profile email groups offline_access");
    }

    #[test]
    fn test_missing_parameters_are_named() {
        let cases: [(&'static str, fn(&mut AuthSettings)); 5] = [
            ("issuer_uri", |s| s.issuer_uri = None),
            ("client_id", |s| s.client_id = None),
            ("redirect_uri", |s| s.redirect_uri = None),
            ("scope", |s| s.scope = Some("  ".to_string())),
            ("cookie_cipher_secret_key", |s| s.cookie_cipher_secret_key = None),
        ];
        for (parameter, clear) in cases {
            let mut s = settings();
            clear(&mut s);
            let err = s.validate().unwrap_err();
            assert_eq!(err, ConfigError::Missing { parameter });
            assert!(err.to_string().contains(parameter));
        }
    }

    #[test]
    fn test_pkce_auto_with_public_client() {
        // Provider offers PKCE: a public client is fine.
        assert!(ClientConfig::new(&settings(), &metadata(&["S256"])).is_ok());

        // Provider offers no PKCE: a public client cannot authenticate.
        assert_eq!(
            ClientConfig::new(&settings(), &metadata(&[])).unwrap_err(),
            ConfigError::ClientSecretRequired
        );

        let mut confidential = settings();
        confidential.client_secret = Some("s3cret".to_string());
        let config = ClientConfig::new(&confidential, &metadata(&[])).unwrap();
        assert!(!config.pkce_enabled);
    }

    #[test]
    fn test_pkce_forced_modes() {
        let mut forced_on = settings();
        forced_on.use_pkce = Some("true".to_string());
        assert!(ClientConfig::new(&forced_on, &metadata(&[])).unwrap().pkce_enabled);

        let mut forced_off = settings();
        forced_off.use_pkce = Some("false".to_string());
        assert_eq!(
            ClientConfig::new(&forced_off, &metadata(&["S256"])).unwrap_err(),
            ConfigError::ClientSecretRequired
        );

        let mut bad = settings();
        bad.use_pkce = Some("maybe".to_string());
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::Invalid { parameter: "use_pkce", .. })
        ));
    }

    #[test]
    fn test_unsupported_scopes_are_reported_exactly() {
        let mut s = settings();
        s.scope = Some("openid+profile+email+groups+roles+offline_access".to_string());
        match ClientConfig::new(&s, &metadata(&["S256"])).unwrap_err() {
            ConfigError::UnsupportedScopes { unsupported, .. } => {
                assert_eq!(unsupported, vec!["roles".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scopes_not_advertised_skip_validation() {
        let mut metadata = metadata(&["S256"]);
        metadata.scopes_supported = None;
        let mut s = settings();
        s.scope = Some("openid custom".to_string());
        assert!(ClientConfig::new(&s, &metadata).is_ok());
    }

    #[test]
    fn test_secure_cookie_requires_https_redirect() {
        let mut s = settings();
        s.redirect_uri = Some("http://localhost:8080/".to_string());
        assert!(matches!(
            s.validate(),
            Err(ConfigError::InsecureCookie { .. })
        ));

        s.cookie_is_secure = Some(false);
        assert!(s.validate().is_ok());

        // An insecure cookie over TLS is allowed.
        let mut s = settings();
        s.cookie_is_secure = Some(false);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_unknown_identity_strategy() {
        let mut s = settings();
        s.user_id = Some("ldap".to_string());
        let err = s.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownIdentityStrategy { .. }));
        assert!(err.to_string().contains("email, sub, google"));

        s.user_id = Some("Google".to_string());
        let config = ClientConfig::new(&s, &metadata(&["S256"])).unwrap();
        assert_eq!(config.identity_strategy, IdentityStrategy::Google);
    }

    #[test]
    fn test_invalid_values() {
        let mut s = settings();
        s.cookie_max_age_minutes = Some(0);
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { parameter: "cookie_max_age_minutes", .. })
        ));

        let mut s = settings();
        s.cookie_cipher_secret_key = Some("short".to_string());
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { parameter: "cookie_cipher_secret_key", .. })
        ));

        let mut s = settings();
        s.issuer_uri = Some("not a url".to_string());
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { parameter: "issuer_uri", .. })
        ));

        let mut s = settings();
        s.cookie_name = Some("bad name;".to_string());
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { parameter: "cookie_name", .. })
        ));

        let mut s = settings();
        s.bypass_patterns = Some(vec!["(".to_string()]);
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { parameter: "bypass_patterns", .. })
        ));
    }

    #[test]
    fn test_bypass_patterns_full_match() {
        let config = ClientConfig::new(&settings(), &metadata(&["S256"])).unwrap();
        assert!(config.is_bypassed("/static/app.css"));
        assert!(config.is_bypassed("/assets/js/main.js"));
        assert!(config.is_bypassed("/favicon.ico"));
        assert!(!config.is_bypassed("/"));
        assert!(!config.is_bypassed("/app.css/admin"));
        assert!(!config.is_bypassed("/report.pngx"));
    }

    #[test]
    fn test_env_fallbacks() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AUTH_ISSUER_URI", "https://env.example.com"),
            ("AUTH_CLIENT_ID", "from-env"),
            ("AUTH_COOKIE_IS_SECURE", "false"),
            ("AUTH_COOKIE_MAX_AGE_MINUTES", "60"),
            ("AUTH_USER_ID", "sub"),
        ]);
        let mut s = settings();
        s.issuer_uri = None;
        s.apply_fallbacks_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        // Fallbacks only fill what is unset.
        assert_eq!(s.issuer_uri.as_deref(), Some("https://env.example.com"));
        assert_eq!(s.client_id.as_deref(), Some("dashboard"));
        assert_eq!(s.cookie_is_secure, Some(false));
        assert_eq!(s.cookie_max_age_minutes, Some(60));
        assert_eq!(s.user_id.as_deref(), Some("sub"));
    }

    #[test]
    fn test_env_fallback_rejects_bad_bool() {
        let mut s = settings();
        let err = s
            .apply_fallbacks_from(|name| (name == "AUTH_COOKIE_IS_SECURE").then(|| "perhaps".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { parameter: "cookie_is_secure", .. }));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut s = settings();
        s.client_secret = Some("s3cret".to_string());
        let debug = format!("{s:?}");
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains(KEY));
    }
}
