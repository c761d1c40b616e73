//! The per-request authentication decision.
//!
//! [`OidcGate::authenticate`] inspects path, query and cookies and settles
//! on exactly one [`Outcome`]: forward the request (optionally with an
//! authenticated principal) or answer it directly with a redirect, the
//! post-login page or an error. Cookies to set travel with either outcome.
//!
//! ```text
//! bypass path ──────────────────────────────────────────────► Forward(none)
//! session cookie ─► decode ─► fresh ────────────────────────► Forward(user)
//!                     │        expired ─► refresh ok ───────► Forward(user) + cookie
//!                     │                   refresh failed ───► Forward(stale) + clear
//!                     └─ undecodable ─► clear, continue as no session
//! no session ─► ?code ─► state check ─► exchange ─► claims ─► Respond(page) + cookie
//!               ?error ─────────────────────────────────────► Respond(400)
//!               otherwise ─► new PKCE state ────────────────► Respond(302) + state cookie
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use cookie::Cookie;
use time::OffsetDateTime;

use crate::claims::{ClaimsMode, ClaimsResolver, jwks::ProviderJwksCacheConfig};
use crate::config::{AuthSettings, ClientConfig};
use crate::discovery::{DiscoveryConfig, OidcDiscoveryClient, ProviderMetadata};
use crate::AuthResult;
use crate::error::{AuthError, StartupError};
use crate::groups::GroupCache;
use crate::middleware::AuthenticatedUser;
use crate::pkce::AuthState;
use crate::session::{PersistedSession, SessionCodec};
use crate::token::{DEFAULT_TOKEN_TIMEOUT, RawToken, TokenClient};

/// Tracing target for security-relevant events.
pub const AUDIT_TARGET: &str = "oidcgate::audit";

/// The inputs of one authentication decision.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request path, without query.
    pub path: String,
    /// Decoded query parameters. The first occurrence of a name wins.
    pub query: HashMap<String, String>,
    /// Decoded request cookies.
    pub cookies: HashMap<String, String>,
}

impl RequestContext {
    /// Creates a context for `path` with no query and no cookies.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Parses a raw, URL-encoded query string.
    #[must_use]
    pub fn with_query(mut self, raw_query: &str) -> Self {
        for (name, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
            self.query
                .entry(name.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        self
    }

    /// Adds a cookie.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// A non-empty query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// A non-empty cookie value.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Result of one authentication decision.
#[derive(Debug)]
pub enum Outcome {
    /// Let the request through.
    Forward {
        /// The effective principal, `None` for bypassed paths.
        user: Option<AuthenticatedUser>,
        /// Cookies to set on the downstream response.
        cookies: Vec<Cookie<'static>>,
    },
    /// Answer the request without calling the inner service.
    Respond {
        /// The response to send.
        response: Response,
        /// Cookies to set on it.
        cookies: Vec<Cookie<'static>>,
    },
}

impl Outcome {
    /// Cookies attached to this outcome.
    #[must_use]
    pub fn cookies(&self) -> &[Cookie<'static>] {
        match self {
            Self::Forward { cookies, .. } | Self::Respond { cookies, .. } => cookies,
        }
    }
}

/// OpenID Connect authentication gate.
///
/// Immutable after construction and shared across requests behind an
/// [`Arc`]. All per-login state lives in the browser's cookies.
pub struct OidcGate {
    config: ClientConfig,
    metadata: ProviderMetadata,
    codec: SessionCodec,
    token_client: TokenClient,
    claims: ClaimsResolver,
    groups: Arc<dyn GroupCache>,
}

impl OidcGate {
    /// Validates `settings`, discovers the provider and assembles the gate.
    ///
    /// Static checks run before any network call, so a missing parameter is
    /// reported without contacting the provider.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, a failed discovery, or a
    /// configuration the provider cannot satisfy.
    pub async fn initialize(
        settings: &AuthSettings,
        groups: Arc<dyn GroupCache>,
    ) -> Result<Self, StartupError> {
        settings.validate()?;
        let issuer = settings.issuer()?;

        let discovery = OidcDiscoveryClient::new(
            DiscoveryConfig::new().with_allow_http(settings.allow_insecure_issuer),
        )?;
        let metadata = discovery.discover(&issuer).await?;

        let config = ClientConfig::new(settings, &metadata)?;
        Self::from_parts(config, metadata, groups)
    }

    /// Assembles a gate from an already validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the token client or the claims resolver cannot be
    /// created.
    pub fn from_parts(
        config: ClientConfig,
        metadata: ProviderMetadata,
        groups: Arc<dyn GroupCache>,
    ) -> Result<Self, StartupError> {
        let token_client = TokenClient::new(
            metadata.token_endpoint.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.redirect_uri.as_str(),
            DEFAULT_TOKEN_TIMEOUT,
        )
        .map_err(|e| StartupError::Component {
            component: "token client",
            message: e.to_string(),
        })?;

        let claims = match config.claims_mode {
            ClaimsMode::Local => ClaimsResolver::Local,
            ClaimsMode::Verified => ClaimsResolver::verified(
                &metadata,
                ProviderJwksCacheConfig::default().with_allow_http(config.allow_insecure_issuer),
            )
            .map_err(|e| StartupError::Component {
                component: "claims resolver",
                message: e.to_string(),
            })?,
        };

        tracing::info!(
            client_id = %config.client_id,
            pkce = config.pkce_enabled,
            pkce_mode = %config.pkce_mode,
            claims = %config.claims_mode,
            user_id = %config.identity_strategy,
            "OIDC gate ready"
        );

        Ok(Self {
            codec: SessionCodec::new(config.cipher.clone()),
            config,
            metadata,
            token_client,
            claims,
            groups,
        })
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The discovered provider metadata.
    #[must_use]
    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// The injected group cache.
    #[must_use]
    pub fn group_cache(&self) -> &Arc<dyn GroupCache> {
        &self.groups
    }

    /// Decides what to do with one request.
    pub async fn authenticate(&self, request: &RequestContext) -> Outcome {
        if self.config.is_bypassed(&request.path) {
            tracing::trace!(path = %request.path, "Path bypasses authentication");
            return Outcome::Forward {
                user: None,
                cookies: Vec::new(),
            };
        }

        let mut cookies = Vec::new();

        if let Some(value) = request.cookie(&self.config.cookie.name) {
            match self.codec.decode(value) {
                Ok(session) => return self.resume(session, cookies).await,
                Err(e) => {
                    tracing::debug!(error = %e, "Discarding undecodable session cookie");
                    cookies.push(self.config.cookie.clear_session_cookie());
                }
            }
        }

        match self.login(request, &mut cookies).await {
            Ok(response) => Outcome::Respond { response, cookies },
            Err(e) => {
                tracing::debug!(error = %e, path = %request.path, "Authentication failed");
                Outcome::Respond {
                    response: e.into_response(),
                    cookies,
                }
            }
        }
    }

    /// Continues an existing session, refreshing it if expired.
    async fn resume(&self, session: PersistedSession, mut cookies: Vec<Cookie<'static>>) -> Outcome {
        if !session.is_expired() {
            tracing::debug!(user = %session.user_id(), "Session is valid");
            return self.admit(&session, cookies).await;
        }

        tracing::debug!(
            user = %session.user_id(),
            expired_at = %session.expires_at,
            "Session expired"
        );

        if let Some(refresh_token) = session.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            match self.refresh(refresh_token).await {
                Ok((refreshed, cookie)) => {
                    tracing::debug!(user = %refreshed.user_id(), "Session refreshed");
                    cookies.push(cookie);
                    return self.admit(&refreshed, cookies).await;
                }
                Err(e) => {
                    tracing::warn!(
                        user = %session.user_id(),
                        error = %e,
                        "Session refresh failed, serving this request with the expired identity"
                    );
                }
            }
        }

        // The current request still goes through; the next one has to log in.
        cookies.push(self.config.cookie.clear_session_cookie());
        self.admit(&session, cookies).await
    }

    async fn refresh(
        &self,
        refresh_token: &str,
    ) -> AuthResult<(PersistedSession, Cookie<'static>)> {
        let mut token = self.token_client.refresh(refresh_token).await?;
        if token.refresh_token.as_deref().is_none_or(str::is_empty) {
            token.refresh_token = Some(refresh_token.to_string());
        }
        self.issue(&token).await
    }

    /// Records the user's groups and forwards the request as that user.
    async fn admit(&self, session: &PersistedSession, cookies: Vec<Cookie<'static>>) -> Outcome {
        let user = AuthenticatedUser::from_session(session);
        self.groups
            .record(&user.id, session.identity.groups_and_roles())
            .await;
        Outcome::Forward {
            user: Some(user),
            cookies,
        }
    }

    /// Handles a request that carries no usable session.
    async fn login(
        &self,
        request: &RequestContext,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> AuthResult<Response> {
        if let Some(code) = request.query_param("code") {
            return self.callback(request, code, cookies).await;
        }

        if let Some(error) = request.query_param("error") {
            let description = request.query_param("error_description").unwrap_or_default();
            tracing::warn!(
                target: AUDIT_TARGET,
                error,
                description,
                "Provider denied authentication"
            );
            return Err(AuthError::ProviderDenied {
                error: error.to_string(),
                description: description.to_string(),
            });
        }

        self.redirect_to_provider(cookies)
    }

    async fn callback(
        &self,
        request: &RequestContext,
        code: &str,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> AuthResult<Response> {
        let state_cookie = request.cookie(&self.config.cookie.state_cookie_name());
        if self.config.pkce_enabled || state_cookie.is_some() {
            cookies.push(self.config.cookie.clear_state_cookie());
        }

        let code_verifier = if self.config.pkce_enabled {
            let stored = state_cookie
                .and_then(|value| self.codec.decode_state(value).ok())
                .ok_or(AuthError::MissingStateCookie)?;
            let received = request
                .query_param("state")
                .ok_or(AuthError::MissingParameter("state"))?;
            if stored.validate(received).is_err() {
                tracing::warn!(target: AUDIT_TARGET, "Callback state does not match the login attempt");
                return Err(AuthError::StateMismatch);
            }
            Some(stored.code_verifier)
        } else {
            None
        };

        let token = self
            .token_client
            .exchange_code(code, code_verifier.as_deref())
            .await?;
        let (session, cookie) = self.issue(&token).await?;
        cookies.push(cookie);

        let user_id = session.user_id();
        self.groups
            .record(&user_id, session.identity.groups_and_roles())
            .await;
        tracing::info!(
            target: AUDIT_TARGET,
            user = %user_id,
            expires_at = %session.expires_at,
            "User logged in"
        );

        Ok(post_login_page(&request.path))
    }

    /// Turns a token response into a session and its cookie.
    async fn issue(
        &self,
        token: &RawToken,
    ) -> AuthResult<(PersistedSession, Cookie<'static>)> {
        let identity = self.claims.resolve(token).await.map_err(|e| {
            tracing::warn!(target: AUDIT_TARGET, error = %e, "Token claims rejected");
            AuthError::InvalidIdentity(e.to_string())
        })?;

        let session = PersistedSession::issue(
            token,
            identity,
            self.config.identity_strategy,
            OffsetDateTime::now_utc(),
        );
        if session.user_id().is_empty() {
            tracing::warn!(
                target: AUDIT_TARGET,
                strategy = %self.config.identity_strategy,
                "Token carries no user id"
            );
            return Err(AuthError::EmptyUserId);
        }

        let value = self
            .codec
            .encode(Some(&session))
            .map_err(|e| AuthError::Session(e.to_string()))?;
        Ok((session, self.config.cookie.session_cookie(value)))
    }

    fn redirect_to_provider(
        &self,
        cookies: &mut Vec<Cookie<'static>>,
    ) -> AuthResult<Response> {
        let state = self.config.pkce_enabled.then(AuthState::generate);

        let mut location = self.metadata.authorization_endpoint.clone();
        {
            let mut query = location.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", self.config.redirect_uri.as_str())
                .append_pair("response_type", "code")
                .append_pair("scope", &self.config.scope_param());
            if let Some(state) = &state {
                query
                    .append_pair("state", &state.state)
                    .append_pair("code_challenge", &state.code_challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }

        if let Some(state) = &state {
            let value = self
                .codec
                .encode_state(state)
                .map_err(|e| AuthError::Session(e.to_string()))?;
            cookies.push(self.config.cookie.state_cookie(value));
        }

        tracing::debug!(pkce = state.is_some(), "Redirecting to the authorization endpoint");
        Ok((
            StatusCode::FOUND,
            [
                (header::LOCATION, location.to_string()),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
        )
            .into_response())
    }
}

/// Page that navigates to `path` without the one-time `code` in the URL.
///
/// A same-site navigation rather than a 302: the browser arrived here from
/// the provider, and a redirect in that cross-site chain would not carry the
/// `SameSite=Strict` session cookie.
fn post_login_page(path: &str) -> Response {
    let target = if path.is_empty() { "/" } else { path };
    let attr = escape_html(target);
    let script = serde_json::to_string(target)
        .unwrap_or_else(|_| "\"/\"".to_string())
        .replace('<', "\\u003c");

    let body = format!(
        "<!DOCTYPE html>\n<html><head>\
         <meta http-equiv=\"refresh\" content=\"0;URL='{attr}'\">\
         <title>Signed in</title></head>\
         <body><script>window.location = {script};</script>\
         <a href=\"{attr}\">Continue</a></body></html>\n"
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
        .into_response()
}

/// Escapes `value` for use in HTML text and quoted attributes.
#[must_use]
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

impl std::fmt::Debug for OidcGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcGate")
            .field("issuer", &self.metadata.issuer)
            .field("client_id", &self.config.client_id)
            .field("pkce", &self.config.pkce_enabled)
            .finish_non_exhaustive()
    }
}
