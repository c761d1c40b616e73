//! axum integration.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use oidcgate_auth::{AuthenticatedUser, OidcGate, oidc_auth_middleware};
//!
//! async fn whoami(user: AuthenticatedUser) -> String {
//!     format!("Hello, {}!", user.id)
//! }
//!
//! let gate: Arc<OidcGate> = Arc::new(OidcGate::initialize(&settings, groups).await?);
//! let app = Router::new()
//!     .route("/whoami", get(whoami))
//!     .layer(from_fn_with_state(gate, oidc_auth_middleware));
//! ```

mod error;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderName, HeaderValue, Request, StatusCode, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use cookie::Cookie;
use serde::Serialize;

use crate::claims::Identity;
use crate::gate::{OidcGate, Outcome, RequestContext};
use crate::session::PersistedSession;

/// Header carrying the authenticated user id to the inner service.
pub const REMOTE_USER_HEADER: HeaderName = HeaderName::from_static("x-remote-user");

// =============================================================================
// Authenticated User
// =============================================================================

/// The effective principal of a request that passed the gate.
///
/// Inserted into request extensions by [`oidc_auth_middleware`]; use it as an
/// extractor in handlers. Extraction fails with 401 on routes the gate did not
/// authenticate (bypassed paths).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    /// User id according to the session's identity strategy.
    pub id: String,
    /// Identity snapshot from the session.
    pub identity: Identity,
}

impl AuthenticatedUser {
    /// Builds the principal of a session.
    #[must_use]
    pub fn from_session(session: &PersistedSession) -> Self {
        Self {
            id: session.user_id(),
            identity: session.identity.clone(),
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Authentication required").into_response())
    }
}

// =============================================================================
// Middleware
// =============================================================================

/// Runs every request through [`OidcGate::authenticate`].
///
/// On forward, the principal is stored in request extensions and in the
/// `X-Remote-User` header; a client-supplied `X-Remote-User` is always
/// dropped. Cookies decided by the gate are appended to whatever response
/// goes out.
pub async fn oidc_auth_middleware(
    State(gate): State<Arc<OidcGate>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let context = request_context(&req);

    match gate.authenticate(&context).await {
        Outcome::Forward { user, cookies } => {
            req.headers_mut().remove(&REMOTE_USER_HEADER);
            if let Some(user) = user {
                match HeaderValue::from_str(&user.id) {
                    Ok(value) => {
                        req.headers_mut().insert(REMOTE_USER_HEADER, value);
                    }
                    Err(_) => {
                        tracing::debug!(user = %user.id, "User id is not a valid header value")
                    }
                }
                req.extensions_mut().insert(user);
            }

            let mut response = next.run(req).await;
            append_cookies(&mut response, &cookies);
            response
        }
        Outcome::Respond {
            mut response,
            cookies,
        } => {
            append_cookies(&mut response, &cookies);
            response
        }
    }
}

/// Extracts what the gate needs from a request.
fn request_context(req: &Request<Body>) -> RequestContext {
    let mut context = RequestContext::new(req.uri().path());
    if let Some(query) = req.uri().query() {
        context = context.with_query(query);
    }
    for cookie in CookieJar::from_headers(req.headers()).iter() {
        context = context.with_cookie(cookie.name(), cookie.value());
    }
    context
}

fn append_cookies(response: &mut Response, cookies: &[Cookie<'static>]) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.encoded().to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!(cookie = cookie.name(), error = %e, "Dropping unencodable cookie"),
        }
    }
}
