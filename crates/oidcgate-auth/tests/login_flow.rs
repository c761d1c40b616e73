//! End-to-end login flows through the axum middleware against a fake provider.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    middleware::from_fn_with_state,
    response::Response,
    routing::get,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use cookie::Cookie;
use oidcgate_auth::session::CookieCipher;
use oidcgate_auth::{
    AuthSettings, AuthenticatedUser, GroupCache, Identity, IdentityStrategy, InMemoryGroupCache,
    OidcGate, PersistedSession, SessionCodec, oidc_auth_middleware,
};
use serde_json::json;
use time::OffsetDateTime;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";
const SESSION: &str = "OIDCGATE_SESSION";
const STATE: &str = "OIDCGATE_SESSION_STATE";

struct Harness {
    provider: MockServer,
    app: Router,
    groups: Arc<InMemoryGroupCache>,
}

async fn start_provider() -> MockServer {
    let provider = MockServer::start().await;
    let issuer = provider.uri();
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "scopes_supported": ["openid", "email", "profile", "groups", "offline_access"],
            "code_challenge_methods_supported": ["plain", "S256"],
            "id_token_signing_alg_values_supported": ["RS256"]
        })))
        .mount(&provider)
        .await;
    provider
}

async fn harness() -> Harness {
    let provider = start_provider().await;
    let settings = AuthSettings {
        issuer_uri: Some(provider.uri()),
        client_id: Some("dashboard".to_string()),
        redirect_uri: Some("https://app.example.com/callback".to_string()),
        scope: Some("openid+email+groups+offline_access".to_string()),
        cookie_cipher_secret_key: Some(KEY.to_string()),
        allow_insecure_issuer: true,
        ..AuthSettings::default()
    };

    let groups = Arc::new(InMemoryGroupCache::default());
    let gate = Arc::new(
        OidcGate::initialize(&settings, groups.clone())
            .await
            .expect("gate initializes"),
    );

    let app = Router::new()
        .route("/", get(|user: AuthenticatedUser| async move { user.id }))
        .route("/callback", get(|| async { "unreachable after login" }))
        .route(
            "/static/app.css",
            get(|headers: HeaderMap| async move {
                headers
                    .get("x-remote-user")
                    .map_or("anonymous".to_string(), |v| {
                        v.to_str().unwrap_or_default().to_string()
                    })
            }),
        )
        .route(
            "/whoami",
            get(|headers: HeaderMap| async move {
                headers
                    .get("x-remote-user")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        )
        .layer(from_fn_with_state(gate, oidc_auth_middleware));

    Harness {
        provider,
        app,
        groups,
    }
}

fn unsigned_jwt(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2ln")
}

async fn send(app: &Router, uri: &str, cookies: &[(&str, &str)], headers: &[(&str, &str)]) -> Response {
    let mut request = Request::builder().uri(uri);
    if !cookies.is_empty() {
        let value = cookies
            .iter()
            .map(|(name, value)| Cookie::new(*name, *value).encoded().to_string())
            .collect::<Vec<_>>()
            .join("; ");
        request = request.header(header::COOKIE, value);
    }
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn set_cookies(response: &Response) -> HashMap<String, Cookie<'static>> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| Cookie::parse_encoded(v.to_str().unwrap().to_string()).unwrap())
        .map(|c| (c.name().to_string(), c))
        .collect()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn codec() -> SessionCodec {
    SessionCodec::new(CookieCipher::from_secret(KEY).unwrap())
}

/// Walks the redirect and callback, returning the session cookie value.
async fn log_in(h: &Harness) -> String {
    let redirect = send(&h.app, "/", &[], &[]).await;
    let state_cookie = set_cookies(&redirect)[STATE].value().to_string();
    let location = url::Url::parse(redirect.headers()[header::LOCATION].to_str().unwrap()).unwrap();
    let query: HashMap<_, _> = location.query_pairs().into_owned().collect();

    let callback = send(
        &h.app,
        &format!("/callback?code=auth-code&state={}", query["state"]),
        &[(STATE, &state_cookie)],
        &[],
    )
    .await;
    assert_eq!(callback.status(), StatusCode::OK);
    set_cookies(&callback)[SESSION].value().to_string()
}

async fn mount_token_endpoint(provider: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth-code"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": unsigned_jwt(json!({
                "sub": "f:1234",
                "email": "jane@example.com",
                "name": "Jane Doe",
                "groups": ["admins", "devs"]
            })),
            "refresh_token": "rt-1",
            "expires_in": 300,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(provider)
        .await;
}

#[tokio::test]
async fn bypassed_path_is_served_without_login() {
    let h = harness().await;
    let response = send(&h.app, "/static/app.css", &[], &[("x-remote-user", "admin")]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_text(response).await, "anonymous");
}

#[tokio::test]
async fn first_visit_redirects_to_provider() {
    let h = harness().await;
    let response = send(&h.app, "/", &[], &[]).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with(&format!("{}/authorize?", h.provider.uri())));

    let url = url::Url::parse(location).unwrap();
    let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(query["client_id"], "dashboard");
    assert_eq!(query["redirect_uri"], "https://app.example.com/callback");
    assert_eq!(query["response_type"], "code");
    assert_eq!(query["scope"], "openid email groups offline_access");
    assert_eq!(query["code_challenge_method"], "S256");
    assert_eq!(query["state"].len(), 22);
    assert_eq!(query["code_challenge"].len(), 43);

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    let state = &cookies[STATE];
    assert_eq!(state.http_only(), Some(true));
    assert_eq!(state.max_age(), Some(time::Duration::seconds(300)));
    assert_eq!(state.domain(), Some("app.example.com"));
}

#[tokio::test]
async fn callback_issues_session_and_reuses_it() {
    let h = harness().await;
    mount_token_endpoint(&h.provider).await;

    let session = log_in(&h).await;
    let decoded = codec().decode(&session).unwrap();
    assert_eq!(decoded.user_id(), "jane@example.com");
    assert_eq!(decoded.refresh_token.as_deref(), Some("rt-1"));

    // The session is honoured without further provider calls.
    let response = send(&h.app, "/", &[(SESSION, &session)], &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_text(response).await, "jane@example.com");
    assert_eq!(
        h.groups.lookup("jane@example.com").await,
        vec!["admins", "devs"]
    );
}

#[tokio::test]
async fn callback_page_drops_code_from_url() {
    let h = harness().await;
    mount_token_endpoint(&h.provider).await;

    let redirect = send(&h.app, "/", &[], &[]).await;
    let state_cookie = set_cookies(&redirect)[STATE].value().to_string();
    let location = url::Url::parse(redirect.headers()[header::LOCATION].to_str().unwrap()).unwrap();
    let query: HashMap<_, _> = location.query_pairs().into_owned().collect();

    let response = send(
        &h.app,
        &format!("/callback?code=auth-code&state={}", query["state"]),
        &[(STATE, &state_cookie)],
        &[],
    )
    .await;

    let cookies = set_cookies(&response);
    assert_eq!(cookies[STATE].max_age(), Some(time::Duration::ZERO));
    let session = &cookies[SESSION];
    assert_eq!(session.same_site(), Some(cookie::SameSite::Strict));
    assert_eq!(session.max_age(), Some(time::Duration::minutes(720)));

    let page = body_text(response).await;
    assert!(page.contains("window.location = \"/callback\""));
    assert!(!page.contains("auth-code"));
}

#[tokio::test]
async fn client_supplied_remote_user_is_replaced() {
    let h = harness().await;
    mount_token_endpoint(&h.provider).await;
    let session = log_in(&h).await;

    let response = send(&h.app, "/whoami", &[(SESSION, &session)], &[("x-remote-user", "admin")]).await;
    assert_eq!(body_text(response).await, "jane@example.com");
}

#[tokio::test]
async fn expired_session_with_failed_refresh_is_served_once_and_cleared() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .expect(1)
        .mount(&h.provider)
        .await;

    let expired = PersistedSession {
        identity_provider: IdentityStrategy::Email,
        identity: Identity {
            sub: "f:1234".to_string(),
            email: "jane@example.com".to_string(),
            ..Identity::default()
        },
        refresh_token: Some("rt-stale".to_string()),
        expires_in: 300,
        expires_at: OffsetDateTime::now_utc() - time::Duration::minutes(10),
    };
    let value = codec().encode(Some(&expired)).unwrap();

    let response = send(&h.app, "/", &[(SESSION, &value)], &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = set_cookies(&response);
    assert_eq!(cookies[SESSION].max_age(), Some(time::Duration::ZERO));
    assert!(
        response.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .contains("Max-Age=0")
    );
    assert_eq!(body_text(response).await, "jane@example.com");
}

#[tokio::test]
async fn provider_denial_is_a_bad_request() {
    let h = harness().await;
    let response = send(
        &h.app,
        "/callback?error=access_denied&error_description=User%20cancelled",
        &[],
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_text(response).await,
        "Authentication denied: access_denied (User cancelled)"
    );
}

#[tokio::test]
async fn forged_state_is_rejected_without_token_call() {
    let h = harness().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.provider)
        .await;

    let redirect = send(&h.app, "/", &[], &[]).await;
    let state_cookie = set_cookies(&redirect)[STATE].value().to_string();

    let response = send(
        &h.app,
        "/callback?code=auth-code&state=forged",
        &[(STATE, &state_cookie)],
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!set_cookies(&response).contains_key(SESSION));
}

#[tokio::test]
async fn missing_required_setting_fails_before_discovery() {
    let groups: Arc<dyn GroupCache> = Arc::new(InMemoryGroupCache::default());
    let settings = AuthSettings {
        issuer_uri: Some("https://auth.example.invalid".to_string()),
        ..AuthSettings::default()
    };

    let err = OidcGate::initialize(&settings, groups).await.unwrap_err();
    assert!(err.to_string().contains("client_id"));
}
