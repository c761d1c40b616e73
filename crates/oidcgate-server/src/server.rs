use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::header,
    middleware,
    response::{Html, IntoResponse},
    routing::get,
};
use oidcgate_auth::{
    AuthenticatedUser, GroupCache, InMemoryGroupCache, OidcGate, escape_html, oidc_auth_middleware,
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;

/// Demo application behind the gate.
///
/// `/static/app.css` matches the default bypass patterns and is served
/// without a session; everything else requires a login.
pub fn build_app(gate: Arc<OidcGate>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/whoami", get(whoami))
        .route("/static/app.css", get(stylesheet))
        .layer(middleware::from_fn_with_state(
            gate.clone(),
            oidc_auth_middleware,
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http.request",
                    http.method = %req.method(),
                    http.target = %req.uri().path()
                )
            }),
        )
        .with_state(gate)
}

async fn root(user: AuthenticatedUser) -> Html<String> {
    let name = if user.identity.name.is_empty() {
        &user.id
    } else {
        &user.identity.name
    };
    Html(format!(
        "<!DOCTYPE html>\n<html><head><link rel=\"stylesheet\" href=\"/static/app.css\">\
         <title>oidcgate</title></head><body><h1>Hello, {}</h1>\
         <p><a href=\"/whoami\">Who am I?</a></p></body></html>\n",
        escape_html(name)
    ))
}

async fn whoami(State(gate): State<Arc<OidcGate>>, user: AuthenticatedUser) -> Json<Value> {
    let groups = gate.group_cache().lookup(&user.id).await;
    Json(json!({
        "id": user.id,
        "sub": user.identity.sub,
        "name": user.identity.name,
        "email": user.identity.email,
        "groups": groups,
    }))
}

async fn stylesheet() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css")],
        "body { font-family: sans-serif; margin: 2rem; }\n",
    )
}

pub struct OidcgateServer {
    addr: SocketAddr,
    app: Router,
}

impl OidcgateServer {
    /// Initializes the gate (discovery included) and builds the router.
    pub async fn build(config: &AppConfig) -> anyhow::Result<Self> {
        let groups = Arc::new(InMemoryGroupCache::default());
        let gate = OidcGate::initialize(&config.auth, groups).await?;
        Ok(Self {
            addr: config.addr(),
            app: build_app(Arc::new(gate)),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
