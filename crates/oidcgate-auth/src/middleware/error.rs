//! Error response rendering.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Authentication error");
        }

        let mut response = (status, self.to_string()).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

/// HTTP status for an authentication error.
fn status_for(error: &AuthError) -> StatusCode {
    match error {
        AuthError::MissingParameter(_) | AuthError::ProviderDenied { .. } => StatusCode::BAD_REQUEST,
        AuthError::MissingStateCookie
        | AuthError::StateMismatch
        | AuthError::InvalidIdentity(_)
        | AuthError::EmptyUserId => StatusCode::UNAUTHORIZED,
        // Relay the provider's own verdict on the grant.
        AuthError::TokenEndpoint { status, .. } => StatusCode::from_u16(*status)
            .ok()
            .filter(|s| s.is_client_error() || s.is_server_error())
            .unwrap_or(StatusCode::BAD_GATEWAY),
        AuthError::TokenTransport(_) => StatusCode::BAD_GATEWAY,
        AuthError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_denied_response() {
        let response = AuthError::ProviderDenied {
            error: "access_denied".to_string(),
            description: "User cancelled".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            body_text(response).await,
            "Authentication denied: access_denied (User cancelled)"
        );
    }

    #[tokio::test]
    async fn test_empty_user_id_response() {
        let response = AuthError::EmptyUserId.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_text(response).await,
            "Unable to extract the user id from the access token"
        );
    }

    #[test]
    fn test_token_endpoint_status() {
        let status = |code| {
            status_for(&AuthError::TokenEndpoint {
                status: code,
                body: String::new(),
            })
        };
        assert_eq!(status(400), StatusCode::BAD_REQUEST);
        assert_eq!(status(401), StatusCode::UNAUTHORIZED);
        assert_eq!(status(503), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(201), StatusCode::BAD_GATEWAY);
        assert_eq!(status(302), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_state_problems_are_unauthorized() {
        assert_eq!(status_for(&AuthError::StateMismatch), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(&AuthError::MissingStateCookie), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&AuthError::MissingParameter("state")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&AuthError::TokenTransport("timeout".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
