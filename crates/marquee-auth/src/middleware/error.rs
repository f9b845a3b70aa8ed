//! HTTP responses for [`AuthError`].
//!
//! Bodies use the OAuth 2.0 error shape `{"error", "error_description"}`.
//! Rejected bearer tokens get a `WWW-Authenticate` challenge and a generic
//! description; the precise reason is only logged.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::AuthError;
use crate::oauth::TokenError;

/// Realm advertised in bearer challenges.
pub const REALM: &str = "marquee";

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        let description = public_description(&self);

        if status.is_server_error() {
            tracing::error!(category = %self.category(), error = %self, "Request failed");
        } else {
            tracing::debug!(category = %self.category(), error = %self, "Request rejected");
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        );
        if let Some(challenge) = challenge(&self, &description)
            && let Ok(value) = HeaderValue::from_str(&challenge)
        {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }

        let body = TokenError::new(self.oauth_error_code(), description);
        (status, headers, Json(body)).into_response()
    }
}

/// HTTP status for an error.
#[must_use]
pub fn status_code(error: &AuthError) -> StatusCode {
    match error {
        AuthError::InvalidClient { .. }
        | AuthError::TokenExpired
        | AuthError::SignatureInvalid
        | AuthError::AudienceMismatch { .. }
        | AuthError::InvalidToken { .. }
        | AuthError::Unauthorized { .. }
        | AuthError::ReauthenticationRequired => StatusCode::UNAUTHORIZED,
        AuthError::UnauthorizedClient { .. }
        | AuthError::InvalidScope { .. }
        | AuthError::InvalidGrant { .. }
        | AuthError::InvalidRequest { .. }
        | AuthError::UnsupportedGrantType { .. } => StatusCode::BAD_REQUEST,
        AuthError::PolicyDenied { .. } => StatusCode::FORBIDDEN,
        AuthError::UpstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn public_description(error: &AuthError) -> String {
    match error {
        AuthError::TokenExpired => "The access token expired".to_string(),
        AuthError::SignatureInvalid
        | AuthError::AudienceMismatch { .. }
        | AuthError::InvalidToken { .. } => "The access token is invalid".to_string(),
        AuthError::Unauthorized { .. } => "A bearer token is required".to_string(),
        AuthError::InvalidClient { .. } => "Client authentication failed".to_string(),
        AuthError::PolicyDenied { policy, .. } => {
            format!("Access denied by policy '{policy}'")
        }
        AuthError::UpstreamUnavailable { .. } => {
            "The identity provider is temporarily unavailable".to_string()
        }
        AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            "Internal server error".to_string()
        }
        other => other.to_string(),
    }
}

fn challenge(error: &AuthError, description: &str) -> Option<String> {
    match error {
        AuthError::InvalidClient { .. } => Some(format!("Basic realm=\"{REALM}\"")),
        AuthError::TokenExpired
        | AuthError::SignatureInvalid
        | AuthError::AudienceMismatch { .. }
        | AuthError::InvalidToken { .. }
        | AuthError::Unauthorized { .. }
        | AuthError::ReauthenticationRequired => Some(format!(
            "Bearer realm=\"{REALM}\", error=\"invalid_token\", error_description=\"{}\"",
            description.replace('"', "\\\"")
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_token_errors_are_401_with_challenge() {
        for err in [
            AuthError::TokenExpired,
            AuthError::SignatureInvalid,
            AuthError::audience_mismatch("movieAPI"),
            AuthError::unauthorized("no header"),
        ] {
            let response = err.into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let challenge = response.headers()[header::WWW_AUTHENTICATE]
                .to_str()
                .unwrap()
                .to_string();
            assert!(challenge.starts_with("Bearer realm=\"marquee\""));
            assert!(challenge.contains("error=\"invalid_token\""));
        }
    }

    #[tokio::test]
    async fn test_descriptions_do_not_leak_details() {
        let response = AuthError::audience_mismatch("movieAPI").into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_token");
        assert!(!body["error_description"].as_str().unwrap().contains("movieAPI"));

        let response = AuthError::internal("db password wrong").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "server_error");
        assert_eq!(body["error_description"], "Internal server error");
    }

    #[tokio::test]
    async fn test_issuance_and_policy_statuses() {
        assert_eq!(
            AuthError::invalid_grant("used").into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::invalid_scope("adminAPI").into_response().status(),
            StatusCode::BAD_REQUEST
        );

        let response = AuthError::invalid_client("bad secret").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers()[header::WWW_AUTHENTICATE]
            .to_str()
            .unwrap()
            .starts_with("Basic"));

        let response = AuthError::policy_denied("AdminPolicy", "role missing").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        let body = body_json(response).await;
        assert_eq!(body["error"], "access_denied");

        assert_eq!(
            AuthError::upstream_unavailable("down").into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
