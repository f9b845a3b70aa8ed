//! User-info endpoint (`GET, POST /connect/userinfo`).

use axum::{Json, extract::State};
use serde_json::{Map, Value};

use super::ProviderState;
use crate::error::AuthError;
use crate::middleware::BearerAuth;

/// Returns the claims of the access token's user that its identity scopes
/// grant. `sub` is always present.
///
/// # Errors
///
/// - `401` without a valid access token
/// - `403` when the token lacks the `openid` scope
pub async fn userinfo_handler(
    State(state): State<ProviderState>,
    BearerAuth(token): BearerAuth,
) -> Result<Json<Map<String, Value>>, AuthError> {
    let info = state.issuer.user_info(&token)?;
    tracing::debug!(
        subject = %token.subject,
        claims = info.len(),
        "Served user info"
    );
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use crate::http::{ProviderState, USERINFO_PATH, body_json, router, test_state};
    use crate::token::{ClientCredentials, GrantRequest};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use tower::ServiceExt;

    async fn get(state: &ProviderState, bearer: Option<&str>) -> Response {
        let mut request = Request::builder().uri(USERINFO_PATH);
        if let Some(token) = bearer {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        router(state.clone())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn user_token(state: &ProviderState, scope: &str) -> String {
        let validated = state
            .issuer
            .validate_authorize_request(&crate::token::AuthorizeRequest {
                client_id: "movies_mvc_client".to_string(),
                redirect_uri: "http://localhost:5002/signin-oidc".to_string(),
                response_type: "code".to_string(),
                scope: scope.to_string(),
                state: None,
                nonce: None,
            })
            .unwrap();
        let principal = state.issuer.catalog().authenticate_user("alice", "alice").unwrap();
        let code = state.issuer.authorize(&validated, &principal);
        state
            .issuer
            .issue(GrantRequest::AuthorizationCode {
                client: ClientCredentials::new("movies_mvc_client", "secret"),
                code,
                redirect_uri: "http://localhost:5002/signin-oidc".to_string(),
            })
            .unwrap()
            .access_token
    }

    #[tokio::test]
    async fn test_profile_claims_for_profile_scope() {
        let state = test_state();
        let token = user_token(&state, "openid profile movieAPI").await;
        let response = get(&state, Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["sub"], "5BE86359-073C-434B-AD2D-A3932222DABE");
        assert_eq!(body["given_name"], "Alice");
        assert!(body.get("email").is_none());
        assert!(body.get("role").is_none());
    }

    #[tokio::test]
    async fn test_missing_or_machine_token() {
        let state = test_state();
        let response = get(&state, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let machine = state
            .issuer
            .issue(GrantRequest::ClientCredentials {
                client: ClientCredentials::new("movieClient", "secret"),
                scopes: vec!["movieAPI".to_string()],
            })
            .unwrap()
            .access_token;
        let response = get(&state, Some(&machine)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
