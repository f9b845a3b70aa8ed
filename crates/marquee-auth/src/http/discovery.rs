//! OpenID Connect discovery endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::{AUTHORIZE_PATH, END_SESSION_PATH, ProviderState, TOKEN_PATH, USERINFO_PATH};
use crate::discovery::{DiscoveryDocument, JWKS_PATH};
use crate::token::TokenIssuer;
use crate::types::GrantType;

/// Builds the provider metadata from the issuer's catalog and keys.
///
/// Endpoint URLs are derived from the configured issuer, not from the bind
/// address.
#[must_use]
pub fn build_document(issuer: &TokenIssuer) -> DiscoveryDocument {
    let base = issuer.issuer();
    let catalog = issuer.catalog();

    DiscoveryDocument {
        issuer: base.to_string(),
        authorization_endpoint: format!("{base}{AUTHORIZE_PATH}"),
        token_endpoint: format!("{base}{TOKEN_PATH}"),
        userinfo_endpoint: format!("{base}{USERINFO_PATH}"),
        jwks_uri: format!("{base}{JWKS_PATH}"),
        end_session_endpoint: Some(format!("{base}{END_SESSION_PATH}")),
        scopes_supported: catalog.supported_scopes(),
        claims_supported: catalog
            .supported_claims()
            .iter()
            .map(|c| c.as_str().to_string())
            .collect(),
        grant_types_supported: [
            GrantType::AuthorizationCode,
            GrantType::ClientCredentials,
            GrantType::RefreshToken,
        ]
        .iter()
        .map(|g| g.as_str().to_string())
        .collect(),
        response_types_supported: vec!["code".to_string()],
        subject_types_supported: vec!["public".to_string()],
        id_token_signing_alg_values_supported: issuer.keys().algorithms(),
        token_endpoint_auth_methods_supported: vec![
            "client_secret_basic".to_string(),
            "client_secret_post".to_string(),
        ],
    }
}

/// Handler for `GET /.well-known/openid-configuration`.
pub async fn discovery_handler(State(state): State<ProviderState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(build_document(&state.issuer)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{body_json, router, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_document_advertises_catalog_and_endpoints() {
        let state = test_state();
        let document = build_document(&state.issuer);

        assert_eq!(document.issuer, "http://localhost:5005");
        assert_eq!(
            document.token_endpoint,
            "http://localhost:5005/connect/token"
        );
        assert_eq!(
            document.jwks_uri,
            "http://localhost:5005/.well-known/openid-configuration/jwks"
        );
        for scope in ["openid", "profile", "movieAPI", "offline_access"] {
            assert!(document.scopes_supported.iter().any(|s| s == scope), "{scope}");
        }
        assert!(document.claims_supported.iter().any(|c| c == "sub"));
        assert_eq!(document.id_token_signing_alg_values_supported, vec!["ES384"]);
    }

    #[tokio::test]
    async fn test_discovery_is_served_as_json() {
        let response = router(test_state())
            .oneshot(
                Request::builder()
                    .uri("/.well-known/openid-configuration")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["issuer"], "http://localhost:5005");
        assert_eq!(
            body["end_session_endpoint"],
            "http://localhost:5005/connect/endsession"
        );
    }
}
