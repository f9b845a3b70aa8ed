//! JWKS endpoint.
//!
//! Publishes the public half of every key in the issuer's [`KeyRing`], so
//! tokens signed before a rotation keep validating until their key is
//! dropped.
//!
//! [`KeyRing`]: crate::token::KeyRing

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use super::ProviderState;

/// Handler for `GET /.well-known/openid-configuration/jwks`.
pub async fn jwks_handler(State(state): State<ProviderState>) -> impl IntoResponse {
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(state.issuer.keys().jwks()),
    )
}

#[cfg(test)]
mod tests {
    use crate::http::{body_json, router, test_state};
    use crate::token::{SigningAlgorithm, SigningKeyPair};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    fn request() -> Request<Body> {
        Request::builder()
            .uri("/.well-known/openid-configuration/jwks")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_jwks_lists_public_keys() {
        let response = router(test_state()).oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "public, max-age=3600"
        );

        let body = body_json(response).await;
        let keys = body["keys"].as_array().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0]["kty"], "EC");
        assert_eq!(keys[0]["alg"], "ES384");
        assert!(keys[0].get("d").is_none());
    }

    #[tokio::test]
    async fn test_rotated_keys_stay_published() {
        let state = test_state();
        let old_kid = state.issuer.keys().current().kid.clone();
        state
            .issuer
            .keys()
            .rotate_with(SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap());

        let body = body_json(router(state).oneshot(request()).await.unwrap()).await;
        let kids: Vec<&str> = body["keys"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|k| k["kid"].as_str())
            .collect();
        assert_eq!(kids.len(), 2);
        assert!(kids.contains(&old_kid.as_str()));
    }
}
