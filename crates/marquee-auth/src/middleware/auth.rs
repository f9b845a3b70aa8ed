//! Bearer token extraction and policy enforcement for the resource server.
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware::from_fn_with_state, routing::get};
//! use marquee_auth::middleware::{BearerAuth, ResourceState, enforce_policies};
//!
//! async fn identity(BearerAuth(claims): BearerAuth) -> String {
//!     claims.subject
//! }
//!
//! let app = Router::new()
//!     .route("/api/identity", get(identity))
//!     .route(
//!         "/api/admin",
//!         get(identity).route_layer(from_fn_with_state(state.guard(["AdminPolicy"]), enforce_policies)),
//!     )
//!     .with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::error::AuthError;
use crate::policy::PolicyEngine;
use crate::token::{TokenValidator, ValidatedClaims};

// =============================================================================
// Resource State
// =============================================================================

/// State the resource server's extractors need.
#[derive(Clone)]
pub struct ResourceState {
    /// Validator backed by the identity provider's keys.
    pub validator: TokenValidator,
    /// Named authorization policies.
    pub policies: Arc<PolicyEngine>,
    /// Audience this resource server accepts.
    pub audience: Arc<str>,
}

impl ResourceState {
    /// Creates resource state.
    #[must_use]
    pub fn new(validator: TokenValidator, policies: Arc<PolicyEngine>, audience: &str) -> Self {
        Self {
            validator,
            policies,
            audience: Arc::from(audience),
        }
    }

    /// Guard state requiring every policy in `names`.
    #[must_use]
    pub fn guard<I, S>(&self, names: I) -> PolicyGuard
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PolicyGuard {
            state: self.clone(),
            policies: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceState")
            .field("audience", &self.audience)
            .field("policies", &self.policies.names())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Bearer Auth Extractor
// =============================================================================

/// Validated claims of the request's bearer token.
///
/// Rejects with [`AuthError::Unauthorized`] when no bearer token is present,
/// or with the validator's error. Claims already validated by
/// [`enforce_policies`] are reused.
#[derive(Debug, Clone)]
pub struct BearerAuth(pub ValidatedClaims);

impl<S> FromRequestParts<S> for BearerAuth
where
    S: Send + Sync,
    ResourceState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(claims) = parts.extensions.get::<ValidatedClaims>() {
            return Ok(Self(claims.clone()));
        }

        let state = ResourceState::from_ref(state);
        let token = bearer_token(parts)
            .ok_or_else(|| AuthError::unauthorized("missing bearer token"))?;

        let claims = state
            .validator
            .validate(token, &state.audience)
            .await
            .map_err(|e| {
                tracing::debug!(
                    path = %parts.uri.path(),
                    error = %e,
                    "Bearer token rejected"
                );
                e
            })?;

        tracing::debug!(
            subject = %claims.subject,
            client_id = claims.client_id().unwrap_or("-"),
            path = %parts.uri.path(),
            "Bearer token accepted"
        );
        parts.extensions.insert(claims.clone());
        Ok(Self(claims))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

// =============================================================================
// Policy Enforcement
// =============================================================================

/// State of one [`enforce_policies`] layer.
#[derive(Clone, Debug)]
pub struct PolicyGuard {
    state: ResourceState,
    policies: Vec<String>,
}

impl PolicyGuard {
    /// Policies this guard requires.
    #[must_use]
    pub fn policies(&self) -> &[String] {
        &self.policies
    }
}

/// Middleware that authenticates the request and requires every policy of
/// the guard to allow it.
///
/// # Errors
///
/// Returns the bearer rejection, or [`AuthError::PolicyDenied`] for the first
/// denying policy.
pub async fn enforce_policies(
    State(guard): State<PolicyGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = request.into_parts();
    let BearerAuth(claims) = BearerAuth::from_request_parts(&mut parts, &guard.state).await?;

    let decision = guard
        .state
        .policies
        .evaluate_all(guard.policies.as_slice(), &claims.claims);
    if let Some(reason) = decision.deny_reason() {
        tracing::warn!(
            subject = %claims.subject,
            policy = %reason.policy,
            code = %reason.code,
            path = %parts.uri.path(),
            "Authorization policy denied request"
        );
    }
    decision.into_result()?;

    Ok(next.run(Request::from_parts(parts, body)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, body::Body, http::StatusCode, middleware::from_fn_with_state, routing::get};
    use serde_json::{Map, Value};
    use time::OffsetDateTime;
    use tower::ServiceExt;

    use crate::claims::ClaimPair;
    use crate::config::AuthConfig;
    use crate::token::jwt::{AccessTokenClaims, SigningAlgorithm, SigningKeyPair};
    use crate::token::{KeyRing, ValidationSettings};

    const ISSUER: &str = "http://localhost:5005";

    struct Fixture {
        ring: Arc<KeyRing>,
        app: Router,
    }

    async fn identity(BearerAuth(claims): BearerAuth) -> Json<Vec<ClaimPair>> {
        Json(claims.pairs())
    }

    fn fixture() -> Fixture {
        let ring = Arc::new(KeyRing::new(
            SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
            1,
        ));
        let validator = TokenValidator::new(ring.clone(), ValidationSettings::new(ISSUER));
        let policies =
            Arc::new(PolicyEngine::from_definitions(&AuthConfig::default().policies).unwrap());
        let state = ResourceState::new(validator, policies, "movieAPI");

        let app = Router::new()
            .route("/api/identity", get(identity))
            .route(
                "/api/admin",
                get(identity).route_layer(from_fn_with_state(
                    state.guard(["AdminPolicy"]),
                    enforce_policies,
                )),
            )
            .with_state(state);
        Fixture { ring, app }
    }

    fn token(ring: &KeyRing, audience: &str, role: Option<&str>, exp_offset: i64) -> String {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let mut claims = Map::new();
        if let Some(role) = role {
            claims.insert("role".to_string(), Value::String(role.to_string()));
        }
        ring.sign(&AccessTokenClaims {
            iss: ISSUER.to_string(),
            sub: "alice".to_string(),
            aud: vec![audience.to_string()],
            exp: now + exp_offset,
            iat: now,
            nbf: now,
            jti: "jti-1".to_string(),
            client_id: "movies_mvc_client".to_string(),
            scope: "openid roles movieAPI".to_string(),
            claims,
        })
        .unwrap()
    }

    async fn send(app: Router, uri: &str, bearer: Option<&str>) -> Response {
        let mut request = axum::http::Request::builder().uri(uri);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_401() {
        let Fixture { app, .. } = fixture();
        let response = send(app, "/api/identity", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("www-authenticate"));
    }

    #[tokio::test]
    async fn test_valid_token_returns_claim_pairs() {
        let Fixture { ring, app } = fixture();
        let token = token(&ring, "movieAPI", None, 60);
        let response = send(app, "/api/identity", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let pairs: Vec<ClaimPair> = serde_json::from_slice(&bytes).unwrap();
        assert!(pairs.iter().any(|p| p.claim_type == "sub" && p.value == "alice"));
        assert!(pairs.iter().any(|p| p.claim_type == "scope" && p.value == "movieAPI"));
    }

    #[tokio::test]
    async fn test_expired_and_wrong_audience_are_401() {
        let Fixture { ring, app } = fixture();
        let expired = token(&ring, "movieAPI", None, -1);
        let response = send(app.clone(), "/api/identity", Some(&expired)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let foreign = token(&ring, "billingAPI", None, 60);
        let response = send(app, "/api/identity", Some(&foreign)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_policy_guard() {
        let Fixture { ring, app } = fixture();
        let admin = token(&ring, "movieAPI", Some("admin"), 60);
        let response = send(app.clone(), "/api/admin", Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let editor = token(&ring, "movieAPI", Some("editor"), 60);
        let response = send(app.clone(), "/api/admin", Some(&editor)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(app, "/api/admin", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_bearer_scheme_is_case_insensitive() {
        let (mut parts, _) = axum::http::Request::builder()
            .header(AUTHORIZATION, "bearer abc")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(bearer_token(&parts), Some("abc"));

        parts
            .headers
            .insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&parts), None);

        parts.headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&parts), None);
    }
}
