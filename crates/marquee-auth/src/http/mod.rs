//! HTTP endpoints of the identity provider.
//!
//! | Path                                          | Handler                          |
//! |-----------------------------------------------|----------------------------------|
//! | `GET /.well-known/openid-configuration`       | [`discovery::discovery_handler`] |
//! | `GET /.well-known/openid-configuration/jwks`  | [`jwks::jwks_handler`]           |
//! | `GET, POST /connect/authorize`                | [`authorize`]                    |
//! | `POST /connect/token`                         | [`token::token_handler`]         |
//! | `GET, POST /connect/userinfo`                 | [`userinfo::userinfo_handler`]   |
//! | `GET /connect/endsession`                     | [`logout::end_session_handler`]  |

pub mod authorize;
pub mod discovery;
pub mod jwks;
pub mod logout;
pub mod token;
pub mod userinfo;

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    routing::{get, post},
};

use crate::discovery::{DISCOVERY_PATH, JWKS_PATH};
use crate::middleware::ResourceState;
use crate::policy::PolicyEngine;
use crate::token::{TokenIssuer, TokenValidator, ValidationSettings};

pub const AUTHORIZE_PATH: &str = "/connect/authorize";
pub const TOKEN_PATH: &str = "/connect/token";
pub const USERINFO_PATH: &str = "/connect/userinfo";
pub const END_SESSION_PATH: &str = "/connect/endsession";

/// State shared by the identity provider's handlers.
#[derive(Clone)]
pub struct ProviderState {
    pub issuer: Arc<TokenIssuer>,
    /// Validates bearer tokens presented to the user-info endpoint and
    /// identity token hints. Audience is not checked: any token this
    /// provider signed is acceptable here.
    pub bearer: ResourceState,
}

impl ProviderState {
    /// Creates state around an issuer, validating against its own keys.
    #[must_use]
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        let validator = TokenValidator::new(
            issuer.keys().clone(),
            ValidationSettings::new(issuer.issuer()).without_audience_validation(),
        );
        let bearer = ResourceState::new(validator, Arc::new(PolicyEngine::default()), "");
        Self { issuer, bearer }
    }
}

impl FromRef<ProviderState> for ResourceState {
    fn from_ref(state: &ProviderState) -> Self {
        state.bearer.clone()
    }
}

impl std::fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderState")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

/// Router with every identity provider endpoint.
pub fn router(state: ProviderState) -> Router {
    Router::new()
        .route(DISCOVERY_PATH, get(discovery::discovery_handler))
        .route(JWKS_PATH, get(jwks::jwks_handler))
        .route(
            AUTHORIZE_PATH,
            get(authorize::authorize_prompt).post(authorize::authorize_submit),
        )
        .route(TOKEN_PATH, post(token::token_handler))
        .route(
            USERINFO_PATH,
            get(userinfo::userinfo_handler).post(userinfo::userinfo_handler),
        )
        .route(END_SESSION_PATH, get(logout::end_session_handler))
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state() -> ProviderState {
    use crate::catalog::test_catalog;
    use crate::config::OAuthConfig;
    use crate::registry::test_registry;
    use crate::token::{KeyRing, SigningAlgorithm, SigningKeyPair};

    let keys = Arc::new(KeyRing::new(
        SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
        1,
    ));
    let issuer = TokenIssuer::new(
        "http://localhost:5005",
        Arc::new(test_catalog()),
        Arc::new(test_registry()),
        keys,
        OAuthConfig::default(),
    );
    ProviderState::new(Arc::new(issuer))
}

#[cfg(test)]
pub(crate) async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
