//! Resource server process: the protected movies API.
//!
//! | Route               | Requirement                  |
//! |---------------------|------------------------------|
//! | `GET /api/identity` | any valid access token       |
//! | `GET /api/client`   | `ClientIdPolicy`             |
//! | `GET /api/admin`    | `AdminPolicy`                |
//! | `GET /api/editor`   | `EditorPolicy`               |
//!
//! Every route answers with the caller's claims as `[{type, value}]`.

use std::sync::Arc;

use axum::{Json, Router, middleware::from_fn_with_state, routing::get};
use marquee_auth::claims::ClaimPair;
use marquee_auth::config::ResourceConfig;
use marquee_auth::discovery::DiscoveryCache;
use marquee_auth::middleware::{BearerAuth, ResourceState, enforce_policies};
use marquee_auth::policy::PolicyEngine;
use marquee_auth::token::{JwksCache, TokenValidator, ValidationSettings};

use crate::config::AppConfig;

/// Builds the resource server's router. Verification keys are fetched from
/// the configured authority on first use.
pub fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let resource = &cfg.auth.resource;
    let http = reqwest::Client::builder()
        .timeout(resource.request_timeout)
        .build()?;
    let discovery = Arc::new(DiscoveryCache::new(
        &resource.authority,
        http.clone(),
        resource.allow_http,
        resource.request_timeout,
    )?);
    let jwks = JwksCache::from_discovery(discovery, http)
        .with_min_refresh_interval(resource.jwks_min_refresh_interval)
        .with_request_timeout(resource.request_timeout);

    let validator = TokenValidator::new(Arc::new(jwks), validation_settings(resource));
    let policies = Arc::new(PolicyEngine::from_definitions(&cfg.auth.policies)?);

    tracing::info!(
        authority = %resource.authority,
        audience = %resource.audience,
        policies = ?policies.names(),
        "Resource server configured"
    );
    Ok(router(ResourceState::new(
        validator,
        policies,
        &resource.audience,
    )))
}

fn validation_settings(resource: &ResourceConfig) -> ValidationSettings {
    let settings = ValidationSettings::new(resource.authority.trim_end_matches('/'))
        .with_clock_skew(resource.clock_skew);
    if resource.validate_audience {
        settings
    } else {
        tracing::warn!("Audience validation disabled for this resource server");
        settings.without_audience_validation()
    }
}

pub fn router(state: ResourceState) -> Router {
    let guarded = |policy: &str| {
        get(claims).route_layer(from_fn_with_state(
            state.guard([policy]),
            enforce_policies,
        ))
    };

    Router::new()
        .route("/api/identity", get(claims))
        .route("/api/client", guarded("ClientIdPolicy"))
        .route("/api/admin", guarded("AdminPolicy"))
        .route("/api/editor", guarded("EditorPolicy"))
        .with_state(state)
}

async fn claims(BearerAuth(token): BearerAuth) -> Json<Vec<ClaimPair>> {
    Json(token.pairs())
}
