//! Client application process.
//!
//! Signs users in at the identity provider with the authorization-code flow
//! and calls the movies API on their behalf.
//!
//! ```text
//! GET  /login                  → 303 to the provider's authorize endpoint
//! GET  /signin-oidc            → state check, code exchange, session cookie
//! GET  /claims                 → identity token claims
//! GET  /userinfo               → provider's user-info for the session
//! GET  /identity, /admin       → movies API through the interceptor
//! POST /logout                 → drop the session, 303 to the provider
//! GET  /signout-callback-oidc  → landing page after provider logout
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};
use marquee_auth::AuthError;
use marquee_auth::claims::ClaimPair;
use marquee_auth::client::{
    ClientTokenManager, HttpIdentityProviderClient, OutboundRequestInterceptor,
    ResourceApiClient, SessionId,
};
use marquee_auth::discovery::DiscoveryCache;
use marquee_auth::token::{JwksCache, TokenValidator, ValidationSettings};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::Duration;
use uuid::Uuid;

use crate::config::AppConfig;

pub const SESSION_COOKIE_NAME: &str = "marquee_session";
pub const STATE_COOKIE_NAME: &str = "marquee_oidc_state";
pub const NONCE_COOKIE_NAME: &str = "marquee_oidc_nonce";

/// Lifetime of the state and nonce cookies of a pending login.
const LOGIN_COOKIE_MAX_AGE: Duration = Duration::minutes(10);

/// Shared state of the client application.
#[derive(Clone, Debug)]
pub struct ClientAppState {
    pub manager: Arc<ClientTokenManager>,
    pub api: ResourceApiClient,
    pub secure_cookies: bool,
}

/// Builds the client application's router.
pub fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let client = &cfg.auth.client;
    let http = reqwest::Client::builder()
        .timeout(client.request_timeout)
        .build()?;
    let discovery = Arc::new(DiscoveryCache::new(
        &client.authority,
        http.clone(),
        client.allow_http,
        client.request_timeout,
    )?);

    let provider = HttpIdentityProviderClient::new(
        discovery.clone(),
        http.clone(),
        client.client_id.clone(),
        client.client_secret.clone(),
    )
    .with_request_timeout(client.request_timeout);
    let keys = JwksCache::from_discovery(discovery, http.clone())
        .with_min_refresh_interval(cfg.auth.resource.jwks_min_refresh_interval)
        .with_request_timeout(client.request_timeout);
    let validator = TokenValidator::new(
        Arc::new(keys),
        ValidationSettings::new(client.authority.trim_end_matches('/')),
    );

    let manager = Arc::new(ClientTokenManager::new(
        Arc::new(provider),
        validator,
        client,
    ));
    let api = ResourceApiClient::new(
        http,
        &client.resource_base_url,
        OutboundRequestInterceptor::new(manager.clone()),
    )?
    .with_request_timeout(client.request_timeout);

    tracing::info!(
        authority = %client.authority,
        client_id = %client.client_id,
        resource = %client.resource_base_url,
        "Client application configured"
    );
    Ok(router(ClientAppState {
        manager,
        api,
        secure_cookies: cfg.server.secure_cookies,
    }))
}

pub fn router(state: ClientAppState) -> Router {
    Router::new()
        .route("/login", get(login))
        .route("/signin-oidc", get(signin_callback))
        .route("/claims", get(claims))
        .route("/userinfo", get(userinfo))
        .route("/identity", get(identity))
        .route("/admin", get(admin))
        .route("/logout", post(logout))
        .route("/signout-callback-oidc", get(signed_out))
        .with_state(state)
}

fn login_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(LOGIN_COOKIE_MAX_AGE)
        .build()
}

fn session_cookie(id: &SessionId, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, id.as_str().to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

fn removal(name: &'static str) -> Cookie<'static> {
    Cookie::build(name).path("/").build()
}

fn session_id(jar: &CookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|c| SessionId::from(c.value().to_string()))
}

async fn login(
    State(state): State<ClientAppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AuthError> {
    let csrf = Uuid::new_v4().simple().to_string();
    let nonce = Uuid::new_v4().simple().to_string();
    let url = state.manager.authorization_url(&csrf, &nonce).await?;

    let jar = jar
        .add(login_cookie(STATE_COOKIE_NAME, csrf, state.secure_cookies))
        .add(login_cookie(NONCE_COOKIE_NAME, nonce, state.secure_cookies));
    Ok((jar, Redirect::to(url.as_str())))
}

/// Authorization response parameters.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

async fn signin_callback(
    State(state): State<ClientAppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Result<(CookieJar, Redirect), AuthError> {
    let expected = jar.get(STATE_COOKIE_NAME).map(|c| c.value().to_string());
    let nonce = jar.get(NONCE_COOKIE_NAME).map(|c| c.value().to_string());
    let jar = jar.remove(removal(STATE_COOKIE_NAME)).remove(removal(NONCE_COOKIE_NAME));

    if expected.is_none() || params.state != expected {
        tracing::warn!("Sign-in callback with missing or mismatched state");
        return Err(AuthError::invalid_request("state does not match the login request"));
    }
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        tracing::info!(error = %error, description = %description, "Sign-in was not completed");
        return Err(match error.as_str() {
            "access_denied" => AuthError::unauthorized(format!("sign-in declined: {description}")),
            code => AuthError::from_oauth_error_code(code, description),
        });
    }
    let code = params
        .code
        .ok_or_else(|| AuthError::invalid_request("authorization response without code"))?;

    let session = state.manager.login(&code, nonce.as_deref()).await?;
    let jar = jar.add(session_cookie(session.id(), state.secure_cookies));
    Ok((jar, Redirect::to("/claims")))
}

async fn claims(
    State(state): State<ClientAppState>,
    jar: CookieJar,
) -> Result<Json<Vec<ClaimPair>>, AuthError> {
    let session = session_id(&jar)
        .and_then(|id| state.manager.session(&id))
        .ok_or(AuthError::ReauthenticationRequired)?;
    Ok(Json(session.identity().pairs()))
}

async fn userinfo(
    State(state): State<ClientAppState>,
    jar: CookieJar,
) -> Result<Json<Map<String, Value>>, AuthError> {
    let id = session_id(&jar).ok_or(AuthError::ReauthenticationRequired)?;
    Ok(Json(state.manager.user_info(&id).await?))
}

async fn identity(
    State(state): State<ClientAppState>,
    jar: CookieJar,
) -> Result<Json<Vec<ClaimPair>>, AuthError> {
    let id = session_id(&jar);
    Ok(Json(state.api.identity(id.as_ref()).await?))
}

async fn admin(
    State(state): State<ClientAppState>,
    jar: CookieJar,
) -> Result<Json<Vec<ClaimPair>>, AuthError> {
    let id = session_id(&jar);
    Ok(Json(state.api.get_json("/api/admin", id.as_ref()).await?))
}

async fn logout(State(state): State<ClientAppState>, jar: CookieJar) -> Response {
    let session = session_id(&jar).and_then(|id| state.manager.logout(&id));
    let jar = jar.remove(removal(SESSION_COOKIE_NAME));

    let target = match session {
        Some(session) => state.manager.end_session_url(&session, None).await,
        None => None,
    };
    match target {
        Some(url) => (jar, Redirect::to(url.as_str())).into_response(),
        None => (jar, Redirect::to("/signout-callback-oidc")).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct SignedOut {
    logged_out: bool,
}

async fn signed_out() -> Json<SignedOut> {
    Json(SignedOut { logged_out: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_authority(authority: &str, allow_http: bool) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.auth.client.authority = authority.to_string();
        cfg.auth.client.allow_http = allow_http;
        cfg
    }

    #[tokio::test]
    async fn test_plain_http_authority_needs_opt_in() {
        assert!(build_app(&config_with_authority("http://idp.internal:5005", false)).is_err());
        assert!(build_app(&config_with_authority("http://idp.internal:5005", true)).is_ok());
        assert!(build_app(&config_with_authority("http://localhost:5005", false)).is_ok());
    }
}
