//! Authorization endpoint (`/connect/authorize`).
//!
//! `GET` validates the request and returns the login and consent prompt as
//! JSON: the client, the requested scopes with their display names, and the
//! form fields to post back. `POST` takes the same parameters plus the
//! user's credentials and consent, and answers with a `302` to the client's
//! redirect URI carrying `code` and `state`.
//!
//! Errors in the client or redirect URI are never redirected; they are
//! returned to the user agent as JSON.

use axum::{
    Form, Json,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{AUTHORIZE_PATH, ProviderState};
use crate::error::AuthError;
use crate::oauth::TokenError;
use crate::token::{AuthorizeRequest, ValidatedAuthorizeRequest};

// =============================================================================
// Types
// =============================================================================

/// A scope shown on the consent prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePrompt {
    pub name: String,
    pub display_name: String,
}

/// Login and consent prompt for a valid authorization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizePrompt {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uri: String,
    pub scopes: Vec<ScopePrompt>,
    pub offline_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Where the login form is posted.
    pub action: String,
    /// Fields the login form adds to the request parameters.
    pub fields: Vec<String>,
}

impl AuthorizePrompt {
    fn new(request: &ValidatedAuthorizeRequest) -> Self {
        let identity = request.scopes.identity_resources.iter().map(|r| ScopePrompt {
            name: r.name.clone(),
            display_name: r.display_name.clone(),
        });
        let api = request.scopes.api_scopes.iter().map(|s| ScopePrompt {
            name: s.name.clone(),
            display_name: s.display_name.clone(),
        });
        Self {
            client_id: request.client.client_id.clone(),
            client_name: request.client.name.clone(),
            redirect_uri: request.redirect_uri.clone(),
            scopes: identity.chain(api).collect(),
            offline_access: request.scopes.offline_access,
            state: request.state.clone(),
            nonce: request.nonce.clone(),
            action: AUTHORIZE_PATH.to_string(),
            fields: ["username", "password", "consent"]
                .iter()
                .map(|f| (*f).to_string())
                .collect(),
        }
    }
}

/// Login form posted back to the authorization endpoint.
#[derive(Clone, Deserialize)]
pub struct AuthorizeSubmission {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_response_type")]
    pub response_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    pub username: String,
    pub password: String,
    /// `allow` (default) or `deny`.
    #[serde(default)]
    pub consent: Option<String>,
}

fn default_response_type() -> String {
    "code".to_string()
}

impl AuthorizeSubmission {
    fn request(&self) -> AuthorizeRequest {
        AuthorizeRequest {
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            response_type: self.response_type.clone(),
            scope: self.scope.clone(),
            state: self.state.clone(),
            nonce: self.nonce.clone(),
        }
    }

    fn denied(&self) -> bool {
        self.consent
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case("deny"))
    }
}

impl std::fmt::Debug for AuthorizeSubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizeSubmission")
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handler for `GET /connect/authorize`.
///
/// # Errors
///
/// See [`crate::token::TokenIssuer::validate_authorize_request`].
pub async fn authorize_prompt(
    State(state): State<ProviderState>,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Result<Json<AuthorizePrompt>, AuthError> {
    let Query(request) = query.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    let validated = state.issuer.validate_authorize_request(&request)?;
    Ok(Json(AuthorizePrompt::new(&validated)))
}

/// Handler for `POST /connect/authorize`.
///
/// Wrong credentials get a `401` so the prompt can be shown again; a denied
/// consent is redirected back to the client with `error=access_denied`.
///
/// # Errors
///
/// See [`crate::token::TokenIssuer::validate_authorize_request`].
pub async fn authorize_submit(
    State(state): State<ProviderState>,
    form: Result<Form<AuthorizeSubmission>, FormRejection>,
) -> Result<Response, AuthError> {
    let Form(submission) = form.map_err(|e| AuthError::invalid_request(e.body_text()))?;
    let validated = state.issuer.validate_authorize_request(&submission.request())?;

    if submission.denied() {
        tracing::info!(
            client_id = %validated.client.client_id,
            username = %submission.username,
            "User denied consent"
        );
        return redirect(
            &validated.redirect_uri,
            &[("error", "access_denied")],
            validated.state.as_deref(),
        );
    }

    // Password hashing is CPU-bound.
    let issuer = state.issuer.clone();
    let (username, password) = (submission.username.clone(), submission.password.clone());
    let principal = tokio::task::spawn_blocking(move || {
        issuer.catalog().authenticate_user(&username, &password)
    })
    .await
    .map_err(|e| AuthError::internal(format!("login task failed: {e}")))?;

    let principal = match principal {
        Ok(principal) => principal,
        Err(AuthError::Unauthorized { .. }) => {
            tracing::warn!(
                client_id = %validated.client.client_id,
                username = %submission.username,
                "Login failed"
            );
            return Ok(login_failed());
        }
        Err(e) => return Err(e),
    };

    let code = state.issuer.authorize(&validated, &principal);
    redirect(
        &validated.redirect_uri,
        &[("code", code.as_str())],
        validated.state.as_deref(),
    )
}

/// `302 Found` to `redirect_uri` with `params` and `state` appended.
pub(super) fn redirect(
    redirect_uri: &str,
    params: &[(&str, &str)],
    state: Option<&str>,
) -> Result<Response, AuthError> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| AuthError::invalid_request(format!("redirect_uri: {e}")))?;
    if !params.is_empty() || state.is_some() {
        let mut query = url.query_pairs_mut();
        query.extend_pairs(params);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, url.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response())
}

fn login_failed() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::CACHE_CONTROL, "no-store")],
        Json(TokenError::new(
            "access_denied",
            "invalid username or password",
        )),
    )
        .into_response()
}
