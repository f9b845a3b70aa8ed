//! End-session endpoint (`GET /connect/endsession`).
//!
//! RP-initiated logout: the client sends the user here with the identity
//! token it holds as `id_token_hint`. The refresh tokens issued to that
//! client for that user are revoked. The user agent is sent on to
//! `post_logout_redirect_uri` only when it is registered for the client
//! named by the hint.

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::ProviderState;
use super::authorize::redirect;
use crate::error::AuthError;

/// End-session parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndSessionParams {
    #[serde(default)]
    pub id_token_hint: Option<String>,
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Body returned when there is nowhere to redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub logged_out: bool,
    /// Refresh tokens revoked by this request.
    pub revoked: usize,
}

/// Handler for `GET /connect/endsession`.
///
/// # Errors
///
/// [`AuthError::InvalidRequest`] for a forged or foreign `id_token_hint`, or
/// a `post_logout_redirect_uri` that is not registered or comes without a
/// hint.
pub async fn end_session_handler(
    State(state): State<ProviderState>,
    query: Result<Query<EndSessionParams>, QueryRejection>,
) -> Result<Response, AuthError> {
    let Query(params) = query.map_err(|e| AuthError::invalid_request(e.body_text()))?;

    let Some(raw) = params.id_token_hint.as_deref() else {
        if params.post_logout_redirect_uri.is_some() {
            return Err(AuthError::invalid_request(
                "post_logout_redirect_uri requires id_token_hint",
            ));
        }
        return Ok(Json(EndSessionResponse {
            logged_out: true,
            revoked: 0,
        })
        .into_response());
    };

    // Identity tokens are short-lived; an expired hint still names the session.
    let hint = state
        .bearer
        .validator
        .validate_hint(raw, "")
        .await
        .map_err(|e| AuthError::invalid_request(format!("id_token_hint rejected: {e}")))?;
    let client = hint
        .audiences
        .first()
        .and_then(|aud| state.issuer.clients().get(aud))
        .ok_or_else(|| AuthError::invalid_request("id_token_hint names no registered client"))?;

    let revoked = state.issuer.end_session(&client.client_id, &hint.subject);

    match params.post_logout_redirect_uri.as_deref() {
        Some(uri) if client.is_post_logout_redirect_uri_allowed(uri) => {
            redirect(uri, &[], params.state.as_deref())
        }
        Some(_) => Err(AuthError::invalid_request(
            "post_logout_redirect_uri is not registered",
        )),
        None => Ok(Json(EndSessionResponse {
            logged_out: true,
            revoked,
        })
        .into_response()),
    }
}
