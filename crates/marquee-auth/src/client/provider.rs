//! Identity provider calls made by the client application.
//!
//! [`IdentityProviderClient`] is the seam between the token manager and the
//! network. [`HttpIdentityProviderClient`] talks to a real provider through
//! endpoints learned from discovery; tests substitute their own
//! implementation.
//!
//! Error mapping:
//!
//! | Outcome                               | Error                                |
//! |---------------------------------------|--------------------------------------|
//! | connection failure                    | [`AuthError::UpstreamUnavailable`]   |
//! | timeout, 5xx, broken response         | [`AuthError::UpstreamUnavailable`], `request_sent` |
//! | OAuth error body (`{"error": ...}`)   | matching variant, e.g. `InvalidGrant`|
//! | 401 from the user-info endpoint       | [`AuthError::Unauthorized`]          |
//! | anything else                         | [`AuthError::Internal`]              |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value};
use url::Url;

use crate::discovery::DiscoveryCache;
use crate::error::AuthError;
use crate::oauth::{TokenError, TokenResponse};

/// Network operations the token manager needs from the identity provider.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    /// Authorization endpoint the browser is redirected to.
    async fn authorization_endpoint(&self) -> Result<Url, AuthError>;

    /// Exchanges an authorization code at the token endpoint.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError>;

    /// Redeems a refresh token at the token endpoint.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError>;

    /// Fetches the user-info document for an access token.
    async fn user_info(&self, access_token: &str) -> Result<Map<String, Value>, AuthError>;

    /// End-session endpoint for RP-initiated logout, if the provider has one.
    async fn end_session_endpoint(&self) -> Result<Option<Url>, AuthError> {
        Ok(None)
    }
}

/// [`IdentityProviderClient`] over HTTP.
///
/// The client authenticates at the token endpoint with HTTP Basic.
pub struct HttpIdentityProviderClient {
    discovery: Arc<DiscoveryCache>,
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    request_timeout: Duration,
}

impl HttpIdentityProviderClient {
    /// Creates a provider client.
    #[must_use]
    pub fn new(
        discovery: Arc<DiscoveryCache>,
        http: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            discovery,
            http,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            request_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn token_endpoint(&self) -> Result<Url, AuthError> {
        let document = self.discovery.get().await?;
        self.discovery.endpoint(&document.token_endpoint)
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let url = self.token_endpoint().await?;
        let request = self
            .http
            .post(url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form);
        let response = self.send(request, "token").await?;
        let status = response.status();

        if status.is_success() {
            return response.json::<TokenResponse>().await.map_err(|e| {
                AuthError::internal(format!("unreadable token response: {e}"))
            });
        }
        if status.is_server_error() {
            return Err(AuthError::upstream_interrupted(format!(
                "token endpoint returned {status}"
            )));
        }

        match response.json::<TokenError>().await {
            Ok(body) => {
                tracing::debug!(
                    status = status.as_u16(),
                    error = %body.error,
                    "Token endpoint rejected the request"
                );
                Err(body.into())
            }
            Err(_) => Err(AuthError::internal(format!(
                "token endpoint returned {status} without an error body"
            ))),
        }
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response, AuthError> {
        match tokio::time::timeout(self.request_timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_connect() => {
                tracing::warn!(endpoint, error = %e, "Identity provider unreachable");
                Err(AuthError::upstream_unavailable(format!(
                    "{endpoint} endpoint unreachable: {e}"
                )))
            }
            Ok(Err(e)) => {
                tracing::warn!(endpoint, error = %e, "Identity provider request failed");
                Err(AuthError::upstream_interrupted(format!(
                    "{endpoint} request failed: {e}"
                )))
            }
            Err(_) => {
                tracing::warn!(
                    endpoint,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Identity provider request timed out"
                );
                Err(AuthError::upstream_interrupted(format!(
                    "{endpoint} endpoint timed out"
                )))
            }
        }
    }
}

#[async_trait]
impl IdentityProviderClient for HttpIdentityProviderClient {
    async fn authorization_endpoint(&self) -> Result<Url, AuthError> {
        let document = self.discovery.get().await?;
        self.discovery.endpoint(&document.authorization_endpoint)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError> {
        self.post_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        self.post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn user_info(&self, access_token: &str) -> Result<Map<String, Value>, AuthError> {
        let document = self.discovery.get().await?;
        let url = self.discovery.endpoint(&document.userinfo_endpoint)?;
        let request = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json");
        let response = self.send(request, "userinfo").await?;

        match response.status() {
            status if status.is_success() => response
                .json::<Map<String, Value>>()
                .await
                .map_err(|e| AuthError::internal(format!("unreadable userinfo response: {e}"))),
            StatusCode::UNAUTHORIZED => Err(AuthError::unauthorized(
                "userinfo endpoint rejected the access token",
            )),
            StatusCode::FORBIDDEN => Err(AuthError::policy_denied(
                "userinfo",
                "access token lacks the openid scope",
            )),
            status if status.is_server_error() => Err(AuthError::upstream_interrupted(format!(
                "userinfo endpoint returned {status}"
            ))),
            status => Err(AuthError::internal(format!(
                "userinfo endpoint returned {status}"
            ))),
        }
    }

    async fn end_session_endpoint(&self) -> Result<Option<Url>, AuthError> {
        let document = self.discovery.get().await?;
        document
            .end_session_endpoint
            .as_deref()
            .map(|raw| self.discovery.endpoint(raw))
            .transpose()
    }
}

impl std::fmt::Debug for HttpIdentityProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProviderClient")
            .field("authority", &self.discovery.authority().as_str())
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
