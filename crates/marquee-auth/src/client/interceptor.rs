//! Bearer token attachment for calls to the resource server.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::manager::ClientTokenManager;
use super::session::SessionId;
use crate::claims::ClaimPair;
use crate::error::AuthError;

/// Adds the session's access token to outbound requests.
#[derive(Debug, Clone)]
pub struct OutboundRequestInterceptor {
    manager: Arc<ClientTokenManager>,
}

impl OutboundRequestInterceptor {
    /// Creates an interceptor backed by `manager`.
    #[must_use]
    pub fn new(manager: Arc<ClientTokenManager>) -> Self {
        Self { manager }
    }

    /// Sets `Authorization: Bearer <token>` when the session has a usable
    /// token. Without one the request goes out unauthenticated and the
    /// resource server decides.
    pub async fn attach_token(
        &self,
        request: RequestBuilder,
        session: Option<&SessionId>,
    ) -> RequestBuilder {
        let Some(id) = session else {
            tracing::debug!("No session; sending request without credentials");
            return request;
        };
        match self.manager.get_access_token(id).await {
            Ok(token) => request.bearer_auth(token),
            Err(AuthError::ReauthenticationRequired) => {
                tracing::debug!("Session needs reauthentication; sending request without credentials");
                request
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not obtain access token; sending request without credentials");
                request
            }
        }
    }
}

/// JSON client for the resource server's endpoints.
#[derive(Debug, Clone)]
pub struct ResourceApiClient {
    http: reqwest::Client,
    base_url: Url,
    interceptor: OutboundRequestInterceptor,
    request_timeout: Duration,
}

impl ResourceApiClient {
    /// Creates a client for the resource server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `base_url` is not a valid URL.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        interceptor: OutboundRequestInterceptor,
    ) -> Result<Self, AuthError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AuthError::configuration(format!("resource base url '{base_url}': {e}")))?;
        Ok(Self {
            http,
            base_url,
            interceptor,
            request_timeout: Duration::from_secs(10),
        })
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// GETs `path` on behalf of the session and decodes the JSON body.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthorized`] on 401
    /// - [`AuthError::PolicyDenied`] on 403
    /// - [`AuthError::UpstreamUnavailable`] on 5xx, timeouts and connection
    ///   failures
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        session: Option<&SessionId>,
    ) -> Result<T, AuthError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| AuthError::invalid_request(format!("path '{path}': {e}")))?;
        let request = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .timeout(self.request_timeout);
        let request = self.interceptor.attach_token(request, session).await;

        let response = request.send().await.map_err(|e| {
            tracing::warn!(path, error = %e, "Resource server request failed");
            AuthError::upstream_unavailable(format!("resource server unreachable: {e}"))
        })?;

        match response.status() {
            status if status.is_success() => response
                .json::<T>()
                .await
                .map_err(|e| AuthError::internal(format!("unreadable resource response: {e}"))),
            StatusCode::UNAUTHORIZED => Err(AuthError::unauthorized(format!(
                "resource server rejected the credentials for {path}"
            ))),
            StatusCode::FORBIDDEN => Err(AuthError::policy_denied(
                path,
                "resource server denied access",
            )),
            status if status.is_server_error() => Err(AuthError::upstream_unavailable(format!(
                "resource server returned {status}"
            ))),
            status => Err(AuthError::internal(format!(
                "resource server returned {status} for {path}"
            ))),
        }
    }

    /// Claims the resource server sees in the session's access token.
    ///
    /// # Errors
    ///
    /// See [`Self::get_json`].
    pub async fn identity(&self, session: Option<&SessionId>) -> Result<Vec<ClaimPair>, AuthError> {
        self.get_json("/api/identity", session).await
    }
}
