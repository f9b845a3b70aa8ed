//! Token lifecycle for a signed-in user of the client application.
//!
//! # Refresh
//!
//! [`ClientTokenManager::get_access_token`] returns the session's access
//! token while it is fresh. Once the token is within `expiry_skew` of
//! expiring, one caller takes the session's refresh gate and redeems the
//! refresh token; concurrent callers wait on the gate and then see the new
//! token without issuing a second refresh.
//!
//! A session without a refresh token, or whose refresh token was rejected,
//! yields [`AuthError::ReauthenticationRequired`]. A provider that stays
//! unreachable after the retry budget does too, so callers only have to
//! handle one "send the user to login" outcome.
//!
//! Token requests are resent only when they never reached the provider. A
//! refresh that timed out may already have rotated the refresh token, so it
//! is not repeated within the same call.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use url::Url;

use super::provider::IdentityProviderClient;
use super::retry::RetryPolicy;
use super::session::{Session, SessionId, SessionStore, TokenSet};
use crate::config::ClientConfig;
use crate::error::AuthError;
use crate::token::TokenValidator;

/// Obtains, caches and refreshes tokens per session.
pub struct ClientTokenManager {
    provider: Arc<dyn IdentityProviderClient>,
    validator: TokenValidator,
    sessions: SessionStore,
    client_id: String,
    redirect_uri: String,
    post_logout_redirect_uri: String,
    scopes: Vec<String>,
    expiry_skew: Duration,
    retry: RetryPolicy,
}

impl ClientTokenManager {
    /// Creates a manager.
    ///
    /// `validator` checks identity tokens; it must trust the provider's keys
    /// and issuer. Identity tokens are validated with the client id as
    /// audience.
    #[must_use]
    pub fn new(
        provider: Arc<dyn IdentityProviderClient>,
        validator: TokenValidator,
        config: &ClientConfig,
    ) -> Self {
        Self {
            provider,
            validator,
            sessions: SessionStore::new(),
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            post_logout_redirect_uri: config.post_logout_redirect_uri.clone(),
            scopes: config.scopes.clone(),
            expiry_skew: config.expiry_skew,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Registered client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Builds the URL that starts an authorization-code login.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's metadata cannot be fetched.
    pub async fn authorization_url(&self, state: &str, nonce: &str) -> Result<Url, AuthError> {
        let mut url = self.provider.authorization_endpoint().await?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        Ok(url)
    }

    /// Completes a login with the code from the authorization response.
    ///
    /// # Errors
    ///
    /// See [`Self::login_at`].
    pub async fn login(
        &self,
        code: &str,
        expected_nonce: Option<&str>,
    ) -> Result<Arc<Session>, AuthError> {
        self.login_at(code, expected_nonce, OffsetDateTime::now_utc())
            .await
    }

    /// Completes a login as of `now`.
    ///
    /// The code is exchanged, the identity token validated (signature,
    /// issuer, expiry, audience = client id, nonce) and a new session stored.
    ///
    /// # Errors
    ///
    /// - errors of the code exchange (`InvalidGrant`, `UpstreamUnavailable`, ...)
    /// - [`AuthError::InvalidToken`] if the identity token is missing or its
    ///   nonce does not match
    /// - validation errors of the identity token
    pub async fn login_at(
        &self,
        code: &str,
        expected_nonce: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<Arc<Session>, AuthError> {
        let response = self
            .retry
            .run_if("authorization_code", AuthError::is_safe_to_resend, || {
                self.provider.exchange_code(code, &self.redirect_uri)
            })
            .await?;
        let tokens = TokenSet::from_login(response, now)?;

        let identity = self
            .validator
            .validate_at(&tokens.id_token, &self.client_id, now)
            .await?;
        if let Some(expected) = expected_nonce
            && identity.nonce.as_deref() != Some(expected)
        {
            tracing::warn!(subject = %identity.subject, "Identity token nonce mismatch");
            return Err(AuthError::invalid_token("nonce mismatch"));
        }

        let session = Arc::new(Session::new(SessionId::generate(), identity, tokens, now));
        self.sessions.insert(session.clone());
        tracing::info!(
            subject = %session.subject(),
            session = ?session.id(),
            "User signed in"
        );
        Ok(session)
    }

    /// Returns a usable access token for the session, refreshing it first if
    /// needed.
    ///
    /// # Errors
    ///
    /// See [`Self::get_access_token_at`].
    pub async fn get_access_token(&self, id: &SessionId) -> Result<String, AuthError> {
        self.get_access_token_at(id, OffsetDateTime::now_utc()).await
    }

    /// Returns a usable access token as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ReauthenticationRequired`] if the session is
    /// unknown, cannot be refreshed, or the provider stays unreachable.
    pub async fn get_access_token_at(
        &self,
        id: &SessionId,
        now: OffsetDateTime,
    ) -> Result<String, AuthError> {
        let session = self
            .sessions
            .get(id)
            .ok_or(AuthError::ReauthenticationRequired)?;

        let tokens = session.tokens();
        if tokens.is_fresh(now, self.expiry_skew) {
            return Ok(tokens.access_token.clone());
        }

        let _gate = session.refresh_gate.lock().await;

        // Another caller may have refreshed while we waited.
        let tokens = session.tokens();
        if tokens.is_fresh(now, self.expiry_skew) {
            return Ok(tokens.access_token.clone());
        }

        let Some(refresh_token) = tokens.refresh_token.clone() else {
            tracing::debug!(
                subject = %session.subject(),
                "Access token expired and no refresh token is held"
            );
            return Err(AuthError::ReauthenticationRequired);
        };

        let result = self
            .retry
            .run_if("refresh_token", AuthError::is_safe_to_resend, || {
                self.provider.refresh(&refresh_token)
            })
            .await;

        match result {
            Ok(response) => {
                let next = tokens.refreshed(response, now);
                let access_token = next.access_token.clone();
                session.replace_tokens(next);
                tracing::debug!(subject = %session.subject(), "Access token refreshed");
                Ok(access_token)
            }
            Err(
                AuthError::InvalidGrant { message }
                | AuthError::InvalidClient { message }
                | AuthError::UnauthorizedClient { message },
            ) => {
                tracing::info!(
                    subject = %session.subject(),
                    reason = %message,
                    "Refresh rejected; ending session"
                );
                self.sessions.remove(id);
                Err(AuthError::ReauthenticationRequired)
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    subject = %session.subject(),
                    error = %e,
                    "Identity provider unavailable for refresh"
                );
                Err(AuthError::ReauthenticationRequired)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetches the user-info document for the session's user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ReauthenticationRequired`] when no access token
    /// can be obtained, or the provider's error otherwise.
    pub async fn user_info(&self, id: &SessionId) -> Result<Map<String, Value>, AuthError> {
        let access_token = self.get_access_token(id).await?;
        self.retry
            .run("userinfo", || self.provider.user_info(&access_token))
            .await
    }

    /// Looks up a session.
    #[must_use]
    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id)
    }

    /// Ends a session. Returns it if it existed.
    pub fn logout(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.remove(id)?;
        tracing::info!(subject = %session.subject(), "User signed out");
        Some(session)
    }

    /// Builds the provider's end-session URL for a signed-out session, so
    /// the provider can revoke what it issued. `None` when the provider has
    /// no end-session endpoint or its metadata is unavailable.
    pub async fn end_session_url(&self, session: &Session, state: Option<&str>) -> Option<Url> {
        let mut url = match self.provider.end_session_endpoint().await {
            Ok(Some(url)) => url,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "End-session endpoint unavailable");
                return None;
            }
        };
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("id_token_hint", &session.tokens().id_token)
                .append_pair("post_logout_redirect_uri", &self.post_logout_redirect_uri);
            if let Some(state) = state {
                query.append_pair("state", state);
            }
        }
        Some(url)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl std::fmt::Debug for ClientTokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTokenManager")
            .field("client_id", &self.client_id)
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
