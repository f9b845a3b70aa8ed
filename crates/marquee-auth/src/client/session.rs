//! Client-side login sessions.
//!
//! A [`Session`] holds the tokens obtained for one signed-in user. The token
//! set is swapped atomically on refresh, so readers never observe a
//! half-updated session. The per-session refresh gate serializes refreshes
//! without blocking readers of a still-fresh token.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::AuthError;
use crate::oauth::TokenResponse;
use crate::secret::generate_opaque_token;
use crate::token::ValidatedClaims;

/// Opaque session handle, stored in the browser cookie.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_opaque_token())
    }

    /// The id as sent to the browser.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix: String = self.0.chars().take(8).collect();
        write!(f, "SessionId({prefix}…)")
    }
}

/// Tokens held by a session.
#[derive(Clone)]
pub struct TokenSet {
    /// Current access token.
    pub access_token: String,
    /// When the access token expires.
    pub expires_at: OffsetDateTime,
    /// Identity token from login, replaced if a refresh returns a new one.
    pub id_token: String,
    /// Refresh token, if `offline_access` was granted.
    pub refresh_token: Option<String>,
    /// Granted scopes (space-separated).
    pub scope: String,
}

impl TokenSet {
    /// Builds the token set from a login response.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the response carries no
    /// identity token.
    pub fn from_login(response: TokenResponse, now: OffsetDateTime) -> Result<Self, AuthError> {
        let id_token = response
            .id_token
            .ok_or_else(|| AuthError::invalid_token("token response lacks an id_token"))?;
        Ok(Self {
            access_token: response.access_token,
            expires_at: expiry(now, response.expires_in),
            id_token,
            refresh_token: response.refresh_token,
            scope: response.scope,
        })
    }

    /// Applies a refresh response. Tokens the response omits are kept.
    #[must_use]
    pub fn refreshed(&self, response: TokenResponse, now: OffsetDateTime) -> Self {
        Self {
            access_token: response.access_token,
            expires_at: expiry(now, response.expires_in),
            id_token: response.id_token.unwrap_or_else(|| self.id_token.clone()),
            refresh_token: response.refresh_token.or_else(|| self.refresh_token.clone()),
            scope: if response.scope.is_empty() {
                self.scope.clone()
            } else {
                response.scope
            },
        }
    }

    /// Returns `true` if the access token is still usable at `now` with
    /// `skew` to spare.
    #[must_use]
    pub fn is_fresh(&self, now: OffsetDateTime, skew: Duration) -> bool {
        let skew = time::Duration::try_from(skew).unwrap_or(time::Duration::MAX);
        now.saturating_add(skew) < self.expires_at
    }
}

fn expiry(now: OffsetDateTime, expires_in: u64) -> OffsetDateTime {
    let seconds = i64::try_from(expires_in).unwrap_or(i64::MAX);
    now.saturating_add(time::Duration::seconds(seconds))
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

/// A signed-in user.
pub struct Session {
    id: SessionId,
    identity: ValidatedClaims,
    created_at: OffsetDateTime,
    tokens: ArcSwap<TokenSet>,
    pub(crate) refresh_gate: Mutex<()>,
}

impl Session {
    /// Creates a session from a validated identity token and its tokens.
    #[must_use]
    pub fn new(id: SessionId, identity: ValidatedClaims, tokens: TokenSet, now: OffsetDateTime) -> Self {
        Self {
            id,
            identity,
            created_at: now,
            tokens: ArcSwap::from_pointee(tokens),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Claims of the identity token received at login.
    #[must_use]
    pub fn identity(&self) -> &ValidatedClaims {
        &self.identity
    }

    /// Subject of the signed-in user.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.identity.subject
    }

    /// When the user logged in.
    #[must_use]
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Snapshot of the current tokens.
    #[must_use]
    pub fn tokens(&self) -> Arc<TokenSet> {
        self.tokens.load_full()
    }

    pub(crate) fn replace_tokens(&self, tokens: TokenSet) {
        self.tokens.store(Arc::new(tokens));
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("subject", &self.identity.subject)
            .field("tokens", &*self.tokens.load())
            .finish_non_exhaustive()
    }
}

/// In-memory session table.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session.
    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id().clone(), session);
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Removes a session, returning it if it existed.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if nobody is signed in.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
