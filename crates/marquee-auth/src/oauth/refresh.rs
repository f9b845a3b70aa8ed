//! Refresh token storage.
//!
//! Refresh tokens are opaque values; only their SHA-256 digest is stored,
//! together with the client, principal and scopes they were granted for.

use dashmap::DashMap;
use time::OffsetDateTime;

use crate::claims::Principal;
use crate::secret::{generate_opaque_token, hash_opaque_token};

/// Server-side record of a refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub client_id: String,
    pub principal: Principal,
    pub scopes: Vec<String>,
    pub auth_time: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// In-memory refresh token store.
#[derive(Debug, Default)]
pub struct RefreshTokenStore {
    tokens: DashMap<String, RefreshTokenRecord>,
}

impl RefreshTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record and returns the token handed to the client.
    pub fn issue(&self, record: RefreshTokenRecord) -> String {
        let token = generate_opaque_token();
        self.tokens.insert(hash_opaque_token(&token), record);
        token
    }

    /// Removes and returns a live record. Used when rotating.
    pub fn take(&self, token: &str, now: OffsetDateTime) -> Option<RefreshTokenRecord> {
        let (_, record) = self.tokens.remove(&hash_opaque_token(token))?;
        (now <= record.expires_at).then_some(record)
    }

    /// Returns a live record without consuming it.
    #[must_use]
    pub fn get(&self, token: &str, now: OffsetDateTime) -> Option<RefreshTokenRecord> {
        let hash = hash_opaque_token(token);
        let record = self.tokens.get(&hash)?.clone();
        if now <= record.expires_at {
            Some(record)
        } else {
            self.tokens.remove(&hash);
            None
        }
    }

    /// Revokes every refresh token of a subject for a client.
    pub fn revoke_for(&self, client_id: &str, subject: &str) -> usize {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, r| !(r.client_id == client_id && r.principal.subject == subject));
        before.saturating_sub(self.tokens.len())
    }

    /// Drops expired records. Returns how many were dropped.
    pub fn purge_expired(&self, now: OffsetDateTime) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, r| now <= r.expires_at);
        before.saturating_sub(self.tokens.len())
    }

    /// Number of stored tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no token is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
