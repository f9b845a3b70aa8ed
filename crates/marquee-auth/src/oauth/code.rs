//! One-time authorization codes.
//!
//! Codes are kept in memory keyed by their SHA-256 digest. Consumption is an
//! atomic remove, so a code can be exchanged at most once even under
//! concurrent requests.

use dashmap::DashMap;
use time::{Duration, OffsetDateTime};

use crate::claims::Principal;
use crate::secret::{generate_opaque_token, hash_opaque_token};

/// What an authorization code stands for.
#[derive(Debug, Clone)]
pub struct AuthorizationGrant {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub principal: Principal,
    pub nonce: Option<String>,
    pub auth_time: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// In-memory authorization code store.
#[derive(Debug, Default)]
pub struct AuthorizationCodeStore {
    codes: DashMap<String, AuthorizationGrant>,
}

impl AuthorizationCodeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a grant and returns the code handed to the client.
    pub fn issue(&self, grant: AuthorizationGrant) -> String {
        let code = generate_opaque_token();
        self.codes.insert(hash_opaque_token(&code), grant);
        code
    }

    /// Removes and returns the grant for `code` if it has not expired.
    ///
    /// An expired code is removed as well.
    pub fn consume(&self, code: &str, now: OffsetDateTime) -> Option<AuthorizationGrant> {
        let (_, grant) = self.codes.remove(&hash_opaque_token(code))?;
        (now <= grant.expires_at).then_some(grant)
    }

    /// Drops expired codes.
    pub fn purge_expired(&self, now: OffsetDateTime) -> usize {
        let before = self.codes.len();
        self.codes.retain(|_, grant| now <= grant.expires_at);
        before - self.codes.len()
    }

    /// Number of outstanding codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns `true` if no code is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Builds a grant that expires `lifetime` after `now`.
#[must_use]
pub fn grant_expiring(
    client_id: &str,
    redirect_uri: &str,
    scopes: Vec<String>,
    principal: Principal,
    nonce: Option<String>,
    now: OffsetDateTime,
    lifetime: Duration,
) -> AuthorizationGrant {
    AuthorizationGrant {
        client_id: client_id.to_string(),
        redirect_uri: redirect_uri.to_string(),
        scopes,
        principal,
        nonce,
        auth_time: now,
        expires_at: now + lifetime,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimSet;
    use std::sync::Arc;

    fn grant(now: OffsetDateTime) -> AuthorizationGrant {
        grant_expiring(
            "movies_mvc_client",
            "http://localhost:5002/signin-oidc",
            vec!["openid".to_string()],
            Principal::new("alice", ClaimSet::new()),
            None,
            now,
            Duration::minutes(5),
        )
    }

    #[test]
    fn test_code_is_single_use() {
        let store = AuthorizationCodeStore::new();
        let now = OffsetDateTime::now_utc();
        let code = store.issue(grant(now));

        assert!(store.consume(&code, now).is_some());
        assert!(store.consume(&code, now).is_none());
    }

    #[test]
    fn test_expired_code_rejected_and_removed() {
        let store = AuthorizationCodeStore::new();
        let now = OffsetDateTime::now_utc();
        let code = store.issue(grant(now));

        assert!(store.consume(&code, now + Duration::minutes(6)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let store = AuthorizationCodeStore::new();
        let now = OffsetDateTime::now_utc();
        store.issue(grant(now));
        store.issue(grant(now - Duration::minutes(10)));
        assert_eq!(store.purge_expired(now), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_consumption_succeeds_once() {
        let store = Arc::new(AuthorizationCodeStore::new());
        let now = OffsetDateTime::now_utc();
        let code = store.issue(grant(now));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let code = code.clone();
                std::thread::spawn(move || store.consume(&code, now).is_some())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
