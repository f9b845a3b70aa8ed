//! Bearer token validation.
//!
//! [`TokenValidator`] checks, in order: header and key id, signature,
//! issuer, expiry, audience. Expiry is compared against an explicit `now` so
//! the boundary is testable. With the default zero clock skew a token is
//! rejected one second after `exp`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::keys::KeySource;
use crate::claims::{ClaimPair, ClaimSet, ClaimType};
use crate::error::AuthError;

/// Validation settings.
#[derive(Debug, Clone)]
pub struct ValidationSettings {
    /// Expected `iss` value.
    pub issuer: String,
    /// Reject tokens whose `aud` lacks the expected audience.
    pub validate_audience: bool,
    /// Tolerance added to `exp`.
    pub clock_skew: Duration,
}

impl ValidationSettings {
    /// Settings with audience validation on and no clock skew.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            validate_audience: true,
            clock_skew: Duration::ZERO,
        }
    }

    /// Sets the clock skew.
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    /// Disables audience validation.
    #[must_use]
    pub fn without_audience_validation(mut self) -> Self {
        self.validate_audience = false;
        self
    }
}

/// `aud` may be a single string or an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(aud) => vec![aud],
            Self::Many(auds) => auds,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    iss: String,
    sub: String,
    #[serde(default)]
    aud: Option<Audience>,
    exp: i64,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

/// Claims of a token that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedClaims {
    /// Subject.
    pub subject: String,
    /// Issuer.
    pub issuer: String,
    /// Audiences.
    pub audiences: Vec<String>,
    /// Expiry as Unix timestamp.
    pub expires_at: i64,
    /// Nonce echoed in identity tokens.
    pub nonce: Option<String>,
    /// All claims, including `sub`, `client_id` and each granted scope under
    /// `scope`.
    pub claims: ClaimSet,
}

impl ValidatedClaims {
    /// Client the token was issued to.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.claims.first(&ClaimType::ClientId)
    }

    /// Granted scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        self.claims.get(&ClaimType::Scope)
    }

    /// Returns `true` if the scope was granted.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.claims.contains(&ClaimType::Scope, scope)
    }

    /// Claims as `{type, value}` pairs in stable order.
    #[must_use]
    pub fn pairs(&self) -> Vec<ClaimPair> {
        self.claims.iter().map(ClaimPair::from).collect()
    }
}

/// Verifies bearer tokens against a key source.
#[derive(Clone)]
pub struct TokenValidator {
    keys: Arc<dyn KeySource>,
    settings: ValidationSettings,
}

impl TokenValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new(keys: Arc<dyn KeySource>, settings: ValidationSettings) -> Self {
        if !settings.validate_audience {
            tracing::warn!(
                issuer = %settings.issuer,
                "Audience validation is disabled; tokens for any resource are accepted"
            );
        }
        Self { keys, settings }
    }

    /// Validation settings in effect.
    #[must_use]
    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Validates a token against the current time.
    ///
    /// # Errors
    ///
    /// See [`Self::validate_at`].
    pub async fn validate(
        &self,
        raw: &str,
        expected_audience: &str,
    ) -> Result<ValidatedClaims, AuthError> {
        self.validate_at(raw, expected_audience, OffsetDateTime::now_utc())
            .await
    }

    /// Validates a token as of `now`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidToken`]: malformed token or wrong issuer
    /// - [`AuthError::SignatureInvalid`]: unknown key, algorithm mismatch or
    ///   bad signature
    /// - [`AuthError::TokenExpired`]: `now > exp + clock_skew`
    /// - [`AuthError::AudienceMismatch`]: `aud` lacks `expected_audience`
    /// - [`AuthError::UpstreamUnavailable`]: keys could not be fetched
    pub async fn validate_at(
        &self,
        raw: &str,
        expected_audience: &str,
        now: OffsetDateTime,
    ) -> Result<ValidatedClaims, AuthError> {
        self.verify(raw, expected_audience, Some(now)).await
    }

    /// Validates a token presented as a hint, such as `id_token_hint` at the
    /// end-session endpoint. Signature, issuer and audience are checked; an
    /// expired token is still accepted.
    ///
    /// # Errors
    ///
    /// As [`Self::validate_at`], except [`AuthError::TokenExpired`].
    pub async fn validate_hint(
        &self,
        raw: &str,
        expected_audience: &str,
    ) -> Result<ValidatedClaims, AuthError> {
        self.verify(raw, expected_audience, None).await
    }

    async fn verify(
        &self,
        raw: &str,
        expected_audience: &str,
        now: Option<OffsetDateTime>,
    ) -> Result<ValidatedClaims, AuthError> {
        let header =
            decode_header(raw).map_err(|_| AuthError::invalid_token("malformed token"))?;
        let key = self.keys.resolve(header.kid.as_deref()).await?;

        if header.alg != key.algorithm.to_jwt_algorithm() {
            tracing::debug!(
                kid = %key.kid,
                header_alg = ?header.alg,
                key_alg = %key.algorithm,
                "Token algorithm does not match key"
            );
            return Err(AuthError::SignatureInvalid);
        }

        let mut validation = Validation::new(key.algorithm.to_jwt_algorithm());
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims =
            HashSet::from(["exp".to_string(), "iss".to_string(), "sub".to_string()]);
        validation.set_issuer(&[&self.settings.issuer]);

        let data = decode::<RawClaims>(raw, &key.key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
                ErrorKind::InvalidIssuer => AuthError::invalid_token("unexpected issuer"),
                _ => AuthError::invalid_token("malformed token"),
            }
        })?;
        let claims = data.claims;

        let skew = i64::try_from(self.settings.clock_skew.as_secs()).unwrap_or(i64::MAX);
        if let Some(now) = now
            && now.unix_timestamp() > claims.exp.saturating_add(skew)
        {
            return Err(AuthError::TokenExpired);
        }

        let audiences = claims.aud.map(Audience::into_vec).unwrap_or_default();
        if self.settings.validate_audience && !audiences.iter().any(|a| a == expected_audience) {
            return Err(AuthError::audience_mismatch(expected_audience));
        }

        let mut set = ClaimSet::from_json_map(&claims.rest);
        set.insert(ClaimType::Subject, claims.sub.clone());
        if let Some(client_id) = claims.client_id {
            set.insert(ClaimType::ClientId, client_id);
        }
        if let Some(scope) = claims.scope {
            for value in scope.split_whitespace() {
                set.insert(ClaimType::Scope, value);
            }
        }

        Ok(ValidatedClaims {
            subject: claims.sub,
            issuer: claims.iss,
            audiences,
            expires_at: claims.exp,
            nonce: claims.nonce,
            claims: set,
        })
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
