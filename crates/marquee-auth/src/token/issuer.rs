//! Token issuance for the client-credentials, authorization-code and
//! refresh grants.
//!
//! The issuer authenticates the client, checks the grant against the
//! client's registration, resolves the granted scopes through the
//! [`ClaimsCatalog`] and mints signed tokens:
//!
//! - the access token carries exactly the principal's values for the claim
//!   types granted by the scopes, with `aud` set to the resources tied to
//!   the granted API scopes;
//! - an identity token is added when `openid` is granted;
//! - a refresh token is added when `offline_access` is granted and the
//!   client allows offline access.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use super::jwt::{AccessTokenClaims, IdTokenClaims};
use super::keys::KeyRing;
use super::validator::ValidatedClaims;
use crate::catalog::{ClaimsCatalog, OFFLINE_ACCESS_SCOPE, OPENID_SCOPE, ResolvedScopes};
use crate::claims::{ClaimType, Principal};
use crate::config::OAuthConfig;
use crate::error::AuthError;
use crate::oauth::code::{AuthorizationCodeStore, grant_expiring};
use crate::oauth::refresh::{RefreshTokenRecord, RefreshTokenStore};
use crate::oauth::token::{TokenRequest, TokenResponse, split_scopes};
use crate::registry::ClientRegistry;
use crate::types::{Client, GrantType};

// =============================================================================
// Requests
// =============================================================================

/// Client id and secret presented with a token request.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// A token request, parsed per grant type.
#[derive(Debug, Clone)]
pub enum GrantRequest {
    /// Machine-to-machine access. Empty `scopes` requests every API scope
    /// the client is allowed.
    ClientCredentials {
        client: ClientCredentials,
        scopes: Vec<String>,
    },
    /// Exchange of an authorization code.
    AuthorizationCode {
        client: ClientCredentials,
        code: String,
        redirect_uri: String,
    },
    /// Refresh grant. Empty `scopes` keeps the original scopes.
    RefreshToken {
        client: ClientCredentials,
        refresh_token: String,
        scopes: Vec<String>,
    },
}

impl GrantRequest {
    /// Builds a grant request from token endpoint parameters.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnsupportedGrantType`] for an unknown `grant_type`
    /// - [`AuthError::InvalidRequest`] when a parameter the grant needs is
    ///   missing
    pub fn from_token_request(
        request: TokenRequest,
        client: ClientCredentials,
    ) -> Result<Self, AuthError> {
        let scopes = request.scopes();
        match request.grant_type.parse::<GrantType>()? {
            GrantType::ClientCredentials => Ok(Self::ClientCredentials { client, scopes }),
            GrantType::AuthorizationCode => Ok(Self::AuthorizationCode {
                client,
                code: request
                    .code
                    .ok_or_else(|| AuthError::invalid_request("missing 'code' parameter"))?,
                redirect_uri: request.redirect_uri.ok_or_else(|| {
                    AuthError::invalid_request("missing 'redirect_uri' parameter")
                })?,
            }),
            GrantType::RefreshToken => Ok(Self::RefreshToken {
                client,
                refresh_token: request.refresh_token.ok_or_else(|| {
                    AuthError::invalid_request("missing 'refresh_token' parameter")
                })?,
                scopes,
            }),
        }
    }

    /// The grant type.
    #[must_use]
    pub fn grant_type(&self) -> GrantType {
        match self {
            Self::ClientCredentials { .. } => GrantType::ClientCredentials,
            Self::AuthorizationCode { .. } => GrantType::AuthorizationCode,
            Self::RefreshToken { .. } => GrantType::RefreshToken,
        }
    }

    fn client(&self) -> &ClientCredentials {
        match self {
            Self::ClientCredentials { client, .. }
            | Self::AuthorizationCode { client, .. }
            | Self::RefreshToken { client, .. } => client,
        }
    }
}

/// Parameters of an authorization request (`/connect/authorize`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeRequest {
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
}

fn default_response_type() -> String {
    "code".to_string()
}

/// An authorization request that passed client, redirect and scope checks.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorizeRequest {
    pub client: Arc<Client>,
    pub redirect_uri: String,
    pub scopes: ResolvedScopes,
    pub state: Option<String>,
    pub nonce: Option<String>,
}

// =============================================================================
// Issued Tokens
// =============================================================================

/// Tokens minted for one grant.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    /// Granted scopes, space-separated.
    pub scope: String,
    pub id_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.is_some())
            .field("refresh_token", &self.refresh_token.is_some())
            .finish_non_exhaustive()
    }
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            token_type: "Bearer".to_string(),
            expires_in: tokens.expires_in,
            scope: tokens.scope,
            id_token: tokens.id_token,
            refresh_token: tokens.refresh_token,
        }
    }
}

// =============================================================================
// Token Issuer
// =============================================================================

/// Mints tokens for authenticated clients.
pub struct TokenIssuer {
    issuer: String,
    catalog: Arc<ClaimsCatalog>,
    clients: Arc<ClientRegistry>,
    keys: Arc<KeyRing>,
    lifetimes: OAuthConfig,
    codes: AuthorizationCodeStore,
    refresh_tokens: RefreshTokenStore,
}

impl TokenIssuer {
    /// Creates an issuer.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        catalog: Arc<ClaimsCatalog>,
        clients: Arc<ClientRegistry>,
        keys: Arc<KeyRing>,
        lifetimes: OAuthConfig,
    ) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            catalog,
            clients,
            keys,
            lifetimes,
            codes: AuthorizationCodeStore::new(),
            refresh_tokens: RefreshTokenStore::new(),
        }
    }

    /// Issuer URL placed in `iss`.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Scope and user catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<ClaimsCatalog> {
        &self.catalog
    }

    /// Client registrations.
    #[must_use]
    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Signing keys.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Handles a grant request at the current time.
    ///
    /// # Errors
    ///
    /// See [`Self::issue_at`].
    pub fn issue(&self, request: GrantRequest) -> Result<IssuedTokens, AuthError> {
        self.issue_at(request, OffsetDateTime::now_utc())
    }

    /// Handles a grant request as of `now`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidClient`]: unknown client or wrong secret
    /// - [`AuthError::UnauthorizedClient`]: grant not allowed for the client
    /// - [`AuthError::InvalidScope`]: scope unknown, not allowed, or not
    ///   usable with this grant
    /// - [`AuthError::InvalidGrant`]: code or refresh token unknown, expired,
    ///   already used, or bound to another client or redirect URI
    pub fn issue_at(
        &self,
        request: GrantRequest,
        now: OffsetDateTime,
    ) -> Result<IssuedTokens, AuthError> {
        let credentials = request.client();
        let client = self
            .clients
            .authenticate(&credentials.client_id, &credentials.client_secret)?;

        let grant_type = request.grant_type();
        if !client.is_grant_type_allowed(grant_type) {
            return Err(AuthError::unauthorized_client(format!(
                "client may not use the '{grant_type}' grant"
            )));
        }

        let tokens = match request {
            GrantRequest::ClientCredentials { scopes, .. } => {
                self.client_credentials(&client, scopes, now)?
            }
            GrantRequest::AuthorizationCode {
                code, redirect_uri, ..
            } => self.exchange_code(&client, &code, &redirect_uri, now)?,
            GrantRequest::RefreshToken {
                refresh_token,
                scopes,
                ..
            } => self.refresh(&client, &refresh_token, scopes, now)?,
        };

        tracing::info!(
            client_id = %client.client_id,
            grant_type = %grant_type,
            scope = %tokens.scope,
            "Token issued"
        );
        Ok(tokens)
    }

    fn client_credentials(
        &self,
        client: &Client,
        requested: Vec<String>,
        now: OffsetDateTime,
    ) -> Result<IssuedTokens, AuthError> {
        let scopes = if requested.is_empty() {
            let api_scopes: BTreeSet<&str> = self.catalog.api_scope_names().collect();
            client
                .allowed_scopes
                .iter()
                .filter(|s| api_scopes.contains(s.as_str()))
                .cloned()
                .collect()
        } else {
            requested
        };
        if scopes.is_empty() {
            return Err(AuthError::invalid_scope("no API scope allowed for client"));
        }
        check_allowed(client, &scopes)?;

        let resolved = self.catalog.resolve_scopes(&scopes)?;
        if resolved.has_identity_scopes() || resolved.offline_access {
            return Err(AuthError::invalid_scope(
                "identity scopes require an end user",
            ));
        }

        let principal = Principal::new(client.client_id.clone(), client.claims.clone());
        let (access_token, expires_in) = self.mint_access_token(client, &principal, &resolved, now)?;
        Ok(IssuedTokens {
            access_token,
            expires_in,
            scope: resolved.scope_string(),
            id_token: None,
            refresh_token: None,
        })
    }

    fn exchange_code(
        &self,
        client: &Client,
        code: &str,
        redirect_uri: &str,
        now: OffsetDateTime,
    ) -> Result<IssuedTokens, AuthError> {
        let grant = self
            .codes
            .consume(code, now)
            .ok_or_else(|| AuthError::invalid_grant("invalid or expired authorization code"))?;

        if grant.client_id != client.client_id {
            tracing::warn!(
                client_id = %client.client_id,
                "Authorization code presented by another client"
            );
            return Err(AuthError::invalid_grant(
                "authorization code was issued to another client",
            ));
        }
        if grant.redirect_uri != redirect_uri {
            return Err(AuthError::invalid_grant("redirect_uri does not match"));
        }

        let resolved = self.catalog.resolve_scopes(&grant.scopes)?;
        self.mint_user_tokens(
            client,
            &grant.principal,
            &resolved,
            grant.nonce,
            grant.auth_time,
            None,
            now,
        )
    }

    fn refresh(
        &self,
        client: &Client,
        refresh_token: &str,
        requested: Vec<String>,
        now: OffsetDateTime,
    ) -> Result<IssuedTokens, AuthError> {
        let record = self
            .refresh_tokens
            .get(refresh_token, now)
            .ok_or_else(|| AuthError::invalid_grant("invalid or expired refresh token"))?;
        if record.client_id != client.client_id {
            return Err(AuthError::invalid_grant(
                "refresh token was issued to another client",
            ));
        }

        let scopes = if requested.is_empty() {
            record.scopes.clone()
        } else {
            if let Some(extra) = requested.iter().find(|s| !record.scopes.contains(*s)) {
                return Err(AuthError::invalid_scope(format!(
                    "scope '{extra}' was not originally granted"
                )));
            }
            requested
        };

        let record = if self.lifetimes.refresh_token_rotation {
            // Concurrent refreshes with the same token: only one wins.
            self.refresh_tokens
                .take(refresh_token, now)
                .ok_or_else(|| AuthError::invalid_grant("refresh token already used"))?
        } else {
            record
        };

        // Pick up claim changes since the original login.
        let principal = self
            .catalog
            .find_user(&record.principal.subject)
            .map_or_else(|| record.principal.clone(), |user| user.principal());

        let resolved = self.catalog.resolve_scopes(&scopes)?;
        let reuse = (!self.lifetimes.refresh_token_rotation).then(|| refresh_token.to_string());
        self.mint_user_tokens(
            client,
            &principal,
            &resolved,
            None,
            record.auth_time,
            Some((record.expires_at, reuse)),
            now,
        )
    }

    /// Mints the tokens of a user-delegated grant.
    ///
    /// `refresh` carries the absolute expiry of the refresh token being
    /// used and, without rotation, the token to hand back unchanged.
    #[allow(clippy::too_many_arguments)]
    fn mint_user_tokens(
        &self,
        client: &Client,
        principal: &Principal,
        resolved: &ResolvedScopes,
        nonce: Option<String>,
        auth_time: OffsetDateTime,
        refresh: Option<(OffsetDateTime, Option<String>)>,
        now: OffsetDateTime,
    ) -> Result<IssuedTokens, AuthError> {
        let (access_token, expires_in) = self.mint_access_token(client, principal, resolved, now)?;

        let id_token = if resolved.includes_openid() {
            Some(self.mint_id_token(client, principal, resolved, nonce, auth_time, now)?)
        } else {
            None
        };

        let refresh_token = if resolved.offline_access && client.allow_offline_access {
            Some(match refresh {
                Some((_, Some(existing))) => existing,
                Some((expires_at, None)) => self.refresh_tokens.issue(RefreshTokenRecord {
                    client_id: client.client_id.clone(),
                    principal: principal.clone(),
                    scopes: resolved.scope_names(),
                    auth_time,
                    expires_at,
                }),
                None => self.refresh_tokens.issue(RefreshTokenRecord {
                    client_id: client.client_id.clone(),
                    principal: principal.clone(),
                    scopes: resolved.scope_names(),
                    auth_time,
                    expires_at: now + to_time(self.lifetimes.refresh_token_lifetime),
                }),
            })
        } else {
            None
        };

        Ok(IssuedTokens {
            access_token,
            expires_in,
            scope: resolved.scope_string(),
            id_token,
            refresh_token,
        })
    }

    fn mint_access_token(
        &self,
        client: &Client,
        principal: &Principal,
        resolved: &ResolvedScopes,
        now: OffsetDateTime,
    ) -> Result<(String, u64), AuthError> {
        let lifetime = client
            .access_token_lifetime
            .unwrap_or(self.lifetimes.access_token_lifetime);
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: principal.subject.clone(),
            aud: resolved.audiences(),
            exp: (now + to_time(lifetime)).unix_timestamp(),
            iat: now.unix_timestamp(),
            nbf: now.unix_timestamp(),
            jti: Uuid::new_v4().to_string(),
            client_id: client.client_id.clone(),
            scope: resolved.scope_string(),
            claims: principal
                .claims
                .restricted_to(&resolved.claim_types())
                .to_json_map(),
        };
        Ok((self.keys.sign(&claims)?, lifetime.as_secs()))
    }

    fn mint_id_token(
        &self,
        client: &Client,
        principal: &Principal,
        resolved: &ResolvedScopes,
        nonce: Option<String>,
        auth_time: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<String, AuthError> {
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: principal.subject.clone(),
            aud: client.client_id.clone(),
            exp: (now + to_time(self.lifetimes.identity_token_lifetime)).unix_timestamp(),
            iat: now.unix_timestamp(),
            auth_time: Some(auth_time.unix_timestamp()),
            nonce,
            claims: principal
                .claims
                .restricted_to(&resolved.identity_claim_types())
                .to_json_map(),
        };
        self.keys.sign(&claims)
    }

    // -------------------------------------------------------------------------
    // Authorization endpoint
    // -------------------------------------------------------------------------

    /// Checks an authorization request before the user is asked to log in.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidClient`]: unknown client
    /// - [`AuthError::UnauthorizedClient`]: client may not use the code flow
    /// - [`AuthError::InvalidRequest`]: unsupported `response_type` or a
    ///   redirect URI that is not registered
    /// - [`AuthError::InvalidScope`]: scope unknown or not allowed
    pub fn validate_authorize_request(
        &self,
        request: &AuthorizeRequest,
    ) -> Result<ValidatedAuthorizeRequest, AuthError> {
        let client = self
            .clients
            .get(&request.client_id)
            .ok_or_else(|| AuthError::invalid_client("unknown client"))?;
        if !client.is_grant_type_allowed(GrantType::AuthorizationCode) {
            return Err(AuthError::unauthorized_client(
                "client may not use the authorization code flow",
            ));
        }
        if request.response_type != "code" {
            return Err(AuthError::invalid_request(format!(
                "unsupported response_type '{}'",
                request.response_type
            )));
        }
        if !client.is_redirect_uri_allowed(&request.redirect_uri) {
            return Err(AuthError::invalid_request("redirect_uri is not registered"));
        }

        let scopes = split_scopes(Some(&request.scope));
        if !scopes.iter().any(|s| s == OPENID_SCOPE) {
            return Err(AuthError::invalid_scope("the 'openid' scope is required"));
        }
        check_allowed(&client, &scopes)?;
        let resolved = self.catalog.resolve_scopes(&scopes)?;
        if resolved.offline_access && !client.allow_offline_access {
            return Err(AuthError::invalid_scope(format!(
                "'{OFFLINE_ACCESS_SCOPE}' is not allowed for this client"
            )));
        }

        Ok(ValidatedAuthorizeRequest {
            client,
            redirect_uri: request.redirect_uri.clone(),
            scopes: resolved,
            state: request.state.clone(),
            nonce: request.nonce.clone(),
        })
    }

    /// Mints an authorization code for a logged-in user who consented.
    #[must_use]
    pub fn authorize(&self, request: &ValidatedAuthorizeRequest, principal: &Principal) -> String {
        self.authorize_at(request, principal, OffsetDateTime::now_utc())
    }

    /// Mints an authorization code as of `now`.
    #[must_use]
    pub fn authorize_at(
        &self,
        request: &ValidatedAuthorizeRequest,
        principal: &Principal,
        now: OffsetDateTime,
    ) -> String {
        tracing::info!(
            client_id = %request.client.client_id,
            subject = %principal.subject,
            scope = %request.scopes.scope_string(),
            "Authorization code issued"
        );
        self.codes.issue(grant_expiring(
            &request.client.client_id,
            &request.redirect_uri,
            request.scopes.scope_names(),
            principal.clone(),
            request.nonce.clone(),
            now,
            to_time(self.lifetimes.authorization_code_lifetime),
        ))
    }

    // -------------------------------------------------------------------------
    // User info
    // -------------------------------------------------------------------------

    /// Claims of the token's user restricted to its identity scopes.
    ///
    /// # Errors
    ///
    /// - [`AuthError::PolicyDenied`]: the token lacks the `openid` scope
    /// - [`AuthError::Unauthorized`]: the subject is not a known user
    pub fn user_info(&self, token: &ValidatedClaims) -> Result<Map<String, Value>, AuthError> {
        if !token.has_scope(OPENID_SCOPE) {
            return Err(AuthError::policy_denied(
                "userinfo",
                "access token lacks the openid scope",
            ));
        }
        let user = self
            .catalog
            .find_user(&token.subject)
            .ok_or_else(|| AuthError::unauthorized("unknown subject"))?;

        let identity_scopes: Vec<&str> = token
            .scopes()
            .iter()
            .map(String::as_str)
            .filter(|s| self.catalog.is_identity_scope(s))
            .collect();
        let resolved = self.catalog.resolve_scopes(&identity_scopes)?;

        let mut info = Map::new();
        info.insert(
            ClaimType::Subject.as_str().to_string(),
            Value::String(user.subject.clone()),
        );
        info.extend(
            user.claims
                .restricted_to(&resolved.identity_claim_types())
                .to_json_map(),
        );
        Ok(info)
    }

    /// Revokes the refresh tokens a client holds for a user. Returns how
    /// many were revoked.
    pub fn end_session(&self, client_id: &str, subject: &str) -> usize {
        let revoked = self.refresh_tokens.revoke_for(client_id, subject);
        tracing::info!(client_id, subject, revoked, "Session ended at identity provider");
        revoked
    }

    /// Drops expired authorization codes and refresh tokens.
    pub fn purge_expired(&self, now: OffsetDateTime) -> usize {
        self.codes.purge_expired(now) + self.refresh_tokens.purge_expired(now)
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("pending_codes", &self.codes.len())
            .field("refresh_tokens", &self.refresh_tokens.len())
            .finish_non_exhaustive()
    }
}

fn check_allowed(client: &Client, scopes: &[String]) -> Result<(), AuthError> {
    match scopes.iter().find(|s| !client.is_scope_allowed(s)) {
        Some(scope) => Err(AuthError::invalid_scope(format!(
            "scope '{scope}' is not allowed for this client"
        ))),
        None => Ok(()),
    }
}

fn to_time(duration: std::time::Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_catalog;
    use crate::claims::ClaimSet;
    use crate::registry::test_registry;
    use crate::token::jwt::{SigningAlgorithm, SigningKeyPair};
    use crate::token::validator::{TokenValidator, ValidationSettings};

    const ISSUER: &str = "http://localhost:5005";
    const WEB: &str = "movies_mvc_client";
    const REDIRECT: &str = "http://localhost:5002/signin-oidc";

    struct Fixture {
        issuer: TokenIssuer,
        validator: TokenValidator,
    }

    fn fixture_with(lifetimes: OAuthConfig) -> Fixture {
        let keys = Arc::new(KeyRing::new(
            SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap(),
            1,
        ));
        let issuer = TokenIssuer::new(
            ISSUER,
            Arc::new(test_catalog()),
            Arc::new(test_registry()),
            keys.clone(),
            lifetimes,
        );
        let validator = TokenValidator::new(keys, ValidationSettings::new(ISSUER));
        Fixture { issuer, validator }
    }

    fn fixture() -> Fixture {
        fixture_with(OAuthConfig::default())
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn machine() -> ClientCredentials {
        ClientCredentials::new("movieClient", "secret")
    }

    fn web() -> ClientCredentials {
        ClientCredentials::new(WEB, "secret")
    }

    fn alice(fx: &Fixture) -> Principal {
        fx.issuer
            .catalog()
            .authenticate_user("alice", "alice")
            .unwrap()
    }

    fn login(fx: &Fixture, scope: &str, nonce: Option<&str>) -> String {
        let request = fx
            .issuer
            .validate_authorize_request(&AuthorizeRequest {
                client_id: WEB.to_string(),
                redirect_uri: REDIRECT.to_string(),
                response_type: "code".to_string(),
                scope: scope.to_string(),
                state: Some("xyz".to_string()),
                nonce: nonce.map(str::to_string),
            })
            .unwrap();
        fx.issuer.authorize(&request, &alice(fx))
    }

    fn exchange(fx: &Fixture, code: String) -> Result<IssuedTokens, AuthError> {
        fx.issuer.issue(GrantRequest::AuthorizationCode {
            client: web(),
            code,
            redirect_uri: REDIRECT.to_string(),
        })
    }

    #[tokio::test]
    async fn test_client_credentials_grant() {
        let fx = fixture();
        let tokens = fx
            .issuer
            .issue(GrantRequest::ClientCredentials {
                client: machine(),
                scopes: vec!["movieAPI".to_string()],
            })
            .unwrap();

        assert_eq!(tokens.scope, "movieAPI");
        assert_eq!(tokens.expires_in, 3600);
        assert!(tokens.id_token.is_none());
        assert!(tokens.refresh_token.is_none());

        let claims = fx
            .validator
            .validate(&tokens.access_token, "movieAPI")
            .await
            .unwrap();
        assert_eq!(claims.subject, "movieClient");
        assert_eq!(claims.client_id(), Some("movieClient"));
        assert_eq!(claims.audiences, vec!["movieAPI".to_string()]);
    }

    #[test]
    fn test_client_credentials_defaults_to_allowed_api_scopes() {
        let fx = fixture();
        let tokens = fx
            .issuer
            .issue(GrantRequest::ClientCredentials {
                client: machine(),
                scopes: vec![],
            })
            .unwrap();
        assert_eq!(tokens.scope, "movieAPI");
    }

    #[test]
    fn test_client_credentials_rejects_unknown_and_identity_scopes() {
        let fx = fixture();
        let unknown = fx.issuer.issue(GrantRequest::ClientCredentials {
            client: machine(),
            scopes: vec!["adminAPI".to_string()],
        });
        assert!(matches!(unknown, Err(AuthError::InvalidScope { .. })));

        let identity = fx.issuer.issue(GrantRequest::ClientCredentials {
            client: machine(),
            scopes: vec!["openid".to_string()],
        });
        assert!(matches!(identity, Err(AuthError::InvalidScope { .. })));
    }

    #[test]
    fn test_wrong_secret_is_invalid_client() {
        let fx = fixture();
        let result = fx.issuer.issue(GrantRequest::ClientCredentials {
            client: ClientCredentials::new("movieClient", "wrong"),
            scopes: vec!["movieAPI".to_string()],
        });
        assert!(matches!(result, Err(AuthError::InvalidClient { .. })));
    }

    #[test]
    fn test_grant_type_not_allowed_for_client() {
        let fx = fixture();
        let result = fx.issuer.issue(GrantRequest::ClientCredentials {
            client: web(),
            scopes: vec!["movieAPI".to_string()],
        });
        let err = result.unwrap_err();
        assert!(matches!(err, AuthError::UnauthorizedClient { .. }));
        assert_eq!(err.oauth_error_code(), "unauthorized_client");
    }

    #[tokio::test]
    async fn test_authorization_code_grant_claims_are_exact() {
        let fx = fixture();
        let code = login(&fx, "openid roles movieAPI", Some("n-0S6"));
        let tokens = exchange(&fx, code).unwrap();

        let access = fx
            .validator
            .validate(&tokens.access_token, "movieAPI")
            .await
            .unwrap();
        assert_eq!(access.subject, "5BE86359-073C-434B-AD2D-A3932222DABE");
        assert!(access.claims.contains(&ClaimType::Role, "admin"));
        // Only claim types granted by the scopes travel in the token.
        assert!(!access.claims.has(&ClaimType::Email));
        assert!(!access.claims.has(&ClaimType::Name));

        let id_token = tokens.id_token.expect("openid was granted");
        let identity = fx.validator.validate(&id_token, WEB).await.unwrap();
        assert!(identity.claims.contains(&ClaimType::Role, "admin"));
        assert!(tokens.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_identity_token_carries_nonce() {
        let fx = fixture();
        let code = login(&fx, "openid", Some("n-0S6"));
        let tokens = exchange(&fx, code).unwrap();
        let id_token = tokens.id_token.unwrap();

        let payload = id_token.split('.').nth(1).unwrap();
        let bytes = base64::Engine::decode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            payload,
        )
        .unwrap();
        let claims: IdTokenClaims = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(claims.nonce.as_deref(), Some("n-0S6"));
        assert_eq!(claims.aud, WEB);
        assert!(claims.auth_time.is_some());
    }

    #[test]
    fn test_code_is_single_use() {
        let fx = fixture();
        let code = login(&fx, "openid", None);
        assert!(exchange(&fx, code.clone()).is_ok());
        assert!(matches!(
            exchange(&fx, code),
            Err(AuthError::InvalidGrant { .. })
        ));
    }

    #[test]
    fn test_code_redirect_uri_must_match() {
        let fx = fixture();
        let code = login(&fx, "openid", None);
        let result = fx.issuer.issue(GrantRequest::AuthorizationCode {
            client: web(),
            code,
            redirect_uri: "http://localhost:5002/other".to_string(),
        });
        assert!(matches!(result, Err(AuthError::InvalidGrant { .. })));
    }

    #[test]
    fn test_expired_code_rejected() {
        let fx = fixture();
        let code = login(&fx, "openid", None);
        let later = now() + time::Duration::minutes(10);
        let result = fx.issuer.issue_at(
            GrantRequest::AuthorizationCode {
                client: web(),
                code,
                redirect_uri: REDIRECT.to_string(),
            },
            later,
        );
        assert!(matches!(result, Err(AuthError::InvalidGrant { .. })));
    }

    #[test]
    fn test_authorize_request_validation() {
        let fx = fixture();
        let base = AuthorizeRequest {
            client_id: WEB.to_string(),
            redirect_uri: REDIRECT.to_string(),
            response_type: "code".to_string(),
            scope: "openid profile".to_string(),
            state: None,
            nonce: None,
        };
        assert!(fx.issuer.validate_authorize_request(&base).is_ok());

        let bad_redirect = AuthorizeRequest {
            redirect_uri: "https://evil.example.com/cb".to_string(),
            ..base.clone()
        };
        assert!(matches!(
            fx.issuer.validate_authorize_request(&bad_redirect),
            Err(AuthError::InvalidRequest { .. })
        ));

        let bad_scope = AuthorizeRequest {
            scope: "openid adminAPI".to_string(),
            ..base.clone()
        };
        assert!(matches!(
            fx.issuer.validate_authorize_request(&bad_scope),
            Err(AuthError::InvalidScope { .. })
        ));

        let machine_client = AuthorizeRequest {
            client_id: "movieClient".to_string(),
            ..base
        };
        assert!(fx.issuer.validate_authorize_request(&machine_client).is_err());
    }

    #[tokio::test]
    async fn test_refresh_grant_rotates_token() {
        let fx = fixture();
        let code = login(&fx, "openid roles movieAPI offline_access", None);
        let first = exchange(&fx, code).unwrap();
        let refresh_token = first.refresh_token.clone().expect("offline_access granted");

        let second = fx
            .issuer
            .issue(GrantRequest::RefreshToken {
                client: web(),
                refresh_token: refresh_token.clone(),
                scopes: vec![],
            })
            .unwrap();
        assert_eq!(second.scope, first.scope);
        let rotated = second.refresh_token.clone().unwrap();
        assert_ne!(rotated, refresh_token);
        fx.validator
            .validate(&second.access_token, "movieAPI")
            .await
            .unwrap();

        let replay = fx.issuer.issue(GrantRequest::RefreshToken {
            client: web(),
            refresh_token,
            scopes: vec![],
        });
        assert!(matches!(replay, Err(AuthError::InvalidGrant { .. })));
    }

    #[test]
    fn test_refresh_without_rotation_returns_same_token() {
        let fx = fixture_with(OAuthConfig {
            refresh_token_rotation: false,
            ..OAuthConfig::default()
        });
        let code = login(&fx, "openid offline_access", None);
        let first = exchange(&fx, code).unwrap();
        let refresh_token = first.refresh_token.unwrap();

        for _ in 0..2 {
            let again = fx
                .issuer
                .issue(GrantRequest::RefreshToken {
                    client: web(),
                    refresh_token: refresh_token.clone(),
                    scopes: vec![],
                })
                .unwrap();
            assert_eq!(again.refresh_token.as_deref(), Some(refresh_token.as_str()));
        }
    }

    #[test]
    fn test_end_session_revokes_refresh_tokens() {
        let fx = fixture();
        let code = login(&fx, "openid offline_access", None);
        let refresh_token = exchange(&fx, code).unwrap().refresh_token.unwrap();

        let subject = alice(&fx).subject;
        assert_eq!(fx.issuer.end_session(WEB, &subject), 1);
        let result = fx.issuer.issue(GrantRequest::RefreshToken {
            client: web(),
            refresh_token,
            scopes: vec![],
        });
        assert!(matches!(result, Err(AuthError::InvalidGrant { .. })));
    }

    #[test]
    fn test_purge_drops_abandoned_refresh_tokens() {
        let fx = fixture_with(OAuthConfig {
            refresh_token_lifetime: std::time::Duration::from_secs(60),
            ..OAuthConfig::default()
        });
        let code = login(&fx, "openid offline_access", None);
        assert!(exchange(&fx, code).unwrap().refresh_token.is_some());
        assert_eq!(fx.issuer.refresh_tokens.len(), 1);

        assert_eq!(fx.issuer.purge_expired(now()), 0);
        assert_eq!(
            fx.issuer.purge_expired(now() + time::Duration::minutes(2)),
            1
        );
        assert!(fx.issuer.refresh_tokens.is_empty());
    }

    #[test]
    fn test_refresh_cannot_widen_scopes() {
        let fx = fixture();
        let code = login(&fx, "openid offline_access", None);
        let refresh_token = exchange(&fx, code).unwrap().refresh_token.unwrap();

        let result = fx.issuer.issue(GrantRequest::RefreshToken {
            client: web(),
            refresh_token,
            scopes: vec!["openid".to_string(), "movieAPI".to_string()],
        });
        assert!(matches!(result, Err(AuthError::InvalidScope { .. })));
    }

    #[tokio::test]
    async fn test_user_info() {
        let fx = fixture();
        let code = login(&fx, "openid profile email movieAPI", None);
        let tokens = exchange(&fx, code).unwrap();
        let claims = fx
            .validator
            .validate(&tokens.access_token, "movieAPI")
            .await
            .unwrap();

        let info = fx.issuer.user_info(&claims).unwrap();
        assert_eq!(info["sub"], "5BE86359-073C-434B-AD2D-A3932222DABE");
        assert_eq!(info["email"], "alice@example.com");
        assert_eq!(info["given_name"], "Alice");
        assert!(info.get("role").is_none());
    }

    #[test]
    fn test_user_info_requires_openid_scope() {
        let fx = fixture();
        let claims = ValidatedClaims {
            subject: "movieClient".to_string(),
            issuer: ISSUER.to_string(),
            audiences: vec!["movieAPI".to_string()],
            expires_at: 0,
            nonce: None,
            claims: ClaimSet::new().with(ClaimType::Scope, "movieAPI"),
        };
        assert!(matches!(
            fx.issuer.user_info(&claims),
            Err(AuthError::PolicyDenied { .. })
        ));
    }

    #[test]
    fn test_grant_request_from_token_request() {
        let request = TokenRequest {
            grant_type: "authorization_code".to_string(),
            code: Some("abc".to_string()),
            ..Default::default()
        };
        let result = GrantRequest::from_token_request(request, web());
        assert!(matches!(result, Err(AuthError::InvalidRequest { .. })));

        let request = TokenRequest {
            grant_type: "password".to_string(),
            ..Default::default()
        };
        let result = GrantRequest::from_token_request(request, web());
        assert!(matches!(
            result,
            Err(AuthError::UnsupportedGrantType { .. })
        ));

        let request = TokenRequest {
            grant_type: "client_credentials".to_string(),
            scope: Some("movieAPI".to_string()),
            ..Default::default()
        };
        let grant = GrantRequest::from_token_request(request, machine()).unwrap();
        assert_eq!(grant.grant_type(), GrantType::ClientCredentials);
    }
}
