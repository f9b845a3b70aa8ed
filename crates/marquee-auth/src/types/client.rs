//! OAuth 2.0 client registrations.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::claims::ClaimSet;

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Client Credentials flow.
    ClientCredentials,
    /// Refresh Token flow.
    RefreshToken,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::ClientCredentials => "client_credentials",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = crate::AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "client_credentials" => Ok(Self::ClientCredentials),
            "refresh_token" => Ok(Self::RefreshToken),
            other => Err(crate::AuthError::unsupported_grant_type(other)),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// A registered client. Loaded once at start-up and never mutated.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique client identifier used in OAuth flows.
    pub client_id: String,

    /// Human-readable display name.
    pub name: String,

    /// Argon2id PHC hash of the client secret.
    pub secret_hash: String,

    /// Grant types this client may use.
    pub grant_types: Vec<GrantType>,

    /// Scopes this client may request.
    pub allowed_scopes: Vec<String>,

    /// Exact redirect URIs accepted for the authorization-code flow.
    pub redirect_uris: Vec<String>,

    /// Redirect URIs accepted after logout.
    pub post_logout_redirect_uris: Vec<String>,

    /// Access token lifetime override.
    pub access_token_lifetime: Option<Duration>,

    /// Whether refresh tokens may be issued to this client.
    pub allow_offline_access: bool,

    /// Claims of the client acting as its own principal in the
    /// client-credentials grant. Granted scopes decide which reach a token.
    pub claims: ClaimSet,
}

impl Client {
    /// Validates the client registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is inconsistent.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.grant_types.is_empty() {
            return Err(ClientValidationError::NoGrantTypes);
        }

        if self.secret_hash.is_empty() {
            return Err(ClientValidationError::MissingSecret);
        }

        if self.grant_types.contains(&GrantType::AuthorizationCode) && self.redirect_uris.is_empty()
        {
            return Err(ClientValidationError::NoRedirectUris);
        }

        if self.grant_types.contains(&GrantType::RefreshToken) && !self.allow_offline_access {
            return Err(ClientValidationError::RefreshWithoutOfflineAccess);
        }

        Ok(())
    }

    /// Checks if the given redirect URI is registered for this client.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    /// Checks if the given post-logout redirect URI is registered.
    #[must_use]
    pub fn is_post_logout_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.post_logout_redirect_uris
            .iter()
            .any(|allowed| allowed == uri)
    }

    /// Checks if the client may request the scope.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        self.allowed_scopes.iter().any(|allowed| allowed == scope)
    }

    /// Checks if the client may use the grant type.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Errors that can occur during client validation.
#[derive(Debug, thiserror::Error)]
pub enum ClientValidationError {
    /// Client ID cannot be empty.
    #[error("Client ID cannot be empty")]
    EmptyClientId,

    /// At least one grant type is required.
    #[error("At least one grant type is required")]
    NoGrantTypes,

    /// Authorization code flow requires redirect URIs.
    #[error("Authorization code flow requires redirect URIs")]
    NoRedirectUris,

    /// Clients must have a secret.
    #[error("Client secret is required")]
    MissingSecret,

    /// The refresh grant is enabled but offline access is not.
    #[error("refresh_token grant requires allow_offline_access")]
    RefreshWithoutOfflineAccess,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client() -> Client {
        Client {
            client_id: "movies_mvc_client".to_string(),
            name: "Movies MVC Web App".to_string(),
            secret_hash: "$argon2id$placeholder".to_string(),
            grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
            allowed_scopes: vec!["openid".to_string(), "movieAPI".to_string()],
            redirect_uris: vec!["http://localhost:5002/signin-oidc".to_string()],
            post_logout_redirect_uris: vec![
                "http://localhost:5002/signout-callback-oidc".to_string(),
            ],
            access_token_lifetime: None,
            allow_offline_access: true,
            claims: ClaimSet::new(),
        }
    }

    #[test]
    fn test_valid_client() {
        assert!(make_client().validate().is_ok());
    }

    #[test]
    fn test_empty_client_id() {
        let mut client = make_client();
        client.client_id = String::new();
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::EmptyClientId)
        ));
    }

    #[test]
    fn test_authorization_code_requires_redirect_uris() {
        let mut client = make_client();
        client.redirect_uris.clear();
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::NoRedirectUris)
        ));
    }

    #[test]
    fn test_refresh_requires_offline_access() {
        let mut client = make_client();
        client.allow_offline_access = false;
        assert!(matches!(
            client.validate(),
            Err(ClientValidationError::RefreshWithoutOfflineAccess)
        ));
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let client = make_client();
        assert!(client.is_redirect_uri_allowed("http://localhost:5002/signin-oidc"));
        assert!(!client.is_redirect_uri_allowed("http://localhost:5002/signin-oidc/"));
        assert!(!client.is_redirect_uri_allowed("http://evil.example.com/signin-oidc"));
    }

    #[test]
    fn test_scope_allowed() {
        let client = make_client();
        assert!(client.is_scope_allowed("movieAPI"));
        assert!(!client.is_scope_allowed("adminAPI"));
    }

    #[test]
    fn test_grant_type_parsing() {
        assert_eq!(
            "client_credentials".parse::<GrantType>().unwrap(),
            GrantType::ClientCredentials
        );
        assert!(matches!(
            "password".parse::<GrantType>(),
            Err(crate::AuthError::UnsupportedGrantType { .. })
        ));
        assert_eq!(GrantType::RefreshToken.to_string(), "refresh_token");
    }
}
