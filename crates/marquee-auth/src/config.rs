//! Authentication and authorization configuration.
//!
//! One [`AuthConfig`] is shared by all three roles (identity provider,
//! resource server, client application); each role reads the sections it
//! needs.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::{PolicyDefinition, Requirement};
use crate::token::jwt::SigningAlgorithm;

/// Root authentication and authorization configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "http://localhost:5005"
///
/// [auth.oauth]
/// access_token_lifetime = "1h"
///
/// [[auth.policies]]
/// name = "ClientIdPolicy"
/// requirements = [{ type = "claim_equals", claim = "client_id", values = ["movieClient"] }]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL placed in the `iss` claim and advertised by discovery.
    pub issuer: String,

    /// Token lifetimes and refresh behavior.
    pub oauth: OAuthConfig,

    /// Token signing keys.
    pub signing: SigningConfig,

    /// Cost parameters for client secret and password hashing.
    pub secrets: SecretHashingConfig,

    /// Resource server token validation.
    pub resource: ResourceConfig,

    /// Client application registration and identity provider calls.
    pub client: ClientConfig,

    /// Named authorization policies.
    pub policies: Vec<PolicyDefinition>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:5005".to_string(),
            oauth: OAuthConfig::default(),
            signing: SigningConfig::default(),
            secrets: SecretHashingConfig::default(),
            resource: ResourceConfig::default(),
            client: ClientConfig::default(),
            policies: default_policies(),
        }
    }
}

fn default_policies() -> Vec<PolicyDefinition> {
    vec![
        PolicyDefinition {
            name: "ClientIdPolicy".to_string(),
            requirements: vec![Requirement::ClaimEquals {
                claim: "client_id".to_string(),
                values: vec!["movieClient".to_string()],
            }],
        },
        PolicyDefinition {
            name: "AdminPolicy".to_string(),
            requirements: vec![Requirement::ClaimEquals {
                claim: "role".to_string(),
                values: vec!["admin".to_string()],
            }],
        },
        PolicyDefinition {
            name: "EditorPolicy".to_string(),
            requirements: vec![Requirement::ClaimEquals {
                claim: "role".to_string(),
                values: vec!["editor".to_string()],
            }],
        },
    ]
}

/// OAuth 2.0 token lifetimes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Access token lifetime, unless the client overrides it.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Identity token lifetime.
    #[serde(with = "humantime_serde")]
    pub identity_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Issue a new refresh token on every refresh grant and invalidate the
    /// presented one.
    pub refresh_token_rotation: bool,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_lifetime: Duration::from_secs(300),
            access_token_lifetime: Duration::from_secs(3600),
            identity_token_lifetime: Duration::from_secs(300),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            refresh_token_rotation: true,
        }
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm for newly generated keys.
    pub algorithm: SigningAlgorithm,

    /// Number of retired keys that stay published in the JWKS after a
    /// rotation.
    pub keys_to_keep: usize,

    /// PKCS#8 PEM file holding the signing key. Generated on first start
    /// when missing; an ephemeral key is used when unset.
    pub key_file: Option<PathBuf>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::RS256,
            keys_to_keep: 1,
            key_file: None,
        }
    }
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecretHashingConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for SecretHashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Resource server token validation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Identity provider whose JWKS endpoint supplies verification keys.
    pub authority: String,

    /// Audience this resource server accepts.
    pub audience: String,

    /// Reject tokens whose `aud` does not include [`Self::audience`].
    pub validate_audience: bool,

    /// Tolerance added to `exp` when checking expiry.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,

    /// Minimum interval between two JWKS fetches triggered by unknown key ids.
    #[serde(with = "humantime_serde")]
    pub jwks_min_refresh_interval: Duration,

    /// Timeout for JWKS and discovery requests.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Allow plain `http` authorities on non-loopback hosts.
    pub allow_http: bool,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            authority: "http://localhost:5005".to_string(),
            audience: "movieAPI".to_string(),
            validate_audience: true,
            clock_skew: Duration::ZERO,
            jwks_min_refresh_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            allow_http: false,
        }
    }
}

/// Client application settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Identity provider base URL.
    pub authority: String,

    /// Client identifier registered at the identity provider.
    pub client_id: String,

    /// Client secret registered at the identity provider.
    pub client_secret: String,

    /// Redirect URI receiving the authorization response.
    pub redirect_uri: String,

    /// Where the browser lands after logout.
    pub post_logout_redirect_uri: String,

    /// Scopes requested at login.
    pub scopes: Vec<String>,

    /// Base URL of the resource server called on behalf of the user.
    pub resource_base_url: String,

    /// Timeout applied to every identity provider call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Access tokens this close to expiry are refreshed before use.
    #[serde(with = "humantime_serde")]
    pub expiry_skew: Duration,

    /// Retry policy for transient identity provider failures.
    pub retry: RetryConfig,

    /// Allow a plain `http` authority on a non-loopback host.
    pub allow_http: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            authority: "http://localhost:5005".to_string(),
            client_id: "movies_mvc_client".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:5002/signin-oidc".to_string(),
            post_logout_redirect_uri: "http://localhost:5002/signout-callback-oidc".to_string(),
            scopes: ["openid", "profile", "address", "email", "roles", "movieAPI", "offline_access"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            resource_base_url: "http://localhost:5001".to_string(),
            request_timeout: Duration::from_secs(10),
            expiry_skew: Duration::from_secs(5),
            retry: RetryConfig::default(),
            allow_http: false,
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for a single delay.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl From<ConfigError> for crate::AuthError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistent value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("auth.issuer".to_string()));
        }
        url::Url::parse(&self.issuer)
            .map_err(|e| ConfigError::InvalidValue(format!("auth.issuer: {e}")))?;

        if self.oauth.access_token_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "auth.oauth.access_token_lifetime must be > 0".to_string(),
            ));
        }
        if self.oauth.authorization_code_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "auth.oauth.authorization_code_lifetime must be > 0".to_string(),
            ));
        }

        if self.secrets.memory_kib < 8 * self.secrets.parallelism.max(1) {
            return Err(ConfigError::InvalidValue(
                "auth.secrets.memory_kib must be at least 8 * parallelism".to_string(),
            ));
        }
        if self.secrets.iterations == 0 || self.secrets.parallelism == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.secrets.iterations and parallelism must be > 0".to_string(),
            ));
        }

        if self.resource.audience.is_empty() {
            return Err(ConfigError::Missing("auth.resource.audience".to_string()));
        }

        if self.client.client_id.is_empty() {
            return Err(ConfigError::Missing("auth.client.client_id".to_string()));
        }
        url::Url::parse(&self.client.redirect_uri)
            .map_err(|e| ConfigError::InvalidValue(format!("auth.client.redirect_uri: {e}")))?;
        if self.client.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.client.retry.max_attempts must be >= 1".to_string(),
            ));
        }
        if self.client.retry.initial_backoff > self.client.retry.max_backoff {
            return Err(ConfigError::InvalidValue(
                "auth.client.retry.initial_backoff must not exceed max_backoff".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for policy in &self.policies {
            if !seen.insert(policy.name.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate policy name '{}'",
                    policy.name
                )));
            }
        }

        Ok(())
    }
}
