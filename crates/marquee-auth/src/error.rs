//! Authentication and authorization error types.
//!
//! Every component in this crate reports failures through [`AuthError`].
//! Module-local errors (JWT, JWKS, discovery, claims, configuration) convert
//! into it at the component boundary.

use std::fmt;

/// Errors that can occur across the token lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The client is unknown or its credentials do not match.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The client is known but may not use the requested grant type.
    #[error("Unauthorized client: {message}")]
    UnauthorizedClient {
        /// Description of what the client may not do.
        message: String,
    },

    /// The requested scope is unknown or not allowed for the client.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The authorization code or refresh token is invalid, expired, or was
    /// issued to another client.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// The token signature could not be verified.
    #[error("Token signature is invalid")]
    SignatureInvalid,

    /// The token was not issued for this resource.
    #[error("Token audience does not include '{expected}'")]
    AudienceMismatch {
        /// Audience the resource expected.
        expected: String,
    },

    /// The token is malformed or was issued by another authority.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The request carries no credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Description of why the request is unauthorized.
        message: String,
    },

    /// The session can no longer produce a usable access token; the user
    /// must log in again.
    #[error("Reauthentication required")]
    ReauthenticationRequired,

    /// An authorization policy denied access.
    #[error("Access denied by policy '{policy}': {message}")]
    PolicyDenied {
        /// Name of the denying policy.
        policy: String,
        /// Description of the failed requirement.
        message: String,
    },

    /// The identity provider (or its key endpoint) could not be reached.
    #[error("Upstream unavailable: {message}")]
    UpstreamUnavailable {
        /// Description of the upstream failure.
        message: String,
        /// The request may have reached the provider before the failure
        /// (timeout, 5xx, broken response).
        request_sent: bool,
    },

    /// The request is missing a parameter or is otherwise malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The grant type is not supported by this server.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// The auth configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnauthorizedClient` error.
    #[must_use]
    pub fn unauthorized_client(message: impl Into<String>) -> Self {
        Self::UnauthorizedClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `AudienceMismatch` error.
    #[must_use]
    pub fn audience_mismatch(expected: impl Into<String>) -> Self {
        Self::AudienceMismatch {
            expected: expected.into(),
        }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `Unauthorized` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a new `PolicyDenied` error.
    #[must_use]
    pub fn policy_denied(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PolicyDenied {
            policy: policy.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamUnavailable` error.
    #[must_use]
    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
            request_sent: false,
        }
    }

    /// Creates an `UpstreamUnavailable` error for a request whose outcome
    /// at the provider is unknown.
    #[must_use]
    pub fn upstream_interrupted(message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            message: message.into(),
            request_sent: true,
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if this error rejects a presented token.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired
                | Self::SignatureInvalid
                | Self::AudienceMismatch { .. }
                | Self::InvalidToken { .. }
        )
    }

    /// Returns `true` if the failed operation may succeed when retried.
    ///
    /// Only transient upstream failures qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }

    /// Returns `true` if a non-idempotent request (a token grant) can be sent
    /// again: the provider is known not to have processed it.
    #[must_use]
    pub fn is_safe_to_resend(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable {
                request_sent: false,
                ..
            }
        )
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidClient { .. }
            | Self::InvalidGrant { .. }
            | Self::Unauthorized { .. }
            | Self::ReauthenticationRequired => ErrorCategory::Authentication,
            Self::UnauthorizedClient { .. }
            | Self::InvalidScope { .. }
            | Self::PolicyDenied { .. } => ErrorCategory::Authorization,
            Self::TokenExpired
            | Self::SignatureInvalid
            | Self::AudienceMismatch { .. }
            | Self::InvalidToken { .. } => ErrorCategory::Token,
            Self::InvalidRequest { .. } | Self::UnsupportedGrantType { .. } => {
                ErrorCategory::Validation
            }
            Self::UpstreamUnavailable { .. } => ErrorCategory::Upstream,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidClient { .. } => "invalid_client",
            Self::UnauthorizedClient { .. } => "unauthorized_client",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::TokenExpired
            | Self::SignatureInvalid
            | Self::AudienceMismatch { .. }
            | Self::InvalidToken { .. } => "invalid_token",
            Self::Unauthorized { .. } => "unauthorized",
            Self::ReauthenticationRequired => "login_required",
            Self::PolicyDenied { .. } => "access_denied",
            Self::UpstreamUnavailable { .. } => "temporarily_unavailable",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::Configuration { .. } | Self::Internal { .. } => "server_error",
        }
    }

    /// Maps an OAuth 2.0 error code returned by a token endpoint back to an
    /// error value.
    #[must_use]
    pub fn from_oauth_error_code(code: &str, description: impl Into<String>) -> Self {
        let description = description.into();
        match code {
            "invalid_client" => Self::invalid_client(description),
            "unauthorized_client" => Self::unauthorized_client(description),
            "invalid_scope" => Self::invalid_scope(description),
            "invalid_grant" => Self::invalid_grant(description),
            "invalid_token" => Self::invalid_token(description),
            "unsupported_grant_type" => Self::unsupported_grant_type(description),
            "invalid_request" => Self::invalid_request(description),
            "temporarily_unavailable" => Self::upstream_unavailable(description),
            _ => Self::internal(format!("{code}: {description}")),
        }
    }
}

/// Categories of errors for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Identity verification failed.
    Authentication,
    /// Permission checks failed.
    Authorization,
    /// A presented token was rejected.
    Token,
    /// Request validation errors.
    Validation,
    /// The identity provider could not be reached.
    Upstream,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Authorization => write!(f, "authorization"),
            Self::Token => write!(f, "token"),
            Self::Validation => write!(f, "validation"),
            Self::Upstream => write!(f, "upstream"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_client("client not found");
        assert_eq!(err.to_string(), "Invalid client: client not found");

        let err = AuthError::audience_mismatch("movieAPI");
        assert_eq!(
            err.to_string(),
            "Token audience does not include 'movieAPI'"
        );

        let err = AuthError::policy_denied("AdminPolicy", "missing claim 'role'");
        assert_eq!(
            err.to_string(),
            "Access denied by policy 'AdminPolicy': missing claim 'role'"
        );
    }

    #[test]
    fn test_token_errors_share_oauth_code() {
        for err in [
            AuthError::TokenExpired,
            AuthError::SignatureInvalid,
            AuthError::audience_mismatch("movieAPI"),
            AuthError::invalid_token("malformed"),
        ] {
            assert!(err.is_token_error());
            assert_eq!(err.oauth_error_code(), "invalid_token");
            assert_eq!(err.category(), ErrorCategory::Token);
        }
    }

    #[test]
    fn test_only_upstream_errors_are_retryable() {
        assert!(AuthError::upstream_unavailable("timeout").is_retryable());
        assert!(!AuthError::invalid_grant("revoked").is_retryable());
        assert!(!AuthError::ReauthenticationRequired.is_retryable());
        assert!(!AuthError::internal("boom").is_retryable());
    }

    #[test]
    fn test_interrupted_request_is_not_resent() {
        let interrupted = AuthError::upstream_interrupted("token endpoint timed out");
        assert!(interrupted.is_retryable());
        assert!(!interrupted.is_safe_to_resend());
        assert!(AuthError::upstream_unavailable("connection refused").is_safe_to_resend());
        assert!(!AuthError::invalid_grant("used").is_safe_to_resend());
    }

    #[test]
    fn test_server_error_classification() {
        assert!(AuthError::upstream_unavailable("down").is_server_error());
        assert!(AuthError::internal("boom").is_server_error());
        assert!(AuthError::invalid_scope("nope").is_client_error());
        assert!(AuthError::ReauthenticationRequired.is_client_error());
    }

    #[test]
    fn test_from_oauth_error_code() {
        assert!(matches!(
            AuthError::from_oauth_error_code("invalid_grant", "used"),
            AuthError::InvalidGrant { .. }
        ));
        assert!(matches!(
            AuthError::from_oauth_error_code("unauthorized_client", "no"),
            AuthError::UnauthorizedClient { .. }
        ));
        assert!(matches!(
            AuthError::from_oauth_error_code("something_else", "?"),
            AuthError::Internal { .. }
        ));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Upstream.to_string(), "upstream");
        assert_eq!(ErrorCategory::Token.to_string(), "token");
    }
}
