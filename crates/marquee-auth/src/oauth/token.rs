//! Token endpoint wire types.
//!
//! Requests arrive as `application/x-www-form-urlencoded`; responses and
//! errors are JSON as defined by RFC 6749 section 5.

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Token request parameters.
///
/// Which fields are required depends on `grant_type`:
///
/// - `client_credentials`: (optional) `scope`
/// - `authorization_code`: `code`, `redirect_uri`
/// - `refresh_token`: `refresh_token`, (optional) narrower `scope`
///
/// Clients authenticate with HTTP Basic or with `client_id` and
/// `client_secret` in the body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    pub grant_type: String,

    /// Authorization code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Redirect URI the code was issued for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// Client id (client_secret_post).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Client secret (client_secret_post).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Requested scopes, space-separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenRequest {
    /// Requested scopes, split on whitespace.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        split_scopes(self.scope.as_deref())
    }
}

/// Splits a space-separated scope parameter.
#[must_use]
pub fn split_scopes(scope: Option<&str>) -> Vec<String> {
    scope
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Successful token response.
///
/// ```json
/// {
///   "access_token": "eyJhbG...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "openid profile movieAPI offline_access",
///   "id_token": "eyJhbG...",
///   "refresh_token": "9f86d0..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token (JWT).
    pub access_token: String,

    /// Token type, always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: u64,

    /// Granted scopes (space-separated).
    #[serde(default)]
    pub scope: String,

    /// Identity token, when `openid` was granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Refresh token, when `offline_access` was granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Token endpoint error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenError {
    /// OAuth 2.0 error code.
    pub error: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TokenError {
    /// Creates an error body.
    #[must_use]
    pub fn new(error: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: Some(description.into()),
        }
    }
}

impl From<&AuthError> for TokenError {
    fn from(err: &AuthError) -> Self {
        Self::new(err.oauth_error_code(), err.to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        Self::from_oauth_error_code(&err.error, err.error_description.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_request_from_form() {
        let form = "grant_type=client_credentials&scope=movieAPI%20extra&client_id=movieClient";
        let request: TokenRequest = parse_form(form);
        assert_eq!(request.grant_type, "client_credentials");
        assert_eq!(request.scopes(), vec!["movieAPI", "extra"]);
        assert_eq!(request.client_id.as_deref(), Some("movieClient"));
        assert!(request.code.is_none());
    }

    fn parse_form(form: &str) -> TokenRequest {
        let map: serde_json::Map<String, serde_json::Value> = url::form_urlencoded::parse(
            form.as_bytes(),
        )
        .map(|(k, v)| (k.into_owned(), serde_json::Value::String(v.into_owned())))
        .collect();
        serde_json::from_value(serde_json::Value::Object(map)).unwrap()
    }

    #[test]
    fn test_token_response_omits_absent_tokens() {
        let response = TokenResponse {
            access_token: "at".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 3600,
            scope: "movieAPI".to_string(),
            id_token: None,
            refresh_token: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("id_token").is_none());
        assert!(json.get("refresh_token").is_none());
        assert_eq!(json["token_type"], "Bearer");
    }

    #[test]
    fn test_token_error_round_trips_to_auth_error() {
        let body: TokenError =
            serde_json::from_str(r#"{"error":"invalid_grant","error_description":"expired"}"#)
                .unwrap();
        assert!(matches!(AuthError::from(body), AuthError::InvalidGrant { .. }));

        let err = AuthError::invalid_scope("adminAPI");
        assert_eq!(TokenError::from(&err).error, "invalid_scope");
    }
}
