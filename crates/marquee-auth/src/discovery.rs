//! OpenID Connect discovery document and client-side cache.
//!
//! The identity provider publishes a [`DiscoveryDocument`] at
//! `/.well-known/openid-configuration`. Clients and resource servers fetch it
//! once through [`DiscoveryCache`] to learn the token, user-info and JWKS
//! endpoints. The cache is invalidated explicitly; there is no hidden global.

use std::time::Duration;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::error::AuthError;

/// Path of the discovery document relative to the issuer.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Path of the JWKS document relative to the issuer.
pub const JWKS_PATH: &str = "/.well-known/openid-configuration/jwks";

/// Provider metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub claims_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub subject_types_supported: Vec<String>,
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
}

/// Errors that can occur while fetching provider metadata.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// The request failed or timed out.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The provider answered with a non-success status.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The document could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The URL scheme is not allowed.
    #[error("Invalid scheme '{0}': only HTTPS is allowed")]
    InvalidScheme(String),

    /// The document's issuer differs from the configured authority.
    #[error("Issuer mismatch: expected '{expected}', got '{actual}'")]
    IssuerMismatch {
        /// Configured authority.
        expected: String,
        /// Issuer announced by the document.
        actual: String,
    },
}

impl From<DiscoveryError> for AuthError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::NetworkError(_)
            | DiscoveryError::HttpError(_)
            | DiscoveryError::ParseError(_) => Self::upstream_unavailable(err.to_string()),
            DiscoveryError::InvalidScheme(_) | DiscoveryError::IssuerMismatch { .. } => {
                Self::configuration(err.to_string())
            }
        }
    }
}

/// Accepts `https`, and `http` on loopback hosts or when explicitly allowed.
///
/// # Errors
///
/// Returns [`DiscoveryError::InvalidScheme`] otherwise.
pub fn validate_scheme(url: &Url, allow_http: bool) -> Result<(), DiscoveryError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if allow_http || is_loopback(url) => Ok(()),
        other => Err(DiscoveryError::InvalidScheme(other.to_string())),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Fetches and caches a provider's discovery document.
pub struct DiscoveryCache {
    authority: Url,
    http: reqwest::Client,
    allow_http: bool,
    request_timeout: Duration,
    document: ArcSwapOption<DiscoveryDocument>,
}

impl DiscoveryCache {
    /// Creates a cache for `authority`.
    ///
    /// # Errors
    ///
    /// Returns an error if the authority is not a valid URL with an allowed
    /// scheme.
    pub fn new(
        authority: &str,
        http: reqwest::Client,
        allow_http: bool,
        request_timeout: Duration,
    ) -> Result<Self, AuthError> {
        let authority = Url::parse(authority)
            .map_err(|e| AuthError::configuration(format!("authority '{authority}': {e}")))?;
        validate_scheme(&authority, allow_http)?;
        Ok(Self {
            authority,
            http,
            allow_http,
            request_timeout,
            document: ArcSwapOption::empty(),
        })
    }

    /// Returns the cached document, fetching it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UpstreamUnavailable`] if the provider cannot be
    /// reached.
    pub async fn get(&self) -> Result<Arc<DiscoveryDocument>, AuthError> {
        if let Some(document) = self.document.load_full() {
            return Ok(document);
        }
        let document = Arc::new(self.fetch().await?);
        self.document.store(Some(document.clone()));
        Ok(document)
    }

    /// Drops the cached document; the next [`Self::get`] refetches it.
    pub fn invalidate(&self) {
        self.document.store(None);
    }

    /// Configured authority.
    #[must_use]
    pub fn authority(&self) -> &Url {
        &self.authority
    }

    /// Resolves an endpoint announced by the document, validating its scheme.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a malformed or disallowed URL.
    pub fn endpoint(&self, raw: &str) -> Result<Url, AuthError> {
        let url = Url::parse(raw)
            .map_err(|e| AuthError::configuration(format!("endpoint '{raw}': {e}")))?;
        validate_scheme(&url, self.allow_http)?;
        Ok(url)
    }

    async fn fetch(&self) -> Result<DiscoveryDocument, DiscoveryError> {
        let discovery_url = format!(
            "{}{}",
            self.authority.as_str().trim_end_matches('/'),
            DISCOVERY_PATH
        );

        let response = self
            .http
            .get(&discovery_url)
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(authority = %self.authority, error = %e, "Failed to fetch discovery document");
                DiscoveryError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpError(response.status().as_u16()));
        }

        let document: DiscoveryDocument = response
            .json()
            .await
            .map_err(|e| DiscoveryError::ParseError(e.to_string()))?;

        let expected = self.authority.as_str().trim_end_matches('/');
        if document.issuer.trim_end_matches('/') != expected {
            return Err(DiscoveryError::IssuerMismatch {
                expected: expected.to_string(),
                actual: document.issuer.clone(),
            });
        }

        tracing::debug!(issuer = %document.issuer, "Discovered provider configuration");
        Ok(document)
    }
}

impl std::fmt::Debug for DiscoveryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryCache")
            .field("authority", &self.authority.as_str())
            .field("cached", &self.document.load().is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_document(issuer: &str) -> DiscoveryDocument {
    DiscoveryDocument {
        issuer: issuer.to_string(),
        authorization_endpoint: format!("{issuer}/connect/authorize"),
        token_endpoint: format!("{issuer}/connect/token"),
        userinfo_endpoint: format!("{issuer}/connect/userinfo"),
        jwks_uri: format!("{issuer}{JWKS_PATH}"),
        end_session_endpoint: Some(format!("{issuer}/connect/endsession")),
        scopes_supported: vec!["openid".to_string()],
        claims_supported: vec![],
        grant_types_supported: vec![],
        response_types_supported: vec!["code".to_string()],
        subject_types_supported: vec!["public".to_string()],
        id_token_signing_alg_values_supported: vec!["ES384".to_string()],
        token_endpoint_auth_methods_supported: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_validate_scheme() {
        let https = Url::parse("https://idp.example.com").unwrap();
        let local = Url::parse("http://localhost:5005").unwrap();
        let loopback = Url::parse("http://127.0.0.1:5005").unwrap();
        let remote_http = Url::parse("http://idp.example.com").unwrap();
        let ftp = Url::parse("ftp://idp.example.com").unwrap();

        assert!(validate_scheme(&https, false).is_ok());
        assert!(validate_scheme(&local, false).is_ok());
        assert!(validate_scheme(&loopback, false).is_ok());
        assert!(validate_scheme(&remote_http, false).is_err());
        assert!(validate_scheme(&remote_http, true).is_ok());
        assert!(validate_scheme(&ftp, true).is_err());
    }

    #[tokio::test]
    async fn test_fetch_and_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_document(&server.uri())))
            .expect(1)
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(
            &server.uri(),
            reqwest::Client::new(),
            false,
            Duration::from_secs(5),
        )
        .unwrap();

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();
        assert_eq!(first.token_endpoint, format!("{}/connect/token", server.uri()));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_issuer_mismatch_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(test_document("https://other.example.com")),
            )
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(
            &server.uri(),
            reqwest::Client::new(),
            false,
            Duration::from_secs(5),
        )
        .unwrap();
        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, AuthError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_upstream_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(
            &server.uri(),
            reqwest::Client::new(),
            false,
            Duration::from_secs(5),
        )
        .unwrap();
        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(test_document(&server.uri())))
            .expect(2)
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new(
            &server.uri(),
            reqwest::Client::new(),
            false,
            Duration::from_secs(5),
        )
        .unwrap();
        cache.get().await.unwrap();
        cache.invalidate();
        cache.get().await.unwrap();
    }
}
