//! Signing key ring and verification key sources.
//!
//! The identity provider owns a [`KeyRing`]: the first key signs, retired
//! keys stay published until `keys_to_keep` newer rotations push them out.
//! Token validators resolve verification keys through [`KeySource`], backed
//! either by a local key ring or by a remote [`JwksCache`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use serde::Serialize;
use tokio::sync::Mutex;
use url::Url;

use super::jwt::{Jwks, SigningAlgorithm, SigningKeyPair, generate_private_pem};
use crate::config::SigningConfig;
use crate::discovery::DiscoveryCache;
use crate::error::AuthError;

/// A public key able to verify tokens.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    pub algorithm: SigningAlgorithm,
    pub key: DecodingKey,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Resolves verification keys by key id.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Returns the key for `kid`.
    ///
    /// Implementations return [`AuthError::SignatureInvalid`] when no key
    /// matches, and [`AuthError::UpstreamUnavailable`] when keys cannot be
    /// fetched.
    async fn resolve(&self, kid: Option<&str>) -> Result<VerificationKey, AuthError>;
}

// ============================================================================
// Key Ring
// ============================================================================

/// Rotating set of signing keys. The newest key signs.
pub struct KeyRing {
    keys: ArcSwap<Vec<Arc<SigningKeyPair>>>,
    algorithm: SigningAlgorithm,
    keys_to_keep: usize,
}

impl KeyRing {
    /// Creates a ring around an initial key.
    #[must_use]
    pub fn new(initial: SigningKeyPair, keys_to_keep: usize) -> Self {
        let algorithm = initial.algorithm;
        Self {
            keys: ArcSwap::from_pointee(vec![Arc::new(initial)]),
            algorithm,
            keys_to_keep,
        }
    }

    /// Builds the ring from configuration: loads (or creates) the key file
    /// when configured, otherwise generates an ephemeral key.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the key file cannot be read, written
    /// or parsed.
    pub fn from_config(config: &SigningConfig) -> Result<Self, AuthError> {
        let key = match &config.key_file {
            Some(path) => load_or_create(path, config.algorithm)?,
            None => {
                tracing::info!(algorithm = %config.algorithm, "Generating ephemeral signing key");
                SigningKeyPair::generate(config.algorithm)?
            }
        };
        Ok(Self::new(key, config.keys_to_keep))
    }

    /// The key currently used for signing.
    #[must_use]
    pub fn current(&self) -> Arc<SigningKeyPair> {
        // The ring is never empty: it starts with one key and rotation only
        // prepends.
        self.keys.load()[0].clone()
    }

    /// Signs claims with the current key.
    ///
    /// # Errors
    ///
    /// Returns an internal error if signing fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, AuthError> {
        Ok(self.current().sign(claims)?)
    }

    /// Generates a new key with the ring's algorithm and makes it current.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn rotate(&self) -> Result<String, AuthError> {
        let key = SigningKeyPair::generate(self.algorithm)?;
        Ok(self.rotate_with(key))
    }

    /// Makes `key` current, retiring the previous one.
    pub fn rotate_with(&self, key: SigningKeyPair) -> String {
        let kid = key.kid.clone();
        let key = Arc::new(key);
        let keep = self.keys_to_keep;
        self.keys.rcu(|keys| {
            let mut next = Vec::with_capacity(keep + 1);
            next.push(key.clone());
            next.extend(keys.iter().take(keep).cloned());
            next
        });
        tracing::info!(kid = %kid, "Rotated signing key");
        kid
    }

    /// Public keys of every key in the ring.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self.keys.load().iter().map(|k| k.to_jwk()).collect(),
        }
    }

    /// Algorithms in use, for discovery metadata.
    #[must_use]
    pub fn algorithms(&self) -> Vec<String> {
        let mut algs: Vec<String> = Vec::new();
        for key in self.keys.load().iter() {
            let alg = key.algorithm.as_str().to_string();
            if !algs.contains(&alg) {
                algs.push(alg);
            }
        }
        algs
    }
}

#[async_trait]
impl KeySource for KeyRing {
    async fn resolve(&self, kid: Option<&str>) -> Result<VerificationKey, AuthError> {
        let keys = self.keys.load();
        let key = match kid {
            Some(kid) => keys.iter().find(|k| k.kid == kid),
            None => keys.first(),
        }
        .ok_or(AuthError::SignatureInvalid)?;
        Ok(VerificationKey {
            kid: key.kid.clone(),
            algorithm: key.algorithm,
            key: key.decoding_key().clone(),
        })
    }
}

fn load_or_create(path: &Path, algorithm: SigningAlgorithm) -> Result<SigningKeyPair, AuthError> {
    let pem = if path.exists() {
        std::fs::read_to_string(path).map_err(|e| {
            AuthError::configuration(format!("reading key file {}: {e}", path.display()))
        })?
    } else {
        let pem = generate_private_pem(algorithm)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AuthError::configuration(format!("creating {}: {e}", parent.display()))
            })?;
        }
        std::fs::write(path, &pem).map_err(|e| {
            AuthError::configuration(format!("writing key file {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "Created signing key file");
        pem
    };
    SigningKeyPair::from_private_pem(algorithm, &pem).map_err(|e| {
        AuthError::configuration(format!("key file {}: {e}", path.display()))
    })
}

// ============================================================================
// Remote JWKS
// ============================================================================

/// Errors that can occur while fetching a JWKS document.
#[derive(Debug, thiserror::Error)]
pub enum JwksError {
    /// The request failed or timed out.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The provider answered with a non-success status.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// The document could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The document holds no usable signing key.
    #[error("No usable signing keys in JWKS")]
    NoSigningKeys,
}

impl From<JwksError> for AuthError {
    fn from(err: JwksError) -> Self {
        Self::upstream_unavailable(err.to_string())
    }
}

enum JwksLocation {
    Direct(Url),
    Discovered(Arc<DiscoveryCache>),
}

/// Remote key set with single-flight refresh on unknown key ids.
///
/// Lookups are lock-free. A miss takes the refresh gate; whoever holds it
/// first fetches, the others re-check the freshly stored keys. Fetches are
/// at most one per `min_refresh_interval`.
pub struct JwksCache {
    location: JwksLocation,
    http: reqwest::Client,
    request_timeout: Duration,
    min_refresh_interval: Duration,
    keys: ArcSwap<HashMap<String, VerificationKey>>,
    last_refresh: Mutex<Option<Instant>>,
}

impl JwksCache {
    /// Creates a cache reading a fixed JWKS URL.
    #[must_use]
    pub fn new(jwks_uri: Url, http: reqwest::Client) -> Self {
        Self::with_location(JwksLocation::Direct(jwks_uri), http)
    }

    /// Creates a cache that learns the JWKS URL from discovery.
    #[must_use]
    pub fn from_discovery(discovery: Arc<DiscoveryCache>, http: reqwest::Client) -> Self {
        Self::with_location(JwksLocation::Discovered(discovery), http)
    }

    fn with_location(location: JwksLocation, http: reqwest::Client) -> Self {
        Self {
            location,
            http,
            request_timeout: Duration::from_secs(10),
            min_refresh_interval: Duration::from_secs(30),
            keys: ArcSwap::from_pointee(HashMap::new()),
            last_refresh: Mutex::new(None),
        }
    }

    /// Sets the minimum interval between two fetches.
    #[must_use]
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.load().len()
    }

    /// Returns `true` if no key is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.load().is_empty()
    }

    fn lookup(&self, kid: Option<&str>) -> Option<VerificationKey> {
        let keys = self.keys.load();
        match kid {
            Some(kid) => keys.get(kid).cloned(),
            None if keys.len() == 1 => keys.values().next().cloned(),
            None => None,
        }
    }

    /// Fetches the key set unless the wanted key arrived while waiting for
    /// the gate, or another caller fetched within the minimum refresh
    /// interval.
    async fn refresh_gated(&self, kid: Option<&str>) -> Result<(), AuthError> {
        let mut last = self.last_refresh.lock().await;
        if self.lookup(kid).is_some() {
            return Ok(());
        }
        if let Some(at) = *last
            && at.elapsed() < self.min_refresh_interval
        {
            return Ok(());
        }
        let result = self.fetch().await;
        // Failed fetches count too.
        *last = Some(Instant::now());
        let keys = result?;
        tracing::debug!(keys = keys.len(), "Refreshed JWKS");
        self.keys.store(Arc::new(keys));
        Ok(())
    }

    async fn jwks_uri(&self) -> Result<Url, AuthError> {
        match &self.location {
            JwksLocation::Direct(url) => Ok(url.clone()),
            JwksLocation::Discovered(discovery) => {
                let document = discovery.get().await?;
                discovery.endpoint(&document.jwks_uri)
            }
        }
    }

    async fn fetch(&self) -> Result<HashMap<String, VerificationKey>, AuthError> {
        let uri = self.jwks_uri().await?;
        let response = self
            .http
            .get(uri.as_str())
            .header("Accept", "application/json")
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(uri = %uri, error = %e, "Failed to fetch JWKS");
                JwksError::NetworkError(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(JwksError::HttpError(response.status().as_u16()).into());
        }

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| JwksError::ParseError(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.use_.as_deref().is_some_and(|u| u != "sig") {
                continue;
            }
            let Some(kid) = jwk.kid.clone() else {
                tracing::debug!("Skipping JWK without kid");
                continue;
            };
            match jwk.to_decoding_key() {
                Ok((algorithm, key)) => {
                    keys.insert(
                        kid.clone(),
                        VerificationKey {
                            kid,
                            algorithm,
                            key,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(kid = %kid, error = %e, "Skipping unusable JWK");
                }
            }
        }

        if keys.is_empty() {
            return Err(JwksError::NoSigningKeys.into());
        }
        Ok(keys)
    }
}

#[async_trait]
impl KeySource for JwksCache {
    async fn resolve(&self, kid: Option<&str>) -> Result<VerificationKey, AuthError> {
        if let Some(key) = self.lookup(kid) {
            return Ok(key);
        }
        self.refresh_gated(kid).await?;
        self.lookup(kid).ok_or_else(|| {
            tracing::debug!(kid = ?kid, "No verification key for token");
            AuthError::SignatureInvalid
        })
    }
}
