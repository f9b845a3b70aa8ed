//! JWT signing keys, claim layouts and JWKS types.
//!
//! ## Supported Algorithms
//!
//! - **RS256**: RSA with SHA-256 (default)
//! - **RS384**: RSA with SHA-384
//! - **ES384**: ECDSA with P-384 curve
//!
//! Key ids are RFC 7638 thumbprints, so a key loaded from disk keeps its
//! `kid` across restarts.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, encode};
use p384::SecretKey as EcSecretKey;
use p384::ecdsa::SigningKey as EcSigningKey;
use p384::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::error::AuthError;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while creating keys or signing tokens.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError { message: String },

    /// Failed to generate a cryptographic key.
    #[error("Key generation error: {message}")]
    KeyGenerationError { message: String },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey { message: String },
}

impl JwtError {
    /// Creates a new `EncodingError`.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a new `KeyGenerationError`.
    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidKey` error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::invalid_key(err.to_string())
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        Self::internal(err.to_string())
    }
}

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms for JWT tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// RSA with SHA-256.
    RS256,
    /// RSA with SHA-384.
    RS384,
    /// ECDSA with P-384 curve.
    ES384,
}

impl SigningAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
            Self::RS384 => Algorithm::RS384,
            Self::ES384 => Algorithm::ES384,
        }
    }

    /// Parses a JWK/JWT `alg` value.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "RS256" => Some(Self::RS256),
            "RS384" => Some(Self::RS384),
            "ES384" => Some(Self::ES384),
            _ => None,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
            Self::RS384 => "RS384",
            Self::ES384 => "ES384",
        }
    }

    /// Returns `true` if this is an RSA-based algorithm.
    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::RS256 | Self::RS384)
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Token Claims
// ============================================================================

/// Access token payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject: user id, or client id for client-credentials tokens.
    pub sub: String,
    /// Resources this token is valid for.
    pub aud: Vec<String>,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Not before (Unix timestamp).
    pub nbf: i64,
    /// Unique token id.
    pub jti: String,
    /// Client the token was issued to.
    pub client_id: String,
    /// Granted scopes (space-separated).
    pub scope: String,
    /// User or client claims granted by the scopes.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

/// Identity token payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (user id).
    pub sub: String,
    /// Audience (client id).
    pub aud: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Time of the user login (Unix timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    /// Nonce from the authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Identity claims granted by the scopes.
    #[serde(flatten)]
    pub claims: Map<String, Value>,
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// JSON Web Key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "EC").
    pub kty: String,

    /// Key ID.
    #[serde(default)]
    pub kid: Option<String>,

    /// Key use ("sig" for signing).
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    /// Algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// EC curve name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url encoded).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Builds a verification key from the published parameters.
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported key types or malformed parameters.
    pub fn to_decoding_key(&self) -> Result<(SigningAlgorithm, DecodingKey), JwtError> {
        let algorithm = match (self.kty.as_str(), self.alg.as_deref()) {
            (_, Some(alg)) => SigningAlgorithm::from_name(alg)
                .ok_or_else(|| JwtError::invalid_key(format!("unsupported alg '{alg}'")))?,
            ("RSA", None) => SigningAlgorithm::RS256,
            ("EC", None) => SigningAlgorithm::ES384,
            (kty, None) => {
                return Err(JwtError::invalid_key(format!("unsupported kty '{kty}'")));
            }
        };

        let key = if algorithm.is_rsa() {
            let (Some(n), Some(e)) = (&self.n, &self.e) else {
                return Err(JwtError::invalid_key("RSA key without n/e"));
            };
            DecodingKey::from_rsa_components(n, e)?
        } else {
            let (Some(x), Some(y)) = (&self.x, &self.y) else {
                return Err(JwtError::invalid_key("EC key without x/y"));
            };
            if self.crv.as_deref().is_some_and(|crv| crv != "P-384") {
                return Err(JwtError::invalid_key("EC key is not on P-384"));
            }
            DecodingKey::from_ec_components(x, y)?
        };
        Ok((algorithm, key))
    }
}

// ============================================================================
// Signing Key Pair
// ============================================================================

/// A signing key pair for JWT operations.
pub struct SigningKeyPair {
    /// Key ID (RFC 7638 thumbprint).
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// Encoding key (private key) for signing.
    encoding_key: EncodingKey,

    /// Decoding key (public key) for verification.
    decoding_key: DecodingKey,

    /// Public key data for JWKS export.
    public_key_data: PublicKeyData,

    /// When the key was loaded or created.
    pub created_at: OffsetDateTime,
}

/// Internal representation of public key data for JWKS export.
enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

impl SigningKeyPair {
    /// Generates a fresh key for the algorithm (RSA 2048 or P-384).
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn generate(algorithm: SigningAlgorithm) -> Result<Self, JwtError> {
        let pem = generate_private_pem(algorithm)?;
        Self::from_private_pem(algorithm, &pem)
    }

    /// Loads a key from a PKCS#8 PEM private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM data does not hold a key for the
    /// algorithm.
    pub fn from_private_pem(algorithm: SigningAlgorithm, private_pem: &str) -> Result<Self, JwtError> {
        let (encoding_key, public_key_data) = if algorithm.is_rsa() {
            let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let public_key = private_key.to_public_key();
            let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            (
                encoding_key,
                PublicKeyData::Rsa {
                    n: public_key.n().to_bytes_be(),
                    e: public_key.e().to_bytes_be(),
                },
            )
        } else {
            let secret_key = EcSecretKey::from_pkcs8_pem(private_pem)
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            let signing_key = EcSigningKey::from(&secret_key);
            let point = signing_key.verifying_key().to_encoded_point(false);
            let x = point
                .x()
                .ok_or_else(|| JwtError::invalid_key("Missing x coordinate"))?;
            let y = point
                .y()
                .ok_or_else(|| JwtError::invalid_key("Missing y coordinate"))?;
            let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
                .map_err(|e| JwtError::invalid_key(e.to_string()))?;
            (
                encoding_key,
                PublicKeyData::Ec {
                    x: x.to_vec(),
                    y: y.to_vec(),
                },
            )
        };

        let mut jwk = public_jwk(&public_key_data, algorithm, None);
        let (_, decoding_key) = jwk.to_decoding_key()?;
        let kid = thumbprint(&jwk);
        jwk.kid = Some(kid.clone());

        Ok(Self {
            kid,
            algorithm,
            encoding_key,
            decoding_key,
            public_key_data,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Signs claims, stamping this key's id in the header.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or signing fails.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let mut header = Header::new(self.algorithm.to_jwt_algorithm());
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key)
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    /// Returns the decoding key for verification.
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        public_jwk(&self.public_key_data, self.algorithm, Some(self.kid.clone()))
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Generates a PKCS#8 PEM private key for the algorithm.
///
/// # Errors
///
/// Returns an error if key generation fails.
pub fn generate_private_pem(algorithm: SigningAlgorithm) -> Result<String, JwtError> {
    let pem = if algorithm.is_rsa() {
        RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?
    } else {
        EcSecretKey::random(&mut OsRng)
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?
    };
    Ok((*pem).clone())
}

fn public_jwk(data: &PublicKeyData, algorithm: SigningAlgorithm, kid: Option<String>) -> Jwk {
    match data {
        PublicKeyData::Rsa { n, e } => Jwk {
            kty: "RSA".to_string(),
            kid,
            use_: Some("sig".to_string()),
            alg: Some(algorithm.as_str().to_string()),
            n: Some(URL_SAFE_NO_PAD.encode(n)),
            e: Some(URL_SAFE_NO_PAD.encode(e)),
            crv: None,
            x: None,
            y: None,
        },
        PublicKeyData::Ec { x, y } => Jwk {
            kty: "EC".to_string(),
            kid,
            use_: Some("sig".to_string()),
            alg: Some(algorithm.as_str().to_string()),
            n: None,
            e: None,
            crv: Some("P-384".to_string()),
            x: Some(URL_SAFE_NO_PAD.encode(x)),
            y: Some(URL_SAFE_NO_PAD.encode(y)),
        },
    }
}

/// RFC 7638 JWK thumbprint: required members in lexicographic order.
fn thumbprint(jwk: &Jwk) -> String {
    let canonical = match jwk.kty.as_str() {
        "RSA" => format!(
            r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
            jwk.e.as_deref().unwrap_or_default(),
            jwk.n.as_deref().unwrap_or_default()
        ),
        _ => format!(
            r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
            jwk.crv.as_deref().unwrap_or_default(),
            jwk.x.as_deref().unwrap_or_default(),
            jwk.y.as_deref().unwrap_or_default()
        ),
    };
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{Validation, decode};

    fn access_claims() -> AccessTokenClaims {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        AccessTokenClaims {
            iss: "http://localhost:5005".to_string(),
            sub: "movieClient".to_string(),
            aud: vec!["movieAPI".to_string()],
            exp: now + 3600,
            iat: now,
            nbf: now,
            jti: "jti-1".to_string(),
            client_id: "movieClient".to_string(),
            scope: "movieAPI".to_string(),
            claims: Map::new(),
        }
    }

    #[test]
    fn test_es384_sign_and_verify() {
        let key = SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap();
        let token = key.sign(&access_claims()).unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(key.kid.as_str()));
        assert_eq!(header.alg, Algorithm::ES384);

        let mut validation = Validation::new(Algorithm::ES384);
        validation.validate_aud = false;
        let data = decode::<AccessTokenClaims>(&token, key.decoding_key(), &validation).unwrap();
        assert_eq!(data.claims.client_id, "movieClient");
    }

    #[test]
    fn test_rs256_sign_and_verify_through_jwk() {
        let key = SigningKeyPair::generate(SigningAlgorithm::RS256).unwrap();
        let token = key.sign(&access_claims()).unwrap();

        let (algorithm, decoding_key) = key.to_jwk().to_decoding_key().unwrap();
        assert_eq!(algorithm, SigningAlgorithm::RS256);

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;
        assert!(decode::<AccessTokenClaims>(&token, &decoding_key, &validation).is_ok());
    }

    #[test]
    fn test_kid_is_stable_for_same_pem() {
        let pem = generate_private_pem(SigningAlgorithm::ES384).unwrap();
        let a = SigningKeyPair::from_private_pem(SigningAlgorithm::ES384, &pem).unwrap();
        let b = SigningKeyPair::from_private_pem(SigningAlgorithm::ES384, &pem).unwrap();
        assert_eq!(a.kid, b.kid);
    }

    #[test]
    fn test_wrong_algorithm_for_pem() {
        let pem = generate_private_pem(SigningAlgorithm::ES384).unwrap();
        assert!(SigningKeyPair::from_private_pem(SigningAlgorithm::RS256, &pem).is_err());
    }

    #[test]
    fn test_jwk_export_shape() {
        let key = SigningKeyPair::generate(SigningAlgorithm::ES384).unwrap();
        let json = serde_json::to_value(key.to_jwk()).unwrap();
        assert_eq!(json["kty"], "EC");
        assert_eq!(json["crv"], "P-384");
        assert_eq!(json["use"], "sig");
        assert_eq!(json["alg"], "ES384");
        assert!(json.get("n").is_none());
    }

    #[test]
    fn test_flattened_claims_serialize_at_top_level() {
        let mut claims = access_claims();
        claims
            .claims
            .insert("role".to_string(), Value::String("admin".to_string()));
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["role"], "admin");
        assert_eq!(json["aud"][0], "movieAPI");
    }
}
