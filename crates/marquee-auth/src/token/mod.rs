//! Token minting and verification.
//!
//! - [`jwt`]: claim payloads, signing keys and JWK export
//! - [`keys`]: the issuer's rotating [`KeyRing`] and the [`JwksCache`] used
//!   by remote validators, both behind [`KeySource`]
//! - [`issuer`]: grant handling and token assembly
//! - [`validator`]: bearer token verification

pub mod issuer;
pub mod jwt;
pub mod keys;
pub mod validator;

pub use issuer::{
    AuthorizeRequest, ClientCredentials, GrantRequest, IssuedTokens, TokenIssuer,
    ValidatedAuthorizeRequest,
};
pub use jwt::{AccessTokenClaims, IdTokenClaims, Jwk, Jwks, SigningAlgorithm, SigningKeyPair};
pub use keys::{JwksCache, KeyRing, KeySource, VerificationKey};
pub use validator::{TokenValidator, ValidatedClaims, ValidationSettings};
