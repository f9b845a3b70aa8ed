//! Secret hashing and opaque token generation.
//!
//! Client secrets and user passwords are stored as Argon2id PHC strings and
//! verified through the password-hash verifier, which compares in constant
//! time. Authorization codes and refresh tokens are random opaque values;
//! only their SHA-256 digest is kept server-side.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::config::SecretHashingConfig;
use crate::error::AuthError;

/// Argon2id hasher with configurable cost.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl SecretHasher {
    /// Creates a hasher from configured cost parameters.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if argon2 rejects the parameters.
    pub fn new(config: &SecretHashingConfig) -> Result<Self, AuthError> {
        let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
            .map_err(|e| AuthError::configuration(format!("argon2 parameters: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hashes a secret into a PHC string.
    ///
    /// # Errors
    ///
    /// Returns an internal error if hashing fails.
    pub fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| AuthError::internal(format!("failed to hash secret: {e}")))
    }

    /// Verifies a secret against a stored PHC string.
    ///
    /// A malformed stored hash verifies as `false`.
    #[must_use]
    pub fn verify(&self, secret: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(secret.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "Stored secret hash is malformed");
                false
            }
        }
    }
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher").finish_non_exhaustive()
    }
}

/// Generates a 256-bit random opaque token, hex encoded.
#[must_use]
pub fn generate_opaque_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    hex::encode(bytes)
}

/// SHA-256 digest of an opaque token, hex encoded.
#[must_use]
pub fn hash_opaque_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
pub(crate) fn test_hasher() -> SecretHasher {
    SecretHasher::new(&SecretHashingConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}
