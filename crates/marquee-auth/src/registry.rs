//! In-memory client registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AuthError;
use crate::secret::SecretHasher;
use crate::types::Client;

/// Immutable set of registered clients.
pub struct ClientRegistry {
    clients: HashMap<String, Arc<Client>>,
    hasher: SecretHasher,
    dummy_hash: String,
}

impl ClientRegistry {
    /// Creates a registry, validating every registration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid or duplicate client.
    pub fn new(clients: Vec<Client>, hasher: SecretHasher) -> Result<Self, AuthError> {
        let mut map = HashMap::with_capacity(clients.len());
        for client in clients {
            client.validate().map_err(|e| {
                AuthError::configuration(format!("client '{}': {e}", client.client_id))
            })?;
            let id = client.client_id.clone();
            if map.insert(id.clone(), Arc::new(client)).is_some() {
                return Err(AuthError::configuration(format!(
                    "client '{id}' is registered twice"
                )));
            }
        }
        let dummy_hash = hasher.hash("unknown-client")?;
        Ok(Self {
            clients: map,
            hasher,
            dummy_hash,
        })
    }

    /// Looks up a client by id.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.get(client_id).cloned()
    }

    /// Authenticates a client by id and secret.
    ///
    /// Unknown clients and wrong secrets produce the same error and the
    /// same hashing cost.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidClient`] if authentication fails.
    pub fn authenticate(&self, client_id: &str, secret: &str) -> Result<Arc<Client>, AuthError> {
        match self.clients.get(client_id) {
            Some(client) if self.hasher.verify(secret, &client.secret_hash) => Ok(client.clone()),
            Some(_) => {
                tracing::warn!(client_id = %client_id, "Client secret mismatch");
                Err(AuthError::invalid_client("client authentication failed"))
            }
            None => {
                let _ = self.hasher.verify(secret, &self.dummy_hash);
                tracing::warn!(client_id = %client_id, "Unknown client");
                Err(AuthError::invalid_client("client authentication failed"))
            }
        }
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_registry() -> ClientRegistry {
    use crate::claims::ClaimSet;
    use crate::types::GrantType;

    let hasher = crate::secret::test_hasher();
    let machine = Client {
        client_id: "movieClient".to_string(),
        name: "Movie API Client".to_string(),
        secret_hash: hasher.hash("secret").unwrap(),
        grant_types: vec![GrantType::ClientCredentials],
        allowed_scopes: vec!["movieAPI".to_string()],
        redirect_uris: vec![],
        post_logout_redirect_uris: vec![],
        access_token_lifetime: None,
        allow_offline_access: false,
        claims: ClaimSet::new(),
    };
    let web = Client {
        client_id: "movies_mvc_client".to_string(),
        name: "Movies MVC Web App".to_string(),
        secret_hash: hasher.hash("secret").unwrap(),
        grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
        allowed_scopes: [
            "openid",
            "profile",
            "address",
            "email",
            "roles",
            "movieAPI",
            "offline_access",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect(),
        redirect_uris: vec!["http://localhost:5002/signin-oidc".to_string()],
        post_logout_redirect_uris: vec!["http://localhost:5002/signout-callback-oidc".to_string()],
        access_token_lifetime: None,
        allow_offline_access: true,
        claims: ClaimSet::new(),
    };
    ClientRegistry::new(vec![machine, web], hasher).unwrap()
}
