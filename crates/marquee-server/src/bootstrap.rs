//! Static catalog and client registrations of the identity provider.
//!
//! Two users (`alice`, an admin, and `bob`, an editor), the standard
//! identity resources plus `roles`, one API scope for the movies API, and
//! two clients: `movieClient` for machine-to-machine calls and the web
//! client configured in `[auth.client]`.

use std::sync::Arc;

use marquee_auth::AuthResult;
use marquee_auth::catalog::{ApiScope, ClaimsCatalog, IdentityResource, TestUser};
use marquee_auth::claims::{ClaimSet, ClaimType};
use marquee_auth::config::AuthConfig;
use marquee_auth::registry::ClientRegistry;
use marquee_auth::secret::SecretHasher;
use marquee_auth::token::{KeyRing, TokenIssuer};
use marquee_auth::types::{Client, GrantType};

/// Resource (audience) and API scope name of the movies API.
pub const MOVIE_API: &str = "movieAPI";

/// Client id of the machine-to-machine client.
pub const MACHINE_CLIENT_ID: &str = "movieClient";

/// Secret of the machine-to-machine client.
pub const MACHINE_CLIENT_SECRET: &str = "secret";

pub fn identity_resources() -> Vec<IdentityResource> {
    vec![
        IdentityResource::openid(),
        IdentityResource::profile(),
        IdentityResource::email(),
        IdentityResource::address(),
        IdentityResource::new("roles", "Your role(s)", vec![ClaimType::Role]),
    ]
}

pub fn api_scopes() -> Vec<ApiScope> {
    vec![ApiScope::new(
        MOVIE_API,
        "Movie API",
        vec![MOVIE_API.to_string()],
    )]
}

pub fn test_users(hasher: &SecretHasher) -> AuthResult<Vec<TestUser>> {
    let alice = TestUser::new(
        "5BE86359-073C-434B-AD2D-A3932222DABE",
        "alice",
        "alice",
        ClaimSet::new()
            .with(ClaimType::Name, "Alice Smith")
            .with(ClaimType::GivenName, "Alice")
            .with(ClaimType::FamilyName, "Smith")
            .with(ClaimType::Email, "alice@example.com")
            .with(ClaimType::EmailVerified, "true")
            .with(ClaimType::Website, "http://alice.example.com")
            .with(
                ClaimType::Address,
                r#"{"street_address":"One Hacker Way","locality":"Heidelberg","postal_code":"69118","country":"Germany"}"#,
            )
            .with(ClaimType::Role, "admin"),
        hasher,
    )?;
    let bob = TestUser::new(
        "88421113",
        "bob",
        "bob",
        ClaimSet::new()
            .with(ClaimType::Name, "Bob Smith")
            .with(ClaimType::GivenName, "Bob")
            .with(ClaimType::FamilyName, "Smith")
            .with(ClaimType::Email, "bob@example.com")
            .with(ClaimType::EmailVerified, "true")
            .with(ClaimType::Website, "http://bob.example.com")
            .with(ClaimType::Role, "editor"),
        hasher,
    )?;
    Ok(vec![alice, bob])
}

/// The two registered clients. The web client's id, secret and redirect
/// URIs come from `[auth.client]` so both sides agree on them.
pub fn clients(config: &AuthConfig, hasher: &SecretHasher) -> AuthResult<Vec<Client>> {
    let machine = Client {
        client_id: MACHINE_CLIENT_ID.to_string(),
        name: "Movie API Client".to_string(),
        secret_hash: hasher.hash(MACHINE_CLIENT_SECRET)?,
        grant_types: vec![GrantType::ClientCredentials],
        allowed_scopes: vec![MOVIE_API.to_string()],
        redirect_uris: vec![],
        post_logout_redirect_uris: vec![],
        access_token_lifetime: None,
        allow_offline_access: false,
        claims: ClaimSet::new(),
    };

    let web = &config.client;
    let web = Client {
        client_id: web.client_id.clone(),
        name: "Movies MVC Web App".to_string(),
        secret_hash: hasher.hash(&web.client_secret)?,
        grant_types: vec![GrantType::AuthorizationCode, GrantType::RefreshToken],
        allowed_scopes: ["openid", "profile", "address", "email", "roles", MOVIE_API, "offline_access"]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        redirect_uris: vec![web.redirect_uri.clone()],
        post_logout_redirect_uris: vec![web.post_logout_redirect_uri.clone()],
        access_token_lifetime: None,
        allow_offline_access: true,
        claims: ClaimSet::new(),
    };

    Ok(vec![machine, web])
}

/// Builds the token issuer: catalog, client registry and signing keys.
///
/// Hashing and key generation are CPU-bound; call this once at start-up.
pub fn issuer(config: &AuthConfig) -> AuthResult<TokenIssuer> {
    let hasher = SecretHasher::new(&config.secrets)?;
    let catalog = ClaimsCatalog::new(
        identity_resources(),
        api_scopes(),
        test_users(&hasher)?,
        hasher.clone(),
    )?;
    let registry = ClientRegistry::new(clients(config, &hasher)?, hasher)?;
    let keys = KeyRing::from_config(&config.signing)?;

    tracing::info!(
        issuer = %config.issuer,
        clients = registry.len(),
        algorithm = %config.signing.algorithm,
        "Identity provider catalog loaded"
    );

    Ok(TokenIssuer::new(
        config.issuer.clone(),
        Arc::new(catalog),
        Arc::new(registry),
        Arc::new(keys),
        config.oauth.clone(),
    ))
}

#[cfg(test)]
pub(crate) fn test_auth_config() -> AuthConfig {
    use marquee_auth::token::SigningAlgorithm;

    let mut config = AuthConfig::default();
    config.signing.algorithm = SigningAlgorithm::ES384;
    config.secrets.memory_kib = 8;
    config.secrets.iterations = 1;
    config
}
