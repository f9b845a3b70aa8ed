//! Static registry of identity resources, API scopes and user accounts.
//!
//! The catalog answers two questions for the token issuer: which claim types
//! a set of scopes grants access to, and which resources (audiences) those
//! scopes are tied to. It also authenticates the in-memory test users.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::claims::{ClaimSet, ClaimType, Principal};
use crate::error::AuthError;
use crate::secret::SecretHasher;

/// Scope that requests a refresh token.
pub const OFFLINE_ACCESS_SCOPE: &str = "offline_access";

/// Scope that marks a request as OpenID Connect.
pub const OPENID_SCOPE: &str = "openid";

/// A named group of user claims requestable through a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResource {
    pub name: String,
    pub display_name: String,
    pub claim_types: Vec<ClaimType>,
}

impl IdentityResource {
    /// Creates an identity resource.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        claim_types: Vec<ClaimType>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            claim_types,
        }
    }

    /// The `openid` resource.
    #[must_use]
    pub fn openid() -> Self {
        Self::new(OPENID_SCOPE, "Your user identifier", vec![ClaimType::Subject])
    }

    /// The standard `profile` resource.
    #[must_use]
    pub fn profile() -> Self {
        Self::new(
            "profile",
            "User profile",
            vec![
                ClaimType::Name,
                ClaimType::GivenName,
                ClaimType::FamilyName,
                ClaimType::PreferredUsername,
                ClaimType::Website,
            ],
        )
    }

    /// The standard `email` resource.
    #[must_use]
    pub fn email() -> Self {
        Self::new(
            "email",
            "Your email address",
            vec![ClaimType::Email, ClaimType::EmailVerified],
        )
    }

    /// The standard `address` resource.
    #[must_use]
    pub fn address() -> Self {
        Self::new("address", "Your postal address", vec![ClaimType::Address])
    }
}

/// An API permission, tied to one or more protected resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiScope {
    pub name: String,
    pub display_name: String,
    /// User claims included in access tokens carrying this scope.
    #[serde(default)]
    pub claim_types: Vec<ClaimType>,
    /// Audiences of tokens carrying this scope.
    pub resources: Vec<String>,
}

impl ApiScope {
    /// Creates an API scope tied to the given resources.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        resources: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            claim_types: Vec::new(),
            resources,
        }
    }

    /// Adds user claim types granted by this scope.
    #[must_use]
    pub fn with_claim_types(mut self, claim_types: Vec<ClaimType>) -> Self {
        self.claim_types = claim_types;
        self
    }
}

/// An in-memory user account.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub subject: String,
    pub username: String,
    pub password_hash: String,
    pub claims: ClaimSet,
}

impl TestUser {
    /// Creates a user, hashing the password.
    ///
    /// # Errors
    ///
    /// Returns an error if hashing fails.
    pub fn new(
        subject: impl Into<String>,
        username: impl Into<String>,
        password: &str,
        claims: ClaimSet,
        hasher: &SecretHasher,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            subject: subject.into(),
            username: username.into(),
            password_hash: hasher.hash(password)?,
            claims,
        })
    }

    /// The user as a principal.
    #[must_use]
    pub fn principal(&self) -> Principal {
        Principal::new(self.subject.clone(), self.claims.clone())
    }
}

/// Outcome of resolving a requested scope list against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedScopes {
    pub identity_resources: Vec<IdentityResource>,
    pub api_scopes: Vec<ApiScope>,
    pub offline_access: bool,
}

impl ResolvedScopes {
    /// Scope names in request order, without duplicates.
    #[must_use]
    pub fn scope_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .identity_resources
            .iter()
            .map(|r| r.name.clone())
            .chain(self.api_scopes.iter().map(|s| s.name.clone()))
            .collect();
        if self.offline_access {
            names.push(OFFLINE_ACCESS_SCOPE.to_string());
        }
        names
    }

    /// Space-separated scope string.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scope_names().join(" ")
    }

    /// Union of the claim types granted by every resolved scope.
    #[must_use]
    pub fn claim_types(&self) -> BTreeSet<ClaimType> {
        self.identity_resources
            .iter()
            .flat_map(|r| r.claim_types.iter())
            .chain(self.api_scopes.iter().flat_map(|s| s.claim_types.iter()))
            .cloned()
            .collect()
    }

    /// Claim types granted by identity scopes only.
    #[must_use]
    pub fn identity_claim_types(&self) -> BTreeSet<ClaimType> {
        self.identity_resources
            .iter()
            .flat_map(|r| r.claim_types.iter())
            .cloned()
            .collect()
    }

    /// Resources the API scopes are tied to, deduplicated in order.
    #[must_use]
    pub fn audiences(&self) -> Vec<String> {
        let mut audiences: Vec<String> = Vec::new();
        for resource in self.api_scopes.iter().flat_map(|s| s.resources.iter()) {
            if !audiences.contains(resource) {
                audiences.push(resource.clone());
            }
        }
        audiences
    }

    /// Returns `true` if `openid` was granted.
    #[must_use]
    pub fn includes_openid(&self) -> bool {
        self.identity_resources
            .iter()
            .any(|r| r.name == OPENID_SCOPE)
    }

    /// Returns `true` if any identity scope was granted.
    #[must_use]
    pub fn has_identity_scopes(&self) -> bool {
        !self.identity_resources.is_empty()
    }
}

/// Static registry of scopes and users.
pub struct ClaimsCatalog {
    identity_resources: Vec<IdentityResource>,
    api_scopes: Vec<ApiScope>,
    users: Vec<TestUser>,
    hasher: SecretHasher,
    dummy_hash: String,
}

impl ClaimsCatalog {
    /// Creates a catalog.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if two entries share a scope name.
    pub fn new(
        identity_resources: Vec<IdentityResource>,
        api_scopes: Vec<ApiScope>,
        users: Vec<TestUser>,
        hasher: SecretHasher,
    ) -> Result<Self, AuthError> {
        let mut names = BTreeSet::new();
        for name in identity_resources
            .iter()
            .map(|r| r.name.as_str())
            .chain(api_scopes.iter().map(|s| s.name.as_str()))
        {
            if name == OFFLINE_ACCESS_SCOPE || !names.insert(name) {
                return Err(AuthError::configuration(format!(
                    "scope name '{name}' is defined more than once"
                )));
            }
        }

        let dummy_hash = hasher.hash("unknown-user")?;
        Ok(Self {
            identity_resources,
            api_scopes,
            users,
            hasher,
            dummy_hash,
        })
    }

    /// Resolves scope names to catalog entries.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidScope`] for a name the catalog does not
    /// know.
    pub fn resolve_scopes<S: AsRef<str>>(&self, names: &[S]) -> Result<ResolvedScopes, AuthError> {
        let mut resolved = ResolvedScopes::default();
        for name in names {
            let name = name.as_ref();
            if name == OFFLINE_ACCESS_SCOPE {
                resolved.offline_access = true;
            } else if let Some(resource) = self.identity_resources.iter().find(|r| r.name == name) {
                if !resolved.identity_resources.contains(resource) {
                    resolved.identity_resources.push(resource.clone());
                }
            } else if let Some(scope) = self.api_scopes.iter().find(|s| s.name == name) {
                if !resolved.api_scopes.contains(scope) {
                    resolved.api_scopes.push(scope.clone());
                }
            } else {
                return Err(AuthError::invalid_scope(format!("unknown scope '{name}'")));
            }
        }
        Ok(resolved)
    }

    /// Names of every identity resource.
    pub fn identity_scope_names(&self) -> impl Iterator<Item = &str> {
        self.identity_resources.iter().map(|r| r.name.as_str())
    }

    /// Names of every API scope.
    pub fn api_scope_names(&self) -> impl Iterator<Item = &str> {
        self.api_scopes.iter().map(|s| s.name.as_str())
    }

    /// Returns `true` if `name` is an identity scope.
    #[must_use]
    pub fn is_identity_scope(&self, name: &str) -> bool {
        self.identity_resources.iter().any(|r| r.name == name)
    }

    /// Every scope the catalog can grant, including `offline_access`.
    #[must_use]
    pub fn supported_scopes(&self) -> Vec<String> {
        self.identity_scope_names()
            .chain(self.api_scope_names())
            .map(str::to_string)
            .chain(std::iter::once(OFFLINE_ACCESS_SCOPE.to_string()))
            .collect()
    }

    /// Every claim type any scope can grant.
    #[must_use]
    pub fn supported_claims(&self) -> BTreeSet<ClaimType> {
        self.identity_resources
            .iter()
            .flat_map(|r| r.claim_types.iter())
            .chain(self.api_scopes.iter().flat_map(|s| s.claim_types.iter()))
            .cloned()
            .collect()
    }

    /// Verifies a username and password.
    ///
    /// Unknown users pay the same hashing cost as wrong passwords.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthorized`] if the credentials do not match.
    pub fn authenticate_user(&self, username: &str, password: &str) -> Result<Principal, AuthError> {
        match self.users.iter().find(|u| u.username == username) {
            Some(user) if self.hasher.verify(password, &user.password_hash) => {
                Ok(user.principal())
            }
            Some(_) => Err(AuthError::unauthorized("invalid username or password")),
            None => {
                let _ = self.hasher.verify(password, &self.dummy_hash);
                Err(AuthError::unauthorized("invalid username or password"))
            }
        }
    }

    /// Looks up a user by subject.
    #[must_use]
    pub fn find_user(&self, subject: &str) -> Option<&TestUser> {
        self.users.iter().find(|u| u.subject == subject)
    }
}

impl std::fmt::Debug for ClaimsCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsCatalog")
            .field("identity_resources", &self.identity_resources.len())
            .field("api_scopes", &self.api_scopes.len())
            .field("users", &self.users.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn test_catalog() -> ClaimsCatalog {
    let hasher = crate::secret::test_hasher();
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
            .with(ClaimType::Role, "admin"),
        &hasher,
    )
    .unwrap();
    let bob = TestUser::new(
        "88421113",
        "bob",
        "bob",
        ClaimSet::new()
            .with(ClaimType::Name, "Bob Smith")
            .with(ClaimType::Email, "bob@example.com")
            .with(ClaimType::Role, "editor"),
        &hasher,
    )
    .unwrap();

    ClaimsCatalog::new(
        vec![
            IdentityResource::openid(),
            IdentityResource::profile(),
            IdentityResource::email(),
            IdentityResource::address(),
            IdentityResource::new("roles", "Your role(s)", vec![ClaimType::Role]),
        ],
        vec![ApiScope::new("movieAPI", "Movie API", vec!["movieAPI".to_string()])],
        vec![alice, bob],
        hasher,
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_mixed_scopes() {
        let catalog = test_catalog();
        let resolved = catalog
            .resolve_scopes(&["openid", "roles", "movieAPI", "offline_access"])
            .unwrap();
        assert_eq!(resolved.identity_resources.len(), 2);
        assert_eq!(resolved.api_scopes.len(), 1);
        assert!(resolved.offline_access);
        assert!(resolved.includes_openid());
        assert_eq!(
            resolved.scope_string(),
            "openid roles movieAPI offline_access"
        );
    }

    #[test]
    fn test_resolve_unknown_scope() {
        let catalog = test_catalog();
        let err = catalog.resolve_scopes(&["openid", "adminAPI"]).unwrap_err();
        assert!(matches!(err, AuthError::InvalidScope { .. }));
    }

    #[test]
    fn test_resolve_ignores_duplicates() {
        let catalog = test_catalog();
        let resolved = catalog.resolve_scopes(&["movieAPI", "movieAPI"]).unwrap();
        assert_eq!(resolved.api_scopes.len(), 1);
        assert_eq!(resolved.audiences(), vec!["movieAPI".to_string()]);
    }

    #[test]
    fn test_claim_types_union() {
        let catalog = test_catalog();
        let resolved = catalog.resolve_scopes(&["openid", "email", "roles"]).unwrap();
        let types = resolved.claim_types();
        assert_eq!(
            types,
            BTreeSet::from([
                ClaimType::Subject,
                ClaimType::Email,
                ClaimType::EmailVerified,
                ClaimType::Role
            ])
        );
    }

    #[test]
    fn test_api_scope_claims_stay_out_of_identity_claims() {
        let catalog = ClaimsCatalog::new(
            vec![IdentityResource::openid()],
            vec![
                ApiScope::new("movieAPI", "Movie API", vec!["movieAPI".to_string()])
                    .with_claim_types(vec![ClaimType::Role]),
            ],
            vec![],
            crate::secret::test_hasher(),
        )
        .unwrap();
        let resolved = catalog.resolve_scopes(&["openid", "movieAPI"]).unwrap();
        assert!(resolved.claim_types().contains(&ClaimType::Role));
        assert!(!resolved.identity_claim_types().contains(&ClaimType::Role));
    }

    #[test]
    fn test_duplicate_scope_names_rejected() {
        let result = ClaimsCatalog::new(
            vec![IdentityResource::openid()],
            vec![ApiScope::new("openid", "Clash", vec![])],
            vec![],
            crate::secret::test_hasher(),
        );
        assert!(matches!(result, Err(AuthError::Configuration { .. })));
    }

    #[test]
    fn test_authenticate_user() {
        let catalog = test_catalog();
        let principal = catalog.authenticate_user("alice", "alice").unwrap();
        assert_eq!(principal.subject, "5BE86359-073C-434B-AD2D-A3932222DABE");
        assert!(principal.claims.contains(&ClaimType::Role, "admin"));

        assert!(matches!(
            catalog.authenticate_user("alice", "wrong"),
            Err(AuthError::Unauthorized { .. })
        ));
        assert!(matches!(
            catalog.authenticate_user("mallory", "alice"),
            Err(AuthError::Unauthorized { .. })
        ));
    }

    #[test]
    fn test_supported_scopes_include_offline_access() {
        let catalog = test_catalog();
        let scopes = catalog.supported_scopes();
        assert!(scopes.contains(&"offline_access".to_string()));
        assert!(scopes.contains(&"movieAPI".to_string()));
        assert!(catalog.is_identity_scope("profile"));
        assert!(!catalog.is_identity_scope("movieAPI"));
    }
}
