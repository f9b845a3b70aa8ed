//! Typed claims.
//!
//! Claim names are a closed vocabulary of OpenID Connect claims plus a
//! validated [`ClaimType::Custom`] escape hatch. Names are checked once at
//! the boundary (configuration, token decoding); everything past that works
//! with [`ClaimType`] values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Allowed shape of a custom claim name.
static CLAIM_NAME_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z][A-Za-z0-9_.:\-]*$").expect("Invalid claim name regex")
});

/// Registered JWT claims. They describe the token itself and never travel as
/// embedded claims.
pub const RESERVED_CLAIMS: &[&str] = &["iss", "aud", "exp", "iat", "nbf", "jti", "auth_time", "nonce"];

/// Errors raised when a claim name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    /// The name is empty or contains characters outside the allowed set.
    #[error("Invalid claim name: '{0}'")]
    InvalidName(String),

    /// The name belongs to the registered JWT claims.
    #[error("Reserved claim name: '{0}'")]
    Reserved(String),
}

impl From<ClaimError> for crate::AuthError {
    fn from(err: ClaimError) -> Self {
        Self::configuration(err.to_string())
    }
}

/// A claim name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ClaimType {
    Subject,
    ClientId,
    Scope,
    Name,
    GivenName,
    FamilyName,
    PreferredUsername,
    Website,
    Email,
    EmailVerified,
    Address,
    Role,
    /// Any other validated claim name.
    Custom(String),
}

impl ClaimType {
    /// Returns the wire name of the claim.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Subject => "sub",
            Self::ClientId => "client_id",
            Self::Scope => "scope",
            Self::Name => "name",
            Self::GivenName => "given_name",
            Self::FamilyName => "family_name",
            Self::PreferredUsername => "preferred_username",
            Self::Website => "website",
            Self::Email => "email",
            Self::EmailVerified => "email_verified",
            Self::Address => "address",
            Self::Role => "role",
            Self::Custom(name) => name,
        }
    }

    /// Parses a claim name.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::Reserved`] for registered JWT claim names and
    /// [`ClaimError::InvalidName`] for names outside the allowed grammar.
    pub fn parse(name: &str) -> Result<Self, ClaimError> {
        let known = match name {
            "sub" => Self::Subject,
            "client_id" => Self::ClientId,
            "scope" => Self::Scope,
            "name" => Self::Name,
            "given_name" => Self::GivenName,
            "family_name" => Self::FamilyName,
            "preferred_username" => Self::PreferredUsername,
            "website" => Self::Website,
            "email" => Self::Email,
            "email_verified" => Self::EmailVerified,
            "address" => Self::Address,
            "role" => Self::Role,
            other => {
                if RESERVED_CLAIMS.contains(&other) {
                    return Err(ClaimError::Reserved(other.to_string()));
                }
                if !CLAIM_NAME_REGEX.is_match(other) {
                    return Err(ClaimError::InvalidName(other.to_string()));
                }
                Self::Custom(other.to_string())
            }
        };
        Ok(known)
    }

    /// Claims describing the token holder rather than the grant.
    #[must_use]
    pub fn is_protocol_claim(&self) -> bool {
        matches!(self, Self::Subject | Self::ClientId | Self::Scope)
    }
}

impl FromStr for ClaimType {
    type Err = ClaimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClaimType {
    type Error = ClaimError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ClaimType> for String {
    fn from(value: ClaimType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ClaimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered multimap of claim type to values.
///
/// Values under one type are unique and keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet(BTreeMap<ClaimType, Vec<String>>);

impl ClaimSet {
    /// Creates an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, ignoring duplicates.
    pub fn insert(&mut self, claim: ClaimType, value: impl Into<String>) {
        let value = value.into();
        let values = self.0.entry(claim).or_default();
        if !values.contains(&value) {
            values.push(value);
        }
    }

    /// Builder-style [`Self::insert`].
    #[must_use]
    pub fn with(mut self, claim: ClaimType, value: impl Into<String>) -> Self {
        self.insert(claim, value);
        self
    }

    /// All values of a claim type; empty when absent.
    #[must_use]
    pub fn get(&self, claim: &ClaimType) -> &[String] {
        self.0.get(claim).map(Vec::as_slice).unwrap_or_default()
    }

    /// First value of a claim type.
    #[must_use]
    pub fn first(&self, claim: &ClaimType) -> Option<&str> {
        self.get(claim).first().map(String::as_str)
    }

    /// Returns `true` if the claim type carries `value`.
    #[must_use]
    pub fn contains(&self, claim: &ClaimType, value: &str) -> bool {
        self.get(claim).iter().any(|v| v == value)
    }

    /// Returns `true` if the claim type has at least one value.
    #[must_use]
    pub fn has(&self, claim: &ClaimType) -> bool {
        !self.get(claim).is_empty()
    }

    /// Claim types present in the set.
    pub fn types(&self) -> impl Iterator<Item = &ClaimType> {
        self.0.keys()
    }

    /// Iterates over `(type, value)` pairs in stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&ClaimType, &str)> {
        self.0
            .iter()
            .flat_map(|(claim, values)| values.iter().map(move |v| (claim, v.as_str())))
    }

    /// Returns `true` if no claim is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keeps only the listed claim types.
    #[must_use]
    pub fn restricted_to(&self, allowed: &BTreeSet<ClaimType>) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(claim, _)| allowed.contains(*claim))
                .map(|(claim, values)| (claim.clone(), values.clone()))
                .collect(),
        )
    }

    /// Serializes to a flat JSON object: a single value becomes a string,
    /// several values become an array. Protocol claims are skipped.
    #[must_use]
    pub fn to_json_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (claim, values) in &self.0 {
            if claim.is_protocol_claim() {
                continue;
            }
            let value = match values.as_slice() {
                [single] => Value::String(single.clone()),
                many => Value::Array(many.iter().cloned().map(Value::String).collect()),
            };
            map.insert(claim.as_str().to_string(), value);
        }
        map
    }

    /// Reads claims out of a decoded JSON object.
    ///
    /// Reserved and malformed names are dropped. Non-string scalars are kept
    /// in their JSON text form.
    #[must_use]
    pub fn from_json_map(map: &Map<String, Value>) -> Self {
        let mut set = Self::new();
        for (name, value) in map {
            let claim = match ClaimType::parse(name) {
                Ok(claim) => claim,
                Err(e) => {
                    tracing::trace!(claim = %name, error = %e, "Skipping claim");
                    continue;
                }
            };
            match value {
                Value::Array(items) => {
                    for item in items {
                        set.insert(claim.clone(), json_scalar_to_string(item));
                    }
                }
                Value::Null => {}
                other => set.insert(claim, json_scalar_to_string(other)),
            }
        }
        set
    }
}

fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolved identity of a user or client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable subject identifier.
    pub subject: String,
    /// Claims describing the principal; always includes `sub`.
    pub claims: ClaimSet,
}

impl Principal {
    /// Creates a principal, recording the subject as the `sub` claim.
    #[must_use]
    pub fn new(subject: impl Into<String>, mut claims: ClaimSet) -> Self {
        let subject = subject.into();
        claims.0.insert(ClaimType::Subject, vec![subject.clone()]);
        Self { subject, claims }
    }
}

/// A single claim in the `{"type": ..., "value": ...}` shape returned by
/// the resource server's identity endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPair {
    /// Claim name.
    #[serde(rename = "type")]
    pub claim_type: String,
    /// Claim value.
    pub value: String,
}

impl From<(&ClaimType, &str)> for ClaimPair {
    fn from((claim, value): (&ClaimType, &str)) -> Self {
        Self {
            claim_type: claim.as_str().to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_claims() {
        assert_eq!(ClaimType::parse("role").unwrap(), ClaimType::Role);
        assert_eq!(ClaimType::parse("client_id").unwrap(), ClaimType::ClientId);
        assert_eq!(ClaimType::parse("sub").unwrap(), ClaimType::Subject);
    }

    #[test]
    fn test_parse_custom_claim() {
        let claim = ClaimType::parse("tenant.id").unwrap();
        assert_eq!(claim, ClaimType::Custom("tenant.id".to_string()));
        assert_eq!(claim.as_str(), "tenant.id");
    }

    #[test]
    fn test_reserved_and_invalid_names_rejected() {
        assert_eq!(
            ClaimType::parse("exp"),
            Err(ClaimError::Reserved("exp".to_string()))
        );
        assert!(matches!(
            ClaimType::parse("1abc"),
            Err(ClaimError::InvalidName(_))
        ));
        assert!(matches!(ClaimType::parse(""), Err(ClaimError::InvalidName(_))));
        assert!(matches!(
            ClaimType::parse("has space"),
            Err(ClaimError::InvalidName(_))
        ));
    }

    #[test]
    fn test_claim_type_serde_uses_wire_name() {
        let json = serde_json::to_string(&ClaimType::GivenName).unwrap();
        assert_eq!(json, "\"given_name\"");
        let parsed: ClaimType = serde_json::from_str("\"website\"").unwrap();
        assert_eq!(parsed, ClaimType::Website);
        assert!(serde_json::from_str::<ClaimType>("\"iat\"").is_err());
    }

    #[test]
    fn test_claim_set_deduplicates_values() {
        let mut set = ClaimSet::new();
        set.insert(ClaimType::Role, "admin");
        set.insert(ClaimType::Role, "admin");
        set.insert(ClaimType::Role, "editor");
        assert_eq!(set.get(&ClaimType::Role), &["admin", "editor"]);
        assert!(set.contains(&ClaimType::Role, "editor"));
        assert!(!set.has(&ClaimType::Email));
    }

    #[test]
    fn test_restricted_to() {
        let set = ClaimSet::new()
            .with(ClaimType::Email, "alice@example.com")
            .with(ClaimType::Role, "admin")
            .with(ClaimType::Website, "https://alice.example.com");
        let allowed = BTreeSet::from([ClaimType::Email, ClaimType::Role]);
        let filtered = set.restricted_to(&allowed);
        assert_eq!(filtered.types().count(), 2);
        assert!(!filtered.has(&ClaimType::Website));
    }

    #[test]
    fn test_to_json_map_single_and_multi() {
        let set = ClaimSet::new()
            .with(ClaimType::Email, "alice@example.com")
            .with(ClaimType::Role, "admin")
            .with(ClaimType::Role, "editor")
            .with(ClaimType::Subject, "alice");
        let map = set.to_json_map();
        assert_eq!(map["email"], json!("alice@example.com"));
        assert_eq!(map["role"], json!(["admin", "editor"]));
        assert!(!map.contains_key("sub"));
    }

    #[test]
    fn test_from_json_map_skips_reserved_and_stringifies() {
        let value = json!({
            "exp": 1700000000,
            "role": ["admin", "editor"],
            "email_verified": true,
            "bad name": "x",
            "name": "Alice"
        });
        let set = ClaimSet::from_json_map(value.as_object().unwrap());
        assert_eq!(set.get(&ClaimType::Role).len(), 2);
        assert_eq!(set.first(&ClaimType::EmailVerified), Some("true"));
        assert_eq!(set.first(&ClaimType::Name), Some("Alice"));
        assert_eq!(set.types().count(), 3);
    }

    #[test]
    fn test_principal_records_subject() {
        let principal = Principal::new("818727", ClaimSet::new().with(ClaimType::Name, "Alice"));
        assert_eq!(principal.claims.first(&ClaimType::Subject), Some("818727"));
        assert_eq!(principal.subject, "818727");
    }
}
