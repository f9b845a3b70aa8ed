//! Policy evaluation.
//!
//! # Example
//!
//! ```ignore
//! use marquee_auth::policy::PolicyEngine;
//!
//! let engine = PolicyEngine::from_definitions(&config.policies)?;
//! let decision = engine.evaluate("AdminPolicy", &validated.claims);
//! if decision.is_allowed() {
//!     // Proceed with request
//! }
//! ```

use std::collections::HashMap;

use serde::Serialize;

use super::{PolicyDefinition, Requirement};
use crate::claims::{ClaimSet, ClaimType};
use crate::error::AuthError;

// =============================================================================
// Decision
// =============================================================================

/// Result of policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Access is granted.
    Allow,
    /// Access is denied with a reason.
    Deny(DenyReason),
}

impl Decision {
    /// Returns `true` if access was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Returns `true` if access was denied.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Deny(_))
    }

    /// The deny reason, if access was denied.
    #[must_use]
    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Self::Deny(reason) => Some(reason),
            Self::Allow => None,
        }
    }

    /// Converts a denial into [`AuthError::PolicyDenied`].
    ///
    /// # Errors
    ///
    /// Returns the denial as an error.
    pub fn into_result(self) -> Result<(), AuthError> {
        match self {
            Self::Allow => Ok(()),
            Self::Deny(reason) => Err(AuthError::policy_denied(reason.policy, reason.message)),
        }
    }
}

/// Reason for access denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenyReason {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Policy that denied access.
    pub policy: String,
}

impl DenyReason {
    /// Denial for a policy name that is not configured.
    #[must_use]
    pub fn unknown_policy(policy: &str) -> Self {
        Self {
            code: "unknown-policy".to_string(),
            message: format!("Policy '{policy}' is not defined"),
            policy: policy.to_string(),
        }
    }

    /// Denial because a claim is absent.
    #[must_use]
    pub fn claim_missing(policy: &str, claim: &ClaimType) -> Self {
        Self {
            code: "claim-missing".to_string(),
            message: format!("Required claim '{claim}' is missing"),
            policy: policy.to_string(),
        }
    }

    /// Denial because a claim holds none of the accepted values.
    #[must_use]
    pub fn claim_mismatch(policy: &str, claim: &ClaimType) -> Self {
        Self {
            code: "claim-mismatch".to_string(),
            message: format!("Claim '{claim}' does not have an accepted value"),
            policy: policy.to_string(),
        }
    }

    /// Denial because a scope was not granted.
    #[must_use]
    pub fn scope_insufficient(policy: &str, scope: &str) -> Self {
        Self {
            code: "insufficient-scope".to_string(),
            message: format!("Token scope does not include '{scope}'"),
            policy: policy.to_string(),
        }
    }
}

// =============================================================================
// Compiled Policies
// =============================================================================

#[derive(Debug, Clone)]
enum Check {
    ClaimEquals { claim: ClaimType, values: Vec<String> },
    ClaimPresent { claim: ClaimType },
    ScopePresent { scope: String },
}

impl Check {
    fn compile(requirement: &Requirement) -> Result<Self, AuthError> {
        Ok(match requirement {
            Requirement::ClaimEquals { claim, values } => {
                if values.is_empty() {
                    return Err(AuthError::configuration(format!(
                        "claim_equals on '{claim}' lists no values"
                    )));
                }
                Self::ClaimEquals {
                    claim: ClaimType::parse(claim)?,
                    values: values.clone(),
                }
            }
            Requirement::ClaimPresent { claim } => Self::ClaimPresent {
                claim: ClaimType::parse(claim)?,
            },
            Requirement::ScopePresent { scope } => Self::ScopePresent {
                scope: scope.clone(),
            },
        })
    }

    fn evaluate(&self, policy: &str, claims: &ClaimSet) -> Option<DenyReason> {
        match self {
            Self::ClaimEquals { claim, values } => {
                let present = claims.get(claim);
                if present.is_empty() {
                    Some(DenyReason::claim_missing(policy, claim))
                } else if present.iter().any(|v| values.contains(v)) {
                    None
                } else {
                    Some(DenyReason::claim_mismatch(policy, claim))
                }
            }
            Self::ClaimPresent { claim } => {
                (!claims.has(claim)).then(|| DenyReason::claim_missing(policy, claim))
            }
            Self::ScopePresent { scope } => (!claims.contains(&ClaimType::Scope, scope))
                .then(|| DenyReason::scope_insufficient(policy, scope)),
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Evaluates named policies against claims.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    policies: HashMap<String, Vec<Check>>,
}

impl PolicyEngine {
    /// Compiles policy definitions.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for duplicate names, invalid claim
    /// names or empty value lists.
    pub fn from_definitions(definitions: &[PolicyDefinition]) -> Result<Self, AuthError> {
        let mut policies = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            let checks = definition
                .requirements
                .iter()
                .map(Check::compile)
                .collect::<Result<Vec<_>, _>>()?;
            if policies.insert(definition.name.clone(), checks).is_some() {
                return Err(AuthError::configuration(format!(
                    "duplicate policy name '{}'",
                    definition.name
                )));
            }
        }
        Ok(Self { policies })
    }

    /// Returns `true` if a policy with this name is configured.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.policies.contains_key(name)
    }

    /// Configured policy names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Evaluates one policy. An unknown policy denies.
    #[must_use]
    pub fn evaluate(&self, name: &str, claims: &ClaimSet) -> Decision {
        let Some(checks) = self.policies.get(name) else {
            tracing::warn!(policy = %name, "Unknown authorization policy; denying");
            return Decision::Deny(DenyReason::unknown_policy(name));
        };
        for check in checks {
            if let Some(reason) = check.evaluate(name, claims) {
                tracing::debug!(policy = %name, code = %reason.code, "Policy denied");
                return Decision::Deny(reason);
            }
        }
        Decision::Allow
    }

    /// Evaluates several policies; all must allow. The first denial wins.
    #[must_use]
    pub fn evaluate_all<S: AsRef<str>>(&self, names: &[S], claims: &ClaimSet) -> Decision {
        for name in names {
            let decision = self.evaluate(name.as_ref(), claims);
            if decision.is_denied() {
                return decision;
            }
        }
        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    fn engine() -> PolicyEngine {
        PolicyEngine::from_definitions(&AuthConfig::default().policies).unwrap()
    }

    fn machine_claims() -> ClaimSet {
        ClaimSet::new()
            .with(ClaimType::Subject, "movieClient")
            .with(ClaimType::ClientId, "movieClient")
            .with(ClaimType::Scope, "movieAPI")
    }

    fn admin_claims() -> ClaimSet {
        ClaimSet::new()
            .with(ClaimType::Subject, "alice")
            .with(ClaimType::ClientId, "movies_mvc_client")
            .with(ClaimType::Role, "admin")
    }

    #[test]
    fn test_client_id_policy() {
        let engine = engine();
        assert!(engine.evaluate("ClientIdPolicy", &machine_claims()).is_allowed());

        let decision = engine.evaluate("ClientIdPolicy", &admin_claims());
        assert_eq!(decision.deny_reason().unwrap().code, "claim-mismatch");
    }

    #[test]
    fn test_role_policies() {
        let engine = engine();
        assert!(engine.evaluate("AdminPolicy", &admin_claims()).is_allowed());
        assert!(engine.evaluate("EditorPolicy", &admin_claims()).is_denied());

        let both = admin_claims().with(ClaimType::Role, "editor");
        assert!(engine.evaluate("EditorPolicy", &both).is_allowed());
    }

    #[test]
    fn test_missing_claim_denies() {
        let decision = engine().evaluate("AdminPolicy", &machine_claims());
        let reason = decision.deny_reason().unwrap();
        assert_eq!(reason.code, "claim-missing");
        assert_eq!(reason.policy, "AdminPolicy");
    }

    #[test]
    fn test_unknown_policy_denies() {
        let decision = engine().evaluate("SuperUserPolicy", &admin_claims());
        assert_eq!(decision.deny_reason().unwrap().code, "unknown-policy");
    }

    #[test]
    fn test_evaluate_all_is_conjunction() {
        let engine = engine();
        assert!(engine
            .evaluate_all(&["AdminPolicy"], &admin_claims())
            .is_allowed());
        assert!(engine
            .evaluate_all(&["AdminPolicy", "EditorPolicy"], &admin_claims())
            .is_denied());
        assert!(engine
            .evaluate_all::<&str>(&[], &ClaimSet::new())
            .is_allowed());
    }

    #[test]
    fn test_scope_and_presence_requirements() {
        let engine = PolicyEngine::from_definitions(&[PolicyDefinition {
            name: "Readers".to_string(),
            requirements: vec![
                Requirement::ScopePresent {
                    scope: "movieAPI".to_string(),
                },
                Requirement::ClaimPresent {
                    claim: "email".to_string(),
                },
            ],
        }])
        .unwrap();

        let reader = machine_claims().with(ClaimType::Email, "svc@example.com");
        assert!(engine.evaluate("Readers", &reader).is_allowed());

        let decision = engine.evaluate("Readers", &machine_claims());
        assert_eq!(decision.deny_reason().unwrap().code, "claim-missing");

        let no_scope = ClaimSet::new().with(ClaimType::Email, "svc@example.com");
        let decision = engine.evaluate("Readers", &no_scope);
        assert_eq!(decision.deny_reason().unwrap().code, "insufficient-scope");
    }

    #[test]
    fn test_invalid_definitions_rejected() {
        let reserved = PolicyDefinition {
            name: "Broken".to_string(),
            requirements: vec![Requirement::ClaimPresent {
                claim: "exp".to_string(),
            }],
        };
        assert!(PolicyEngine::from_definitions(&[reserved]).is_err());

        let empty_values = PolicyDefinition {
            name: "Broken".to_string(),
            requirements: vec![Requirement::ClaimEquals {
                claim: "role".to_string(),
                values: vec![],
            }],
        };
        assert!(PolicyEngine::from_definitions(&[empty_values]).is_err());
    }

    #[test]
    fn test_denial_converts_to_policy_denied() {
        let err = engine()
            .evaluate("AdminPolicy", &machine_claims())
            .into_result()
            .unwrap_err();
        assert!(matches!(err, AuthError::PolicyDenied { .. }));
    }
}
