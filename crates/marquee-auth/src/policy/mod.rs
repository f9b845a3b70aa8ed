//! Claim-based authorization policies.
//!
//! A policy is a named list of requirements that must all hold for the
//! caller's validated claims. Policies are declared in configuration:
//!
//! ```toml
//! [[auth.policies]]
//! name = "AdminPolicy"
//! requirements = [{ type = "claim_equals", claim = "role", values = ["admin"] }]
//! ```
//!
//! and compiled once into a [`PolicyEngine`], which is shared immutably by
//! every request handler.

pub mod engine;

use serde::{Deserialize, Serialize};

pub use engine::{Decision, DenyReason, PolicyEngine};

/// Declarative form of a policy, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    /// Unique policy name referenced by routes.
    pub name: String,
    /// Requirements, all of which must hold.
    pub requirements: Vec<Requirement>,
}

/// A single predicate over the caller's claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Requirement {
    /// The claim has at least one of `values`.
    ClaimEquals { claim: String, values: Vec<String> },
    /// The claim is present with any value.
    ClaimPresent { claim: String },
    /// The scope was granted.
    ScopePresent { scope: String },
}
