//! # marquee-auth
//!
//! OAuth 2.0 / OpenID Connect token lifecycle for the Marquee movie service.
//!
//! One crate serves the three roles of the system:
//!
//! - the **identity provider** issues tokens ([`token::TokenIssuer`]) for
//!   registered clients ([`registry::ClientRegistry`]) from a catalog of
//!   scopes and users ([`catalog::ClaimsCatalog`]), and serves the protocol
//!   endpoints ([`http`]);
//! - the **resource server** validates bearer tokens
//!   ([`token::TokenValidator`]) and enforces named claim policies
//!   ([`policy::PolicyEngine`]) through [`middleware`];
//! - the **client application** logs users in, keeps their tokens fresh
//!   ([`client::ClientTokenManager`]) and attaches them to outbound calls
//!   ([`client::OutboundRequestInterceptor`]).
//!
//! ## Modules
//!
//! - [`claims`] - claim types, claim sets and principals
//! - [`catalog`] - identity resources, API scopes and test users
//! - [`registry`] - client registrations and secret verification
//! - [`token`] - signing keys, issuance and validation
//! - [`oauth`] - authorization codes, refresh tokens and wire types
//! - [`policy`] - claim-based authorization policies
//! - [`discovery`] - provider metadata and its client-side cache
//! - [`http`] - identity provider endpoints
//! - [`middleware`] - resource server extractors and error responses
//! - [`client`] - client application sessions and token refresh
//! - [`config`] - configuration shared by all three roles

pub mod catalog;
pub mod claims;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod middleware;
pub mod oauth;
pub mod policy;
pub mod registry;
pub mod secret;
pub mod token;
pub mod types;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Common imports.
///
/// ```ignore
/// use marquee_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::catalog::{ApiScope, ClaimsCatalog, IdentityResource, TestUser};
    pub use crate::claims::{ClaimPair, ClaimSet, ClaimType, Principal};
    pub use crate::client::{
        ClientTokenManager, HttpIdentityProviderClient, OutboundRequestInterceptor,
        ResourceApiClient, SessionId,
    };
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::http::ProviderState;
    pub use crate::middleware::{BearerAuth, ResourceState, enforce_policies};
    pub use crate::policy::{Decision, PolicyDefinition, PolicyEngine, Requirement};
    pub use crate::registry::ClientRegistry;
    pub use crate::token::{KeyRing, TokenIssuer, TokenValidator, ValidatedClaims};
    pub use crate::types::{Client, GrantType};
}
