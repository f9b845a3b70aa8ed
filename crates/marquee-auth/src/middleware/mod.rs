//! Resource server middleware.
//!
//! - [`BearerAuth`]: validates the `Authorization: Bearer` token
//! - [`enforce_policies`]: route layer requiring named policies
//! - `IntoResponse` for [`AuthError`](crate::AuthError): OAuth error bodies
//!   and bearer challenges

pub mod auth;
pub mod error;

pub use auth::{BearerAuth, PolicyGuard, ResourceState, enforce_policies};
pub use error::{REALM, status_code};
