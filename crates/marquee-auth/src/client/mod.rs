//! Client application side of the token lifecycle.
//!
//! - [`provider`]: calls to the identity provider (code exchange, refresh,
//!   user info)
//! - [`session`]: per-user token sets
//! - [`manager`]: login, cached access tokens and single-flight refresh
//! - [`interceptor`]: bearer attachment for resource server calls
//! - [`retry`]: bounded backoff for transient provider failures

pub mod interceptor;
pub mod manager;
pub mod provider;
pub mod retry;
pub mod session;

pub use interceptor::{OutboundRequestInterceptor, ResourceApiClient};
pub use manager::ClientTokenManager;
pub use provider::{HttpIdentityProviderClient, IdentityProviderClient};
pub use retry::RetryPolicy;
pub use session::{Session, SessionId, SessionStore, TokenSet};
