//! OAuth 2.0 protocol state held by the identity provider.
//!
//! - [`code`]: one-time authorization codes
//! - [`refresh`]: hashed refresh tokens with rotation
//! - [`token`]: token endpoint request, response and error bodies

pub mod code;
pub mod refresh;
pub mod token;

pub use code::{AuthorizationCodeStore, AuthorizationGrant};
pub use refresh::{RefreshTokenRecord, RefreshTokenStore};
pub use token::{TokenError, TokenRequest, TokenResponse};
