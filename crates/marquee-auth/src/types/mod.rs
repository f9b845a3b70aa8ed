//! Domain types shared across the crate.
//!
//! - [`Client`] - OAuth 2.0 client registration
//! - [`GrantType`] - Supported OAuth grant types

pub mod client;

pub use client::{Client, ClientValidationError, GrantType};
