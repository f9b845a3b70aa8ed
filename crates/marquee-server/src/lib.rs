//! Runnable processes of Marquee: the identity provider, the movies API
//! (resource server) and the web client application.

pub mod api;
pub mod bootstrap;
pub mod client_app;
pub mod config;
pub mod idp;
pub mod observability;
pub mod server;

pub use config::{AppConfig, Role};
pub use server::{MarqueeServer, ServerBuilder, build_app};
