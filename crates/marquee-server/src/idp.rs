//! Identity provider process.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use marquee_auth::http::{self, ProviderState};
use marquee_auth::token::TokenIssuer;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::bootstrap;
use crate::config::AppConfig;

/// Builds the identity provider's router and starts its housekeeping task.
///
/// Must be called inside a Tokio runtime.
pub fn build_app(cfg: &AppConfig) -> anyhow::Result<Router> {
    let issuer = Arc::new(bootstrap::issuer(&cfg.auth)?);
    spawn_purge_task(issuer.clone(), cfg.server.purge_interval);
    Ok(http::router(ProviderState::new(issuer)))
}

/// Periodically drops expired authorization codes.
pub fn spawn_purge_task(issuer: Arc<TokenIssuer>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let purged = issuer.purge_expired(OffsetDateTime::now_utc());
            if purged > 0 {
                tracing::debug!(purged, "Purged expired authorization codes");
            }
        }
    })
}
