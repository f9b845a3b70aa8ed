use std::net::SocketAddr;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::{AppConfig, Role, ServerConfig};
use crate::{api, client_app, idp};

pub struct MarqueeServer {
    role: Role,
    addr: SocketAddr,
    app: Router,
}

/// Router of `role` with the health endpoint and the common middleware stack.
///
/// Must be called inside a Tokio runtime.
pub fn build_app(role: Role, cfg: &AppConfig) -> anyhow::Result<Router> {
    let app = match role {
        Role::IdentityProvider => idp::build_app(cfg)?,
        Role::ResourceServer => api::build_app(cfg)?,
        Role::ClientApp => client_app::build_app(cfg)?,
    };
    Ok(with_http_layers(app.route("/healthz", get(healthz)), &cfg.server))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn with_http_layers(app: Router, cfg: &ServerConfig) -> Router {
    app.layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(cfg.body_limit_bytes))
}

pub struct ServerBuilder {
    role: Role,
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub fn build(self) -> anyhow::Result<MarqueeServer> {
        let addr = self
            .config
            .addr(self.role)
            .map_err(anyhow::Error::msg)?;
        let app = build_app(self.role, &self.config)?;
        Ok(MarqueeServer {
            role: self.role,
            addr,
            app,
        })
    }
}

impl MarqueeServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(role = %self.role, "listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
