use std::net::SocketAddr;

use marquee_auth::AuthConfig;
use serde::{Deserialize, Serialize};

/// Process configuration for all three roles.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Which process to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    IdentityProvider,
    ResourceServer,
    ClientApp,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdentityProvider => write!(f, "identity provider"),
            Self::ResourceServer => write!(f, "resource server"),
            Self::ClientApp => write!(f, "client application"),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        let ports = [
            ("server.idp_port", self.server.idp_port),
            ("server.api_port", self.server.api_port),
            ("server.client_port", self.server.client_port),
        ];
        for (name, port) in ports {
            if port == 0 {
                return Err(format!("{name} must be > 0"));
            }
        }
        if self.server.idp_port == self.server.api_port
            || self.server.idp_port == self.server.client_port
            || self.server.api_port == self.server.client_port
        {
            return Err("server ports must be distinct".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        if self.server.purge_interval.is_zero() {
            return Err("server.purge_interval must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.auth.validate().map_err(|e| e.to_string())
    }

    /// Listen address of `role`.
    pub fn addr(&self, role: Role) -> Result<SocketAddr, String> {
        let port = match role {
            Role::IdentityProvider => self.server.idp_port,
            Role::ResourceServer => self.server.api_port,
            Role::ClientApp => self.server.client_port,
        };
        format!("{}:{port}", self.server.host)
            .parse()
            .map_err(|e| format!("server.host '{}': {e}", self.server.host))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_idp_port")]
    pub idp_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// How often the identity provider drops expired authorization codes.
    #[serde(default = "default_purge_interval", with = "humantime_serde")]
    pub purge_interval: std::time::Duration,
    /// Mark the client application's cookies `Secure`.
    #[serde(default)]
    pub secure_cookies: bool,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_idp_port() -> u16 {
    5005
}
fn default_api_port() -> u16 {
    5001
}
fn default_client_port() -> u16 {
    5002
}
fn default_body_limit() -> usize {
    64 * 1024
}
fn default_purge_interval() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            idp_port: default_idp_port(),
            api_port: default_api_port(),
            client_port: default_client_port(),
            body_limit_bytes: default_body_limit(),
            purge_interval: default_purge_interval(),
            secure_cookies: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file, read when present.
    pub const DEFAULT_CONFIG_PATH: &str = "marquee.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file '{}' not found", pathbuf.display()));
        }
        // Environment variable overrides, e.g., MARQUEE__SERVER__IDP_PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("MARQUEE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
