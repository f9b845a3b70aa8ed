use clap::{Parser, Subcommand};

use marquee_server::config::loader::{DEFAULT_CONFIG_PATH, load_config};
use marquee_server::{AppConfig, Role, ServerBuilder};

#[derive(Parser)]
#[command(name = "marquee")]
#[command(about = "Marquee identity provider, movies API and web client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (falls back to marquee.toml when present)
    #[arg(short, long, global = true, env = "MARQUEE_CONFIG")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the identity provider
    Idp,
    /// Run the movies API (resource server)
    Api,
    /// Run the web client application
    Client,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist - it's optional
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    marquee_server::observability::init_tracing();

    let cli = Cli::parse();
    let cfg = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(
        path = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH),
        "Configuration loaded"
    );
    marquee_server::observability::apply_logging_level(&cfg.logging.level);

    if let Err(e) = run(cli.command, cfg).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, cfg: AppConfig) -> anyhow::Result<()> {
    let role = match command {
        Commands::Idp => Role::IdentityProvider,
        Commands::Api => Role::ResourceServer,
        Commands::Client => Role::ClientApp,
        Commands::Config => {
            print!("{}", effective_config(cfg)?);
            return Ok(());
        }
    };
    ServerBuilder::new(role).with_config(cfg).build()?.run().await
}

fn effective_config(mut cfg: AppConfig) -> anyhow::Result<String> {
    cfg.auth.client.client_secret = "<redacted>".to_string();
    Ok(toml::to_string_pretty(&cfg)?)
}
