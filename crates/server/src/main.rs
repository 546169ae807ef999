//! sitesync receiver binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use sitesync_core::config::AppConfig;
use sitesync_server::{AppState, create_router, spawn_sweep_task};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// sitesyncd - receives published static sites
#[derive(Parser, Debug)]
#[command(name = "sitesyncd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "SITESYNC_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Build the configuration from an optional TOML file overlaid with
/// `SITESYNC_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    // SITESYNC_CONFIG is only the path, not a setting.
    let has_env_config = std::env::vars()
        .any(|(key, _)| key.starts_with("SITESYNC_") && key != "SITESYNC_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: sitesyncd --config /path/to/server.toml\n  \
             2. Environment variables: SITESYNC_SITE__DOCUMENT_ROOT=/var/www/site \
             SITESYNC_AUTH__TOKEN_HASH=YOUR_TOKEN_SHA256 sitesyncd\n\n\
             See config/server.example.toml for example configuration."
        );
    }

    figment
        .merge(Env::prefixed("SITESYNC_").split("__"))
        .extract()
        .context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("sitesyncd v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .context("invalid bind address")?;

    let state = AppState::new(config).context("failed to initialize receiver state")?;
    tracing::info!(
        document_root = %state.site.path().display(),
        state_dir = %state.sessions.state_dir().display(),
        "Receiver state initialized"
    );

    match spawn_sweep_task(state.clone()) {
        Some(_) => tracing::info!(
            interval_secs = state.config.server.sweep_interval().as_secs(),
            "Session sweeper spawned"
        ),
        None => tracing::info!("Session expiry disabled"),
    }

    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    // ConnectInfo feeds the client address recorded on new sessions.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
