//! Publish client for sitesync.

mod api_client;
mod config;
mod progress;
mod publish;
mod publish_log;

use anyhow::{Context, Result};
use api_client::ApiClient;
use clap::{Args, Parser, Subcommand};
use config::PublishConfig;
use sitesync_core::SessionId;
use std::path::PathBuf;
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sitesync")]
#[command(about = "Publish a built static site to a sitesync receiver")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Receiver URL (overrides client config)
    #[arg(long, env = "SITESYNC_SERVER")]
    server: Option<String>,

    /// Bearer token (overrides client config)
    #[arg(long, env = "SITESYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Client config file path
    #[arg(long, env = "SITESYNC_CLIENT_CONFIG", default_value = "sitesync.toml")]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the source directory
    Publish {
        /// Directory to publish (overrides client config)
        #[arg(long)]
        source: Option<PathBuf>,

        /// Show what would be uploaded and deleted without changing anything remotely
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        api: ApiArgs,
    },
    /// Print the currently published version
    Version {
        #[command(flatten)]
        api: ApiArgs,
    },
    /// Print a receiver session record
    Status {
        /// Session id
        id: String,

        #[command(flatten)]
        api: ApiArgs,
    },
    /// Print a freshly generated session id
    SessionId,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Publish {
            source,
            dry_run,
            api,
        } => handle_publish(source, dry_run, &api).await,
        Commands::Version { api } => {
            let (_, client) = load_client(&api)?;
            let version = client.get_version().await?;
            println!("{}", serde_json::to_string_pretty(&version)?);
            Ok(())
        }
        Commands::Status { id, api } => {
            let id = SessionId::parse(&id).context("invalid session id")?;
            let (_, client) = load_client(&api)?;
            let session = client.get_session(&id).await?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(())
        }
        Commands::SessionId => {
            println!("{}", SessionId::generate(OffsetDateTime::now_utc()));
            Ok(())
        }
    }
}

async fn handle_publish(source: Option<PathBuf>, dry_run: bool, api: &ApiArgs) -> Result<()> {
    let (mut config, client) = load_client(api)?;
    if let Some(source) = source {
        config.source_dir = source;
    }

    let summary = publish::run(&config, &client, dry_run).await?;
    if summary.dry_run {
        println!(
            "dry run {}: {} archives planned, nothing changed",
            summary.session_id, summary.archives
        );
        return Ok(());
    }

    println!(
        "published {}: {} files in {} archives, {} deleted",
        summary.session_id,
        summary.files_uploaded,
        summary.archives,
        summary.deleted.len()
    );
    if !summary.corrupted.is_empty() {
        println!(
            "{} remote files could not be removed: {}",
            summary.corrupted.len(),
            summary.corrupted.join(", ")
        );
    }
    if let Some(path) = summary.log_path {
        println!("log: {}", path.display());
    }
    Ok(())
}

/// Resolve configuration and build a client. Flags and their env vars win over the file.
fn load_client(api: &ApiArgs) -> Result<(PublishConfig, ApiClient)> {
    let mut config = PublishConfig::load(&api.config)?;
    if let Some(server) = &api.server {
        config.server = Some(server.clone());
    }
    if let Some(token) = &api.token {
        config.token = Some(token.clone());
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let server = config
        .server
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no receiver configured: use --server or SITESYNC_SERVER"))?;
    let token = config
        .token
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no token configured: use --token or SITESYNC_TOKEN"))?;

    let base_url = normalize_base_url(server)?;
    let client = ApiClient::new(&base_url, token, config.timeout())?;
    Ok((config, client))
}

fn normalize_base_url(url: &str) -> Result<String> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("server URL must start with http:// or https://");
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_requires_scheme() {
        assert!(normalize_base_url("example.com/deploy").is_err());
        assert_eq!(
            normalize_base_url("https://example.com/deploy").unwrap(),
            "https://example.com/deploy"
        );
    }

    #[test]
    fn cli_parses_publish_flags() {
        let cli = Cli::try_parse_from([
            "sitesync",
            "publish",
            "--dry-run",
            "--source",
            "public",
            "--server",
            "https://example.com/",
            "--token",
            "secret",
        ])
        .unwrap();
        match cli.command {
            Commands::Publish {
                source,
                dry_run,
                api,
            } => {
                assert!(dry_run);
                assert_eq!(source, Some(PathBuf::from("public")));
                assert_eq!(api.server.as_deref(), Some("https://example.com/"));
            }
            _ => panic!("expected publish"),
        }
    }
}
