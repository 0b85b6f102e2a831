// quotad - Main Entry Point
//
// Runs the quota admin server or inspects a configuration:
// - serve: admin HTTP API with /health and /metrics
// - check-config: validate a configuration file
// - features: list registered features and their system defaults
// - resolve: resolve an effective quota against the configured catalog

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quotad::config::Config;
use quotad::logging::{self, LogLevel};
use quotad::quota::{QuotaService, Subject, SystemClock};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// quotad: layered quota resolution and usage tracking
#[derive(Parser, Debug)]
#[command(name = "quotad")]
#[command(version)]
#[command(about = "Layered quota resolution and usage tracking service", long_about = None)]
struct Args {
    /// Configuration file (default: ~/.config/quotad/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the admin HTTP server
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the configuration and exit
    CheckConfig,
    /// List registered features
    Features,
    /// Resolve the effective quota for a subject, e.g. `user:42` or `guest:abc`
    Resolve {
        subject: String,
        feature: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(path)
        }
        None => Config::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.log_level()?
    };
    logging::init(level, config.log_format()?).context("Failed to initialize logging")?;

    match args.command {
        Commands::Serve { port } => serve(config, port).await?,
        Commands::CheckConfig => check_config(&config),
        Commands::Features => list_features(&config),
        Commands::Resolve { subject, feature } => resolve(&config, &subject, &feature).await?,
    }

    Ok(())
}

async fn serve(config: Config, port: Option<u16>) -> Result<()> {
    let service = QuotaService::from_config(&config, Arc::new(SystemClock)).await?;

    let ip: IpAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.server.bind_address))?;
    let addr = SocketAddr::new(ip, port.unwrap_or(config.server.port));

    info!("quotad v{} starting", env!("CARGO_PKG_VERSION"));
    quotad::admin_server::start_admin_server(service, addr, config.metrics.enabled).await
}

fn check_config(config: &Config) {
    println!(
        "Configuration OK: {} features, {} guest quotas, {} plans",
        config.features.len(),
        config.guest_quotas.len(),
        config.plans.len()
    );
}

fn list_features(config: &Config) {
    for feature in &config.features {
        println!(
            "{}\t{}\t{}\t{}",
            feature.key,
            feature.default_limit,
            feature.default_period,
            feature.display_name.as_deref().unwrap_or("-")
        );
    }
}

async fn resolve(config: &Config, subject: &str, feature: &str) -> Result<()> {
    let subject: Subject = subject.parse()?;
    let service = QuotaService::from_config(config, Arc::new(SystemClock)).await?;
    let quota = service.resolver().resolve(&subject, feature).await?;
    println!("{}", serde_json::to_string_pretty(&quota)?);
    Ok(())
}
