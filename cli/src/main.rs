//! Tributary CLI
//!
//! Command-line interface for operating a Tributary collector.
//!
//! # Usage
//!
//! ```bash
//! tributary --help
//! tributary validate-config tributary.toml
//! tributary health
//! tributary --url http://collector:4318 stats
//! ```

#![deny(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use shared::config::TributaryConfig;
use shared::models::SignalKind;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tributary CLI - telemetry collector command-line interface
#[derive(Parser)]
#[command(name = "tributary")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Collector HTTP URL
    #[arg(
        short,
        long,
        env = "TRIBUTARY_URL",
        default_value = "http://localhost:4318"
    )]
    url: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a configuration file without starting anything
    ValidateConfig {
        /// Path of the TOML configuration
        path: PathBuf,
    },
    /// Show collector health
    Health,
    /// Show ingestion and delivery counters
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::ValidateConfig { path }) => {
            print!("{}", validate_config(&path)?);
        }
        Some(Commands::Health) => {
            let (healthy, report) = health(&cli.url).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !healthy {
                bail!("collector at {} is not serving", cli.url);
            }
        }
        Some(Commands::Stats) => {
            let stats = fetch_json(&cli.url, "/api/v1/stats").await?.1;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        None => {
            println!("Tributary CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}

/// Loads `path` and summarises the pipelines it defines.
fn validate_config(path: &Path) -> Result<String> {
    let config = TributaryConfig::load_from_path(path)
        .with_context(|| format!("{} is not a valid configuration", path.display()))?;

    let mut summary = format!("{}: ok\n", path.display());
    for kind in SignalKind::ALL {
        let pipeline = config.pipelines.get(kind);
        let destinations: Vec<String> = pipeline
            .destinations
            .iter()
            .map(|d| format!("{} ({})", d.name, d.kind))
            .collect();
        let _ = writeln!(
            summary,
            "  {kind}: batch {} records / {} ms -> {}",
            pipeline.batch.max_batch_size,
            pipeline.batch.max_batch_age_ms,
            destinations.join(", ")
        );
    }
    if !config.scrape.is_empty() {
        let _ = writeln!(summary, "  scrape: {} target(s)", config.scrape.len());
    }
    Ok(summary)
}

/// Fetches `/health`; 503 is a valid answer carrying a report.
async fn health(base: &str) -> Result<(bool, Value)> {
    let (status, report) = fetch_json(base, "/health").await?;
    match status {
        reqwest::StatusCode::OK => Ok((true, report)),
        reqwest::StatusCode::SERVICE_UNAVAILABLE => Ok((false, report)),
        other => bail!("unexpected status {other} from {base}/health"),
    }
}

async fn fetch_json(base: &str, path: &str) -> Result<(reqwest::StatusCode, Value)> {
    let url = format!("{}{path}", base.trim_end_matches('/'));
    tracing::debug!(%url, "Requesting");

    let response = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?
        .get(&url)
        .send()
        .await
        .with_context(|| format!("requesting {url}"))?;
    let status = response.status();
    if !status.is_success() && status != reqwest::StatusCode::SERVICE_UNAVAILABLE {
        bail!("{url} answered {status}");
    }
    let body = response
        .json()
        .await
        .with_context(|| format!("decoding response from {url}"))?;
    Ok((status, body))
}
