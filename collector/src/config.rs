//! Server configuration module.
//!
//! Loads the TOML pipeline configuration and applies environment overrides.
//!
//! Environment variables (a `.env` file is read first when present):
//! - `TRIBUTARY_CONFIG`: Path of the TOML file (default: "tributary.toml")
//! - `TRIBUTARY_HOST`: The host address to bind to
//! - `TRIBUTARY_GRPC_PORT`: The OTLP gRPC port
//! - `TRIBUTARY_HTTP_PORT`: The OTLP HTTP port

use anyhow::{Context, Result};
use shared::config::TributaryConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "tributary.toml";

/// Collector configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the pipeline configuration was read from.
    pub path: PathBuf,
    /// The pipeline configuration, with environment overrides applied.
    pub tributary: TributaryConfig,
}

impl Config {
    /// Loads the configuration named by the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration file cannot be read, parsed or validated
    /// - A port override is set but cannot be parsed as a valid port number
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let path = std::env::var("TRIBUTARY_CONFIG")
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        let mut tributary = TributaryConfig::load_from_path(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?;

        apply_overrides(&mut tributary, |key| std::env::var(key).ok())?;
        tributary
            .validate_config()
            .context("validating configuration after environment overrides")?;

        Ok(Self { path, tributary })
    }

    /// Wraps an already-loaded configuration.
    #[must_use]
    pub fn new(tributary: TributaryConfig) -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CONFIG_PATH),
            tributary,
        }
    }

    /// Returns the OTLP gRPC listener address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host and port do not form a socket address.
    pub fn grpc_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.tributary.server.host, self.tributary.server.grpc_port)
    }

    /// Returns the OTLP HTTP listener address.
    ///
    /// # Errors
    ///
    /// Returns an error if the host and port do not form a socket address.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.tributary.server.host, self.tributary.server.http_port)
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))
}

/// Applies `TRIBUTARY_HOST`, `TRIBUTARY_GRPC_PORT` and `TRIBUTARY_HTTP_PORT`.
fn apply_overrides(
    config: &mut TributaryConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(host) = var("TRIBUTARY_HOST") {
        config.server.host = host;
    }
    if let Some(port) = var("TRIBUTARY_GRPC_PORT") {
        config.server.grpc_port = port
            .parse()
            .with_context(|| format!("TRIBUTARY_GRPC_PORT={port} is not a port"))?;
    }
    if let Some(port) = var("TRIBUTARY_HTTP_PORT") {
        config.server.http_port = port
            .parse()
            .with_context(|| format!("TRIBUTARY_HTTP_PORT={port} is not a port"))?;
    }
    Ok(())
}
