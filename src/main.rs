//! # buzzline
//!
//! Buzzer game server binary. Loads config, starts telemetry and serves the
//! game over WebSocket until ctrl+c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use buzzline_server::ServerConfig;
use buzzline_telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use clap::Parser;
use tracing::Level;

/// Buzzer game server.
#[derive(Parser, Debug)]
#[command(name = "buzzline", about = "Buzzer game session server")]
struct Cli {
    /// Host to bind (overrides the config file).
    #[arg(long, env = "BUZZLINE_HOST")]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides the config file).
    #[arg(long, env = "BUZZLINE_PORT")]
    port: Option<u16>,

    /// JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default log level.
    #[arg(long, env = "BUZZLINE_LOG", default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// Persist warnings and errors to this SQLite file.
    #[arg(long)]
    log_db: Option<PathBuf>,
}

impl Cli {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("Failed to load config: {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        module_levels: Vec::new(),
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        log_db_path: cli.log_db.clone(),
    });

    let config = cli.server_config()?;
    let handle = buzzline_server::start(config)
        .await
        .context("Failed to start server")?;

    tracing::info!(port = handle.port(), "buzzline ready");
    println!("Players connect at ws://{}/ws", handle.addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown(Some(Duration::from_secs(5))).await;

    if let Some(logs) = telemetry.logs() {
        match logs.incidents_by_player() {
            Ok(summary) => {
                for row in summary {
                    tracing::info!(
                        player = %row.player,
                        warnings = row.warnings,
                        errors = row.errors,
                        last_kind = row.last_kind.as_deref().unwrap_or("-"),
                        "player incidents"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not read incident log"),
        }
    }
    Ok(())
}
