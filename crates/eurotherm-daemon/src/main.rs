//! Eurotherm supervisory service daemon entry point.
//!
//! Loads a YAML device/server configuration, starts the [`IoManager`]
//! acquisition workers, and serves the `RpcService` HTTP/WebSocket surface
//! until `POST /stop` or an operator signal requests shutdown.

mod diagnostics;
mod signals;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eurotherm_common::Config;
use eurotherm_rpc::{build_router, AppState};
use eurotherm_runtime::IoManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::diagnostics::Diagnostics;

/// Eurotherm supervisory service command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "eurotherm-daemon",
    about = "Eurotherm supervisory service - Modbus RTU acquisition with an RPC control surface",
    version,
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a configuration file, start acquisition, and serve the RPC surface.
    Serve {
        /// Path to a device/server configuration file (YAML).
        #[arg(long, short = 'c', value_name = "FILE")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "starting eurotherm-daemon");

    match args.command {
        Command::Serve { config } => serve(&config).await,
    }
}

/// Initialize structured logging, honoring `RUST_LOG` if set.
fn init_logging(level: &str) {
    let filter = format!(
        "eurotherm_daemon={level},eurotherm_rpc={level},eurotherm_runtime={level},eurotherm_fieldbus={level},eurotherm_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .init();
}

/// Load, validate, start acquisition, and serve until shutdown.
async fn serve(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)
        .with_context(|| format!("failed to load config from {config_path:?}"))?;
    config
        .validate()
        .context("configuration failed validation")?;

    info!(
        devices = config.devices.len(),
        ip = %config.server.ip,
        port = config.server.port,
        "configuration loaded"
    );

    let io = Arc::new(IoManager::new());
    io.start(&config.devices).await.context("failed to start acquisition workers")?;
    info!("acquisition workers started");

    let _diagnostics = Diagnostics::new();
    let state = AppState::new(Arc::clone(&io));
    let shutdown = state.shutdown_signal();
    let router = build_router(state, config.server.timeout);

    let addr = std::net::SocketAddr::new(config.server.ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {addr}"))?;
    info!(%addr, "RPC listener bound");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.notified() => info!("shutdown requested over RPC"),
                _ = signals::wait_for_shutdown_signal() => info!("shutdown requested by signal"),
            }
        })
        .await
        .context("RPC server failed")?;

    io.stop().await;
    info!("acquisition workers stopped, daemon exiting");
    Ok(())
}

/// Load configuration from a YAML file.
fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {path:?}"))?;
    serde_yaml::from_str(&raw).with_context(|| format!("failed to parse {path:?} as YAML"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_subcommand() {
        let args = Args::parse_from(["eurotherm-daemon", "serve", "-c", "config.yaml"]);
        match args.command {
            Command::Serve { config } => assert_eq!(config, PathBuf::from("config.yaml")),
        }
    }

    #[test]
    fn rejects_missing_config_file() {
        let result = load_config(Path::new("/nonexistent/config.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn loads_and_validates_a_well_formed_config_file() {
        let yaml = r#"
server:
  ip: 127.0.0.1
  port: 8080
  timeout: 5s
devices:
  - name: d1
    unit_address: 1
    connection:
      port: /dev/ttyUSB0
      baud_rate: 9600
    sampling_rate: 5Hz
    driver: simulate
"#;
        let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
        std::io::Write::write_all(&mut file, yaml.as_bytes()).expect("write temp config file");

        let config = load_config(file.path()).expect("load well-formed config");
        config.validate().expect("well-formed config validates");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].name, "d1");
    }

    #[test]
    fn rejects_config_with_unknown_top_level_key() {
        let yaml = r#"
server:
  ip: 127.0.0.1
  port: 8080
devices: []
bogus_key: true
"#;
        let mut file = tempfile::NamedTempFile::new().expect("create temp config file");
        std::io::Write::write_all(&mut file, yaml.as_bytes()).expect("write temp config file");

        assert!(load_config(file.path()).is_err());
    }
}
