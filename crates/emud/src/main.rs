//! emud - emulation control daemon
//!
//! Resolves configuration, then serves the control protocol over TCP and UDP
//! on one address and a JSON control API over HTTP on another.
//!
//! # Usage
//!
//! ```bash
//! # Start with /etc/core/core.toml (if present) and built-in defaults
//! emud
//!
//! # Custom config file, port and control API port
//! emud -f ./core.toml --port 4100 --grpc-port 6000
//!
//! # Enable debug logging regardless of the logging config
//! RUST_LOG=emud=debug emud
//! ```
//!
//! # Exit Status
//!
//! - 0: stopped by SIGINT/SIGTERM
//! - 1: invalid configuration, or the primary listener could not be bound

use std::process::{self, ExitCode};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use emud::backend::{spawn_backend, BackendOptions, NetworkBackend, SharedBackend};
use emud::config::{CliArgs, ConfigResolver, EffectiveConfig};
use emud::lifecycle::{spawn_signal_watcher, Daemon};
use emud::logging;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match ConfigResolver::default().resolve(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("emud: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run_daemon(config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("emud: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: EffectiveConfig) -> Result<ExitCode> {
    let log_target = logging::init(&config.log_file());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "emud starting"
    );

    let shutdown = CancellationToken::new();
    let daemon = Daemon::configured(&config, &log_target, shutdown.clone());
    spawn_signal_watcher(shutdown);

    let network = NetworkBackend::from_ovs_flag(config.ovs());
    let backend: SharedBackend = Arc::new(spawn_backend(BackendOptions { network }));
    info!(network = %network, "Emulation backend started");

    let running = daemon
        .start(&config, backend)
        .await
        .context("Failed to start the primary listener")?;

    let reason = running.serve().await;
    info!(reason = ?reason, "emud stopped");

    Ok(ExitCode::from(reason.exit_code()))
}
