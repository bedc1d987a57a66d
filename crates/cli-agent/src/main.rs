//! CLI entry point for the transcode worker agent.
//!
//! Loads settings, initializes logging, and runs the agent until a
//! shutdown signal arrives.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use transcode_worker_agent::{Agent, Settings};

/// Transcode Worker - distributed HLS transcoding agent
#[derive(Parser, Debug)]
#[command(name = "transcode-worker")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

/// Initialize structured logging from the configured level.
///
/// RUST_LOG still wins when set, so operators can raise verbosity for a
/// single component without touching the config file.
fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings from {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&settings.log_level);
    info!(
        worker_id = %settings.worker_id,
        orchestrator = %settings.orchestrator_url,
        nas_mount = %settings.nas_mount_path,
        "Transcode worker starting"
    );

    let agent = match Agent::new(settings).await {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Agent startup failed");
            return ExitCode::FAILURE;
        }
    };

    match agent.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Agent exited with error");
            ExitCode::FAILURE
        }
    }
}
