//! `commandd`: serves one robot's command arbiter over HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use commandd::{router, run_expiry_ticker, AppState};
use robot_command_core::ArbiterConfig;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Commandd command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase output verbosity.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Override log level (e.g. info, debug, trace).
    #[arg(long, env = "ROBOT_COMMAND_LOG_LEVEL")]
    log_level: Option<String>,
    /// HTTP bind address.
    #[arg(
        long,
        env = "ROBOT_COMMAND_LISTEN",
        default_value = "127.0.0.1:9180",
        help = "Bind address for the command API, /metrics, and /healthz"
    )]
    listen: String,
    /// Arbiter configuration file.
    #[arg(
        long,
        env = "ROBOT_COMMAND_CONFIG",
        value_name = "FILE",
        help = "Path to a TOML arbiter configuration; defaults apply when omitted"
    )]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = cli
        .log_level
        .as_deref()
        .map(|lvl| lvl.to_ascii_uppercase())
        .map(|lvl| match lvl.as_str() {
            "TRACE" => Level::TRACE,
            "DEBUG" => Level::DEBUG,
            "WARN" => Level::WARN,
            "ERROR" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or_else(|| match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        });
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_env_filter(env_filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &cli.config {
        Some(path) => ArbiterConfig::load(path)?,
        None => ArbiterConfig::default(),
    };
    info!(
        horizon_ms = config.max_command_horizon_ms,
        history_depth = config.history_depth,
        tick_ms = config.expire_tick_interval_ms,
        lease_resource = %config.lease_resource,
        "arbiter configured"
    );

    let state = Arc::new(AppState::new(config)?);
    let ticker = tokio::spawn(run_expiry_ticker(state.clone()));

    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    info!("commandd listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    info!("commandd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
    }
}
