//! AbrenCare CLI - log in to, inspect and end an AbrenCare session from the
//! terminal.
//!
//! The session persists in the configured credential store, so a login here
//! is picked up by the next invocation.

mod commands;

use std::io;
use std::path::Path;

use abrencare_core::{storage, ApiClient, Config, SessionManager};
use anyhow::Result;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;

/// Rolling log file name prefix inside `log_dir`
const LOG_FILE_NAME: &str = "abrencare.log";

/// Initialize the tracing subscriber for logging.
///
/// Returns the file writer's guard; logs are flushed when it drops.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}\n\n{}", message, commands::USAGE);
            return Err(anyhow::anyhow!(message));
        }
    };
    if matches!(command, Command::Help) {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let (mut config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    let _log_guard = init_tracing(config.log_dir.as_deref());
    if let Some(e) = config_error {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    info!(origin = %config.base_url(), store = ?config.store, "abrencare starting");

    let store = storage::open_store(&config)?;
    let api = ApiClient::new(&config, store.clone())?;
    let session = SessionManager::new(api, store);
    session.check_auth_status().await?;

    commands::run(command, &session, &mut config).await
}
