//! rshd-lite: run shell commands received over TCP
//!
//! Each client sends one line, `<secret><command>\n`. If the line starts
//! with the configured secret, the rest is run as `<shell> -c <command>`.
//! The server never answers; depending on the output mode the shell either
//! writes to the server's own stdout or straight back to the client.
//!
//! Anyone who can reach the port (and knows the secret, when one is set)
//! can run arbitrary commands as the server's user, which is why the server
//! refuses to start without `--allow-remote-exec`.
//!
//! Features:
//! - Optional shared-secret prefix loaded from a file
//! - Bounded line framing with an idle read timeout
//! - One task per connection; commands are reaped when they exit
//! - Graceful shutdown on SIGINT, SIGTERM and SIGHUP
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod exec;
mod protocol;
mod server;
mod signal;

use config::Config;
use server::SocketSetupError;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        auth = config.auth_enabled(),
        output = ?config.output,
        max_line = config.max_line,
        "Starting rshd-lite"
    );

    match serve(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

/// Run the server on a multi-threaded tokio runtime until a shutdown signal.
fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let shutdown = signal::shutdown_signal().map_err(SocketSetupError::Signal)?;
        server::run(config, shutdown).await
    })?;

    Ok(())
}
