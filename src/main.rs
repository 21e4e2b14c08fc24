//! RWX API Server Entry Point
//!
//! Loads configuration, initializes logging, makes sure an API token exists,
//! and serves the HTTP API until Ctrl-C.

use anyhow::Result;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use rwx_api_server::core::{Config, HttpTransport, RwxServer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration from environment and .env
    let mut config = Config::from_env();

    // Initialize logging
    init_logging(&config.logging.level);

    info!("Starting {} v{}", config.server.name, config.server.version);

    config.ensure_api_token();
    let http = config.http.clone();

    let server = RwxServer::new(config)?;

    info!("Server initialized");

    HttpTransport::new(http).run(server).await?;

    info!("Server shutting down");

    Ok(())
}

/// Initialize the logging subsystem.
///
/// Configures tracing with the specified log level and format.
fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}
