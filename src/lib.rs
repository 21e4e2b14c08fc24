//! RWX API Server Library
//!
//! An authenticated HTTP service that lets remote clients read, write, and
//! execute inside a single workspace directory on the host.
//!
//! # Architecture
//!
//! - **core**: configuration, error handling, the security gatekeepers
//!   (API key, rate limiter, path guard), the server state, and the HTTP
//!   transport
//! - **domains**: business logic organized by bounded contexts
//!   - **files**: create, read, rename, list, and delete files and directories
//!   - **exec**: run commands that match the configured whitelist
//!
//! # Example
//!
//! ```rust,no_run
//! use rwx_api_server::core::{Config, HttpTransport, RwxServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::from_env();
//!     config.ensure_api_token();
//!     let http = config.http.clone();
//!     let server = RwxServer::new(config)?;
//!     HttpTransport::new(http).run(server).await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, Result, RwxServer};
