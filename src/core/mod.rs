//! Core module containing shared infrastructure components.
//!
//! This module provides the foundational building blocks for the server,
//! including error handling, configuration, the security gatekeepers,
//! server lifecycle management, and the HTTP transport.

pub mod config;
pub mod error;
pub mod security;
pub mod server;
pub mod transport;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use server::RwxServer;
pub use transport::{HttpConfig, HttpTransport};
