//! Transport layer for the RWX API server.
//!
//! The server speaks plain JSON over HTTP. The transport owns the listener,
//! the middleware stack (credential check, then rate limiting), and the
//! mapping from domain errors to status codes.

mod config;
mod error;
pub mod http;

pub use config::HttpConfig;
pub use error::{TransportError, TransportResult};
pub use http::HttpTransport;
