//! Command execution domain.
//!
//! - `whitelist.rs` - decides whether a command may run
//! - `executor.rs` - spawns and supervises approved commands
//! - `service.rs` - ties the two together for the transport layer
//! - `error.rs` - execution error types

mod error;
pub mod executor;
mod service;
pub mod whitelist;

pub use error::ExecError;
pub use executor::{ExecutionResult, ExecutionStatus, ProcessExecutor};
pub use service::ExecService;
pub use whitelist::{CommandWhitelist, WhitelistDecision, WhitelistEntry};
