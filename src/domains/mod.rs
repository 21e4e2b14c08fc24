//! Domains module containing business logic organized by bounded contexts.
//!
//! - **files**: file and directory operations confined to the workspace
//! - **exec**: whitelisted command execution inside the workspace

pub mod exec;
pub mod files;
