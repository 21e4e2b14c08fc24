//! Files domain module.
//!
//! Create, read, rename, list, and delete files and directories inside the
//! workspace. All paths pass through the path guard first.

mod error;
mod service;

pub use error::FileError;
pub use service::{FileResult, FileService};
