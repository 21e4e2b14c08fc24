//! File service - workspace-confined file and directory operations.
//!
//! Every operation resolves its caller-supplied path through the
//! [`PathGuard`] before the filesystem is touched.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, instrument};

use super::error::FileError;
use crate::core::security::PathGuard;

/// Result type for file operations.
pub type FileResult<T> = Result<T, FileError>;

/// Service for handling file and directory requests.
#[derive(Debug, Clone)]
pub struct FileService {
    guard: Arc<PathGuard>,
}

impl FileService {
    /// Create a new file service confined by `guard`.
    pub fn new(guard: Arc<PathGuard>) -> Self {
        Self { guard }
    }

    /// Get the path guard.
    pub fn guard(&self) -> &Arc<PathGuard> {
        &self.guard
    }

    fn resolve(&self, path: &str) -> FileResult<PathBuf> {
        Ok(self.guard.resolve(path)?)
    }

    fn display(&self, path: &Path) -> String {
        self.guard.display_relative(path)
    }

    fn reject_root(&self, path: &Path) -> FileResult<()> {
        if self.guard.is_root(path) {
            return Err(FileError::WorkspaceRoot);
        }
        Ok(())
    }

    fn io_failure(&self, action: &str, path: &Path, e: std::io::Error) -> FileError {
        error!("Failed to {} {:?}: {}", action, path, e);
        FileError::io(format!("{action} '{}'", self.display(path)), e)
    }

    /// Create a new file with the given content.
    #[instrument(skip(self, content))]
    pub async fn create_file(&self, file_path: &str, content: &str) -> FileResult<()> {
        let target = self.resolve(file_path)?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(FileError::conflict("File already exists"));
            }
            Err(e) => return Err(self.io_failure("create file", &target, e)),
        };

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| self.io_failure("write file", &target, e))?;
        file.flush()
            .await
            .map_err(|e| self.io_failure("write file", &target, e))?;

        info!("File created: {:?}", target);
        Ok(())
    }

    /// Delete a file.
    #[instrument(skip(self))]
    pub async fn delete_file(&self, file_path: &str) -> FileResult<()> {
        let target = self.resolve(file_path)?;
        self.reject_root(&target)?;

        if !exists(&target).await {
            return Err(FileError::not_found("File not found"));
        }

        fs::remove_file(&target)
            .await
            .map_err(|e| self.io_failure("delete file", &target, e))?;

        info!("File deleted: {:?}", target);
        Ok(())
    }

    /// Rename (move) a file within the workspace.
    #[instrument(skip(self))]
    pub async fn rename_file(&self, old_file_path: &str, new_file_path: &str) -> FileResult<()> {
        let old_path = self.resolve(old_file_path)?;
        let new_path = self.resolve(new_file_path)?;
        self.reject_root(&old_path)?;

        if !exists(&old_path).await {
            return Err(FileError::not_found("File not found"));
        }
        if exists(&new_path).await {
            return Err(FileError::conflict("File already exists at new path"));
        }

        fs::rename(&old_path, &new_path)
            .await
            .map_err(|e| self.io_failure("rename file", &old_path, e))?;

        info!("File renamed from {:?} to {:?}", old_path, new_path);
        Ok(())
    }

    /// Read a text file.
    #[instrument(skip(self))]
    pub async fn read_file(&self, file_path: &str) -> FileResult<String> {
        let target = self.resolve(file_path)?;

        match fs::metadata(&target).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(FileError::not_found("File not found")),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FileError::not_found("File not found"));
            }
            Err(e) => return Err(self.io_failure("read file", &target, e)),
        }

        fs::read_to_string(&target)
            .await
            .map_err(|e| self.io_failure("read file", &target, e))
    }

    /// List the entries of a directory; `None` lists the workspace root.
    #[instrument(skip(self))]
    pub async fn list_dir(&self, path: Option<&str>) -> FileResult<Vec<String>> {
        let target = self.resolve(path.unwrap_or(""))?;

        if !exists(&target).await {
            return Err(FileError::not_found("Folder not found"));
        }

        let mut entries = fs::read_dir(&target)
            .await
            .map_err(|e| self.io_failure("list files in", &target, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.io_failure("list files in", &target, e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        Ok(names)
    }

    /// Create a directory, optionally with its missing parents.
    #[instrument(skip(self))]
    pub async fn create_directory(&self, dir_path: &str, recursive: bool) -> FileResult<()> {
        let target = self.resolve(dir_path)?;

        let created = if recursive {
            fs::create_dir_all(&target).await
        } else {
            fs::create_dir(&target).await
        };

        match created {
            Ok(()) => {
                info!("Directory created: {:?} (recursive={})", target, recursive);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(FileError::conflict("Directory already exists"))
            }
            Err(e) => Err(self.io_failure("create directory", &target, e)),
        }
    }

    /// Delete a directory; `recursive` also removes its contents.
    #[instrument(skip(self))]
    pub async fn delete_directory(&self, dir_path: &str, recursive: bool) -> FileResult<()> {
        let target = self.resolve(dir_path)?;
        self.reject_root(&target)?;

        if !exists(&target).await {
            return Err(FileError::not_found("Directory not found"));
        }

        let removed = if recursive {
            fs::remove_dir_all(&target).await
        } else {
            fs::remove_dir(&target).await
        };

        removed.map_err(|e| self.io_failure("delete directory", &target, e))?;
        info!("Directory deleted: {:?} (recursive={})", target, recursive);
        Ok(())
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}
