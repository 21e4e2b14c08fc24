//! RWX server implementation and lifecycle management.
//!
//! [`RwxServer`] owns every gatekeeper component. It is built once at
//! startup from a [`Config`] and cloned cheaply into request handlers; there
//! is no hidden process-wide state.

use std::sync::Arc;
use tracing::info;

use super::config::Config;
use super::error::{Error, Result};
use super::security::{PathGuard, RateLimiter, TokenAuthenticator};
use crate::domains::{
    exec::{CommandWhitelist, ExecService, ProcessExecutor},
    files::FileService,
};

/// The main server state.
#[derive(Clone)]
pub struct RwxServer {
    /// Server configuration.
    config: Arc<Config>,

    /// Credential check applied to every API request.
    authenticator: Arc<TokenAuthenticator>,

    /// Per-client request throttling.
    rate_limiter: RateLimiter,

    /// Service for handling file and directory requests.
    file_service: Arc<FileService>,

    /// Service for handling command execution requests.
    exec_service: Arc<ExecService>,
}

impl RwxServer {
    /// Create a new server with the given configuration.
    ///
    /// Fails if no API token is configured or the workspace root is not an
    /// existing directory. A missing or broken whitelist file is not an
    /// error; it leaves every command denied.
    pub fn new(config: Config) -> Result<Self> {
        let token = config
            .security
            .api_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::config("no API token configured"))?;

        let guard = PathGuard::new(&config.security.workspace_root)
            .map_err(|e| Error::config(e.to_string()))?
            .with_symlink_confinement(config.security.confine_symlinks);
        let guard = Arc::new(guard);
        info!("Verified workspace root: {:?}", guard.root());

        let whitelist = Arc::new(CommandWhitelist::load_from_file(
            &config.exec.whitelist_path,
            guard.clone(),
        ));
        let executor = ProcessExecutor::new(
            guard.root(),
            config.exec.max_concurrent,
            config.exec.max_output_bytes,
        );

        Ok(Self {
            authenticator: Arc::new(TokenAuthenticator::new(token)),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            file_service: Arc::new(FileService::new(guard)),
            exec_service: Arc::new(ExecService::new(whitelist, executor, config.exec.timeout())),
            config: Arc::new(config),
        })
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.server.version
    }

    /// Get the server configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Get the request authenticator.
    pub fn authenticator(&self) -> &TokenAuthenticator {
        &self.authenticator
    }

    /// Get the rate limiter.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Get the file service.
    pub fn files(&self) -> &FileService {
        &self.file_service
    }

    /// Get the execution service.
    pub fn exec(&self) -> &ExecService {
        &self.exec_service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.security.workspace_root = dir.path().to_path_buf();
        config.security.api_token = Some("token".to_string());
        config.exec.whitelist_path = dir.path().join("whitelist.json");
        config
    }

    #[test]
    fn test_server_builds_with_missing_whitelist() {
        let dir = TempDir::new().unwrap();
        let server = RwxServer::new(config_for(&dir)).unwrap();
        assert!(server.exec().whitelist().entries().is_empty());
        assert_eq!(server.name(), "rwx-api-server");
    }

    #[test]
    fn test_missing_workspace_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir);
        config.security.workspace_root = dir.path().join("missing");

        assert!(matches!(RwxServer::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut config = config_for(&dir);
        config.security.api_token = None;

        assert!(matches!(RwxServer::new(config), Err(Error::Config(_))));
    }
}
