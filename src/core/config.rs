//! Configuration management for the RWX API server.
//!
//! This module provides a centralized configuration structure that can be
//! populated from environment variables, an env file (`RWX_ENV_FILE`,
//! default `.env`), or defaults.

use super::transport::HttpConfig;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable holding the API secret.
const API_TOKEN_VAR: &str = "RWX_API_TOKEN";

/// Default file the API secret is read from and persisted to.
const DEFAULT_ENV_FILE: &str = ".env";

/// Main configuration structure for the RWX API server.
///
/// This struct contains all configurable aspects of the server, organized
/// by concern for clarity and maintainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// HTTP transport configuration.
    pub http: HttpConfig,

    /// Workspace confinement and credential configuration.
    pub security: SecurityConfig,

    /// Per-client request throttling.
    pub rate_limit: RateLimitConfig,

    /// Command whitelist and process execution limits.
    pub exec: ExecConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,
}

/// Configuration for workspace confinement and the API secret.
#[derive(Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Directory every file and script operation is confined to.
    pub workspace_root: PathBuf,

    /// Reject paths whose existing ancestors resolve (through symlinks)
    /// to a location outside the workspace root.
    pub confine_symlinks: bool,

    /// Shared secret expected in the `action-api-key` header.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,

    /// File a generated API token is persisted to.
    pub env_file: PathBuf,
}

/// Custom Debug implementation to redact secrets from logs.
impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("workspace_root", &self.workspace_root)
            .field("confine_symlinks", &self.confine_symlinks)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("env_file", &self.env_file)
            .finish()
    }
}

/// Sliding-window rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether requests are throttled at all.
    pub enabled: bool,

    /// Length of the trailing window, in seconds.
    pub window_secs: u64,

    /// Maximum admitted requests per client within one window.
    pub max_requests: usize,
}

impl RateLimitConfig {
    /// The trailing window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Command execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// JSON file holding `{"allowed_commands": [...]}`.
    pub whitelist_path: PathBuf,

    /// Wall-clock budget for a single command, in seconds.
    pub timeout_secs: u64,

    /// Maximum number of commands running at the same time.
    pub max_concurrent: usize,

    /// Cap on captured bytes per output stream.
    pub max_output_bytes: usize,
}

impl ExecConfig {
    /// The per-command timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            confine_symlinks: true,
            api_token: None,
            env_file: PathBuf::from(DEFAULT_ENV_FILE),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 60,
            max_requests: 100,
        }
    }
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            whitelist_path: PathBuf::from("whitelist.json"),
            timeout_secs: 15,
            max_concurrent: 4,
            max_output_bytes: 1024 * 1024,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "rwx-api-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
            http: HttpConfig::default(),
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            exec: ExecConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `RWX_`.
    /// For example: `RWX_WORKSPACE_ROOT`, `RWX_LOG_LEVEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // The env file is both the source of persisted settings and the
        // target `ensure_api_token` writes to.
        if let Ok(env_file) = std::env::var("RWX_ENV_FILE") {
            config.security.env_file = PathBuf::from(env_file);
        }
        if let Err(e) = dotenvy::from_path(&config.security.env_file) {
            debug!("No env file loaded from {:?}: {}", config.security.env_file, e);
        }

        if let Ok(name) = std::env::var("RWX_SERVER_NAME") {
            config.server.name = name;
        }

        if let Ok(level) = std::env::var("RWX_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.http = HttpConfig::from_env();

        if let Ok(root) = std::env::var("RWX_WORKSPACE_ROOT") {
            config.security.workspace_root = PathBuf::from(root);
        }
        info!("Workspace root: {:?}", config.security.workspace_root);

        if let Ok(confine) = std::env::var("RWX_CONFINE_SYMLINKS") {
            config.security.confine_symlinks = parse_flag(&confine, true);
        }

        if let Ok(token) = std::env::var(API_TOKEN_VAR) {
            if token.trim().is_empty() {
                warn!("{} is set but empty - ignoring it", API_TOKEN_VAR);
            } else {
                config.security.api_token = Some(token);
                info!("Existing API token loaded from environment");
            }
        }

        if let Ok(enabled) = std::env::var("RWX_RATE_LIMIT_ENABLED") {
            config.rate_limit.enabled = parse_flag(&enabled, true);
        }
        config.rate_limit.window_secs =
            parse_env("RWX_RATE_WINDOW_SECS", config.rate_limit.window_secs);
        config.rate_limit.max_requests =
            parse_env("RWX_RATE_MAX_REQUESTS", config.rate_limit.max_requests);
        if !config.rate_limit.enabled {
            warn!("Rate limiting disabled via RWX_RATE_LIMIT_ENABLED");
        }

        if let Ok(path) = std::env::var("RWX_WHITELIST_PATH") {
            config.exec.whitelist_path = PathBuf::from(path);
        }
        config.exec.timeout_secs = parse_env("RWX_EXEC_TIMEOUT_SECS", config.exec.timeout_secs);
        config.exec.max_concurrent =
            parse_env("RWX_EXEC_MAX_CONCURRENT", config.exec.max_concurrent).max(1);
        config.exec.max_output_bytes =
            parse_env("RWX_EXEC_MAX_OUTPUT_BYTES", config.exec.max_output_bytes);

        config
    }

    /// Make sure an API token is available, generating one if needed.
    ///
    /// A generated token is written to the configured env file, replacing
    /// any previous assignment, so that later restarts pick it up. Failing to persist it is not fatal: the
    /// token is still used for the lifetime of this process.
    pub fn ensure_api_token(&mut self) -> &str {
        let env_file = self.security.env_file.clone();
        self.security.api_token.get_or_insert_with(|| {
            let token = generate_api_token();
            match persist_api_token(&env_file, &token) {
                Ok(()) => info!("New API token generated and saved to {:?}", env_file),
                Err(e) => warn!(
                    "New API token generated but could not be saved to {:?}: {}",
                    env_file, e
                ),
            }
            token
        })
    }
}

/// Generate a random 256-bit token, hex encoded.
pub fn generate_api_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Write the token into the env file, replacing any existing assignment.
fn persist_api_token(env_file: &Path, token: &str) -> io::Result<()> {
    let existing = match std::fs::read_to_string(env_file) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let assignment = format!("{API_TOKEN_VAR}={token}");
    let mut lines = Vec::new();
    let mut replaced = false;
    for line in existing.lines() {
        if !assigns_api_token(line) {
            lines.push(line.to_string());
        } else if !replaced {
            lines.push(assignment.clone());
            replaced = true;
        }
    }
    if !replaced {
        lines.push(assignment);
    }

    let mut contents = lines.join("\n");
    contents.push('\n');
    std::fs::write(env_file, contents)
}

fn assigns_api_token(line: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
    line.strip_prefix(API_TOKEN_VAR)
        .is_some_and(|rest| rest.trim_start().starts_with('='))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid value for {}: {:?} - using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

fn parse_flag(raw: &str, default: bool) -> bool {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to ensure env var tests run serially
    static ENV_TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_limits() {
        let config = Config::default();
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.exec.timeout(), Duration::from_secs(15));
        assert!(config.security.api_token.is_none());
    }

    #[test]
    fn test_workspace_and_limits_from_env() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("RWX_WORKSPACE_ROOT", "/srv/workspace");
            std::env::set_var("RWX_RATE_MAX_REQUESTS", "3");
            std::env::set_var("RWX_EXEC_MAX_CONCURRENT", "0");
        }
        let config = Config::from_env();
        assert_eq!(config.security.workspace_root, PathBuf::from("/srv/workspace"));
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.exec.max_concurrent, 1);
        unsafe {
            std::env::remove_var("RWX_WORKSPACE_ROOT");
            std::env::remove_var("RWX_RATE_MAX_REQUESTS");
            std::env::remove_var("RWX_EXEC_MAX_CONCURRENT");
        }
    }

    #[test]
    fn test_invalid_number_falls_back_to_default() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("RWX_RATE_WINDOW_SECS", "sixty");
        }
        let config = Config::from_env();
        assert_eq!(config.rate_limit.window_secs, 60);
        unsafe {
            std::env::remove_var("RWX_RATE_WINDOW_SECS");
        }
    }

    #[test]
    fn test_token_from_env() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("RWX_API_TOKEN", "test_token_12345");
        }
        let config = Config::from_env();
        assert_eq!(config.security.api_token.as_deref(), Some("test_token_12345"));
        unsafe {
            std::env::remove_var("RWX_API_TOKEN");
        }
    }

    #[test]
    fn test_ensure_api_token_generates_and_persists() {
        let temp_dir = TempDir::new().unwrap();
        let env_file = temp_dir.path().join(".env");

        let mut config = Config::default();
        config.security.env_file = env_file.clone();

        let token = config.ensure_api_token().to_string();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let saved = std::fs::read_to_string(&env_file).unwrap();
        assert!(saved.contains(&format!("RWX_API_TOKEN={token}")));

        // A second call keeps the same token
        assert_eq!(config.ensure_api_token(), token);
    }

    #[test]
    fn test_ensure_api_token_keeps_existing() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.security.env_file = temp_dir.path().join(".env");
        config.security.api_token = Some("preset".to_string());

        assert_eq!(config.ensure_api_token(), "preset");
        assert!(!config.security.env_file.exists());
    }

    #[test]
    fn test_token_redacted_in_debug() {
        let mut config = Config::default();
        config.security.api_token = Some("super_secret_token".to_string());
        let debug_str = format!("{:?}", config);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super_secret_token"));
    }

    #[test]
    fn test_generated_tokens_differ() {
        assert_ne!(generate_api_token(), generate_api_token());
    }

    #[test]
    fn test_persisted_token_survives_restart() {
        let _lock = ENV_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let env_file = temp_dir.path().join("custom.env");
        unsafe {
            std::env::set_var("RWX_ENV_FILE", &env_file);
            std::env::remove_var(API_TOKEN_VAR);
        }

        let mut first = Config::from_env();
        assert_eq!(first.security.env_file, env_file);
        let token = first.ensure_api_token().to_string();

        let second = Config::from_env();
        assert_eq!(second.security.api_token.as_deref(), Some(token.as_str()));

        unsafe {
            std::env::remove_var("RWX_ENV_FILE");
            std::env::remove_var(API_TOKEN_VAR);
        }
    }

    #[test]
    fn test_persist_replaces_existing_assignment() {
        let temp_dir = TempDir::new().unwrap();
        let env_file = temp_dir.path().join(".env");
        std::fs::write(&env_file, "OTHER=1\nRWX_API_TOKEN=\nRWX_API_TOKEN=stale\n").unwrap();

        persist_api_token(&env_file, "fresh").unwrap();

        let saved = std::fs::read_to_string(&env_file).unwrap();
        assert_eq!(saved, "OTHER=1\nRWX_API_TOKEN=fresh\n");
    }

    #[test]
    fn test_token_assignment_detection() {
        assert!(assigns_api_token("RWX_API_TOKEN=abc"));
        assert!(assigns_api_token("export RWX_API_TOKEN = abc"));
        assert!(!assigns_api_token("RWX_API_TOKEN_OLD=abc"));
        assert!(!assigns_api_token("# RWX_API_TOKEN=abc"));
    }
}
