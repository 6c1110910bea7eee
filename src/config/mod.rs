//! Configuration management
//!
//! This module handles loading and parsing configuration for the Verbatims
//! data pipeline. Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::models::ConflictPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Import pipeline configuration
    #[serde(default)]
    pub import: ImportConfig,
    /// Admin access configuration
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin for the admin dashboard
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024 // 50MB
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "data/verbatims.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local object store
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Payloads at or above this size are gzip-compressed in `auto` mode
    #[serde(default = "default_compress_threshold")]
    pub compress_threshold_bytes: usize,
    /// Days before snapshots and exports expire
    #[serde(default = "default_backup_ttl_days")]
    pub backup_ttl_days: i64,
    /// Days before import reports expire
    #[serde(default = "default_report_ttl_days")]
    pub report_ttl_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            compress_threshold_bytes: default_compress_threshold(),
            backup_ttl_days: default_backup_ttl_days(),
            report_ttl_days: default_report_ttl_days(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/storage")
}

fn default_compress_threshold() -> usize {
    1024
}

fn default_backup_ttl_days() -> i64 {
    30
}

fn default_report_ttl_days() -> i64 {
    7
}

/// Import pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Rows per batch between progress updates and cancellation checks
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Minimum interval between progress notifications
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// SSE heartbeat interval
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// How long finished jobs stay in the progress store
    #[serde(default = "default_job_retention_secs")]
    pub job_retention_secs: u64,
    /// Conflict policy used when a request does not specify one
    #[serde(default)]
    pub default_conflict_policy: ConflictPolicy,
    /// Largest decompressed size of one entry in an uploaded archive
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            progress_interval_ms: default_progress_interval_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            job_retention_secs: default_job_retention_secs(),
            default_conflict_policy: ConflictPolicy::default(),
            max_entry_bytes: default_max_entry_bytes(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_job_retention_secs() -> u64 {
    3600
}

fn default_max_entry_bytes() -> u64 {
    50 * 1024 * 1024 // 50MB
}

/// Admin access configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Bearer tokens accepted on admin routes
    #[serde(default)]
    pub admin_tokens: Vec<String>,
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - VERBATIMS_SERVER_HOST
    /// - VERBATIMS_SERVER_PORT
    /// - VERBATIMS_DATABASE_URL
    /// - VERBATIMS_STORAGE_PATH
    /// - VERBATIMS_IMPORT_BATCH_SIZE
    /// - VERBATIMS_ADMIN_TOKENS (comma separated)
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.import.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "import.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("VERBATIMS_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("VERBATIMS_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("VERBATIMS_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        if let Ok(url) = std::env::var("VERBATIMS_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(max) = std::env::var("VERBATIMS_DATABASE_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse::<u32>() {
                self.database.max_connections = max;
            }
        }

        if let Ok(path) = std::env::var("VERBATIMS_STORAGE_PATH") {
            self.storage.path = PathBuf::from(path);
        }

        if let Ok(size) = std::env::var("VERBATIMS_IMPORT_BATCH_SIZE") {
            if let Ok(size) = size.parse::<usize>() {
                self.import.batch_size = size;
            }
        }
        if let Ok(policy) = std::env::var("VERBATIMS_IMPORT_CONFLICT_POLICY") {
            if let Ok(policy) = policy.parse::<ConflictPolicy>() {
                self.import.default_conflict_policy = policy;
            }
        }

        if let Ok(tokens) = std::env::var("VERBATIMS_ADMIN_TOKENS") {
            self.security.admin_tokens = tokens
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared by every test that touches process environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
const ENV_KEYS: &[&str] = &[
    "VERBATIMS_SERVER_HOST",
    "VERBATIMS_SERVER_PORT",
    "VERBATIMS_SERVER_CORS_ORIGIN",
    "VERBATIMS_DATABASE_URL",
    "VERBATIMS_DATABASE_MAX_CONNECTIONS",
    "VERBATIMS_STORAGE_PATH",
    "VERBATIMS_IMPORT_BATCH_SIZE",
    "VERBATIMS_IMPORT_CONFLICT_POLICY",
    "VERBATIMS_ADMIN_TOKENS",
];

#[cfg(test)]
fn clear_env() {
    for key in ENV_KEYS {
        std::env::remove_var(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        super::CONFIG_ENV_MUTEX
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = std::path::Path::new("nonexistent_config.yml");
        let config = Config::load(path).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "data/verbatims.db");
        assert_eq!(config.storage.path, PathBuf::from("data/storage"));
        assert_eq!(config.import.batch_size, 50);
        assert_eq!(config.import.progress_interval_ms, 500);
        assert_eq!(config.import.heartbeat_secs, 30);
        assert_eq!(config.import.default_conflict_policy, ConflictPolicy::Skip);
        assert_eq!(config.import.max_entry_bytes, 50 * 1024 * 1024);
        assert!(config.security.admin_tokens.is_empty());
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "import:\n  batch_size: 10\n").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.import.batch_size, 10);
        assert_eq!(config.import.progress_interval_ms, 500);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 9000
database:
  url: "/var/lib/verbatims/db.sqlite"
  max_connections: 4
storage:
  path: "/var/lib/verbatims/blobs"
  compress_threshold_bytes: 4096
import:
  batch_size: 25
  default_conflict_policy: merge
security:
  admin_tokens:
    - "secret-one"
    - "secret-two"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.storage.compress_threshold_bytes, 4096);
        assert_eq!(config.import.batch_size, 25);
        assert_eq!(config.import.default_conflict_policy, ConflictPolicy::Merge);
        assert_eq!(config.security.admin_tokens, vec!["secret-one", "secret-two"]);
    }

    #[test]
    fn test_load_invalid_yaml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: not_a_number\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("parse"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "import:\n  batch_size: 0\n").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_env_override_server_and_tokens() {
        let _guard = lock_env();
        clear_env();

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 8080\n").unwrap();

        std::env::set_var("VERBATIMS_SERVER_HOST", "192.168.1.1");
        std::env::set_var("VERBATIMS_SERVER_PORT", "4000");
        std::env::set_var("VERBATIMS_ADMIN_TOKENS", "alpha, beta,,");

        let config = Config::load_with_env(file.path()).unwrap();

        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.security.admin_tokens, vec!["alpha", "beta"]);

        clear_env();
    }

    #[test]
    fn test_env_override_import_policy() {
        let _guard = lock_env();
        clear_env();

        let file = NamedTempFile::new().unwrap();
        std::env::set_var("VERBATIMS_IMPORT_CONFLICT_POLICY", "overwrite");
        std::env::set_var("VERBATIMS_IMPORT_BATCH_SIZE", "7");

        let config = Config::load_with_env(file.path()).unwrap();
        assert_eq!(config.import.default_conflict_policy, ConflictPolicy::Overwrite);
        assert_eq!(config.import.batch_size, 7);

        clear_env();
    }

    #[test]
    fn test_env_override_invalid_values_ignored() {
        let _guard = lock_env();
        clear_env();

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 8080\n").unwrap();

        std::env::set_var("VERBATIMS_SERVER_PORT", "not_a_number");
        std::env::set_var("VERBATIMS_IMPORT_CONFLICT_POLICY", "explode");

        let config = Config::load_with_env(file.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.import.default_conflict_policy, ConflictPolicy::Skip);

        clear_env();
    }
}

/// Property-based tests for configuration parsing
#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        super::CONFIG_ENV_MUTEX
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
        prop_oneof![
            Just(ConflictPolicy::Skip),
            Just(ConflictPolicy::Overwrite),
            Just(ConflictPolicy::Merge),
        ]
    }

    fn config_strategy() -> impl Strategy<Value = Config> {
        (
            "[a-z0-9.]{1,20}",
            1u16..=65535,
            "[a-z/_.]{1,30}",
            1usize..1000,
            policy_strategy(),
            prop::collection::vec("[A-Za-z0-9]{8,16}", 0..3),
        )
            .prop_map(|(host, port, url, batch, policy, tokens)| {
                let mut config = Config::default();
                config.server.host = host;
                config.server.port = port;
                config.database.url = url;
                config.import.batch_size = batch;
                config.import.default_conflict_policy = policy;
                config.security.admin_tokens = tokens;
                config
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(30))]

        #[test]
        fn config_yaml_roundtrip(config in config_strategy()) {
            let yaml = serde_yaml::to_string(&config).unwrap();
            let mut file = NamedTempFile::new().unwrap();
            write!(file, "{}", yaml).unwrap();

            let loaded = Config::load(file.path()).unwrap();
            prop_assert_eq!(loaded.server.host, config.server.host);
            prop_assert_eq!(loaded.server.port, config.server.port);
            prop_assert_eq!(loaded.database.url, config.database.url);
            prop_assert_eq!(loaded.import.batch_size, config.import.batch_size);
            prop_assert_eq!(loaded.import.default_conflict_policy, config.import.default_conflict_policy);
            prop_assert_eq!(loaded.security.admin_tokens, config.security.admin_tokens);
        }

        #[test]
        fn env_port_takes_precedence(file_port in 1u16..=65535, env_port in 1u16..=65535) {
            let _guard = lock_env();
            clear_env();

            let mut file = NamedTempFile::new().unwrap();
            write!(file, "server:\n  port: {}\n", file_port).unwrap();
            std::env::set_var("VERBATIMS_SERVER_PORT", env_port.to_string());

            let config = Config::load_with_env(file.path()).unwrap();
            clear_env();
            prop_assert_eq!(config.server.port, env_port);
        }
    }
}
