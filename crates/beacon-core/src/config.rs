//! Application configuration management.
//!
//! Configuration is layered, later sources overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. Optional TOML file (`BEACON_CONFIG`, or the platform default path)
//! 3. `BEACON_` environment variables, `__` separating sections
//!    (e.g. `BEACON_SCANNER__SCAN_TICK=2`, `BEACON_NOTIFY__MODE=webhook`)
//!
//! The `[scanner]` section only seeds the initial [`ScannerSettings`](crate::settings::ScannerSettings);
//! afterwards the settings are mutated through the settings store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::RetryPolicy;
use crate::storage::default_data_dir;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "BEACON_CONFIG";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "BEACON";

/// Default beacon namespace to listen for.
pub const DEFAULT_UUID_FILTER: &str = "ffffffff-bbbb-cccc-dddd-eeeeeeeeeeee";

/// Default scan cycle length in seconds.
pub const DEFAULT_SCAN_TICK: u64 = 3;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A single field failed validation.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("Configuration has {} validation error(s)", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Durable storage settings.
    pub storage: StorageConfig,
    /// Initial scanner settings.
    pub scanner: ScannerConfig,
    /// Change notification settings.
    pub notify: NotifyConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// TCP port to bind.
    pub port: u16,
    /// Use production logging (JSON files + compact stdout).
    pub production: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            production: false,
        }
    }
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the settings and snapshot files.
    pub data_dir: PathBuf,
    /// Attempts per cache read or write.
    pub retry_attempts: u32,
    /// Delay between attempts, in milliseconds.
    pub retry_backoff_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retry_attempts: 5,
            retry_backoff_ms: 1000,
        }
    }
}

impl StorageConfig {
    /// Retry policy described by this section.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }
}

/// Initial scanner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Beacon namespace to listen for.
    pub uuid_filter: String,
    /// Scan cycle length in seconds (clamped on use).
    pub scan_tick: u64,
    /// Start the tracking loop at boot.
    pub run_flag: bool,
    /// Use the simulated beacon roster instead of the radio.
    pub fake_scan: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            uuid_filter: DEFAULT_UUID_FILTER.to_string(),
            scan_tick: DEFAULT_SCAN_TICK,
            run_flag: false,
            fake_scan: false,
        }
    }
}

/// Which notification binding receives nearest-beacon changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyMode {
    /// Notifications disabled.
    None,
    /// In-process callback (logs the change unless replaced by the embedder).
    #[default]
    Callback,
    /// Publish on the in-process event bus.
    EventBus,
    /// POST the snapshot to the configured target URL.
    Webhook,
}

/// Change notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Selected binding.
    pub mode: NotifyMode,
    /// Initial webhook URL.
    pub target: Option<String>,
    /// Webhook request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            mode: NotifyMode::default(),
            target: None,
            timeout_secs: 5,
        }
    }
}

impl NotifyConfig {
    /// Webhook request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from the default file location and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load() -> ConfigResult<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV).map_or_else(default_config_path, PathBuf::from);
        Self::load_from(Some(&path))
    }

    /// Load configuration from an optional TOML file and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or validation fails.
    pub fn load_from(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }
        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a single problem and
    /// [`ConfigError::MultipleValidationErrors`] for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.server.port == 0 {
            invalid("server.port", "must be between 1 and 65535");
        }
        if self.server.host.trim().is_empty() {
            invalid("server.host", "must not be empty");
        }
        if self.storage.retry_attempts == 0 {
            invalid("storage.retry_attempts", "must be at least 1");
        }
        if self.scanner.uuid_filter.trim().is_empty() {
            invalid("scanner.uuid_filter", "must not be empty");
        }
        if self.notify.timeout_secs == 0 {
            invalid("notify.timeout_secs", "must be at least 1");
        }
        if let Some(target) = &self.notify.target {
            if reqwest::Url::parse(target).is_err() {
                invalid("notify.target", "must be an absolute URL");
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Default configuration file path.
///
/// On Linux: `/etc/beacon-tracker/config.toml`
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/beacon-tracker/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "beacon-tracker").map_or_else(
            || PathBuf::from("config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.scanner.uuid_filter, DEFAULT_UUID_FILTER);
        assert_eq!(config.notify.mode, NotifyMode::Callback);
        assert_eq!(config.storage.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 8080

[scanner]
scan_tick = 2
fake_scan = true

[notify]
mode = "webhook"
target = "http://127.0.0.1:9000/hook"
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.scanner.scan_tick, 2);
        assert!(config.scanner.fake_scan);
        assert_eq!(config.notify.mode, NotifyMode::Webhook);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load_from(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.scanner.scan_tick, DEFAULT_SCAN_TICK);
    }

    #[test]
    fn test_validation_collects_every_error() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        config.notify.target = Some("not a url".to_string());

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = AppConfig::default();
        config.scanner.uuid_filter = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError { ref field, .. }) if field == "scanner.uuid_filter"
        ));
    }
}
