//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/pathmark/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/pathmark/` (~/.config/pathmark/)
//! - Data: `$XDG_DATA_HOME/pathmark/` (~/.local/share/pathmark/)
//! - State/Logs: `$XDG_STATE_HOME/pathmark/` (~/.local/state/pathmark/)

use crate::error::{Error, Result};
use crate::service::{CommitPolicy, ServiceOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "pathmark";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// History database settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// History database configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct HistoryConfig {
    /// Database file, defaults to [`Config::database_path`]
    pub database_path: Option<PathBuf>,

    /// Open the database read-only
    #[serde(default)]
    pub read_only: bool,

    /// Commit after this many writes instead of only when idle
    pub max_pending_writes: Option<usize>,

    /// Commit at least this often while writes are pending
    pub commit_interval_ms: Option<u64>,

    /// Wait this long on another process's lock before a statement fails
    pub busy_timeout_ms: Option<u64>,
}

impl HistoryConfig {
    /// Database path, falling back to the XDG data directory
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(Config::database_path)
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        CommitPolicy {
            commit_on_idle: true,
            max_pending_writes: self.max_pending_writes,
            max_interval: self.commit_interval_ms.map(Duration::from_millis),
        }
    }

    /// Options for opening the history service
    pub fn service_options(&self) -> ServiceOptions {
        let options = ServiceOptions::new(self.resolved_database_path())
            .read_only(self.read_only)
            .commit_policy(self.commit_policy());
        match self.busy_timeout_ms {
            Some(ms) => options.busy_timeout(Duration::from_millis(ms)),
            None => options,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_pending_writes == Some(0) {
            return Err(Error::Config(
                "history.max_pending_writes must be at least 1".to_string(),
            ));
        }
        if self.commit_interval_ms == Some(0) {
            return Err(Error::Config(
                "history.commit_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.history.validate()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/pathmark/config.toml` (~/.config/pathmark/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join(APP_NAME).join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join(APP_NAME)
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join(APP_NAME)
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/pathmark/history.db` (~/.local/share/pathmark/history.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("history.db")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/pathmark/pathmark.log` (~/.local/state/pathmark/pathmark.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("pathmark.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.history.database_path.is_none());
        assert!(!config.history.read_only);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.max_files, 5);
        assert_eq!(config.history.commit_policy(), CommitPolicy::default());
        assert_eq!(
            config.history.service_options().busy_timeout,
            crate::service::DEFAULT_BUSY_TIMEOUT
        );
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[history]
database_path = "/var/lib/pathmark/history.db"
read_only = true
max_pending_writes = 50
commit_interval_ms = 2000
busy_timeout_ms = 750

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.history.database_path.as_deref(),
            Some(Path::new("/var/lib/pathmark/history.db"))
        );
        assert_eq!(config.logging.level, "debug");

        let options = config.history.service_options();
        assert!(options.read_only);
        assert_eq!(options.commit.max_pending_writes, Some(50));
        assert_eq!(options.commit.max_interval, Some(Duration::from_secs(2)));
        assert_eq!(options.busy_timeout, Duration::from_millis(750));
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let history = HistoryConfig {
            max_pending_writes: Some(0),
            ..Default::default()
        };
        assert!(matches!(history.validate(), Err(Error::Config(_))));

        let history = HistoryConfig {
            commit_interval_ms: Some(0),
            ..Default::default()
        };
        assert!(history.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[history]\nmax_pending_writes = 3\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.history.max_pending_writes, Some(3));

        std::fs::write(&path, "[history\n").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }
}
