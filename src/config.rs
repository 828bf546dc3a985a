//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MBOXSTORE_CONFIG` (environment variable)
//! 2. `~/.config/mboxstore/config.toml` (Linux/macOS)
//!    `%APPDATA%\mboxstore\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MboxError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Mailbox locking.
    pub lock: LockConfig,
    /// Performance tuning.
    pub performance: PerformanceConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Directory receiving extracted messages (default: system temp dir).
    pub temp_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Mailbox locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Try kernel advisory locks before the `.lock` file protocol.
    pub use_kernel_locks: bool,
    /// Extra attempts after the first one fails.
    pub retries: u32,
    /// Fixed pause between attempts, in milliseconds.
    pub backoff_ms: u64,
}

/// Performance tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Read buffer size in bytes (default: 131072 = 128 KB).
    pub read_buffer_size: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            temp_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            use_kernel_locks: true,
            retries: 5,
            backoff_ms: 5000,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 128 * 1024, // 128 KB
        }
    }
}

impl LockConfig {
    /// Pause between lock attempts.
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    let path = config_file_path()
        .ok_or_else(|| MboxError::Config("could not determine config file path".into()))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MboxError::io(parent, e))?;
    }

    let contents =
        toml::to_string_pretty(config).map_err(|e| MboxError::Config(e.to_string()))?;
    std::fs::write(&path, contents).map_err(|e| MboxError::io(&path, e))?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(path)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    // 1. Environment variable override
    if let Ok(env_path) = std::env::var("MBOXSTORE_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    // 2. Standard config directory
    dirs::config_dir().map(|d| d.join("mboxstore").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mboxstore")
}

/// Return the directory extracted messages are written to.
pub fn temp_dir(config: &Config) -> PathBuf {
    config
        .general
        .temp_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("mboxstore"))
}
