use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::types::error::{MailpollError, Result};

/// Engine configuration
///
/// Loaded once at startup and handed to the driver by value; there is no
/// global configuration state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Protocols checked on a timer. Accounts using any other protocol
    /// (push-style, managing their own cadence) are never scheduled here.
    #[serde(default = "default_polled_protocols")]
    pub polled_protocols: Vec<String>,

    /// Force every non-negative interval to one minute at load. Soak-testing
    /// aid; warns on every load while set.
    #[serde(default)]
    pub force_one_minute_refresh: bool,

    /// Initial state of the wake-triggered check gate. Can be flipped at
    /// runtime through the driver handle.
    #[serde(default = "default_true")]
    pub background_checks: bool,
}

fn default_polled_protocols() -> Vec<String> {
    vec!["imap".to_string(), "pop3".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            polled_protocols: default_polled_protocols(),
            force_one_minute_refresh: false,
            background_checks: true,
        }
    }
}

impl Config {
    /// Whether accounts using `protocol` are eligible for timed checks.
    pub fn is_polled_protocol(&self, protocol: &str) -> bool {
        self.polled_protocols.iter().any(|p| p == protocol)
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailpoll").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("mailpoll")
                .join("config.toml"),
        );
        paths.push(home_dir.join(".mailpollrc"));
    }

    paths
}

/// Load configuration from the first default path that exists
pub fn load_config() -> Result<Config> {
    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return load_config_from_path(&path);
        }
    }

    // No config found, fall back to defaults
    info!("No config file found, using defaults");
    Ok(Config::default())
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| MailpollError::Config(format!("Failed to read config: {}", e)))?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| MailpollError::Config(format!("Failed to parse config: {}", e)))?;

    Ok(config)
}
