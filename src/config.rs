//! Client configuration, read from a TOML file.
//!
//! ```toml
//! api_url = "https://example.org/Includes/API/api.inc.php"
//! user_name = "alice"
//! sync_root = "/home/alice/Sync"
//! poll_interval_secs = 5
//! exclude = ["*.part"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IoContext, Result, SyncError};

pub const ENV_API_KEY: &str = "REDSYNC_API_KEY";
pub const ENV_PASSWORD: &str = "REDSYNC_PASSWORD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Endpoint every remote call is posted to.
    pub api_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub user_name: Option<String>,
    pub password: Option<String>,
    /// A session key obtained elsewhere; skips the login call.
    pub api_key: Option<String>,
    #[serde(default = "default_sync_root")]
    pub sync_root: PathBuf,
    /// Seconds between scheduled reconciliation passes in watch mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
    /// Extra glob patterns ignored by both sync flows.
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_user_agent() -> String {
    format!("redsync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_sync_root() -> PathBuf {
    PathBuf::from("Sync")
}

fn default_poll_interval() -> u64 {
    5
}

fn default_debounce() -> u64 {
    100
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// `<config dir>/redsync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("redsync").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_path("reading config", path)?;
        let mut config = Self::parse(&raw, path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn parse(raw: &str, path: &Path) -> Result<Self> {
        let config: Config = toml::from_str(raw).map_err(|e| SyncError::Config {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        config.validate(path)?;
        Ok(config)
    }

    /// Secrets may come from the environment instead of the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_API_KEY).filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(password) = lookup(ENV_PASSWORD).filter(|p| !p.is_empty()) {
            self.password = Some(password);
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |detail: &str| SyncError::Config {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        };
        if self.api_url.trim().is_empty() {
            return Err(invalid("`api_url` must not be empty"));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("`poll_interval_secs` must be at least 1"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
