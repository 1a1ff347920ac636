use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "turnsync.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SessionConfig {
    #[serde(default)]
    pub user_id: u64,
    /// Set when running as an embedded widget.
    #[serde(default)]
    pub widget_session: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatusConfig {
    /// Minimum time a tool status stays visible.
    #[serde(default = "default_hold_ms")]
    pub hold_ms: u64,
}

fn default_hold_ms() -> u64 {
    crate::status::DEFAULT_HOLD.as_millis() as u64
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            hold_ms: default_hold_ms(),
        }
    }
}

impl StatusConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub rotation: Option<String>,
    pub retention_days: Option<u64>,
}

impl Config {
    /// Load from an explicit path, or search `$TURNSYNC_CONFIG`, the working
    /// directory and the user config dir. Falls back to defaults.
    pub fn load_with_path(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load_from(path)?, Some(path.to_path_buf())));
        }

        let mut candidates = Vec::new();
        if let Ok(env_path) = std::env::var("TURNSYNC_CONFIG") {
            candidates.push(PathBuf::from(env_path));
        }
        candidates.push(PathBuf::from(CONFIG_FILE));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("turnsync").join(CONFIG_FILE));
        }

        for path in candidates {
            if path.exists() {
                let config = Self::load_from(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Config at {:?} is invalid: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.server.url.trim().to_lowercase();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!(
                "Server URL must start with http:// or https://, got: {}",
                self.server.url
            );
        }
        if self.status.hold_ms == 0 {
            anyhow::bail!("status.hold_ms must be greater than 0");
        }
        if self.status.hold() > crate::status::MAX_HOLD {
            anyhow::bail!(
                "status.hold_ms must be at most {}, got: {}",
                crate::status::MAX_HOLD.as_millis(),
                self.status.hold_ms
            );
        }
        if let Some(rotation) = self.logging.rotation.as_deref() {
            if !matches!(rotation, "daily" | "hourly" | "never") {
                anyhow::bail!(
                    "logging.rotation must be one of daily, hourly, never; got: {}",
                    rotation
                );
            }
        }
        Ok(())
    }
}
