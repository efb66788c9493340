//! tilt.toml configuration parser.
//!
//! Built once by the daemon and handed by reference to the components that
//! need it. Every section is optional; an empty file yields the defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timestamp::Clock;

/// Default rolling retention for device windows and instance counters.
pub const DEFAULT_WINDOW: &str = "3s";

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: &str = "10s";

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration {value:?} for `{key}`")]
    InvalidDuration { key: &'static str, value: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TiltConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub scale: Option<ScaleConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name this instance reports its load under. Defaults to the port.
    pub instance_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_window")]
    pub window: String,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
    #[serde(default)]
    pub clock: Clock,
}

/// Target application and credentials for the external scaler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleConfig {
    pub app_name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_window() -> String {
    DEFAULT_WINDOW.to_string()
}

fn default_sweep_interval() -> String {
    DEFAULT_SWEEP_INTERVAL.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            instance_id: None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            sweep_interval: default_sweep_interval(),
            clock: Clock::default(),
        }
    }
}

impl ServerConfig {
    pub fn instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| self.port.to_string())
    }
}

impl StoreConfig {
    pub fn window(&self) -> Result<Duration, ConfigError> {
        parse_duration("store.window", &self.window)
    }

    pub fn sweep_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("store.sweep_interval", &self.sweep_interval)
    }
}

impl ScaleConfig {
    /// Application name and credential pair, if all three are set.
    pub fn credentials(&self) -> Option<(&str, &str, &str)> {
        match (&self.app_name, &self.username, &self.password) {
            (Some(app), Some(user), Some(pass)) => {
                Some((app.as_str(), user.as_str(), pass.as_str()))
            }
            _ => None,
        }
    }
}

impl TiltConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: TiltConfig = toml::from_str(content)?;
        config.store.window()?;
        config.store.sweep_interval()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "500ms", "3s", or "5m".
///
/// A bare number is read as seconds.
pub fn parse_duration(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration {
        key,
        value: value.to_string(),
    };
    let s = value.trim();
    let (digits, scale_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else {
        (s, 1_000)
    };
    let n: u64 = digits.trim().parse().map_err(|_| invalid())?;
    let millis = n.checked_mul(scale_ms).ok_or_else(invalid)?;
    if millis == 0 {
        return Err(invalid());
    }
    Ok(Duration::from_millis(millis))
}
