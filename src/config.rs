use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ReminderBotError, Result};

pub const DEFAULT_TIMEZONE: &str = "America/Sao_Paulo";
const MAX_DELIVERY_ATTEMPTS: u32 = 5;

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_delivery_timeout_seconds() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    1
}

fn default_max_sleep_seconds() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7979
}

fn default_restart_backoff_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeliveryConfig {
    pub webhook_url: Option<String>,
    #[serde(default = "default_delivery_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: default_delivery_timeout_seconds(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.clamp(1, MAX_DELIVERY_ATTEMPTS)
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_sleep_seconds")]
    pub max_sleep_seconds: u64,
    /// Re-arm an annual reminder for next year as soon as it fires.
    #[serde(default = "default_true")]
    pub rearm_annual: bool,
    /// Drop expired one-shot records from the store during reconciliation.
    #[serde(default = "default_true")]
    pub prune_expired: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_sleep_seconds: default_max_sleep_seconds(),
            rearm_annual: true,
            prune_expired: true,
        }
    }
}

impl SchedulerConfig {
    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub token: Option<String>,
    #[serde(default = "default_restart_backoff_seconds")]
    pub restart_backoff_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: None,
            restart_backoff_seconds: default_restart_backoff_seconds(),
        }
    }
}

impl DaemonConfig {
    pub fn restart_backoff(&self) -> Duration {
        Duration::from_secs(self.restart_backoff_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub store_path: Option<String>,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            store_path: None,
            delivery: DeliveryConfig::default(),
            scheduler: SchedulerConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

impl Config {
    /// Loads the config file at `path`. A missing file yields the defaults;
    /// a file that exists but does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(ReminderBotError::Config(format!(
                    "cannot read {}: {err}",
                    path.display()
                )))
            }
        };

        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(raw).map_err(|e| ReminderBotError::Config(e.to_string()))?;
        config.timezone()?;
        Ok(config)
    }

    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn store_path(&self) -> String {
        self.store_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .unwrap_or_else(crate::runtime_paths::default_store_path)
    }

    pub fn token(&self) -> &str {
        self.daemon.token.as_deref().unwrap_or_default()
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| ReminderBotError::Config(format!("unknown timezone `{name}`: {e}")))
}
