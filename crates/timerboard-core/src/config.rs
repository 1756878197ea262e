//! Timerboard configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TimerboardError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerboardConfig {
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl TimerboardConfig {
    /// Load config from the default path (~/.timerboard/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TimerboardError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TimerboardError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.retention.timers_obsolete_after_days < 1 {
            return Err(TimerboardError::Config(
                "retention.timers_obsolete_after_days must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Timerboard home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".timerboard")
    }
}

/// Notification scheduling switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Whether notifications for timers are scheduled at all.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Jobs overdue by more than this are not re-armed after a restart.
    #[serde(default = "default_max_age_minutes")]
    pub max_age_minutes: u32,
}

fn bool_true() -> bool { true }
fn default_max_age_minutes() -> u32 { 60 }

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_minutes: default_max_age_minutes(),
        }
    }
}

/// Automatic deletion of old timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Minimum age in days for a timer to be considered obsolete.
    #[serde(default = "default_obsolete_after_days")]
    pub timers_obsolete_after_days: u32,
}

fn default_obsolete_after_days() -> u32 { 30 }

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { timers_obsolete_after_days: default_obsolete_after_days() }
    }
}

/// Outbound webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Delay between two messages of one drain; keeps us under the rate limit.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// How often the worker re-drains every enabled webhook.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

fn default_send_delay_ms() -> u64 { 2000 }
fn default_request_timeout_secs() -> u64 { 10 }
fn default_username() -> String { "Structure Timers".into() }
fn default_retry_interval_secs() -> u64 { 300 }

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: default_send_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            username: default_username(),
            avatar_url: None,
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

/// Storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.timerboard/timerboard.db".into() }

impl StorageConfig {
    /// `db_path` with `~` expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { db_path: default_db_path() }
    }
}

/// Background worker cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 { 3600 }

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { sweep_interval_secs: default_sweep_interval_secs() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TimerboardConfig::default();
        assert!(config.notifications.enabled);
        assert_eq!(config.notifications.max_age_minutes, 60);
        assert_eq!(config.retention.timers_obsolete_after_days, 30);
        assert_eq!(config.webhook.send_delay_ms, 2000);
        assert_eq!(config.webhook.username, "Structure Timers");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [notifications]
            enabled = false

            [webhook]
            send_delay_ms = 500
            avatar_url = "https://example.com/logo.png"
        "#;

        let config: TimerboardConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.notifications.enabled);
        assert_eq!(config.webhook.send_delay_ms, 500);
        assert_eq!(config.webhook.avatar_url.as_deref(), Some("https://example.com/logo.png"));
        assert_eq!(config.webhook.request_timeout_secs, 10);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: TimerboardConfig = toml::from_str("").unwrap();
        assert_eq!(config.worker.sweep_interval_secs, 3600);
        assert_eq!(config.storage.db_path, "~/.timerboard/timerboard.db");
    }

    #[test]
    fn test_obsolete_days_minimum() {
        let dir = std::env::temp_dir().join("timerboard-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[retention]\ntimers_obsolete_after_days = 0\n").unwrap();
        assert!(matches!(
            TimerboardConfig::load_from(&path),
            Err(TimerboardError::Config(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = TimerboardConfig::home_dir();
        assert!(home.to_string_lossy().contains("timerboard"));
    }
}
