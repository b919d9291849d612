//! Runtime configuration.
//!
//! Loaded from `~/.qmon/config.toml` (or an explicit path). Every field has a
//! default, so a missing file or a partial file is fine:
//!
//! ```toml
//! [polling]
//! refresh_ms = 1500
//!
//! [alerts]
//! call_alert_secs = 600
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MonitorError, Result};
use crate::storage::StoragePaths;

pub const DEFAULT_REFRESH_MS: u64 = 1_500;
pub const DEFAULT_REFRESH_HIDDEN_MS: u64 = 4_000;
pub const DEFAULT_HIDDEN_BACKOFF_AFTER_MS: u64 = 60_000;
pub const DEFAULT_TICK_MS: u64 = 1_000;
pub const DEFAULT_BUSY_RETRY_MS: u64 = 500;

pub const DEFAULT_CLEAR_TICKS: u32 = 3;
pub const DEFAULT_DRIFT_TOLERANCE_MS: i64 = 5_000;
pub const MAX_CHAT_SLOTS: usize = 2;

pub const DEFAULT_CALL_ALERT_SECS: u64 = 10 * 60;
pub const DEFAULT_CHAT_ALERT_SECS: u64 = 10 * 60;

pub const DEFAULT_HISTORY_CAP: usize = 200;
pub const DEFAULT_AGGREGATE_CAP_MS: u64 = 8 * 60 * 60 * 1000;
pub const DEFAULT_SLOT_IDLE_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub refresh_ms: u64,
    pub refresh_hidden_ms: u64,
    pub hidden_backoff_after_ms: u64,
    pub tick_ms: u64,
    pub busy_retry_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            refresh_ms: DEFAULT_REFRESH_MS,
            refresh_hidden_ms: DEFAULT_REFRESH_HIDDEN_MS,
            hidden_backoff_after_ms: DEFAULT_HIDDEN_BACKOFF_AFTER_MS,
            tick_ms: DEFAULT_TICK_MS,
            busy_retry_ms: DEFAULT_BUSY_RETRY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Consecutive "not in call/chat" observations before an interval closes.
    pub clear_ticks: u32,
    pub drift_tolerance_ms: i64,
    pub max_chats: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            clear_ticks: DEFAULT_CLEAR_TICKS,
            drift_tolerance_ms: DEFAULT_DRIFT_TOLERANCE_MS,
            max_chats: MAX_CHAT_SLOTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub notifications_enabled: bool,
    pub call_alert_secs: u64,
    pub chat_alert_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notifications_enabled: true,
            call_alert_secs: DEFAULT_CALL_ALERT_SECS,
            chat_alert_secs: DEFAULT_CHAT_ALERT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub history_cap: usize,
    pub aggregate_cap_ms: u64,
    pub slot_idle_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            history_cap: DEFAULT_HISTORY_CAP,
            aggregate_cap_ms: DEFAULT_AGGREGATE_CAP_MS,
            slot_idle_days: DEFAULT_SLOT_IDLE_DAYS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub snapshot: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub view: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub polling: PollingConfig,
    pub timers: TimerConfig,
    pub alerts: AlertConfig,
    pub retention: RetentionConfig,
    pub paths: PathsConfig,
    pub logging: LoggingConfig,
}

impl MonitorConfig {
    pub fn call_alert_ms(&self) -> i64 {
        secs_to_ms(self.alerts.call_alert_secs)
    }

    pub fn chat_alert_ms(&self) -> i64 {
        secs_to_ms(self.alerts.chat_alert_secs)
    }

    /// Chat slots are backed by a fixed array; larger values are clamped.
    pub fn max_chats(&self) -> usize {
        self.timers.max_chats.min(MAX_CHAT_SLOTS)
    }

    pub fn snapshot_path(&self, paths: &StoragePaths) -> PathBuf {
        self.paths
            .snapshot
            .clone()
            .unwrap_or_else(|| paths.snapshot_file())
    }

    pub fn store_path(&self, paths: &StoragePaths) -> PathBuf {
        self.paths.store.clone().unwrap_or_else(|| paths.store_db())
    }

    pub fn view_path(&self, paths: &StoragePaths) -> PathBuf {
        self.paths.view.clone().unwrap_or_else(|| paths.view_file())
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

/// Loads the configuration, returning defaults if the file doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<MonitorConfig> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => StoragePaths::from_home()?.config_file(),
    };

    if !config_path.exists() {
        return Ok(MonitorConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| MonitorError::Io {
        context: format!("Failed to read config {}", config_path.display()),
        source,
    })?;

    toml::from_str::<MonitorConfig>(&content).map_err(|err| MonitorError::ConfigMalformed {
        path: config_path,
        details: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.timers.clear_ticks, 3);
        assert_eq!(config.call_alert_ms(), 600_000);
    }

    #[test]
    fn load_config_merges_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[polling]
refresh_ms = 2000

[alerts]
call_alert_secs = 300
notifications_enabled = false

[paths]
snapshot = "/tmp/roster.json"
"#,
        )
        .expect("write config");

        let config = load_config(Some(&path)).expect("load config");
        assert_eq!(config.polling.refresh_ms, 2000);
        assert_eq!(config.polling.refresh_hidden_ms, DEFAULT_REFRESH_HIDDEN_MS);
        assert_eq!(config.alerts.call_alert_secs, 300);
        assert!(!config.alerts.notifications_enabled);
        assert!(config.alerts.enabled);
        assert_eq!(
            config.paths.snapshot.as_deref(),
            Some(Path::new("/tmp/roster.json"))
        );
    }

    #[test]
    fn load_config_rejects_malformed_toml() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[polling\nrefresh_ms = ").expect("write config");

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, MonitorError::ConfigMalformed { .. }));
    }

    #[test]
    fn max_chats_is_clamped_to_slot_capacity() {
        let mut config = MonitorConfig::default();
        config.timers.max_chats = 9;
        assert_eq!(config.max_chats(), MAX_CHAT_SLOTS);
    }
}
