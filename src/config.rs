//! Service configuration loaded from `config.toml`.
//!
//! Every section is optional; missing keys fall back to their defaults.
//!
//! ```toml
//! timezone = "America/Denver"
//!
//! [scheduler]
//! port = 8080
//!
//! [sync]
//! interval_secs = 900
//! feeds = ["/home/me/.local/share/ulticlock/events.json"]
//! emergency_actions = ["sound", "lights", "vibration"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AlarmError, Result};
use crate::time_spec::{DEFAULT_TIMEZONE, parse_timezone};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// IANA display timezone for calendar events and `time_spec` strings.
    pub timezone: String,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub actions: ActionsConfig,
    pub logging: LoggingConfig,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            timezone: DEFAULT_TIMEZONE.to_owned(),
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
            actions: ActionsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// `[scheduler]`: dispatch loop and control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Control surface bind host.
    pub host: String,
    /// Control surface port (`0` auto-assigns).
    pub port: u16,
    /// Due-task scan interval.
    pub tick_interval_ms: u64,
    /// Alarms allowed to execute at once.
    pub max_concurrent_dispatches: usize,
    /// Budget for a single action's `execute`.
    pub action_timeout_secs: u64,
    /// Snooze delay when a request does not name one.
    pub default_snooze_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            tick_interval_ms: 1000,
            max_concurrent_dispatches: 8,
            action_timeout_secs: 120,
            default_snooze_secs: 540,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    #[must_use]
    pub fn default_snooze(&self) -> Duration {
        Duration::from_secs(self.default_snooze_secs)
    }

    /// Base URL of this scheduler's control surface.
    #[must_use]
    pub fn base_url(&self) -> String {
        let host = if self.host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.host.as_str()
        };
        format!("http://{host}:{}", self.port)
    }
}

/// `[store]`: event database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file; defaults to `<data_dir>/events.db`.
    pub path: Option<PathBuf>,
    /// Days to keep `triggered`/`canceled` rows before purging them.
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            retention_days: 30,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(crate::paths::db_file)
    }
}

/// `[sync]`: reconciliation with the calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Run the reconciliation loop at all.
    pub enabled: bool,
    /// Seconds between cycles.
    pub interval_secs: u64,
    /// Backward tolerance for "due" and "missed" queries.
    pub grace_secs: u64,
    /// Pause after a failed cycle before retrying.
    pub failure_backoff_secs: u64,
    /// Drive a scheduler in another process instead of the local one.
    pub scheduler_url: Option<String>,
    /// Normalized JSON event feeds (file paths or http(s) URLs).
    pub feeds: Vec<String>,
    /// Actions for calendar alarms; empty means all.
    pub default_actions: Vec<String>,
    /// Actions for emergency escalations; empty means all.
    pub emergency_actions: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 900,
            grace_secs: 60,
            failure_backoff_secs: 60,
            scheduler_url: None,
            feeds: Vec::new(),
            default_actions: Vec::new(),
            emergency_actions: Vec::new(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }

    #[must_use]
    pub fn grace(&self) -> chrono::TimeDelta {
        let secs = i64::try_from(self.grace_secs).unwrap_or(i64::MAX);
        chrono::TimeDelta::seconds(secs.min(86_400))
    }
}

/// `[actions]`: plugin discovery.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionsConfig {
    /// Plugin root; defaults to `<data_dir>/plugins`.
    pub plugins_dir: Option<PathBuf>,
}

impl ActionsConfig {
    #[must_use]
    pub fn plugins_path(&self) -> PathBuf {
        self.plugins_dir
            .clone()
            .unwrap_or_else(crate::paths::plugins_dir)
    }
}

/// `[logging]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Also write daily-rotated log files here.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "ulticlock=info".to_owned(),
            log_dir: None,
        }
    }
}

impl AlarmConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| AlarmError::Config(e.to_string()))
    }

    /// Load `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: &std::path::Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AlarmError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parsed display timezone.
    pub fn tz(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.tz()
            .map_err(|e| AlarmError::Config(format!("timezone: {e}")))?;
        if self.scheduler.tick_interval_ms == 0 || self.scheduler.tick_interval_ms > 1000 {
            return Err(AlarmError::Config(
                "scheduler.tick_interval_ms must be between 1 and 1000".to_owned(),
            ));
        }
        if self.scheduler.max_concurrent_dispatches == 0 {
            return Err(AlarmError::Config(
                "scheduler.max_concurrent_dispatches must be at least 1".to_owned(),
            ));
        }
        if self.sync.interval_secs == 0 {
            return Err(AlarmError::Config(
                "sync.interval_secs must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}
