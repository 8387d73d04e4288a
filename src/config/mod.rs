//! Daemon configuration
//!
//! Configuration is read from YAML into raw structs and then validated into
//! the typed structures below. Validation gathers every problem and fails with
//! a single [`ConfigError::Invalid`], so a bad file is rejected before any
//! monitor starts.

pub mod loader;
pub mod monitor;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::monitors::MonitorKind;
use crate::notify::ChannelConfig;

pub use loader::{from_yaml_str, load, locate, CONFIG_ENV_VAR};
pub use monitor::{MonitorConfig, MonitorParams};

/// Fully validated daemon configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// One entry per monitor kind, enabled or not
    pub monitors: Vec<MonitorConfig>,
    pub storage: StorageConfig,
    pub notifications: Vec<ChannelConfig>,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    /// File this configuration was loaded from, if any
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub fn monitor(&self, kind: MonitorKind) -> Option<&MonitorConfig> {
        self.monitors.iter().find(|m| m.kind == kind)
    }

    pub fn enabled_monitors(&self) -> impl Iterator<Item = &MonitorConfig> {
        self.monitors.iter().filter(|m| m.enabled)
    }

    /// Channels that will actually receive notifications
    pub fn active_channels(&self) -> Vec<ChannelConfig> {
        self.notifications.iter().filter(|c| c.enabled).cloned().collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitors: MonitorKind::ALL.iter().map(|k| MonitorConfig::defaults(*k)).collect(),
            storage: StorageConfig::default(),
            notifications: Vec::new(),
            scheduler: SchedulerConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
            source: None,
        }
    }
}

/// Alert history backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub kind: StorageKind,
    pub path: PathBuf,
    pub pruning: PruningConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::File,
            path: PathBuf::from("data/alerts.json"),
            pruning: PruningConfig::default(),
        }
    }
}

/// Retention applied to persisted alert history
#[derive(Debug, Clone, PartialEq)]
pub struct PruningConfig {
    pub enabled: bool,
    pub max_age_days: u32,
    pub max_alerts: usize,
    pub interval: Duration,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_days: 30,
            max_alerts: 1000,
            interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// How often ACTIVE alerts are checked for the auto-resolution timeout
    pub sweep_interval: Duration,
    /// Upper bound on waiting for in-flight work during shutdown
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from(([127, 0, 0, 1], 9108)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Upper bound for every configured period, so timers can never overflow
pub const MAX_PERIOD: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// `secs` as a period in `1..=MAX_PERIOD`
pub(crate) fn period_secs(secs: i64) -> Option<Duration> {
    u64::try_from(secs)
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
        .filter(|d| *d <= MAX_PERIOD)
}

/// Serialize durations as whole seconds
pub(crate) mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }
}
