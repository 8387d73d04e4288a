//! YAML loading and validation

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::monitor::RawMonitor;
use super::{
    period_secs, AppConfig, ApiConfig, ConfigError, LogFormat, LoggingConfig, PruningConfig,
    SchedulerConfig, StorageConfig, StorageKind, MAX_PERIOD,
};
use crate::monitors::MonitorKind;
use crate::notify::channel::RawChannel;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "HOSTWATCH_CONFIG";

const SEARCH_PATHS: [&str; 3] = [
    "/etc/hostwatch/config.yaml",
    "~/.config/hostwatch/config.yaml",
    "./config.yaml",
];

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    monitors: RawMonitors,
    #[serde(default)]
    storage: RawStorage,
    #[serde(default)]
    notifications: Vec<RawChannel>,
    #[serde(default)]
    scheduler: RawScheduler,
    #[serde(default)]
    api: RawApi,
    #[serde(default)]
    logging: RawLogging,
}

#[derive(Debug, Default, Deserialize)]
struct RawMonitors {
    cpu: Option<RawMonitor>,
    memory: Option<RawMonitor>,
    disk: Option<RawMonitor>,
    ping: Option<RawMonitor>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStorage {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(alias = "file_path", alias = "dsn")]
    path: Option<PathBuf>,
    #[serde(default)]
    pruning: RawPruning,
}

#[derive(Debug, Default, Deserialize)]
struct RawPruning {
    enabled: Option<bool>,
    max_age_days: Option<i64>,
    max_alerts: Option<i64>,
    interval_hours: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawScheduler {
    sweep_interval: Option<i64>,
    shutdown_grace: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawApi {
    enabled: Option<bool>,
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLogging {
    level: Option<String>,
    format: Option<String>,
}

impl RawConfig {
    fn validate(self) -> Result<AppConfig, ConfigError> {
        let mut errors = Vec::new();

        let RawMonitors {
            cpu,
            memory,
            disk,
            ping,
        } = self.monitors;
        let monitors = [
            (MonitorKind::Cpu, cpu),
            (MonitorKind::Memory, memory),
            (MonitorKind::Disk, disk),
            (MonitorKind::Ping, ping),
        ]
        .into_iter()
        .map(|(kind, raw)| raw.unwrap_or_default().resolve(kind, &mut errors))
        .collect();

        let storage = self.storage.validate(&mut errors);

        let notifications = self
            .notifications
            .into_iter()
            .enumerate()
            .filter_map(|(i, raw)| match raw.into_channel(i) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    errors.push(e);
                    None
                }
            })
            .collect();

        let mut scheduler = SchedulerConfig::default();
        if let Some(secs) = self.scheduler.sweep_interval {
            match period_secs(secs) {
                Some(d) => scheduler.sweep_interval = d,
                None => errors.push(format!(
                    "scheduler.sweep_interval must be between 1 and {} seconds, got {}",
                    MAX_PERIOD.as_secs(),
                    secs
                )),
            }
        }
        if let Some(secs) = self.scheduler.shutdown_grace {
            match period_secs(secs) {
                Some(d) => scheduler.shutdown_grace = d,
                None => errors.push(format!(
                    "scheduler.shutdown_grace must be between 1 and {} seconds, got {}",
                    MAX_PERIOD.as_secs(),
                    secs
                )),
            }
        }

        let mut api = ApiConfig::default();
        if let Some(enabled) = self.api.enabled {
            api.enabled = enabled;
        }
        if let Some(bind) = self.api.bind {
            match bind.parse::<SocketAddr>() {
                Ok(addr) => api.bind = addr,
                Err(e) => errors.push(format!("api.bind `{}` is not a socket address: {}", bind, e)),
            }
        }

        let mut logging = LoggingConfig::default();
        if let Some(level) = self.logging.level {
            logging.level = level.to_ascii_lowercase();
        }
        if let Some(format) = self.logging.format {
            match format.to_ascii_lowercase().as_str() {
                "text" => logging.format = LogFormat::Text,
                "json" => logging.format = LogFormat::Json,
                other => errors.push(format!("logging.format must be text or json, got {}", other)),
            }
        }

        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }

        Ok(AppConfig {
            monitors,
            storage,
            notifications,
            scheduler,
            api,
            logging,
            source: None,
        })
    }
}

impl RawStorage {
    fn validate(self, errors: &mut Vec<String>) -> StorageConfig {
        let mut storage = StorageConfig::default();

        match self.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("file") => {}
            Some("sqlite") => {
                storage.kind = StorageKind::Sqlite;
                storage.path = PathBuf::from("data/alerts.db");
            }
            Some(other) => errors.push(format!("storage.type must be file or sqlite, got {}", other)),
        }

        if let Some(path) = self.path {
            if path.as_os_str().is_empty() {
                errors.push("storage.path must not be empty".to_string());
            } else {
                storage.path = expand_home(&path);
            }
        }

        let mut pruning = PruningConfig::default();
        let raw = self.pruning;
        if let Some(enabled) = raw.enabled {
            pruning.enabled = enabled;
        }
        if let Some(days) = raw.max_age_days {
            match positive(days).and_then(|d| u32::try_from(d).ok()) {
                Some(d) => pruning.max_age_days = d,
                None => errors.push(format!("storage.pruning.max_age_days must be positive, got {}", days)),
            }
        }
        if let Some(max) = raw.max_alerts {
            match positive(max) {
                Some(m) => pruning.max_alerts = m as usize,
                None => errors.push(format!("storage.pruning.max_alerts must be positive, got {}", max)),
            }
        }
        if let Some(hours) = raw.interval_hours {
            let period = hours
                .checked_mul(60 * 60)
                .and_then(period_secs);
            match period {
                Some(d) => pruning.interval = d,
                None => errors.push(format!(
                    "storage.pruning.interval_hours must be between 1 and {}, got {}",
                    MAX_PERIOD.as_secs() / (60 * 60),
                    hours
                )),
            }
        }
        storage.pruning = pruning;

        storage
    }
}

fn positive(value: i64) -> Option<u64> {
    (value > 0).then_some(value as u64)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Parse and validate a YAML document
pub fn from_yaml_str(yaml: &str) -> Result<AppConfig, ConfigError> {
    // An empty file means "all defaults"
    if yaml.trim().is_empty() {
        return RawConfig::default().validate();
    }
    let raw: RawConfig = serde_yaml::from_str(yaml)?;
    raw.validate()
}

/// Find the configuration file to use when none was given explicitly
pub fn locate() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    SEARCH_PATHS
        .iter()
        .map(|p| expand_home(Path::new(p)))
        .find(|p| p.is_file())
}

/// Load configuration from `path`, or from the first file found by [`locate`].
///
/// Falls back to built-in defaults when no file exists anywhere.
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match path.map(Path::to_path_buf).or_else(locate) {
        Some(path) => path,
        None => {
            tracing::warn!("No configuration file found, using built-in defaults");
            return Ok(AppConfig::default());
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;

    let mut config = from_yaml_str(&contents)?;
    tracing::debug!(path = %path.display(), "Configuration loaded");
    config.source = Some(path);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelKind;
    use std::time::Duration;

    const SAMPLE: &str = r#"
monitors:
  cpu:
    threshold: 75
    interval: 30
    alert_count: 2
  memory:
    enabled: false
  disk:
    paths: ["/", "/data"]
  ping:
    targets: ["10.0.0.1"]
    timeout: 2
storage:
  type: sqlite
  path: /tmp/hostwatch/alerts.db
  pruning:
    enabled: true
    max_age_days: 7
    max_alerts: 500
notifications:
  - type: console
  - type: slack
    webhook_url: https://hooks.slack.test/abc
  - type: matrix
    uri: https://matrix.test/hook
    enabled: false
api:
  enabled: true
  bind: 0.0.0.0:9200
logging:
  level: debug
  format: json
"#;

    #[test]
    fn test_parse_full_document() {
        let config = from_yaml_str(SAMPLE).unwrap();

        let cpu = config.monitor(MonitorKind::Cpu).unwrap();
        assert_eq!(cpu.threshold, 75.0);
        assert_eq!(cpu.interval, Duration::from_secs(30));
        assert_eq!(cpu.alert_count, 2);

        assert!(!config.monitor(MonitorKind::Memory).unwrap().enabled);
        assert_eq!(config.monitor(MonitorKind::Disk).unwrap().targets().len(), 2);
        assert_eq!(config.enabled_monitors().count(), 3);

        assert_eq!(config.storage.kind, StorageKind::Sqlite);
        assert!(config.storage.pruning.enabled);
        assert_eq!(config.storage.pruning.max_alerts, 500);

        assert_eq!(config.notifications.len(), 3);
        assert_eq!(config.active_channels().len(), 2);
        assert!(matches!(
            config.notifications[2].kind,
            ChannelKind::Passthrough { .. }
        ));

        assert!(config.api.enabled);
        assert_eq!(config.api.bind.port(), 9200);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = from_yaml_str("").unwrap();
        assert_eq!(config.monitors.len(), 4);
        assert_eq!(config.storage.kind, StorageKind::File);
        assert!(!config.api.enabled);
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        let yaml = r#"
monitors:
  cpu:
    threshold: 0
    interval: -5
  ping:
    alert_count: 0
storage:
  type: postgres
notifications:
  - type: telegram
    token: abc
"#;
        match from_yaml_str(yaml) {
            Err(ConfigError::Invalid(errors)) => {
                assert_eq!(errors.len(), 5, "{:?}", errors);
                assert!(errors.iter().any(|e| e.contains("alert_count")));
                assert!(errors.iter().any(|e| e.contains("chat_id")));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_periods_are_invalid() {
        let yaml = r#"
monitors:
  cpu:
    interval: 9223372036854775807
storage:
  pruning:
    interval_hours: 9223372036854775807
scheduler:
  sweep_interval: 9223372036854775807
"#;
        match from_yaml_str(yaml) {
            Err(ConfigError::Invalid(errors)) => {
                assert_eq!(errors.len(), 3, "{:?}", errors);
                assert!(errors.iter().any(|e| e.contains("monitors.cpu.interval")));
                assert!(errors.iter().any(|e| e.contains("interval_hours")));
                assert!(errors.iter().any(|e| e.contains("sweep_interval")));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_pruning_interval_in_hours() {
        let config = from_yaml_str("storage:
  pruning:
    interval_hours: 6
").unwrap();
        assert_eq!(config.storage.pruning.interval, Duration::from_secs(6 * 60 * 60));
    }

    #[test]
    fn test_malformed_yaml() {
        let result = from_yaml_str("monitors: [unclosed");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "monitors:\n  cpu:\n    threshold: 95\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.monitor(MonitorKind::Cpu).unwrap().threshold, 95.0);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load(Some(Path::new("/nonexistent/hostwatch.yaml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
