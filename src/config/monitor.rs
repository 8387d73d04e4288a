//! Per-monitor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{duration_secs, period_secs, MAX_PERIOD};
use crate::monitors::MonitorKind;

const DEFAULT_PING_TARGETS: [&str; 3] = ["8.8.8.8", "1.1.1.1", "google.com"];
const DEFAULT_PING_TIMEOUT_SECS: u64 = 5;

/// Auto-resolution window, in multiples of the sampling interval
pub const DEFAULT_RESOLVE_INTERVALS: u32 = 5;

/// Validated settings for one monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorConfig {
    pub kind: MonitorKind,
    pub enabled: bool,
    /// Sampling interval
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Breach when the sampled value is strictly above this
    pub threshold: f64,
    /// Consecutive breaches required before an alert fires
    pub alert_count: u32,
    /// ACTIVE alerts with no sample for this long are auto-resolved
    #[serde(with = "duration_secs")]
    pub resolve_after: Duration,
    pub params: MonitorParams,
}

/// Kind-specific monitor parameters
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MonitorParams {
    None,
    Disk {
        paths: Vec<String>,
    },
    Ping {
        targets: Vec<String>,
        #[serde(with = "duration_secs")]
        timeout: Duration,
    },
}

impl MonitorConfig {
    /// Built-in defaults for a monitor kind
    pub fn defaults(kind: MonitorKind) -> Self {
        let (threshold, interval_secs, alert_count) = match kind {
            MonitorKind::Cpu => (80.0, 60, 3),
            MonitorKind::Memory => (90.0, 60, 3),
            MonitorKind::Disk => (85.0, 300, 2),
            MonitorKind::Ping => (200.0, 60, 5),
        };

        let params = match kind {
            MonitorKind::Cpu | MonitorKind::Memory => MonitorParams::None,
            MonitorKind::Disk => MonitorParams::Disk {
                paths: vec!["/".to_string()],
            },
            MonitorKind::Ping => MonitorParams::Ping {
                targets: DEFAULT_PING_TARGETS.iter().map(|s| s.to_string()).collect(),
                timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS),
            },
        };

        let interval = Duration::from_secs(interval_secs);
        Self {
            kind,
            enabled: true,
            interval,
            threshold,
            alert_count,
            resolve_after: interval * DEFAULT_RESOLVE_INTERVALS,
            params,
        }
    }

    /// Sub-targets sampled on every tick, in configuration order
    pub fn targets(&self) -> Vec<Option<String>> {
        match &self.params {
            MonitorParams::None => vec![None],
            MonitorParams::Disk { paths } => paths.iter().cloned().map(Some).collect(),
            MonitorParams::Ping { targets, .. } => targets.iter().cloned().map(Some).collect(),
        }
    }

    /// Whether the debounce-relevant settings differ from `other`
    pub fn detection_changed(&self, other: &MonitorConfig) -> bool {
        self.interval != other.interval
            || self.threshold != other.threshold
            || self.alert_count != other.alert_count
            || self.resolve_after != other.resolve_after
            || self.enabled != other.enabled
    }
}

/// Monitor settings as written in the YAML file
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawMonitor {
    pub enabled: Option<bool>,
    pub interval: Option<i64>,
    pub threshold: Option<f64>,
    pub alert_count: Option<i64>,
    pub resolve_after: Option<i64>,
    pub path: Option<String>,
    pub paths: Option<Vec<String>>,
    pub targets: Option<Vec<String>>,
    pub timeout: Option<i64>,
}

impl RawMonitor {
    /// Merge over the kind's defaults, pushing every problem into `errors`
    pub fn resolve(self, kind: MonitorKind, errors: &mut Vec<String>) -> MonitorConfig {
        let mut config = MonitorConfig::defaults(kind);

        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }

        if let Some(threshold) = self.threshold {
            if threshold.is_finite() && threshold > 0.0 {
                config.threshold = threshold;
            } else {
                errors.push(format!("monitors.{}.threshold must be a positive number, got {}", kind, threshold));
            }
        }

        if let Some(interval) = self.interval {
            match period_secs(interval) {
                Some(d) => {
                    config.interval = d;
                    config.resolve_after = d.checked_mul(DEFAULT_RESOLVE_INTERVALS).unwrap_or(Duration::MAX);
                }
                None => errors.push(out_of_range(kind, "interval", interval)),
            }
        }

        if let Some(count) = self.alert_count {
            if count >= 1 && count <= u32::MAX as i64 {
                config.alert_count = count as u32;
            } else {
                errors.push(format!("monitors.{}.alert_count must be at least 1, got {}", kind, count));
            }
        }

        if let Some(window) = self.resolve_after {
            match period_secs(window) {
                Some(d) => config.resolve_after = d,
                None => errors.push(out_of_range(kind, "resolve_after", window)),
            }
        }

        match &mut config.params {
            MonitorParams::None => {}
            MonitorParams::Disk { paths } => {
                let mut configured: Vec<String> = self.paths.unwrap_or_default();
                if let Some(path) = self.path {
                    configured.insert(0, path);
                }
                if !configured.is_empty() {
                    configured.dedup();
                    *paths = configured;
                }
                if paths.iter().any(|p| p.trim().is_empty()) {
                    errors.push(format!("monitors.{}.paths must not contain empty entries", kind));
                }
            }
            MonitorParams::Ping { targets, timeout } => {
                if let Some(configured) = self.targets {
                    if configured.is_empty() && config.enabled {
                        errors.push(format!("monitors.{}.targets must not be empty", kind));
                    }
                    *targets = configured;
                }
                if targets.iter().any(|t| t.trim().is_empty()) {
                    errors.push(format!("monitors.{}.targets must not contain empty entries", kind));
                }
                if let Some(secs) = self.timeout {
                    match period_secs(secs) {
                        Some(d) => *timeout = d,
                        None => errors.push(out_of_range(kind, "timeout", secs)),
                    }
                }
            }
        }

        config
    }
}

fn out_of_range(kind: MonitorKind, field: &str, secs: i64) -> String {
    format!(
        "monitors.{}.{} must be between 1 and {} seconds, got {}",
        kind,
        field,
        MAX_PERIOD.as_secs(),
        secs
    )
}
