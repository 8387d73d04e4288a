//! Metric sources
//!
//! Each monitor kind is sampled through the [`MetricSource`] trait. The
//! production implementation is [`SystemSource`]; tests substitute fakes.

pub mod ping;
pub mod system;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::evaluator;
use crate::config::MonitorConfig;

pub use ping::parse_ping_latency;
pub use system::SystemSource;

/// Kind of host metric a monitor samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    Cpu,
    Memory,
    Disk,
    Ping,
}

impl MonitorKind {
    pub const ALL: [MonitorKind; 4] = [
        MonitorKind::Cpu,
        MonitorKind::Memory,
        MonitorKind::Disk,
        MonitorKind::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Cpu => "cpu",
            MonitorKind::Memory => "memory",
            MonitorKind::Disk => "disk",
            MonitorKind::Ping => "ping",
        }
    }

    /// Unit of the sampled value, used when rendering messages
    pub fn unit(&self) -> &'static str {
        match self {
            MonitorKind::Cpu | MonitorKind::Memory | MonitorKind::Disk => "%",
            MonitorKind::Ping => "ms",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(MonitorKind::Cpu),
            "memory" => Ok(MonitorKind::Memory),
            "disk" => Ok(MonitorKind::Disk),
            "ping" => Ok(MonitorKind::Ping),
            other => Err(format!("unknown monitor kind: {}", other)),
        }
    }
}

/// A single point-in-time measurement
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub kind: MonitorKind,
    /// Sub-target label (disk path, ping host); `None` for host-wide metrics
    pub target: Option<String>,
    pub taken_at: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(kind: MonitorKind, target: Option<String>, value: f64, taken_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            target,
            taken_at,
            value,
        }
    }
}

/// Produces metric values for a monitor's sub-targets
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Sample one sub-target of a monitor.
    ///
    /// Implementations must not panic; every failure is reported as a
    /// [`CollectionError`].
    async fn sample(
        &self,
        monitor: &MonitorConfig,
        target: Option<&str>,
    ) -> Result<f64, CollectionError>;
}

/// Metric collection errors
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("{kind} collector unavailable: {message}")]
    Unavailable { kind: MonitorKind, message: String },

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("ping to {host} failed: {message}")]
    Ping { host: String, message: String },

    #[error("collector timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// One on-demand reading of a monitor target
#[derive(Debug)]
pub struct Reading {
    pub kind: MonitorKind,
    pub target: Option<String>,
    pub threshold: f64,
    pub value: Result<f64, CollectionError>,
}

impl Reading {
    pub fn breached(&self) -> bool {
        matches!(self.value, Ok(v) if evaluator::breached(v, self.threshold, self.kind))
    }

    pub fn describe(&self) -> String {
        match &self.value {
            Ok(v) => evaluator::describe(*v, self.threshold, self.kind),
            Err(e) => format!("{} unavailable: {}", self.kind, e),
        }
    }
}

/// Sample every target of every enabled monitor once, without touching alert state
pub async fn read_all(source: &dyn MetricSource, monitors: &[MonitorConfig]) -> Vec<Reading> {
    let mut readings = Vec::new();
    for monitor in monitors.iter().filter(|m| m.enabled) {
        for target in monitor.targets() {
            let value = source.sample(monitor, target.as_deref()).await;
            readings.push(Reading {
                kind: monitor.kind,
                target,
                threshold: monitor.threshold,
                value,
            });
        }
    }
    readings
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource;

    #[async_trait]
    impl MetricSource for FixedSource {
        async fn sample(&self, monitor: &MonitorConfig, target: Option<&str>) -> Result<f64, CollectionError> {
            match (monitor.kind, target) {
                (MonitorKind::Cpu, _) => Ok(95.0),
                (MonitorKind::Ping, Some("down.test")) => Err(CollectionError::Ping {
                    host: "down.test".to_string(),
                    message: "100% packet loss".to_string(),
                }),
                _ => Ok(10.0),
            }
        }
    }

    #[tokio::test]
    async fn test_read_all_covers_enabled_targets() {
        let mut monitors: Vec<MonitorConfig> = MonitorKind::ALL.iter().map(|k| MonitorConfig::defaults(*k)).collect();
        monitors[1].enabled = false;
        if let crate::config::MonitorParams::Ping { targets, .. } = &mut monitors[3].params {
            *targets = vec!["up.test".to_string(), "down.test".to_string()];
        }

        let readings = read_all(&FixedSource, &monitors).await;

        let labels: Vec<(MonitorKind, Option<&str>)> =
            readings.iter().map(|r| (r.kind, r.target.as_deref())).collect();
        assert_eq!(
            labels,
            vec![
                (MonitorKind::Cpu, None),
                (MonitorKind::Disk, Some("/")),
                (MonitorKind::Ping, Some("up.test")),
                (MonitorKind::Ping, Some("down.test")),
            ]
        );

        assert!(readings[0].breached());
        assert_eq!(readings[0].describe(), "cpu = 95.00% > threshold 80.00%");
        assert!(!readings[2].breached());
        assert!(!readings[3].breached());
        assert!(readings[3].describe().contains("packet loss"));
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in MonitorKind::ALL {
            assert_eq!(kind.as_str().parse::<MonitorKind>().unwrap(), kind);
        }
        assert!("gpu".parse::<MonitorKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        let json = serde_json::to_string(&MonitorKind::Memory).unwrap();
        assert_eq!(json, "\"memory\"");
    }
}
