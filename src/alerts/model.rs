//! Alert types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::monitors::MonitorKind;

/// Lifecycle status of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Breaching, but fewer consecutive breaches than required
    Pending,
    /// Fired; notification due
    Active,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(AlertStatus::Pending),
            "active" | "firing" => Ok(AlertStatus::Active),
            "resolved" | "ok" => Ok(AlertStatus::Resolved),
            other => Err(format!("unknown alert status: {}", other)),
        }
    }
}

/// What an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSource {
    /// The sampled metric crossed its threshold
    Threshold,
    /// The collector itself kept failing
    Collector,
}

impl AlertSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSource::Threshold => "threshold",
            AlertSource::Collector => "collector",
        }
    }
}

impl FromStr for AlertSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threshold" => Ok(AlertSource::Threshold),
            "collector" => Ok(AlertSource::Collector),
            other => Err(format!("unknown alert source: {}", other)),
        }
    }
}

/// Identity of an alert slot: at most one unresolved alert exists per key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub kind: MonitorKind,
    /// Disk path or ping host; `None` for host-wide metrics
    pub target: Option<String>,
    pub source: AlertSource,
}

impl AlertKey {
    pub fn threshold(kind: MonitorKind, target: Option<String>) -> Self {
        Self {
            kind,
            target,
            source: AlertSource::Threshold,
        }
    }

    pub fn collector(kind: MonitorKind, target: Option<String>) -> Self {
        Self {
            kind,
            target,
            source: AlertSource::Collector,
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(target) = &self.target {
            write!(f, "[{}]", target)?;
        }
        if self.source == AlertSource::Collector {
            f.write_str(" collector")?;
        }
        Ok(())
    }
}

/// In-memory alert owned by the tracker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: String,
    pub key: AlertKey,
    pub status: AlertStatus,
    pub first_breach_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Breaching samples seen without an intervening non-breach
    pub consecutive_breaches: u32,
    pub last_value: f64,
    pub threshold: f64,
    /// A notification went out for the current ACTIVE episode
    pub notified: bool,
    /// Time of the latest observation for this key
    pub last_seen_at: DateTime<Utc>,
}

impl Alert {
    /// First breach for a key
    pub fn pending(key: AlertKey, value: f64, threshold: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key,
            status: AlertStatus::Pending,
            first_breach_at: now,
            triggered_at: None,
            resolved_at: None,
            consecutive_breaches: 1,
            last_value: value,
            threshold,
            notified: false,
            last_seen_at: now,
        }
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = AlertStatus::Active;
        self.triggered_at = Some(now);
    }

    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(at);
    }
}

/// Why an ACTIVE alert was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveReason {
    /// A non-breaching sample was observed
    Recovered,
    /// No sample arrived within the auto-resolution window
    TimedOut,
}

impl ResolveReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveReason::Recovered => "recovered",
            ResolveReason::TimedOut => "timed_out",
        }
    }
}

impl FromStr for ResolveReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recovered" => Ok(ResolveReason::Recovered),
            "timed_out" => Ok(ResolveReason::TimedOut),
            other => Err(format!("unknown resolve reason: {}", other)),
        }
    }
}

/// State transition emitted by the tracker
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    Fired(Alert),
    Resolved { alert: Alert, reason: ResolveReason },
}

impl AlertEvent {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertEvent::Fired(alert) | AlertEvent::Resolved { alert, .. } => alert,
        }
    }

    pub fn key(&self) -> &AlertKey {
        &self.alert().key
    }

    pub fn is_fired(&self) -> bool {
        matches!(self, AlertEvent::Fired(_))
    }

    /// Time the transition took effect
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AlertEvent::Fired(alert) => alert.triggered_at.unwrap_or(alert.last_seen_at),
            AlertEvent::Resolved { alert, .. } => alert.resolved_at.unwrap_or(alert.last_seen_at),
        }
    }
}

/// Persisted history entry, written on every fire and resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub record_id: String,
    pub alert_id: String,
    pub hostname: String,
    pub monitor_kind: MonitorKind,
    pub sub_target: Option<String>,
    pub source: AlertSource,
    pub status: AlertStatus,
    pub first_breach_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub consecutive_breaches: u32,
    pub last_value: f64,
    pub threshold: f64,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolveReason>,
}

impl AlertRecord {
    pub fn from_event(event: &AlertEvent, hostname: &str) -> Self {
        let alert = event.alert();
        let resolution = match event {
            AlertEvent::Fired(_) => None,
            AlertEvent::Resolved { reason, .. } => Some(*reason),
        };

        Self {
            record_id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            hostname: hostname.to_string(),
            monitor_kind: alert.key.kind,
            sub_target: alert.key.target.clone(),
            source: alert.key.source,
            status: alert.status,
            first_breach_at: alert.first_breach_at,
            triggered_at: alert.triggered_at,
            resolved_at: alert.resolved_at,
            consecutive_breaches: alert.consecutive_breaches,
            last_value: alert.last_value,
            threshold: alert.threshold,
            recorded_at: event.occurred_at(),
            resolution,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey {
            kind: self.monitor_kind,
            target: self.sub_target.clone(),
            source: self.source,
        }
    }
}
