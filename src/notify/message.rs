//! Notification text

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::alerts::{evaluator, AlertEvent, AlertSource, ResolveReason};

/// Rendered notification, independent of the channel it goes to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub alert_id: String,
    pub firing: bool,
    pub hostname: String,
}

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl Notification {
    pub fn from_event(event: &AlertEvent, hostname: &str) -> Self {
        let alert = event.alert();
        let kind = alert.key.kind;
        let collector = alert.key.source == AlertSource::Collector;

        let mut lines = Vec::new();
        let title = match event {
            AlertEvent::Fired(_) => {
                if collector {
                    lines.push(format!(
                        "{} collection failed {} consecutive times",
                        kind, alert.consecutive_breaches
                    ));
                    lines.push(format!("Failing since: {}", stamp(alert.first_breach_at)));
                } else {
                    lines.push(evaluator::describe(alert.last_value, alert.threshold, kind));
                    lines.push(format!("Consecutive breaches: {}", alert.consecutive_breaches));
                    lines.push(format!("First breach: {}", stamp(alert.first_breach_at)));
                }
                if let Some(at) = alert.triggered_at {
                    lines.push(format!("Triggered: {}", stamp(at)));
                }
                format!("[FIRING] {} on {}", alert.key, hostname)
            }
            AlertEvent::Resolved { reason, .. } => {
                if collector {
                    lines.push(format!("{} collection working again", kind));
                } else {
                    lines.push(evaluator::describe(alert.last_value, alert.threshold, kind));
                }
                if let Some(at) = alert.triggered_at {
                    lines.push(format!("Triggered: {}", stamp(at)));
                }
                if let Some(at) = alert.resolved_at {
                    lines.push(format!("Resolved: {}", stamp(at)));
                }
                lines.push(match reason {
                    ResolveReason::Recovered => "Reason: recovered".to_string(),
                    ResolveReason::TimedOut => {
                        "Reason: no samples within the resolution window".to_string()
                    }
                });
                format!("[RESOLVED] {} on {}", alert.key, hostname)
            }
        };
        lines.push(format!("Alert ID: {}", alert.id));

        Self {
            title,
            body: lines.join("\n"),
            alert_id: alert.id.clone(),
            firing: event.is_fired(),
            hostname: hostname.to_string(),
        }
    }

    /// Title and body as one block for single-field payloads
    pub fn text(&self) -> String {
        format!("{}\n{}", self.title, self.body)
    }
}
