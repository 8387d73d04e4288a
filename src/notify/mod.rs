//! Notification fan-out
//!
//! A [`Dispatcher`] delivers one [`Notification`] to every enabled channel and
//! reports the outcome per channel. Failures never affect alert state.

pub mod channel;
pub mod dispatcher;
pub mod message;

pub use channel::{ChannelConfig, ChannelKind};
pub use dispatcher::HttpDispatcher;
pub use message::Notification;

use async_trait::async_trait;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, notification: &Notification, channels: &[ChannelConfig]) -> DispatchReport;
}

/// Delivery result for one channel
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: String,
    pub result: Result<(), DispatchError>,
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    pub fn any_succeeded(&self) -> bool {
        self.outcomes.iter().any(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &DispatchError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.channel.as_str(), e)))
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("Unsupported URI for channel type {kind}: {uri}")]
    UnsupportedUri { kind: String, uri: String },

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_summary() {
        let report = DispatchReport {
            outcomes: vec![
                ChannelOutcome {
                    channel: "console".to_string(),
                    result: Ok(()),
                },
                ChannelOutcome {
                    channel: "slack".to_string(),
                    result: Err(DispatchError::Status(500)),
                },
            ],
        };

        assert!(report.any_succeeded());
        let failures: Vec<_> = report.failures().map(|(name, _)| name).collect();
        assert_eq!(failures, vec!["slack"]);
        assert!(!DispatchReport::default().any_succeeded());
    }
}
