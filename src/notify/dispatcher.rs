//! HTTP and console delivery

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;

use super::{ChannelConfig, ChannelKind, ChannelOutcome, DispatchError, DispatchReport, Dispatcher, Notification};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const TELEGRAM_API: &str = "https://api.telegram.org";
/// Discord rejects longer message content
const DISCORD_MAX_CHARS: usize = 2000;

/// Delivers notifications over webhooks, or to the log for `console`
pub struct HttpDispatcher {
    client: reqwest::Client,
    timeout: Duration,
    telegram_api: String,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hostwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            client,
            timeout,
            telegram_api: TELEGRAM_API.to_string(),
        }
    }

    /// Point Telegram delivery at another API root
    pub fn with_telegram_api(mut self, base: impl Into<String>) -> Self {
        self.telegram_api = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn send_one(&self, notification: &Notification, channel: &ChannelConfig) -> Result<(), DispatchError> {
        match &channel.kind {
            ChannelKind::Console => {
                if notification.firing {
                    tracing::warn!(alert_id = %notification.alert_id, "{}\n{}", notification.title, notification.body);
                } else {
                    tracing::info!(alert_id = %notification.alert_id, "{}\n{}", notification.title, notification.body);
                }
                Ok(())
            }
            ChannelKind::Discord { webhook_url } => {
                let content: String = notification.text().chars().take(DISCORD_MAX_CHARS).collect();
                self.post(webhook_url, &json!({ "content": content }), None).await
            }
            ChannelKind::Slack { webhook_url } => {
                self.post(webhook_url, &json!({ "text": notification.text() }), None)
                    .await
            }
            ChannelKind::Telegram { token, chat_id } => {
                let url = format!("{}/bot{}/sendMessage", self.telegram_api, token);
                let payload = json!({ "chat_id": chat_id, "text": notification.text() });
                self.post(&url, &payload, None).await
            }
            ChannelKind::Webhook { url, headers } => {
                let payload = serde_json::to_value(notification)?;
                self.post(url, &payload, Some(headers)).await
            }
            ChannelKind::Passthrough { kind, uri } => {
                if !(uri.starts_with("http://") || uri.starts_with("https://")) {
                    return Err(DispatchError::UnsupportedUri {
                        kind: kind.clone(),
                        uri: uri.clone(),
                    });
                }
                let payload = json!({
                    "type": kind,
                    "title": notification.title,
                    "body": notification.body,
                });
                self.post(uri, &payload, None).await
            }
        }
    }

    async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
        headers: Option<&std::collections::BTreeMap<String, String>>,
    ) -> Result<(), DispatchError> {
        let mut request = self.client.post(url).json(payload);
        for (key, value) in headers.into_iter().flatten() {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DispatchError::Timeout(self.timeout)
            } else {
                DispatchError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(DispatchError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn send(&self, notification: &Notification, channels: &[ChannelConfig]) -> DispatchReport {
        let enabled: Vec<&ChannelConfig> = channels.iter().filter(|c| c.enabled).collect();
        if enabled.is_empty() {
            tracing::debug!(title = %notification.title, "No notification channels enabled");
        }

        let results = join_all(enabled.iter().map(|c| self.send_one(notification, c))).await;

        let outcomes = enabled
            .into_iter()
            .zip(results)
            .map(|(channel, result)| {
                match &result {
                    Ok(()) => tracing::debug!(
                        channel = %channel,
                        kind = channel.kind.type_name(),
                        "Notification delivered"
                    ),
                    Err(e) => tracing::warn!(
                        channel = %channel,
                        kind = channel.kind.type_name(),
                        error = %e,
                        "Notification delivery failed"
                    ),
                }
                ChannelOutcome {
                    channel: channel.name.clone(),
                    result,
                }
            })
            .collect();

        DispatchReport { outcomes }
    }
}
