//! Notification channel configuration

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

/// A configured notification channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Label used in logs and dispatch reports
    pub name: String,
    pub enabled: bool,
    pub kind: ChannelKind,
}

/// Closed set of known channel types plus a passthrough for anything else
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelKind {
    /// Write to the daemon log
    Console,
    Discord {
        webhook_url: String,
    },
    Slack {
        webhook_url: String,
    },
    Telegram {
        token: String,
        chat_id: String,
    },
    /// Generic JSON webhook
    Webhook {
        url: String,
        headers: BTreeMap<String, String>,
    },
    /// Unrecognized channel type forwarded to a URI as-is
    Passthrough {
        kind: String,
        uri: String,
    },
}

impl ChannelKind {
    pub fn type_name(&self) -> &str {
        match self {
            ChannelKind::Console => "console",
            ChannelKind::Discord { .. } => "discord",
            ChannelKind::Slack { .. } => "slack",
            ChannelKind::Telegram { .. } => "telegram",
            ChannelKind::Webhook { .. } => "webhook",
            ChannelKind::Passthrough { kind, .. } => kind,
        }
    }
}

impl fmt::Display for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl ChannelConfig {
    pub fn console() -> Self {
        Self {
            name: "console".to_string(),
            enabled: true,
            kind: ChannelKind::Console,
        }
    }
}

/// Channel entry as written in the YAML file
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawChannel {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

fn default_enabled() -> bool {
    true
}

impl RawChannel {
    fn string_option(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| match self.options.get(*key) {
            Some(serde_yaml::Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    fn require(&self, label: &str, keys: &[&str]) -> Result<String, String> {
        self.string_option(keys)
            .ok_or_else(|| format!("{} channel requires `{}`", label, keys[0]))
    }

    /// Validate into a typed channel; errors are reported at load time
    pub fn into_channel(self, index: usize) -> Result<ChannelConfig, String> {
        let type_name = self
            .kind
            .clone()
            .map(|k| k.trim().to_ascii_lowercase())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| format!("notifications[{}] is missing `type`", index))?;

        let kind = match type_name.as_str() {
            "console" => ChannelKind::Console,
            "discord" => ChannelKind::Discord {
                webhook_url: self.require("discord", &["webhook_url", "uri", "url"])?,
            },
            "slack" => ChannelKind::Slack {
                webhook_url: self.require("slack", &["webhook_url", "uri", "url"])?,
            },
            "telegram" => ChannelKind::Telegram {
                token: self.require("telegram", &["token"])?,
                chat_id: self.require("telegram", &["chat_id"])?,
            },
            "webhook" => {
                let headers = match self.options.get("headers") {
                    Some(value) => serde_yaml::from_value(value.clone())
                        .map_err(|e| format!("webhook headers: {}", e))?,
                    None => BTreeMap::new(),
                };
                ChannelKind::Webhook {
                    url: self.require("webhook", &["url", "uri"])?,
                    headers,
                }
            }
            other => ChannelKind::Passthrough {
                kind: other.to_string(),
                uri: self.require(other, &["uri", "url"])?,
            },
        };

        Ok(ChannelConfig {
            name: self.name.unwrap_or(type_name),
            enabled: self.enabled,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<ChannelConfig, String> {
        let raw: RawChannel = serde_yaml::from_str(yaml).unwrap();
        raw.into_channel(0)
    }

    #[test]
    fn test_parse_known_channels() {
        let channel = parse("type: telegram\ntoken: abc\nchat_id: 12345").unwrap();
        assert_eq!(
            channel.kind,
            ChannelKind::Telegram {
                token: "abc".to_string(),
                chat_id: "12345".to_string()
            }
        );
        assert!(channel.enabled);

        let channel = parse("type: Discord\nwebhook_url: https://discord.test/hook\nenabled: false").unwrap();
        assert_eq!(channel.name, "discord");
        assert!(!channel.enabled);
    }

    #[test]
    fn test_unknown_type_becomes_passthrough() {
        let channel = parse("type: pushover\nuri: https://push.test/x").unwrap();
        assert_eq!(channel.kind.type_name(), "pushover");
        assert!(matches!(channel.kind, ChannelKind::Passthrough { .. }));
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(parse("type: telegram\ntoken: abc").is_err());
        assert!(parse("type: pushover").is_err());
        assert!(parse("enabled: true").is_err());
    }

    #[test]
    fn test_webhook_headers() {
        let channel = parse("type: webhook\nurl: http://hook.test\nheaders:\n  X-Token: secret").unwrap();
        match channel.kind {
            ChannelKind::Webhook { headers, .. } => {
                assert_eq!(headers.get("X-Token").map(String::as_str), Some("secret"));
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }
}
