//! ---
//! upswatch_section: "03-notifications"
//! upswatch_subsection: "module"
//! upswatch_type: "source"
//! upswatch_scope: "code"
//! upswatch_description: "Notification queue, worker, and sink dispatch."
//! upswatch_version: "v0.1.0"
//! upswatch_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::{Message, Result};

/// Delivery seam between the worker and the outside world.
///
/// Returns `true` only when every sink acknowledged the message; any
/// failing or timed-out sink makes the whole attempt retryable.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn send(&self, message: &Message, urls: &[String], timeout: Duration) -> bool;
}

/// HTTP webhook dispatcher. Discord webhook URLs receive an embed payload;
/// anything else receives a generic JSON POST.
pub struct WebhookDispatcher {
    client: reqwest::Client,
    ups_name: String,
    avatar_url: Option<String>,
}

impl WebhookDispatcher {
    pub fn new(ups_name: impl Into<String>, avatar_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("upswatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            ups_name: ups_name.into(),
            avatar_url,
        })
    }

    fn discord_payload(&self, message: &Message) -> serde_json::Value {
        let mut payload = json!({
            "embeds": [{
                "title": message.title.clone().unwrap_or_else(|| "UPS Monitor Alert".to_owned()),
                "description": message.body,
                "color": message.severity.embed_color(),
                "footer": { "text": format!("UPS: {}", self.ups_name) },
                "timestamp": message.enqueued_at.to_rfc3339(),
            }]
        });
        if let Some(avatar) = &self.avatar_url {
            payload["avatar_url"] = json!(avatar);
        }
        payload
    }

    fn generic_payload(&self, message: &Message) -> serde_json::Value {
        json!({
            "title": message.title,
            "body": message.body,
            "severity": message.severity.as_str(),
            "ups": self.ups_name,
            "timestamp": message.enqueued_at.to_rfc3339(),
        })
    }

    async fn post(&self, url: &str, payload: &serde_json::Value, timeout: Duration) -> bool {
        let outcome = self
            .client
            .post(url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await;
        match outcome {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "notification sink rejected message");
                false
            }
            Err(err) => {
                debug!(error = %err, "notification sink unreachable");
                false
            }
        }
    }
}

fn is_discord(url: &str) -> bool {
    url.contains("discord.com/api/webhooks") || url.contains("discordapp.com/api/webhooks")
}

#[async_trait]
impl Dispatch for WebhookDispatcher {
    async fn send(&self, message: &Message, urls: &[String], timeout: Duration) -> bool {
        let mut all_ok = true;
        for url in urls {
            let payload = if is_discord(url) {
                self.discord_payload(message)
            } else {
                self.generic_payload(message)
            };
            if !self.post(url, &payload, timeout).await {
                all_ok = false;
            }
        }
        all_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use chrono::Utc;

    fn sample_message() -> Message {
        Message {
            sequence: 7,
            title: None,
            body: "power failure".to_owned(),
            severity: Severity::Warning,
            enqueued_at: Utc::now(),
        }
    }

    #[test]
    fn discord_urls_are_recognised() {
        assert!(is_discord("https://discord.com/api/webhooks/1/abc"));
        assert!(is_discord("https://discordapp.com/api/webhooks/1/abc"));
        assert!(!is_discord("https://hooks.example.com/notify"));
    }

    #[test]
    fn discord_payload_carries_severity_color() {
        let dispatcher = WebhookDispatcher::new("UPS@localhost", None).unwrap();
        let payload = dispatcher.discord_payload(&sample_message());
        assert_eq!(payload["embeds"][0]["color"], Severity::Warning.embed_color());
        assert_eq!(payload["embeds"][0]["title"], "UPS Monitor Alert");
        assert_eq!(payload["embeds"][0]["footer"]["text"], "UPS: UPS@localhost");
        assert!(payload.get("avatar_url").is_none());
    }

    #[test]
    fn generic_payload_is_flat_json() {
        let dispatcher = WebhookDispatcher::new("UPS@localhost", None).unwrap();
        let payload = dispatcher.generic_payload(&sample_message());
        assert_eq!(payload["severity"], "warning");
        assert_eq!(payload["body"], "power failure");
    }
}
