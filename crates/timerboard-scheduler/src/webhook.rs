//! Webhook transport: the only network-facing call.

use async_trait::async_trait;
use serde_json::{Value, json};
use timerboard_core::error::{Result, TimerboardError};
use timerboard_core::types::{Embed, OutboundMessage, Webhook};

/// Sends one message to one webhook URL. All-or-nothing per message.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, url: &str, message: &OutboundMessage) -> Result<()>;
}

/// Discord webhook over HTTPS.
pub struct DiscordTransport {
    client: reqwest::Client,
    timeout: std::time::Duration,
}

impl DiscordTransport {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: std::time::Duration::from_secs(timeout_secs),
        }
    }
}

impl Default for DiscordTransport {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Discord's JSON shape for a message.
pub fn discord_payload(message: &OutboundMessage) -> Value {
    let mut body = json!({});
    if let Some(content) = &message.content {
        body["content"] = json!(content);
    }
    if !message.embeds.is_empty() {
        body["embeds"] = Value::Array(message.embeds.iter().map(discord_embed).collect());
    }
    if let Some(username) = &message.username {
        body["username"] = json!(username);
    }
    if let Some(avatar_url) = &message.avatar_url {
        body["avatar_url"] = json!(avatar_url);
    }
    body
}

fn discord_embed(embed: &Embed) -> Value {
    let mut value = json!({});
    if let Some(title) = &embed.title {
        value["title"] = json!(title);
    }
    if let Some(description) = &embed.description {
        value["description"] = json!(description);
    }
    if let Some(url) = &embed.thumbnail_url {
        value["thumbnail"] = json!({ "url": url });
    }
    if let Some(color) = embed.color {
        value["color"] = json!(color);
    }
    value
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn send(&self, url: &str, message: &OutboundMessage) -> Result<()> {
        let resp = self
            .client
            .post(url)
            .json(&discord_payload(message))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| TimerboardError::DeliveryFailure(format!("Discord send failed: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(TimerboardError::DeliveryFailure(format!(
                "Discord webhook error {status}: {body}"
            )))
        }
    }
}

/// Outcome of an operator-triggered test message.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TestReport {
    pub success: bool,
    /// `"(no info)"` on success, else the transport's error text.
    pub error_text: String,
}

/// Send a test message straight to `webhook`, bypassing its queue.
pub async fn send_test_message(
    transport: &dyn Transport,
    webhook: &Webhook,
    username: Option<&str>,
) -> TestReport {
    let message = OutboundMessage {
        content: Some(format!(
            "Test message from Timerboard for webhook **{}**",
            webhook.name
        )),
        username: username.map(str::to_string),
        ..Default::default()
    };
    match transport.send(&webhook.url, &message).await {
        Ok(()) => {
            tracing::info!("✅ Test message sent to webhook {}", webhook.name);
            TestReport { success: true, error_text: "(no info)".into() }
        }
        Err(e) => {
            tracing::warn!("⚠️ Test message to webhook {} failed: {e}", webhook.name);
            TestReport { success: false, error_text: e.to_string() }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every message; fails while `fail` is set.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(String, OutboundMessage)>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            let t = Self::default();
            t.fail.store(true, std::sync::atomic::Ordering::SeqCst);
            t
        }

        pub fn contents(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, m)| m.content.clone().unwrap_or_default())
                .collect()
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, url: &str, message: &OutboundMessage) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TimerboardError::DeliveryFailure("HTTP 500: boom".into()));
            }
            self.sent.lock().unwrap().push((url.to_string(), message.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingTransport;
    use super::*;

    #[test]
    fn test_discord_payload_shape() {
        let message = OutboundMessage {
            content: Some("@here hello".into()),
            embeds: vec![Embed {
                title: Some("Armor in Jita".into()),
                thumbnail_url: Some("https://images.evetech.net/types/35832/icon?size=128".into()),
                color: Some(0x375a7f),
                ..Default::default()
            }],
            username: Some("Structure Timers".into()),
            avatar_url: None,
        };
        let body = discord_payload(&message);
        assert_eq!(body["content"], "@here hello");
        assert_eq!(body["embeds"][0]["title"], "Armor in Jita");
        assert_eq!(
            body["embeds"][0]["thumbnail"]["url"],
            "https://images.evetech.net/types/35832/icon?size=128"
        );
        assert_eq!(body["embeds"][0]["color"], 0x375a7f);
        assert!(body.get("avatar_url").is_none());
    }

    #[tokio::test]
    async fn test_send_test_message_success() {
        let transport = RecordingTransport::default();
        let webhook = Webhook::new("ops", "https://discord.example/api/webhooks/1");
        let report = send_test_message(&transport, &webhook, None).await;
        assert_eq!(report, TestReport { success: true, error_text: "(no info)".into() });
        assert_eq!(transport.count(), 1);
    }

    #[tokio::test]
    async fn test_send_test_message_failure_reports_error() {
        let transport = RecordingTransport::failing();
        let webhook = Webhook::new("ops", "https://discord.example/api/webhooks/1");
        let report = send_test_message(&transport, &webhook, None).await;
        assert!(!report.success);
        assert!(report.error_text.contains("HTTP 500"));
    }
}
