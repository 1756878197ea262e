//! Durable per-webhook FIFO of outbound messages.
//!
//! Backed by the `webhook_messages` table, so producers and the draining
//! worker may live in different processes. A message leaves the table only
//! after it was sent, so an interrupted drain never loses one; at worst the
//! message is sent again on the next pass.

use std::sync::Arc;
use std::time::Duration;

use timerboard_core::error::Result;
use timerboard_core::types::{OutboundMessage, Webhook};

use crate::persistence::{self, LANE_MAIN, TimerboardDb};
use crate::webhook::Transport;

/// Message queue of a single webhook.
#[derive(Clone)]
pub struct MessageQueue {
    db: Arc<TimerboardDb>,
    webhook_id: i64,
}

impl MessageQueue {
    pub fn new(db: Arc<TimerboardDb>, webhook_id: i64) -> Self {
        Self { db, webhook_id }
    }

    pub fn webhook_id(&self) -> i64 {
        self.webhook_id
    }

    /// Append a message. Returns the new queue length.
    ///
    /// A message without content or embeds is rejected and nothing is queued.
    pub fn enqueue(&self, message: &OutboundMessage) -> Result<usize> {
        message.validate()?;
        let payload = serde_json::to_string(message)?;
        self.db
            .with_conn(|c| persistence::queue_push(c, self.webhook_id, LANE_MAIN, &payload))
    }

    /// Send every queued message, oldest first, waiting `delay` before each.
    ///
    /// Failed messages are parked in the error lane for the rest of the pass
    /// and appended to the tail afterwards. Returns the number sent.
    pub async fn drain(
        &self,
        transport: &dyn Transport,
        webhook: &Webhook,
        delay: Duration,
    ) -> Result<usize> {
        // left parked by a pass that did not finish
        self.requeue_errors()?;

        let mut sent = 0;
        let mut failed = 0;
        while let Some((id, payload)) = self.peek()? {
            let message: OutboundMessage = match serde_json::from_str(&payload) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!("⚠️ Dropping unreadable message #{id} for webhook {}: {e}", webhook.name);
                    self.db.with_conn(|c| persistence::queue_delete(c, id))?;
                    continue;
                }
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match transport.send(&webhook.url, &message).await {
                Ok(()) => {
                    self.db.with_conn(|c| persistence::queue_delete(c, id))?;
                    sent += 1;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Failed to send message to webhook {}: {e}", webhook.name);
                    self.db.with_conn(|c| persistence::queue_park(c, id))?;
                    failed += 1;
                }
            }
        }
        if failed > 0 {
            self.requeue_errors()?;
        }
        if sent > 0 || failed > 0 {
            tracing::info!(
                "📨 Webhook {}: sent {sent} message(s), {failed} kept for retry",
                webhook.name
            );
        }
        Ok(sent)
    }

    fn peek(&self) -> Result<Option<(i64, String)>> {
        self.db
            .with_conn(|c| persistence::queue_peek(c, self.webhook_id, LANE_MAIN))
    }

    fn requeue_errors(&self) -> Result<usize> {
        self.db
            .with_transaction(|tx| persistence::queue_requeue_errors(tx, self.webhook_id))
    }

    pub fn size(&self) -> Result<usize> {
        self.db
            .with_conn(|c| persistence::queue_len(c, self.webhook_id, LANE_MAIN))
    }

    /// Messages waiting in either lane, including ones parked by a pass
    /// that was interrupted.
    pub fn backlog(&self) -> Result<usize> {
        self.db
            .with_conn(|c| persistence::queue_backlog(c, self.webhook_id))
    }

    /// Drop every queued message. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let cleared = self
            .db
            .with_conn(|c| persistence::queue_clear(c, self.webhook_id, LANE_MAIN))?;
        tracing::info!("🗑️ Purged {cleared} message(s) from webhook #{}", self.webhook_id);
        Ok(cleared)
    }
}
