//! Delivery dispatcher: turns a fired job into queued webhook messages.
//!
//! A job is revalidated when it fires. Jobs that were superseded, whose rule
//! was disabled, or whose timer moved are dropped without sending anything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use timerboard_core::TimerboardConfig;
use timerboard_core::choices::{Choice, Objective, Trigger};
use timerboard_core::config::WebhookConfig;
use timerboard_core::error::{Result, TimerboardError};
use timerboard_core::types::{DATETIME_FORMAT, Embed, NotificationRule, OutboundMessage, Timer};

use crate::persistence::{self, LANE_MAIN, TimerboardDb};
use crate::queue::MessageQueue;
use crate::webhook::{self, TestReport, Transport};

const COLOR_FRIENDLY: u32 = 0x375a7f;
const COLOR_HOSTILE: u32 = 0xd9534f;
const ICON_SIZE: u32 = 128;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// Message queued on this many webhooks.
    Delivered(usize),
    /// Nothing sent; the reason is logged.
    Discarded(String),
}

pub struct Dispatcher {
    db: Arc<TimerboardDb>,
    transport: Arc<dyn Transport>,
    config: TimerboardConfig,
    drainer: Drainer,
}

impl Dispatcher {
    pub fn new(db: Arc<TimerboardDb>, transport: Arc<dyn Transport>, config: TimerboardConfig) -> Self {
        let drainer = Drainer {
            db: db.clone(),
            transport: transport.clone(),
            delay: Duration::from_millis(config.webhook.send_delay_ms),
            draining: Arc::new(Mutex::new(HashMap::new())),
        };
        Self {
            db,
            transport,
            config,
            drainer,
        }
    }

    pub fn queue(&self, webhook_id: i64) -> MessageQueue {
        MessageQueue::new(self.db.clone(), webhook_id)
    }

    /// Fire scheduled job `scheduled_id` on behalf of task `task_id`.
    pub async fn deliver(&self, scheduled_id: i64, task_id: &str) -> Result<DeliveryOutcome> {
        let now = Utc::now();
        let checked = self.db.with_transaction(|tx| {
            let Some(job) = persistence::get_scheduled(tx, scheduled_id)? else {
                return Ok(Err(format!("job #{scheduled_id} no longer exists")));
            };
            if job.task_id != task_id {
                return Ok(Err(format!(
                    "job #{scheduled_id} belongs to task {}, not {task_id}",
                    job.task_id
                )));
            }
            if job.fired_at.is_some() {
                return Ok(Err(format!("job #{scheduled_id} already fired")));
            }
            let Some(rule) = persistence::get_rule(tx, job.rule_id)? else {
                return Ok(Err(format!("rule #{} no longer exists", job.rule_id)));
            };
            if !rule.is_enabled {
                persistence::delete_scheduled(tx, scheduled_id)?;
                return Ok(Err(format!("{rule} is disabled")));
            }
            let Some(timer) = persistence::get_timer(tx, job.timer_id)? else {
                return Ok(Err(format!("timer #{} no longer exists", job.timer_id)));
            };
            if timer.date != job.timer_date {
                persistence::delete_scheduled(tx, scheduled_id)?;
                return Ok(Err(format!("timer #{} was moved", timer.id)));
            }
            if !self.config.notifications.enabled {
                return Ok(Err("notifications are disabled".to_string()));
            }
            persistence::mark_fired(tx, scheduled_id, now)?;
            let queued = self.enqueue_for_rule(tx, &timer, &rule, now);
            Ok(Ok(queued))
        })?;

        match checked {
            Ok(queued) => {
                self.drain_many(&queued).await;
                Ok(DeliveryOutcome::Delivered(queued.len()))
            }
            Err(reason) => {
                tracing::info!("⏭️ Discarding stale job: {reason}");
                Ok(DeliveryOutcome::Discarded(reason))
            }
        }
    }

    /// Deliver a creation-triggered rule for a just-created timer.
    pub async fn deliver_new_timer(&self, timer: &Timer, rule: &NotificationRule) -> Result<DeliveryOutcome> {
        if !rule.is_enabled || !self.config.notifications.enabled {
            return Ok(DeliveryOutcome::Discarded(format!("{rule} is inactive")));
        }
        let now = Utc::now();
        let queued = self
            .db
            .with_transaction(|tx| Ok(self.enqueue_for_rule(tx, timer, rule, now)))?;
        self.drain_many(&queued).await;
        Ok(DeliveryOutcome::Delivered(queued.len()))
    }

    /// Render once and queue on every enabled webhook of `rule`. A failing
    /// webhook is logged and skipped. Returns the webhooks queued on.
    fn enqueue_for_rule(
        &self,
        conn: &rusqlite::Connection,
        timer: &Timer,
        rule: &NotificationRule,
        now: DateTime<Utc>,
    ) -> Vec<i64> {
        let message = render_notification(timer, rule, now, &self.config.webhook);
        let payload = match message.validate().and_then(|_| Ok(serde_json::to_string(&message)?)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("⚠️ Could not render notification for {timer}: {e}");
                return Vec::new();
            }
        };

        let mut queued = Vec::new();
        for &webhook_id in &rule.webhook_ids {
            let result = persistence::get_webhook(conn, webhook_id).and_then(|webhook| {
                let webhook = webhook
                    .ok_or_else(|| TimerboardError::NotFound(format!("Webhook #{webhook_id}")))?;
                if !webhook.is_enabled {
                    tracing::info!("⏸️ Webhook {webhook} is disabled, skipping");
                    return Ok(false);
                }
                persistence::queue_push(conn, webhook_id, LANE_MAIN, &payload)?;
                Ok(true)
            });
            match result {
                Ok(true) => queued.push(webhook_id),
                Ok(false) => {}
                Err(e) => tracing::warn!("⚠️ {rule}: could not queue on webhook #{webhook_id}: {e}"),
            }
        }
        tracing::info!("🔔 {rule}: notification for timer #{} queued on {} webhook(s)", timer.id, queued.len());
        queued
    }

    /// Drain the given webhooks in detached tasks and wait for them. A job
    /// task cancelled while waiting here does not interrupt the sends.
    async fn drain_many(&self, webhook_ids: &[i64]) {
        let drains = webhook_ids.iter().map(|&id| {
            let drainer = self.drainer.clone();
            tokio::spawn(async move { (id, drainer.drain(id).await) })
        });
        for joined in futures::future::join_all(drains).await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((id, Err(e))) => tracing::warn!("⚠️ Drain of webhook #{id} failed: {e}"),
                Err(e) => tracing::warn!("⚠️ Drain task failed: {e}"),
            }
        }
    }

    /// Drain one webhook's queue. Returns 0 immediately if a drain of the
    /// same webhook is already running; that drain then makes another pass.
    pub async fn drain_webhook(&self, webhook_id: i64) -> Result<usize> {
        self.drainer.drain(webhook_id).await
    }

    /// Drain every enabled webhook that has queued or parked messages.
    pub async fn drain_all(&self) -> Result<usize> {
        let mut ids = Vec::new();
        for webhook in self.db.list_webhooks()? {
            if webhook.is_enabled && self.queue(webhook.id).backlog()? > 0 {
                ids.push(webhook.id);
            }
        }
        let results = futures::future::join_all(ids.iter().map(|&id| self.drainer.drain(id))).await;
        let mut sent = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(n) => sent += n,
                Err(e) => tracing::warn!("⚠️ Drain of webhook #{id} failed: {e}"),
            }
        }
        Ok(sent)
    }

    /// Send a test message directly to a webhook.
    pub async fn send_test_message(&self, webhook_id: i64) -> Result<TestReport> {
        let webhook = self
            .db
            .get_webhook(webhook_id)?
            .ok_or_else(|| TimerboardError::NotFound(format!("Webhook #{webhook_id}")))?;
        Ok(webhook::send_test_message(
            self.transport.as_ref(),
            &webhook,
            Some(self.config.webhook.username.as_str()),
        )
        .await)
    }

    /// Send the notification for timer `timer_id` to every enabled webhook,
    /// as a rule without ping would. Returns the number of webhooks queued on.
    pub async fn send_test_notification(&self, timer_id: i64) -> Result<usize> {
        let timer = self
            .db
            .get_timer(timer_id)?
            .ok_or_else(|| TimerboardError::NotFound(format!("Timer #{timer_id}")))?;
        let webhook_ids: Vec<i64> = self
            .db
            .list_webhooks()?
            .into_iter()
            .filter(|w| w.is_enabled)
            .map(|w| w.id)
            .collect();
        let rule = NotificationRule::scheduled(0, webhook_ids);
        let now = Utc::now();
        let queued = self
            .db
            .with_transaction(|tx| Ok(self.enqueue_for_rule(tx, &timer, &rule, now)))?;
        self.drain_many(&queued).await;
        Ok(queued.len())
    }
}

/// Owned handles needed to drain a queue, so a drain can run in its own task.
#[derive(Clone)]
struct Drainer {
    db: Arc<TimerboardDb>,
    transport: Arc<dyn Transport>,
    delay: Duration,
    /// Webhooks with a drain in progress, and whether another pass was asked for.
    draining: Arc<Mutex<HashMap<i64, bool>>>,
}

impl Drainer {
    async fn drain(&self, webhook_id: i64) -> Result<usize> {
        let Some(mut guard) = DrainGuard::acquire(&self.draining, webhook_id) else {
            tracing::debug!("Webhook #{webhook_id} is already draining, another pass requested");
            return Ok(0);
        };
        let webhook = self
            .db
            .get_webhook(webhook_id)?
            .ok_or_else(|| TimerboardError::NotFound(format!("Webhook #{webhook_id}")))?;
        let queue = MessageQueue::new(self.db.clone(), webhook_id);
        let mut sent = 0;
        loop {
            sent += queue.drain(self.transport.as_ref(), &webhook, self.delay).await?;
            if !guard.rerun_requested() {
                return Ok(sent);
            }
        }
    }
}

/// Marks a webhook as draining until dropped or released.
struct DrainGuard {
    set: Arc<Mutex<HashMap<i64, bool>>>,
    id: i64,
    released: bool,
}

impl DrainGuard {
    /// `None` if the webhook is already draining; the running drain is then
    /// asked for one more pass.
    fn acquire(set: &Arc<Mutex<HashMap<i64, bool>>>, id: i64) -> Option<Self> {
        let mut draining = set.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(rerun) = draining.get_mut(&id) {
            *rerun = true;
            return None;
        }
        draining.insert(id, false);
        Some(Self { set: set.clone(), id, released: false })
    }

    /// Called at the end of a pass. True if a drain was requested meanwhile;
    /// otherwise the webhook is released in the same step.
    fn rerun_requested(&mut self) -> bool {
        let mut draining = self.set.lock().unwrap_or_else(|p| p.into_inner());
        if draining.get(&self.id).copied() == Some(true) {
            draining.insert(self.id, false);
            return true;
        }
        draining.remove(&self.id);
        self.released = true;
        false
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.released {
            self.set.lock().unwrap_or_else(|p| p.into_inner()).remove(&self.id);
        }
    }
}

/// Build the webhook message for `timer` as sent by `rule` at `now`.
pub fn render_notification(
    timer: &Timer,
    rule: &NotificationRule,
    now: DateTime<Utc>,
    config: &WebhookConfig,
) -> OutboundMessage {
    let mut content = String::new();
    let ping = rule.ping_type.ping_text();
    if !ping.is_empty() {
        content.push_str(ping);
        content.push(' ');
    }
    let mod_text = if timer.is_important { "**important** " } else { "" };
    match rule.trigger {
        Trigger::ScheduledTime => {
            let minutes = ((timer.date - now).num_seconds() as f64 / 60.0).round() as i64;
            content.push_str(&format!(
                "The following {mod_text}structure timer will elapse in less than **{}** minutes:",
                thousands(minutes)
            ));
        }
        Trigger::NewTimer => {
            content.push_str(&format!(
                "The following {mod_text}structure timer has just been added:"
            ));
        }
    }

    let type_name = &timer.structure_type.name;
    let title = match &timer.solar_system {
        Some(system) => format!("{type_name} in {}", system.name),
        None => type_name.clone(),
    };
    let structure_text = if timer.structure_name.is_empty() {
        let article = match type_name.chars().next().map(|c| c.to_ascii_lowercase()) {
            Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
            _ => "a",
        };
        format!("{article} **{type_name}**")
    } else {
        format!("**{type_name}** \"{}\"", timer.structure_name)
    };
    let location_text = match &timer.solar_system {
        Some(system) => format!(
            " in [{}]({}) ({})",
            system.name,
            dotlan_system_url(&system.name),
            system.region_name
        ),
        None => String::new(),
    };
    let near_text = if timer.location_details.is_empty() {
        String::new()
    } else {
        format!(" near {}", timer.location_details)
    };
    let owned_text = match &timer.owner_name {
        Some(owner) if !owner.is_empty() => format!(" owned by **{owner}**"),
        _ => String::new(),
    };
    let description = format!(
        "The **{}** timer for {structure_text}{location_text}{near_text}{owned_text} \
         will elapse at **{}**. Our stance is: **{}**.",
        timer.timer_type.label(),
        timer.date.format(DATETIME_FORMAT),
        timer.objective.label()
    );
    let color = match timer.objective {
        Objective::Friendly => Some(COLOR_FRIENDLY),
        Objective::Hostile => Some(COLOR_HOSTILE),
        _ => None,
    };

    OutboundMessage {
        content: Some(content),
        embeds: vec![Embed {
            title: Some(title),
            description: Some(description),
            thumbnail_url: Some(timer.structure_type.icon_url(ICON_SIZE)),
            color,
        }],
        username: Some(config.username.clone()),
        avatar_url: config.avatar_url.clone(),
    }
}

fn dotlan_system_url(name: &str) -> String {
    format!("https://evemaps.dotlan.net/system/{}", name.replace(' ', "_"))
}

/// `1234567` → `1,234,567`.
fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if n < 0 { format!("-{out}") } else { out }
}
