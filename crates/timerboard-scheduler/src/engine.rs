//! Scheduler: keeps scheduled notifications in step with timers and rules.
//!
//! Every recompute runs in one transaction under the connection lock, so
//! "delete stale jobs, then arm fresh ones" never interleaves with another
//! recompute. Task ids are written in that transaction; tasks are started,
//! and tasks of dropped jobs aborted, only after it commits. The arming lock
//! keeps that post-commit step in commit order.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rusqlite::Connection;
use timerboard_core::TimerboardConfig;
use timerboard_core::choices::Trigger;
use timerboard_core::error::{Result, TimerboardError};
use timerboard_core::types::{DATETIME_FORMAT, NotificationRule, Timer};

use crate::dispatch::{DeliveryOutcome, Dispatcher};
use crate::matcher;
use crate::persistence::{self, TimerboardDb};
use crate::retention;
use crate::tasks::{self, TaskRunner};
use crate::webhook::Transport;

/// Entry point for timer and rule mutations.
pub struct Scheduler {
    db: Arc<TimerboardDb>,
    dispatcher: Arc<Dispatcher>,
    runner: TaskRunner,
    config: TimerboardConfig,
    arming: Mutex<()>,
}

/// A job committed with `task_id` whose task is not started yet.
struct Armed {
    job_id: i64,
    task_id: String,
    run_at: DateTime<Utc>,
}

impl Scheduler {
    pub fn new(db: Arc<TimerboardDb>, transport: Arc<dyn Transport>, config: TimerboardConfig) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), transport, config.clone()));
        Self {
            db,
            dispatcher,
            runner: TaskRunner::new(),
            config,
            arming: Mutex::new(()),
        }
    }

    pub fn db(&self) -> &Arc<TimerboardDb> {
        &self.db
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn config(&self) -> &TimerboardConfig {
        &self.config
    }

    // ─── Timers ──────────────────────────────────────────────

    /// Store a new timer, schedule its notifications and fire matching
    /// creation rules. Returns the stored timer.
    pub async fn create_timer(&self, mut timer: Timer) -> Result<Timer> {
        // stored with microsecond precision
        timer.date = timer.date.trunc_subsecs(6);
        timer.id = self.db.with_conn(|c| persistence::insert_timer(c, &timer))?;
        tracing::info!("📅 Timer created: {timer}");
        if self.config.notifications.enabled {
            self.schedule_for_timer(timer.id)?;
            self.notify_new_timer(&timer).await?;
        }
        Ok(timer)
    }

    /// Creation rules are evaluated once, here, and never retroactively.
    async fn notify_new_timer(&self, timer: &Timer) -> Result<usize> {
        let rules = self
            .db
            .with_conn(|c| persistence::enabled_rules(c, Trigger::NewTimer))?;
        let deliveries = matcher::matching_rules(&rules, timer)
            .map(|rule| self.dispatcher.deliver_new_timer(timer, rule));

        let mut delivered = 0;
        for result in futures::future::join_all(deliveries).await {
            match result {
                Ok(DeliveryOutcome::Delivered(_)) => delivered += 1,
                Ok(DeliveryOutcome::Discarded(_)) => {}
                Err(e) => tracing::warn!("⚠️ New-timer notification for #{} failed: {e}", timer.id),
            }
        }
        Ok(delivered)
    }

    /// Save changes to an existing timer. Jobs are recomputed if anything
    /// changed; returns whether that happened.
    pub fn update_timer(&self, timer: &Timer) -> Result<bool> {
        let mut timer = timer.clone();
        timer.date = timer.date.trunc_subsecs(6);
        let changed = self.db.with_transaction(|tx| {
            let old = persistence::get_timer(tx, timer.id)?
                .ok_or_else(|| TimerboardError::NotFound(format!("Timer #{}", timer.id)))?;
            persistence::update_timer(tx, &timer)?;
            Ok(old != timer)
        })?;
        if changed && self.config.notifications.enabled {
            self.schedule_for_timer(timer.id)?;
        }
        Ok(changed)
    }

    pub fn delete_timer(&self, timer_id: i64) -> Result<bool> {
        let _arming = self.arming();
        let (deleted, jobs) = self.db.with_transaction(|tx| {
            let jobs = persistence::delete_scheduled_for_timer(tx, timer_id)?;
            Ok((persistence::delete_timer(tx, timer_id)?, jobs))
        })?;
        self.cancel_all(&jobs);
        if deleted {
            tracing::info!("🗑️ Timer #{timer_id} deleted, {} job(s) cancelled", jobs.len());
        }
        Ok(deleted)
    }

    // ─── Rules ──────────────────────────────────────────────

    /// Validate and store a rule, then schedule it against future timers.
    pub fn create_rule(&self, mut rule: NotificationRule) -> Result<NotificationRule> {
        rule.validate()?;
        rule.id = self.db.with_conn(|c| persistence::insert_rule(c, &rule))?;
        tracing::info!("📋 {rule} created");
        self.schedule_for_rule(rule.id)?;
        Ok(rule)
    }

    /// Validate and save a rule. Jobs are recomputed when matching or timing
    /// changed; returns whether that happened.
    pub fn update_rule(&self, rule: &NotificationRule) -> Result<bool> {
        rule.validate()?;
        let old = self.db.with_transaction(|tx| {
            let old = persistence::get_rule(tx, rule.id)?
                .ok_or_else(|| TimerboardError::NotFound(format!("Notification rule #{}", rule.id)))?;
            persistence::update_rule(tx, rule)?;
            Ok(old)
        })?;
        let affects_jobs = old.trigger != rule.trigger
            || old.scheduled_time != rule.scheduled_time
            || old.is_enabled != rule.is_enabled
            || old.clauses != rule.clauses;
        if affects_jobs {
            self.schedule_for_rule(rule.id)?;
        }
        Ok(affects_jobs)
    }

    pub fn delete_rule(&self, rule_id: i64) -> Result<bool> {
        let _arming = self.arming();
        let (deleted, jobs) = self.db.with_transaction(|tx| {
            let jobs = persistence::delete_scheduled_for_rule(tx, rule_id)?;
            Ok((persistence::delete_rule(tx, rule_id)?, jobs))
        })?;
        self.cancel_all(&jobs);
        Ok(deleted)
    }

    // ─── Recompute ──────────────────────────────────────────────

    /// Recompute the jobs of one timer. Returns the number of jobs armed.
    pub fn schedule_for_timer(&self, timer_id: i64) -> Result<usize> {
        let now = Utc::now();
        let _arming = self.arming();
        let (armed, dropped) = self.db.with_transaction(|tx| {
            let Some(timer) = persistence::get_timer(tx, timer_id)? else {
                tracing::info!("Timer #{timer_id} no longer exists, nothing to schedule");
                return Ok((Vec::new(), Vec::new()));
            };
            let mut dropped = persistence::delete_stale_for_timer(tx, timer_id, timer.date)?;
            if timer.date <= now {
                tracing::warn!("⚠️ {timer} is in the past, no notifications scheduled");
                return Ok((Vec::new(), dropped));
            }

            let rules = persistence::enabled_rules(tx, Trigger::ScheduledTime)?;
            let matching: Vec<&NotificationRule> = matcher::matching_rules(&rules, &timer).collect();
            let keep: HashSet<i64> = matching.iter().map(|r| r.id).collect();
            for job in persistence::scheduled_for_timer(tx, timer_id)? {
                if !keep.contains(&job.rule_id) && persistence::delete_scheduled(tx, job.id)? {
                    dropped.push(job.id);
                }
            }

            let mut armed: Vec<Armed> = Vec::new();
            for rule in matching {
                armed.extend(self.stage(tx, &timer, rule, now)?);
            }
            Ok((armed, dropped))
        })?;
        self.cancel_all(&dropped);
        self.start(&armed);
        Ok(armed.len())
    }

    /// Recompute the jobs of one rule against all future timers. Returns
    /// the number of jobs armed.
    pub fn schedule_for_rule(&self, rule_id: i64) -> Result<usize> {
        let now = Utc::now();
        let _arming = self.arming();
        let (armed, dropped) = self.db.with_transaction(|tx| {
            let Some(rule) = persistence::get_rule(tx, rule_id)? else {
                tracing::info!("Notification rule #{rule_id} no longer exists, nothing to schedule");
                return Ok((Vec::new(), Vec::new()));
            };
            let mut dropped = persistence::delete_future_for_rule(tx, rule_id, now)?;
            let active = rule.is_enabled
                && rule.trigger == Trigger::ScheduledTime
                && self.config.notifications.enabled;
            if !active {
                dropped.extend(persistence::delete_scheduled_for_rule(tx, rule_id)?);
                return Ok((Vec::new(), dropped));
            }

            let mut armed: Vec<Armed> = Vec::new();
            for timer in persistence::future_timers(tx, now)? {
                if matcher::matches(&rule, &timer) {
                    armed.extend(self.stage(tx, &timer, &rule, now)?);
                }
            }
            Ok((armed, dropped))
        })?;
        self.cancel_all(&dropped);
        self.start(&armed);
        if !armed.is_empty() || !dropped.is_empty() {
            tracing::info!(
                "📋 Notification Rule #{rule_id}: {} job(s) armed, {} dropped",
                armed.len(),
                dropped.len()
            );
        }
        Ok(armed.len())
    }

    /// Create or refresh the job for (`timer`, `rule`) and store a new task
    /// id for it. The task itself is started by [`start`](Self::start) once
    /// the transaction commits.
    ///
    /// Returns `None` if an identical job is already armed or has fired.
    fn stage(
        &self,
        conn: &Connection,
        timer: &Timer,
        rule: &NotificationRule,
        now: DateTime<Utc>,
    ) -> Result<Option<Armed>> {
        let notification_date = rule.notification_date(timer.date);
        if let Some(job) = persistence::get_scheduled_for_pair(conn, timer.id, rule.id)? {
            let same = job.timer_date == timer.date && job.notification_date == notification_date;
            if same && job.fired_at.is_some() {
                return Ok(None);
            }
            if same && self.runner.is_live(job.id, &job.task_id) {
                return Ok(None);
            }
        }

        let job_id = persistence::upsert_scheduled(conn, timer.id, rule.id, timer.date, notification_date)?;
        let task_id = tasks::new_task_id();
        persistence::set_task_id(conn, job_id, &task_id)?;
        if notification_date <= now {
            tracing::info!("🔔 Job #{job_id} for timer #{} ({rule}) is due now", timer.id);
        } else {
            tracing::info!(
                "🔔 Job #{job_id} for timer #{} ({rule}) scheduled for {}",
                timer.id,
                notification_date.format(DATETIME_FORMAT)
            );
        }
        Ok(Some(Armed { job_id, task_id, run_at: notification_date }))
    }

    /// Start the tasks of committed jobs.
    fn start(&self, armed: &[Armed]) {
        for job in armed {
            let dispatcher = self.dispatcher.clone();
            let job_id = job.job_id;
            self.runner.submit_as(job_id, job.task_id.clone(), job.run_at, move |task_id| async move {
                if let Err(e) = dispatcher.deliver(job_id, &task_id).await {
                    tracing::error!("❌ Delivery of job #{job_id} failed: {e}");
                }
            });
        }
    }

    fn cancel_all(&self, job_ids: &[i64]) {
        for &id in job_ids {
            self.runner.cancel(id);
        }
    }

    fn arming(&self) -> MutexGuard<'_, ()> {
        self.arming.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start a task for every unfired job without a live task in this
    /// process: all of them after a restart, later the ones armed by another
    /// process. Jobs overdue by more than `notifications.max_age_minutes`
    /// are not sent. Returns the number started.
    pub fn resume_pending(&self) -> Result<usize> {
        if !self.config.notifications.enabled {
            return Ok(0);
        }
        let now = Utc::now();
        let since = now - Duration::minutes(i64::from(self.config.notifications.max_age_minutes));
        let _arming = self.arming();
        let armed = self.db.with_transaction(|tx| {
            let mut armed: Vec<Armed> = Vec::new();
            for job in persistence::pending_scheduled_since(tx, since)? {
                if self.runner.is_live(job.id, &job.task_id) {
                    continue;
                }
                let task_id = tasks::new_task_id();
                persistence::set_task_id(tx, job.id, &task_id)?;
                armed.push(Armed { job_id: job.id, task_id, run_at: job.notification_date });
            }
            Ok(armed)
        })?;
        self.start(&armed);
        if !armed.is_empty() {
            tracing::info!("▶️ Resumed {} pending job(s)", armed.len());
        }
        Ok(armed.len())
    }

    /// Delete obsolete timers.
    pub fn sweep(&self) -> Result<usize> {
        retention::delete_obsolete_timers(&self.db, &self.config.retention, Utc::now())
    }
}

/// Spawn the background worker as a tokio task.
pub fn spawn_worker(scheduler: Arc<Scheduler>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run_worker(scheduler))
}

/// Worker loop: picks up jobs without a live task, retries queued messages
/// and sweeps obsolete timers.
pub async fn run_worker(scheduler: Arc<Scheduler>) {
    let retry_secs = scheduler.config.webhook.retry_interval_secs.max(1);
    let sweep_secs = scheduler.config.worker.sweep_interval_secs.max(1);
    tracing::info!("⏰ Worker started (retry every {retry_secs}s, sweep every {sweep_secs}s)");

    let mut retry = tokio::time::interval(std::time::Duration::from_secs(retry_secs));
    let mut sweep = tokio::time::interval(std::time::Duration::from_secs(sweep_secs));

    loop {
        tokio::select! {
            _ = retry.tick() => {
                if let Err(e) = scheduler.resume_pending() {
                    tracing::warn!("⚠️ Resuming pending jobs failed: {e}");
                }
                match scheduler.dispatcher.drain_all().await {
                    Ok(0) => {}
                    Ok(sent) => tracing::info!("📨 Retry pass sent {sent} message(s)"),
                    Err(e) => tracing::warn!("⚠️ Retry pass failed: {e}"),
                }
            }
            _ = sweep.tick() => {
                if let Err(e) = scheduler.sweep() {
                    tracing::warn!("⚠️ Timer sweep failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhook::testing::RecordingTransport;
    use timerboard_core::choices::{Clause, Objective, TimerType};
    use timerboard_core::types::{OutboundMessage, StructureType, Webhook};

    struct Fixture {
        scheduler: Scheduler,
        transport: Arc<RecordingTransport>,
        webhook_id: i64,
    }

    fn fixture_with(config: TimerboardConfig) -> Fixture {
        let db = Arc::new(TimerboardDb::open_in_memory().unwrap());
        let webhook_id = db
            .insert_webhook(&Webhook::new("ops", "https://discord.example/api/webhooks/1"))
            .unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let scheduler = Scheduler::new(db, transport.clone(), config);
        Fixture { scheduler, transport, webhook_id }
    }

    fn fixture() -> Fixture {
        let mut config = TimerboardConfig::default();
        config.webhook.send_delay_ms = 0;
        fixture_with(config)
    }

    fn timer_in(duration: Duration) -> Timer {
        let mut timer = Timer::new(
            TimerType::Armor,
            StructureType { id: 35832, name: "Astrahus".into() },
            Utc::now().trunc_subsecs(0) + duration,
        );
        timer.objective = Objective::Friendly;
        timer
    }

    fn armor_rule(minutes: u32, webhook_id: i64) -> NotificationRule {
        let mut rule = NotificationRule::scheduled(minutes, vec![webhook_id]);
        rule.clauses.require_timer_types.insert(TimerType::Armor);
        rule
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();

        let jobs = s.db().scheduled_for_timer(timer.id).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.notification_date, timer.date - Duration::minutes(15));
        assert_eq!(job.timer_date, timer.date);
        assert_eq!(s.runner().current(job.id).as_deref(), Some(job.task_id.as_str()));

        // the task is due in 3h45m; fire it now as the runner would
        let outcome = s.dispatcher().deliver(job.id, &job.task_id).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered(1));
        assert_eq!(f.transport.count(), 1);
        assert_eq!(s.dispatcher().queue(f.webhook_id).size().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_task_fires_at_notification_date() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_rule(NotificationRule::scheduled(0, vec![f.webhook_id])).unwrap();
        let mut timer = timer_in(Duration::zero());
        timer.date = Utc::now() + Duration::milliseconds(200);
        s.create_timer(timer).await.unwrap();
        assert_eq!(f.transport.count(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        assert_eq!(f.transport.count(), 1);
        assert!(s.db().pending_scheduled().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recompute_is_idempotent() {
        let f = fixture();
        let s = &f.scheduler;
        let rule = s.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();
        let before = s.db().scheduled_for_timer(timer.id).unwrap();

        assert_eq!(s.schedule_for_timer(timer.id).unwrap(), 0);
        s.schedule_for_rule(rule.id).unwrap();
        s.schedule_for_rule(rule.id).unwrap();

        let after = s.db().scheduled_for_timer(timer.id).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(before[0].notification_date, after[0].notification_date);
        assert_eq!(s.runner().pending(), 1);
    }

    #[tokio::test]
    async fn test_date_change_reschedules() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let mut timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();
        let old = s.db().scheduled_for_timer(timer.id).unwrap().remove(0);

        timer.date += Duration::hours(2);
        assert!(s.update_timer(&timer).unwrap());

        let jobs = s.db().scheduled_for_timer(timer.id).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_ne!(jobs[0].id, old.id);
        assert_eq!(jobs[0].notification_date, timer.date - Duration::minutes(15));
        assert!(s.runner().current(old.id).is_none());

        // the superseded task firing late sends nothing
        let outcome = s.dispatcher().deliver(jobs[0].id, &old.task_id).await.unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Discarded(_)));
        assert_eq!(f.transport.count(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_update_keeps_job() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();
        let before = s.db().scheduled_for_timer(timer.id).unwrap();
        assert!(!s.update_timer(&timer).unwrap());
        assert_eq!(s.db().scheduled_for_timer(timer.id).unwrap(), before);
    }

    #[tokio::test]
    async fn test_timer_no_longer_matching_drops_job() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let mut timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();
        assert_eq!(s.runner().pending(), 1);

        timer.timer_type = TimerType::Hull;
        s.update_timer(&timer).unwrap();
        assert!(s.db().scheduled_for_timer(timer.id).unwrap().is_empty());
        assert_eq!(s.runner().pending(), 0);
    }

    #[tokio::test]
    async fn test_rule_changes() {
        let f = fixture();
        let s = &f.scheduler;
        let timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();

        // created after the timer: applied to existing future timers
        let mut rule = s.create_rule(armor_rule(30, f.webhook_id)).unwrap();
        assert_eq!(s.db().scheduled_for_timer(timer.id).unwrap().len(), 1);

        // tightened so it no longer matches
        rule.clauses.is_important = Clause::Required;
        assert!(s.update_rule(&rule).unwrap());
        assert!(s.db().scheduled_for_timer(timer.id).unwrap().is_empty());

        // loosened and re-timed
        rule.clauses.is_important = Clause::Any;
        rule.scheduled_time = 60;
        s.update_rule(&rule).unwrap();
        let jobs = s.db().scheduled_for_timer(timer.id).unwrap();
        assert_eq!(jobs[0].notification_date, timer.date - Duration::minutes(60));

        // ping change does not touch jobs
        rule.ping_type = timerboard_core::choices::PingType::Everyone;
        assert!(!s.update_rule(&rule).unwrap());

        rule.is_enabled = false;
        s.update_rule(&rule).unwrap();
        assert!(s.db().scheduled_for_timer(timer.id).unwrap().is_empty());
        assert_eq!(s.runner().pending(), 0);
    }

    #[tokio::test]
    async fn test_invalid_rule_rejected() {
        let f = fixture();
        let mut rule = armor_rule(15, f.webhook_id);
        rule.clauses.exclude_timer_types.insert(TimerType::Armor);
        let err = f.scheduler.create_rule(rule).unwrap_err();
        assert!(matches!(err, TimerboardError::Validation(_)));
        let count = f
            .scheduler
            .db()
            .with_conn(|c| persistence::enabled_rules(c, Trigger::ScheduledTime))
            .unwrap();
        assert!(count.is_empty());
    }

    #[tokio::test]
    async fn test_past_timer_not_scheduled() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_rule(NotificationRule::scheduled(5, vec![f.webhook_id])).unwrap();
        let timer = s.create_timer(timer_in(-Duration::hours(1))).await.unwrap();
        assert!(s.db().scheduled_for_timer(timer.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_timer_cancels_jobs() {
        let f = fixture();
        let s = &f.scheduler;
        let rule = s.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();
        assert!(s.delete_timer(timer.id).unwrap());
        assert_eq!(s.runner().pending(), 0);
        assert!(!s.delete_timer(timer.id).unwrap());

        s.create_timer(timer_in(Duration::hours(5))).await.unwrap();
        assert!(s.delete_rule(rule.id).unwrap());
        assert!(s.db().pending_scheduled().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_creation_rule_fires_once_at_creation() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_timer(timer_in(Duration::hours(2))).await.unwrap();

        // not applied to the existing timer
        s.create_rule(NotificationRule::on_new_timer(vec![f.webhook_id])).unwrap();
        assert_eq!(f.transport.count(), 0);

        let timer = s.create_timer(timer_in(Duration::hours(3))).await.unwrap();
        assert_eq!(f.transport.count(), 1);
        assert!(f.transport.contents()[0].contains("has just been added"));
        assert!(s.db().scheduled_for_timer(timer.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notifications_disabled() {
        let mut config = TimerboardConfig::default();
        config.notifications.enabled = false;
        let f = fixture_with(config);
        let s = &f.scheduler;
        s.create_rule(NotificationRule::scheduled(5, vec![f.webhook_id])).unwrap();
        s.create_rule(NotificationRule::on_new_timer(vec![f.webhook_id])).unwrap();
        let timer = s.create_timer(timer_in(Duration::hours(1))).await.unwrap();
        assert!(s.db().scheduled_for_timer(timer.id).unwrap().is_empty());
        assert_eq!(f.transport.count(), 0);
    }

    #[tokio::test]
    async fn test_resume_pending_after_restart() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();
        let before = s.db().scheduled_for_timer(timer.id).unwrap().remove(0);

        let restarted = Scheduler::new(s.db().clone(), f.transport.clone(), s.config().clone());
        assert_eq!(restarted.resume_pending().unwrap(), 1);
        let after = restarted.db().scheduled_for_timer(timer.id).unwrap().remove(0);
        assert_eq!(after.id, before.id);
        assert_ne!(after.task_id, before.task_id);
        assert_eq!(restarted.runner().current(after.id).as_deref(), Some(after.task_id.as_str()));
    }

    #[tokio::test]
    async fn test_sweep() {
        let f = fixture();
        let s = &f.scheduler;
        s.create_timer(timer_in(-Duration::days(40))).await.unwrap();
        s.create_timer(timer_in(Duration::days(1))).await.unwrap();
        assert_eq!(s.sweep().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_recompute_keeps_running_task() {
        let f = fixture();
        let s = &f.scheduler;
        let rule = s.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let mut timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();
        let job = s.db().scheduled_for_timer(timer.id).unwrap().remove(0);

        timer.date += Duration::hours(1);
        let err = s
            .db()
            .with_transaction(|tx| {
                persistence::update_timer(tx, &timer)?;
                s.stage(tx, &timer, &rule, Utc::now())?;
                Err::<(), _>(TimerboardError::Database("disk I/O error".into()))
            })
            .unwrap_err();
        assert!(matches!(err, TimerboardError::Database(_)));

        // rolled back: the committed job and its task are untouched
        assert_eq!(s.db().scheduled_for_timer(timer.id).unwrap(), vec![job.clone()]);
        assert!(s.runner().is_live(job.id, &job.task_id));
        assert_eq!(s.runner().pending(), 1);
    }

    #[tokio::test]
    async fn test_resume_picks_up_jobs_armed_by_another_process() {
        let f = fixture();
        let web = &f.scheduler;
        let worker = Scheduler::new(web.db().clone(), f.transport.clone(), web.config().clone());
        assert_eq!(worker.resume_pending().unwrap(), 0);

        web.create_rule(armor_rule(15, f.webhook_id)).unwrap();
        let timer = web.create_timer(timer_in(Duration::hours(4))).await.unwrap();

        assert_eq!(worker.resume_pending().unwrap(), 1);
        assert_eq!(worker.resume_pending().unwrap(), 0);
        let job = worker.db().scheduled_for_timer(timer.id).unwrap().remove(0);
        assert!(worker.runner().is_live(job.id, &job.task_id));
        // the web process's task is superseded and will discard itself
        assert!(!web.runner().is_live(job.id, &job.task_id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recomputes_leave_one_job() {
        let Fixture { scheduler, webhook_id, .. } = fixture();
        let s = Arc::new(scheduler);
        let rule = s.create_rule(armor_rule(15, webhook_id)).unwrap();
        let timer = s.create_timer(timer_in(Duration::hours(4))).await.unwrap();

        let workers = (0..8i64).map(|i| {
            let s = s.clone();
            let mut timer = timer.clone();
            let rule_id = rule.id;
            tokio::task::spawn_blocking(move || {
                if i % 2 == 0 {
                    timer.date += Duration::minutes(i + 1);
                    s.update_timer(&timer).map(|_| ())
                } else {
                    s.schedule_for_rule(rule_id).map(|_| ())
                }
            })
        });
        for joined in futures::future::join_all(workers).await {
            joined.unwrap().unwrap();
        }

        let stored = s.db().get_timer(timer.id).unwrap().unwrap();
        let jobs = s.db().scheduled_for_timer(timer.id).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].timer_date, stored.date);
        assert_eq!(jobs[0].notification_date, stored.date - Duration::minutes(15));
        assert!(s.runner().is_live(jobs[0].id, &jobs[0].task_id));
        assert_eq!(s.runner().pending(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelling_job_mid_delivery_keeps_messages() {
        let mut config = TimerboardConfig::default();
        config.webhook.send_delay_ms = 150;
        let f = fixture_with(config);
        let s = &f.scheduler;
        s.dispatcher()
            .queue(f.webhook_id)
            .enqueue(&OutboundMessage::text("earlier"))
            .unwrap();
        // the offset reaches past now, so the job fires at once
        s.create_rule(NotificationRule::scheduled(60, vec![f.webhook_id])).unwrap();
        let timer = s.create_timer(timer_in(Duration::minutes(30))).await.unwrap();

        // the job task is now waiting on its drain; deleting the timer aborts it
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(s.delete_timer(timer.id).unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(700)).await;
        assert_eq!(f.transport.count(), 2);
        assert_eq!(f.transport.contents()[0], "earlier");
        assert_eq!(s.dispatcher().queue(f.webhook_id).backlog().unwrap(), 0);
    }
}
