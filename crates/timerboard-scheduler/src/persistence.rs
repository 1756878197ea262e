//! SQLite-backed persistence for timers, rules, scheduled notifications and
//! the per-webhook message queues.
//!
//! The row-level operations are free functions over `&Connection` so the
//! scheduler can compose several of them inside one transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use timerboard_core::choices::{Choice, Objective, PingType, TimerType, Trigger, Visibility};
use timerboard_core::error::{Result, TimerboardError};
use timerboard_core::types::{NotificationRule, ScheduledNotification, Timer, Webhook};

/// Queue lane holding messages waiting to be sent.
pub const LANE_MAIN: &str = "main";
/// Queue lane holding messages that failed during the current drain.
pub const LANE_ERROR: &str = "error";

/// SQLite-backed store for all Timerboard data.
pub struct TimerboardDb {
    conn: Mutex<Connection>,
}

impl TimerboardDb {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        // WAL lets the web process and the worker read while the other writes
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(db_err)?;
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS webhooks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL UNIQUE,
                notes TEXT,
                is_enabled INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS timers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timer_type TEXT NOT NULL,
                objective TEXT NOT NULL,
                visibility TEXT NOT NULL,
                is_important INTEGER NOT NULL DEFAULT 0,
                is_opsec INTEGER NOT NULL DEFAULT 0,
                date TEXT NOT NULL,
                solar_system TEXT,              -- JSON, nullable
                structure_type TEXT NOT NULL,   -- JSON
                structure_name TEXT NOT NULL DEFAULT '',
                location_details TEXT NOT NULL DEFAULT '',
                owner_name TEXT,
                eve_corporation_id INTEGER,
                eve_alliance_id INTEGER,
                eve_character_id INTEGER,
                user_id INTEGER,
                details_notes TEXT NOT NULL DEFAULT '',
                details_image_url TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_timers_date ON timers(date);

            CREATE TABLE IF NOT EXISTS notification_rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trigger TEXT NOT NULL,          -- 'ST' scheduled time, 'NT' new timer
                scheduled_time INTEGER NOT NULL DEFAULT 0,
                webhook_ids TEXT NOT NULL DEFAULT '[]',
                ping_type TEXT NOT NULL DEFAULT 'PN',
                is_enabled INTEGER NOT NULL DEFAULT 1,
                clauses TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS scheduled_notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timer_id INTEGER NOT NULL REFERENCES timers(id) ON DELETE CASCADE,
                rule_id INTEGER NOT NULL REFERENCES notification_rules(id) ON DELETE CASCADE,
                timer_date TEXT NOT NULL,
                notification_date TEXT NOT NULL,
                task_id TEXT NOT NULL DEFAULT '',
                fired_at TEXT,
                UNIQUE (timer_id, rule_id)
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_date
                ON scheduled_notifications(notification_date);

            CREATE TABLE IF NOT EXISTS webhook_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                webhook_id INTEGER NOT NULL REFERENCES webhooks(id) ON DELETE CASCADE,
                lane TEXT NOT NULL,             -- 'main' or 'error'
                payload TEXT NOT NULL,          -- JSON OutboundMessage
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_webhook_messages
                ON webhook_messages(webhook_id, lane, id);
         ",
            )
            .map_err(|e| TimerboardError::Database(format!("Migration: {e}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| TimerboardError::Database(format!("Lock: {e}")))
    }

    /// Run `f` against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction; rolled back if `f` fails.
    ///
    /// The connection lock is held throughout, so no other caller can
    /// interleave with the statements of `f`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let out = f(&tx)?;
        tx.commit().map_err(db_err)?;
        Ok(out)
    }

    // ─── Convenience wrappers ──────────────────────────────────

    pub fn insert_webhook(&self, webhook: &Webhook) -> Result<i64> {
        self.with_conn(|c| insert_webhook(c, webhook))
    }

    pub fn get_webhook(&self, id: i64) -> Result<Option<Webhook>> {
        self.with_conn(|c| get_webhook(c, id))
    }

    pub fn list_webhooks(&self) -> Result<Vec<Webhook>> {
        self.with_conn(list_webhooks)
    }

    pub fn get_timer(&self, id: i64) -> Result<Option<Timer>> {
        self.with_conn(|c| get_timer(c, id))
    }

    pub fn get_rule(&self, id: i64) -> Result<Option<NotificationRule>> {
        self.with_conn(|c| get_rule(c, id))
    }

    pub fn get_scheduled(&self, id: i64) -> Result<Option<ScheduledNotification>> {
        self.with_conn(|c| get_scheduled(c, id))
    }

    pub fn scheduled_for_timer(&self, timer_id: i64) -> Result<Vec<ScheduledNotification>> {
        self.with_conn(|c| scheduled_for_timer(c, timer_id))
    }

    pub fn pending_scheduled(&self) -> Result<Vec<ScheduledNotification>> {
        self.with_conn(pending_scheduled)
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> TimerboardError {
    TimerboardError::Database(e.to_string())
}

/// Fixed-width UTC timestamp, so text ordering equals time ordering.
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn conversion<T, E>(idx: usize, r: std::result::Result<T, E>) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    r.map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn code<C: Choice>(row: &Row<'_>, idx: usize) -> rusqlite::Result<C> {
    let raw: String = row.get(idx)?;
    conversion(idx, C::from_code(&raw))
}

fn json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    conversion(idx, serde_json::from_str(&raw))
}

// ─── Webhooks ──────────────────────────────────────────────

pub fn insert_webhook(conn: &Connection, webhook: &Webhook) -> Result<i64> {
    conn.execute(
        "INSERT INTO webhooks (name, url, notes, is_enabled) VALUES (?1, ?2, ?3, ?4)",
        params![webhook.name, webhook.url, webhook.notes, webhook.is_enabled],
    )
    .map_err(db_err)?;
    Ok(conn.last_insert_rowid())
}

pub fn update_webhook(conn: &Connection, webhook: &Webhook) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE webhooks SET name = ?1, url = ?2, notes = ?3, is_enabled = ?4 WHERE id = ?5",
            params![webhook.name, webhook.url, webhook.notes, webhook.is_enabled, webhook.id],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(TimerboardError::NotFound(format!("Webhook #{}", webhook.id)));
    }
    Ok(())
}

fn webhook_from_row(row: &Row<'_>) -> rusqlite::Result<Webhook> {
    Ok(Webhook {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        notes: row.get(3)?,
        is_enabled: row.get(4)?,
    })
}

pub fn get_webhook(conn: &Connection, id: i64) -> Result<Option<Webhook>> {
    conn.query_row(
        "SELECT id, name, url, notes, is_enabled FROM webhooks WHERE id = ?1",
        [id],
        webhook_from_row,
    )
    .optional()
    .map_err(db_err)
}

pub fn list_webhooks(conn: &Connection) -> Result<Vec<Webhook>> {
    let mut stmt = conn
        .prepare("SELECT id, name, url, notes, is_enabled FROM webhooks ORDER BY lower(name)")
        .map_err(db_err)?;
    let rows = stmt.query_map([], webhook_from_row).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

// ─── Timers ──────────────────────────────────────────────

const TIMER_COLUMNS: &str = "id, timer_type, objective, visibility, is_important, is_opsec, date, \
     solar_system, structure_type, structure_name, location_details, owner_name, \
     eve_corporation_id, eve_alliance_id, eve_character_id, user_id, details_notes, \
     details_image_url";

fn timer_from_row(row: &Row<'_>) -> rusqlite::Result<Timer> {
    let date: String = row.get(6)?;
    let solar_system: Option<String> = row.get(7)?;
    Ok(Timer {
        id: row.get(0)?,
        timer_type: code::<TimerType>(row, 1)?,
        objective: code::<Objective>(row, 2)?,
        visibility: code::<Visibility>(row, 3)?,
        is_important: row.get(4)?,
        is_opsec: row.get(5)?,
        date: parse_ts(6, &date)?,
        solar_system: match solar_system {
            Some(raw) => Some(conversion(7, serde_json::from_str(&raw))?),
            None => None,
        },
        structure_type: json(row, 8)?,
        structure_name: row.get(9)?,
        location_details: row.get(10)?,
        owner_name: row.get(11)?,
        eve_corporation_id: row.get(12)?,
        eve_alliance_id: row.get(13)?,
        eve_character_id: row.get(14)?,
        user_id: row.get(15)?,
        details_notes: row.get(16)?,
        details_image_url: row.get(17)?,
    })
}

pub fn insert_timer(conn: &Connection, timer: &Timer) -> Result<i64> {
    let solar_system = timer.solar_system.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO timers (timer_type, objective, visibility, is_important, is_opsec, date,
             solar_system, structure_type, structure_name, location_details, owner_name,
             eve_corporation_id, eve_alliance_id, eve_character_id, user_id, details_notes,
             details_image_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        params![
            timer.timer_type.code(),
            timer.objective.code(),
            timer.visibility.code(),
            timer.is_important,
            timer.is_opsec,
            fmt_ts(timer.date),
            solar_system,
            serde_json::to_string(&timer.structure_type)?,
            timer.structure_name,
            timer.location_details,
            timer.owner_name,
            timer.eve_corporation_id,
            timer.eve_alliance_id,
            timer.eve_character_id,
            timer.user_id,
            timer.details_notes,
            timer.details_image_url,
        ],
    )
    .map_err(db_err)?;
    Ok(conn.last_insert_rowid())
}

pub fn update_timer(conn: &Connection, timer: &Timer) -> Result<()> {
    let solar_system = timer.solar_system.as_ref().map(serde_json::to_string).transpose()?;
    let changed = conn
        .execute(
            "UPDATE timers SET timer_type = ?1, objective = ?2, visibility = ?3,
                 is_important = ?4, is_opsec = ?5, date = ?6, solar_system = ?7,
                 structure_type = ?8, structure_name = ?9, location_details = ?10,
                 owner_name = ?11, eve_corporation_id = ?12, eve_alliance_id = ?13,
                 eve_character_id = ?14, user_id = ?15, details_notes = ?16,
                 details_image_url = ?17
             WHERE id = ?18",
            params![
                timer.timer_type.code(),
                timer.objective.code(),
                timer.visibility.code(),
                timer.is_important,
                timer.is_opsec,
                fmt_ts(timer.date),
                solar_system,
                serde_json::to_string(&timer.structure_type)?,
                timer.structure_name,
                timer.location_details,
                timer.owner_name,
                timer.eve_corporation_id,
                timer.eve_alliance_id,
                timer.eve_character_id,
                timer.user_id,
                timer.details_notes,
                timer.details_image_url,
                timer.id,
            ],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(TimerboardError::NotFound(format!("Timer #{}", timer.id)));
    }
    Ok(())
}

pub fn get_timer(conn: &Connection, id: i64) -> Result<Option<Timer>> {
    conn.query_row(
        &format!("SELECT {TIMER_COLUMNS} FROM timers WHERE id = ?1"),
        [id],
        timer_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Returns true if a row was deleted.
pub fn delete_timer(conn: &Connection, id: i64) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM timers WHERE id = ?1", [id])
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Timers whose date lies after `now`, soonest first.
pub fn future_timers(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Timer>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TIMER_COLUMNS} FROM timers WHERE date > ?1 ORDER BY date"
        ))
        .map_err(db_err)?;
    let rows = stmt.query_map([fmt_ts(now)], timer_from_row).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

/// Delete timers dated before `cutoff`. Returns the number deleted.
pub fn delete_timers_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    conn.execute("DELETE FROM timers WHERE date < ?1", [fmt_ts(cutoff)])
        .map_err(db_err)
}

// ─── Notification rules ──────────────────────────────────────

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRule> {
    Ok(NotificationRule {
        id: row.get(0)?,
        trigger: code::<Trigger>(row, 1)?,
        scheduled_time: row.get(2)?,
        webhook_ids: json(row, 3)?,
        ping_type: code::<PingType>(row, 4)?,
        is_enabled: row.get(5)?,
        clauses: json(row, 6)?,
    })
}

pub fn insert_rule(conn: &Connection, rule: &NotificationRule) -> Result<i64> {
    conn.execute(
        "INSERT INTO notification_rules
             (trigger, scheduled_time, webhook_ids, ping_type, is_enabled, clauses)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            rule.trigger.code(),
            rule.scheduled_time,
            serde_json::to_string(&rule.webhook_ids)?,
            rule.ping_type.code(),
            rule.is_enabled,
            serde_json::to_string(&rule.clauses)?,
        ],
    )
    .map_err(db_err)?;
    Ok(conn.last_insert_rowid())
}

pub fn update_rule(conn: &Connection, rule: &NotificationRule) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE notification_rules SET trigger = ?1, scheduled_time = ?2, webhook_ids = ?3,
                 ping_type = ?4, is_enabled = ?5, clauses = ?6
             WHERE id = ?7",
            params![
                rule.trigger.code(),
                rule.scheduled_time,
                serde_json::to_string(&rule.webhook_ids)?,
                rule.ping_type.code(),
                rule.is_enabled,
                serde_json::to_string(&rule.clauses)?,
                rule.id,
            ],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(TimerboardError::NotFound(format!("Notification rule #{}", rule.id)));
    }
    Ok(())
}

pub fn get_rule(conn: &Connection, id: i64) -> Result<Option<NotificationRule>> {
    conn.query_row(
        "SELECT id, trigger, scheduled_time, webhook_ids, ping_type, is_enabled, clauses
         FROM notification_rules WHERE id = ?1",
        [id],
        rule_from_row,
    )
    .optional()
    .map_err(db_err)
}

pub fn delete_rule(conn: &Connection, id: i64) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM notification_rules WHERE id = ?1", [id])
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Enabled rules with the given trigger.
pub fn enabled_rules(conn: &Connection, trigger: Trigger) -> Result<Vec<NotificationRule>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, trigger, scheduled_time, webhook_ids, ping_type, is_enabled, clauses
             FROM notification_rules WHERE is_enabled = 1 AND trigger = ?1 ORDER BY id",
        )
        .map_err(db_err)?;
    let rows = stmt.query_map([trigger.code()], rule_from_row).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

// ─── Scheduled notifications ──────────────────────────────────

const SCHEDULED_COLUMNS: &str =
    "id, timer_id, rule_id, timer_date, notification_date, task_id, fired_at";

fn scheduled_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledNotification> {
    let timer_date: String = row.get(3)?;
    let notification_date: String = row.get(4)?;
    let fired_at: Option<String> = row.get(6)?;
    Ok(ScheduledNotification {
        id: row.get(0)?,
        timer_id: row.get(1)?,
        rule_id: row.get(2)?,
        timer_date: parse_ts(3, &timer_date)?,
        notification_date: parse_ts(4, &notification_date)?,
        task_id: row.get(5)?,
        fired_at: fired_at.as_deref().map(|s| parse_ts(6, s)).transpose()?,
    })
}

fn query_scheduled<P: rusqlite::Params>(
    conn: &Connection,
    where_clause: &str,
    params: P,
) -> Result<Vec<ScheduledNotification>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SCHEDULED_COLUMNS} FROM scheduled_notifications {where_clause}"
        ))
        .map_err(db_err)?;
    let rows = stmt.query_map(params, scheduled_from_row).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

pub fn get_scheduled(conn: &Connection, id: i64) -> Result<Option<ScheduledNotification>> {
    Ok(query_scheduled(conn, "WHERE id = ?1", [id])?.into_iter().next())
}

pub fn get_scheduled_for_pair(
    conn: &Connection,
    timer_id: i64,
    rule_id: i64,
) -> Result<Option<ScheduledNotification>> {
    Ok(query_scheduled(conn, "WHERE timer_id = ?1 AND rule_id = ?2", [timer_id, rule_id])?
        .into_iter()
        .next())
}

pub fn scheduled_for_timer(conn: &Connection, timer_id: i64) -> Result<Vec<ScheduledNotification>> {
    query_scheduled(conn, "WHERE timer_id = ?1 ORDER BY notification_date", [timer_id])
}

pub fn scheduled_for_rule(conn: &Connection, rule_id: i64) -> Result<Vec<ScheduledNotification>> {
    query_scheduled(conn, "WHERE rule_id = ?1 ORDER BY notification_date", [rule_id])
}

/// Unfired jobs in delivery order.
pub fn pending_scheduled(conn: &Connection) -> Result<Vec<ScheduledNotification>> {
    query_scheduled(conn, "WHERE fired_at IS NULL ORDER BY notification_date", params![])
}

/// Unfired jobs due after `since`, in delivery order.
pub fn pending_scheduled_since(
    conn: &Connection,
    since: DateTime<Utc>,
) -> Result<Vec<ScheduledNotification>> {
    query_scheduled(
        conn,
        "WHERE fired_at IS NULL AND notification_date > ?1 ORDER BY notification_date",
        [fmt_ts(since)],
    )
}

/// Create or refresh the job for a (timer, rule) pair. Clears `fired_at`.
pub fn upsert_scheduled(
    conn: &Connection,
    timer_id: i64,
    rule_id: i64,
    timer_date: DateTime<Utc>,
    notification_date: DateTime<Utc>,
) -> Result<i64> {
    conn.query_row(
        "INSERT INTO scheduled_notifications (timer_id, rule_id, timer_date, notification_date)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (timer_id, rule_id) DO UPDATE SET
             timer_date = excluded.timer_date,
             notification_date = excluded.notification_date,
             fired_at = NULL
         RETURNING id",
        params![timer_id, rule_id, fmt_ts(timer_date), fmt_ts(notification_date)],
        |row| row.get(0),
    )
    .map_err(db_err)
}

pub fn set_task_id(conn: &Connection, id: i64, task_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE scheduled_notifications SET task_id = ?1 WHERE id = ?2",
        params![task_id, id],
    )
    .map_err(db_err)?;
    Ok(())
}

pub fn mark_fired(conn: &Connection, id: i64, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE scheduled_notifications SET fired_at = ?1 WHERE id = ?2",
        params![fmt_ts(at), id],
    )
    .map_err(db_err)?;
    Ok(())
}

fn delete_returning_ids<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt.query_map(params, |row| row.get(0)).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<i64>>>().map_err(db_err)
}

/// Delete the timer's jobs captured for any date other than `timer_date`.
pub fn delete_stale_for_timer(
    conn: &Connection,
    timer_id: i64,
    timer_date: DateTime<Utc>,
) -> Result<Vec<i64>> {
    delete_returning_ids(
        conn,
        "DELETE FROM scheduled_notifications WHERE timer_id = ?1 AND timer_date != ?2 RETURNING id",
        params![timer_id, fmt_ts(timer_date)],
    )
}

/// Delete the rule's unfired jobs for timers dated after `now`.
pub fn delete_future_for_rule(
    conn: &Connection,
    rule_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<i64>> {
    delete_returning_ids(
        conn,
        "DELETE FROM scheduled_notifications
         WHERE rule_id = ?1 AND timer_date > ?2 AND fired_at IS NULL RETURNING id",
        params![rule_id, fmt_ts(now)],
    )
}

pub fn delete_scheduled(conn: &Connection, id: i64) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM scheduled_notifications WHERE id = ?1", [id])
        .map_err(db_err)?;
    Ok(n > 0)
}

pub fn delete_scheduled_for_rule(conn: &Connection, rule_id: i64) -> Result<Vec<i64>> {
    delete_returning_ids(
        conn,
        "DELETE FROM scheduled_notifications WHERE rule_id = ?1 RETURNING id",
        [rule_id],
    )
}

pub fn delete_scheduled_for_timer(conn: &Connection, timer_id: i64) -> Result<Vec<i64>> {
    delete_returning_ids(
        conn,
        "DELETE FROM scheduled_notifications WHERE timer_id = ?1 RETURNING id",
        [timer_id],
    )
}

// ─── Webhook message queues ──────────────────────────────────

/// Push a payload to the tail of a lane. Returns the new lane length.
pub fn queue_push(conn: &Connection, webhook_id: i64, lane: &str, payload: &str) -> Result<usize> {
    conn.execute(
        "INSERT INTO webhook_messages (webhook_id, lane, payload, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![webhook_id, lane, payload, fmt_ts(Utc::now())],
    )
    .map_err(db_err)?;
    queue_len(conn, webhook_id, lane)
}

/// Oldest message of a lane as `(id, payload)`, left in place.
pub fn queue_peek(conn: &Connection, webhook_id: i64, lane: &str) -> Result<Option<(i64, String)>> {
    conn.query_row(
        "SELECT id, payload FROM webhook_messages
         WHERE webhook_id = ?1 AND lane = ?2 ORDER BY id LIMIT 1",
        params![webhook_id, lane],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(db_err)
}

/// Remove one message, typically after it was sent.
pub fn queue_delete(conn: &Connection, id: i64) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM webhook_messages WHERE id = ?1", [id])
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Move one message from the main lane to the error lane.
pub fn queue_park(conn: &Connection, id: i64) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE webhook_messages SET lane = ?2 WHERE id = ?1 AND lane = ?3",
            params![id, LANE_ERROR, LANE_MAIN],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

pub fn queue_len(conn: &Connection, webhook_id: i64, lane: &str) -> Result<usize> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM webhook_messages WHERE webhook_id = ?1 AND lane = ?2",
            params![webhook_id, lane],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(n as usize)
}

/// Messages of a webhook across both lanes.
pub fn queue_backlog(conn: &Connection, webhook_id: i64) -> Result<usize> {
    let n: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM webhook_messages WHERE webhook_id = ?1",
            [webhook_id],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    Ok(n as usize)
}

pub fn queue_clear(conn: &Connection, webhook_id: i64, lane: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM webhook_messages WHERE webhook_id = ?1 AND lane = ?2",
        params![webhook_id, lane],
    )
    .map_err(db_err)
}

/// Move every error-lane message to the tail of the main lane, keeping
/// their relative order. Returns the number moved.
///
/// Two statements: run it inside a transaction.
pub fn queue_requeue_errors(conn: &Connection, webhook_id: i64) -> Result<usize> {
    conn.execute(
        "INSERT INTO webhook_messages (webhook_id, lane, payload, created_at)
         SELECT webhook_id, ?2, payload, created_at FROM webhook_messages
         WHERE webhook_id = ?1 AND lane = ?3 ORDER BY id",
        params![webhook_id, LANE_MAIN, LANE_ERROR],
    )
    .map_err(db_err)?;
    queue_clear(conn, webhook_id, LANE_ERROR)
}
