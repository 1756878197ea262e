//! Deletion of obsolete timers.

use chrono::{DateTime, Duration, Utc};
use timerboard_core::config::RetentionConfig;
use timerboard_core::error::Result;

use crate::persistence::{self, TimerboardDb};

/// Delete timers whose date is older than the configured age. Their
/// scheduled notifications go with them. Returns the number deleted.
pub fn delete_obsolete_timers(
    db: &TimerboardDb,
    config: &RetentionConfig,
    now: DateTime<Utc>,
) -> Result<usize> {
    let days = i64::from(config.timers_obsolete_after_days.max(1));
    let cutoff = now - Duration::days(days);
    let deleted = db.with_transaction(|tx| persistence::delete_timers_before(tx, cutoff))?;
    if deleted > 0 {
        tracing::info!("🧹 Deleted {deleted} obsolete timer(s) older than {days} day(s)");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;
    use timerboard_core::choices::TimerType;
    use timerboard_core::types::{StructureType, Timer};

    fn add_timer(db: &TimerboardDb, date: DateTime<Utc>) -> i64 {
        let timer = Timer::new(
            TimerType::Hull,
            StructureType { id: 35833, name: "Fortizar".into() },
            date,
        );
        db.with_conn(|c| persistence::insert_timer(c, &timer)).unwrap()
    }

    #[test]
    fn test_deletes_only_obsolete() {
        let db = TimerboardDb::open_in_memory().unwrap();
        let now = Utc::now().trunc_subsecs(0);
        let old = add_timer(&db, now - Duration::days(31));
        let recent = add_timer(&db, now - Duration::days(29));
        let future = add_timer(&db, now + Duration::days(1));

        let config = RetentionConfig { timers_obsolete_after_days: 30 };
        assert_eq!(delete_obsolete_timers(&db, &config, now).unwrap(), 1);
        assert!(db.get_timer(old).unwrap().is_none());
        assert!(db.get_timer(recent).unwrap().is_some());
        assert!(db.get_timer(future).unwrap().is_some());
    }

    #[test]
    fn test_zero_days_is_treated_as_one() {
        let db = TimerboardDb::open_in_memory().unwrap();
        let now = Utc::now().trunc_subsecs(0);
        let half_day_old = add_timer(&db, now - Duration::hours(12));
        let config = RetentionConfig { timers_obsolete_after_days: 0 };
        assert_eq!(delete_obsolete_timers(&db, &config, now).unwrap(), 0);
        assert!(db.get_timer(half_day_old).unwrap().is_some());
    }
}
