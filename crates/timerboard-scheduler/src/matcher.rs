//! Rule matcher: decides whether a notification rule applies to a timer.
//!
//! Every dimension is checked in a fixed order and the first failing clause
//! ends the evaluation. An empty set imposes no constraint, so a rule with
//! no clauses matches every timer.

use std::collections::BTreeSet;

use timerboard_core::types::{NotificationRule, Timer};

/// True if `rule` accepts `timer`. Pure; the enabled flag is not consulted.
pub fn matches(rule: &NotificationRule, timer: &Timer) -> bool {
    let c = &rule.clauses;
    accepts(&c.require_timer_types, &c.exclude_timer_types, Some(&timer.timer_type))
        && accepts(&c.require_objectives, &c.exclude_objectives, Some(&timer.objective))
        && accepts(
            &c.require_corporations,
            &c.exclude_corporations,
            timer.eve_corporation_id.as_ref(),
        )
        && accepts(
            &c.require_alliances,
            &c.exclude_alliances,
            timer.eve_alliance_id.as_ref(),
        )
        && accepts(&c.require_regions, &c.exclude_regions, timer.region_id().as_ref())
        && accepts(
            &c.require_space_types,
            &c.exclude_space_types,
            timer.space_type().as_ref(),
        )
        && accepts(&c.require_visibility, &c.exclude_visibility, Some(&timer.visibility))
        && c.is_important.accepts(timer.is_important)
        && c.is_opsec.accepts(timer.is_opsec)
}

/// One require/exclude pair. A missing value never satisfies a non-empty
/// require set and is never excluded.
fn accepts<T: Ord>(require: &BTreeSet<T>, exclude: &BTreeSet<T>, value: Option<&T>) -> bool {
    if !require.is_empty() && !value.is_some_and(|v| require.contains(v)) {
        return false;
    }
    if !exclude.is_empty() && value.is_some_and(|v| exclude.contains(v)) {
        return false;
    }
    true
}

/// Rules from `rules` that are enabled and accept `timer`.
pub fn matching_rules<'a>(
    rules: &'a [NotificationRule],
    timer: &'a Timer,
) -> impl Iterator<Item = &'a NotificationRule> + 'a {
    rules.iter().filter(move |r| r.is_enabled && matches(r, timer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use timerboard_core::choices::{Clause, Objective, SpaceType, TimerType, Visibility};
    use timerboard_core::types::{SolarSystem, StructureType};

    fn timer(timer_type: TimerType, objective: Objective) -> Timer {
        let mut t = Timer::new(
            timer_type,
            StructureType { id: 35832, name: "Astrahus".into() },
            Utc::now(),
        );
        t.objective = objective;
        t
    }

    fn all_timers() -> Vec<Timer> {
        let mut timers = Vec::new();
        for timer_type in [TimerType::Armor, TimerType::Hull, TimerType::Final] {
            for objective in [Objective::Friendly, Objective::Hostile, Objective::Undefined] {
                let mut t = timer(timer_type, objective);
                t.is_important = timer_type == TimerType::Hull;
                t.is_opsec = objective == Objective::Hostile;
                timers.push(t);
            }
        }
        timers
    }

    fn in_system(mut t: Timer, security_status: f64, region_id: i64) -> Timer {
        t.solar_system = Some(SolarSystem {
            id: 30002187,
            name: "Amarr".into(),
            security_status,
            region_id,
            region_name: "Domain".into(),
        });
        t
    }

    #[test]
    fn test_empty_rule_matches_everything() {
        let rule = NotificationRule::scheduled(10, vec![]);
        for t in all_timers() {
            assert!(matches(&rule, &t), "should match {t}");
        }
        assert!(matches(&rule, &in_system(timer(TimerType::None, Objective::Neutral), -1.0, 11000001)));
    }

    #[test]
    fn test_require_is_membership() {
        let mut rule = NotificationRule::scheduled(10, vec![]);
        rule.clauses.require_timer_types.insert(TimerType::Armor);
        for t in all_timers() {
            assert_eq!(matches(&rule, &t), t.timer_type == TimerType::Armor);
        }
    }

    #[test]
    fn test_exclude_is_complement() {
        let mut rule = NotificationRule::scheduled(10, vec![]);
        rule.clauses.exclude_objectives.insert(Objective::Hostile);
        for t in all_timers() {
            assert_eq!(matches(&rule, &t), t.objective != Objective::Hostile);
        }
    }

    #[test]
    fn test_tightening_never_widens() {
        let mut loose = NotificationRule::scheduled(10, vec![]);
        loose.clauses.require_timer_types.insert(TimerType::Armor);
        loose.clauses.require_timer_types.insert(TimerType::Hull);

        let mut tight = loose.clone();
        tight.clauses.exclude_objectives.insert(Objective::Friendly);
        tight.clauses.is_important = Clause::Required;

        for t in all_timers() {
            if !matches(&loose, &t) {
                assert!(!matches(&tight, &t), "tightened rule widened for {t}");
            }
        }
    }

    #[test]
    fn test_tri_state_flags() {
        let mut rule = NotificationRule::scheduled(10, vec![]);
        rule.clauses.is_opsec = Clause::Excluded;
        for t in all_timers() {
            assert_eq!(matches(&rule, &t), !t.is_opsec);
        }
        rule.clauses.is_opsec = Clause::Any;
        rule.clauses.is_important = Clause::Required;
        for t in all_timers() {
            assert_eq!(matches(&rule, &t), t.is_important);
        }
    }

    #[test]
    fn test_relationship_dimensions_by_id() {
        let mut t = timer(TimerType::Armor, Objective::Friendly);
        t.eve_corporation_id = Some(98000001);

        let mut rule = NotificationRule::scheduled(10, vec![]);
        rule.clauses.require_corporations.insert(98000001);
        assert!(matches(&rule, &t));

        t.eve_corporation_id = Some(98000002);
        assert!(!matches(&rule, &t));

        // no creator corporation never satisfies a require clause
        t.eve_corporation_id = None;
        assert!(!matches(&rule, &t));

        let mut rule = NotificationRule::scheduled(10, vec![]);
        rule.clauses.exclude_alliances.insert(99000001);
        assert!(matches(&rule, &t));
        t.eve_alliance_id = Some(99000001);
        assert!(!matches(&rule, &t));
    }

    #[test]
    fn test_region_and_space_type() {
        let highsec = in_system(timer(TimerType::Armor, Objective::Friendly), 1.0, 10000043);
        let wormhole = in_system(timer(TimerType::Armor, Objective::Friendly), -1.0, 11000001);
        let unknown = timer(TimerType::Armor, Objective::Friendly);

        let mut rule = NotificationRule::scheduled(10, vec![]);
        rule.clauses.require_regions.insert(10000043);
        assert!(matches(&rule, &highsec));
        assert!(!matches(&rule, &wormhole));
        assert!(!matches(&rule, &unknown));

        let mut rule = NotificationRule::scheduled(10, vec![]);
        rule.clauses.exclude_space_types.insert(SpaceType::Wormhole);
        assert!(matches(&rule, &highsec));
        assert!(!matches(&rule, &wormhole));
        assert!(matches(&rule, &unknown));
    }

    #[test]
    fn test_visibility() {
        let mut t = timer(TimerType::Hull, Objective::Hostile);
        let mut rule = NotificationRule::scheduled(10, vec![]);
        rule.clauses.require_visibility.insert(Visibility::Unrestricted);
        assert!(matches(&rule, &t));
        t.visibility = Visibility::CorporationOnly;
        assert!(!matches(&rule, &t));
    }

    #[test]
    fn test_matching_rules_skips_disabled() {
        let t = timer(TimerType::Armor, Objective::Friendly);
        let mut disabled = NotificationRule::scheduled(10, vec![]);
        disabled.is_enabled = false;
        let rules = vec![NotificationRule::scheduled(5, vec![]), disabled];
        assert_eq!(matching_rules(&rules, &t).count(), 1);
    }
}
