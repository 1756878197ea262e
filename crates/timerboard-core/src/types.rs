//! Data model: timers, notification rules and the jobs linking them.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::choices::{
    Choice, Clause, Objective, PingType, SpaceType, TimerType, Trigger, Visibility,
};
use crate::error::{Result, TimerboardError};

/// Region ids at or above this value are wormhole space.
const WORMHOLE_REGION_IDS: std::ops::Range<i64> = 11_000_000..12_000_000;

/// A solar system with the region it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarSystem {
    pub id: i64,
    pub name: String,
    pub security_status: f64,
    pub region_id: i64,
    pub region_name: String,
}

impl SolarSystem {
    /// Classify by security status, rounded to one decimal as shown in game.
    pub fn space_type(&self) -> SpaceType {
        if WORMHOLE_REGION_IDS.contains(&self.region_id) {
            return SpaceType::Wormhole;
        }
        let rounded = (self.security_status * 10.0).round() / 10.0;
        if rounded >= 0.5 {
            SpaceType::HighSec
        } else if rounded > 0.0 {
            SpaceType::LowSec
        } else {
            SpaceType::NullSec
        }
    }
}

/// Type of the structure a timer is about (Astrahus, Fortizar, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureType {
    pub id: i64,
    pub name: String,
}

impl StructureType {
    pub fn icon_url(&self, size: u32) -> String {
        format!("https://images.evetech.net/types/{}/icon?size={}", self.id, size)
    }
}

/// A future in-game structure event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    /// Assigned by the store; 0 until inserted.
    pub id: i64,
    pub timer_type: TimerType,
    pub objective: Objective,
    pub visibility: Visibility,
    pub is_important: bool,
    pub is_opsec: bool,
    pub date: DateTime<Utc>,
    pub solar_system: Option<SolarSystem>,
    pub structure_type: StructureType,
    #[serde(default)]
    pub structure_name: String,
    #[serde(default)]
    pub location_details: String,
    pub owner_name: Option<String>,
    /// Creator's corporation.
    pub eve_corporation_id: Option<i64>,
    /// Creator's alliance.
    pub eve_alliance_id: Option<i64>,
    pub eve_character_id: Option<i64>,
    pub user_id: Option<i64>,
    #[serde(default)]
    pub details_notes: String,
    pub details_image_url: Option<String>,
}

impl Timer {
    /// A timer with only the required fields set; everything else neutral.
    pub fn new(timer_type: TimerType, structure_type: StructureType, date: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            timer_type,
            objective: Objective::Undefined,
            visibility: Visibility::Unrestricted,
            is_important: false,
            is_opsec: false,
            date,
            solar_system: None,
            structure_type,
            structure_name: String::new(),
            location_details: String::new(),
            owner_name: None,
            eve_corporation_id: None,
            eve_alliance_id: None,
            eve_character_id: None,
            user_id: None,
            details_notes: String::new(),
            details_image_url: None,
        }
    }

    pub fn region_id(&self) -> Option<i64> {
        self.solar_system.as_ref().map(|s| s.region_id)
    }

    pub fn space_type(&self) -> Option<SpaceType> {
        self.solar_system.as_ref().map(SolarSystem::space_type)
    }

    /// e.g. `Astrahus "Home" in Jita near Planet 4`.
    pub fn structure_display_name(&self) -> String {
        let mut text = self.structure_type.name.clone();
        if !self.structure_name.is_empty() {
            text.push_str(&format!(" \"{}\"", self.structure_name));
        }
        if let Some(system) = &self.solar_system {
            text.push_str(&format!(" in {}", system.name));
        }
        if !self.location_details.is_empty() {
            text.push_str(&format!(" near {}", self.location_details));
        }
        text
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} timer for {} @ {}",
            self.timer_type.label(),
            self.structure_display_name(),
            self.date.format(DATETIME_FORMAT)
        )
    }
}

/// Date format used in messages and listings.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A chat webhook messages are delivered to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub notes: Option<String>,
    pub is_enabled: bool,
}

impl Webhook {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            url: url.to_string(),
            notes: None,
            is_enabled: true,
        }
    }
}

impl std::fmt::Display for Webhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Require/exclude clauses of a notification rule.
///
/// An empty set imposes no constraint, so the default value matches every
/// timer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleClauses {
    #[serde(default)]
    pub require_timer_types: BTreeSet<TimerType>,
    #[serde(default)]
    pub exclude_timer_types: BTreeSet<TimerType>,
    #[serde(default)]
    pub require_objectives: BTreeSet<Objective>,
    #[serde(default)]
    pub exclude_objectives: BTreeSet<Objective>,
    #[serde(default)]
    pub require_corporations: BTreeSet<i64>,
    #[serde(default)]
    pub exclude_corporations: BTreeSet<i64>,
    #[serde(default)]
    pub require_alliances: BTreeSet<i64>,
    #[serde(default)]
    pub exclude_alliances: BTreeSet<i64>,
    #[serde(default)]
    pub require_regions: BTreeSet<i64>,
    #[serde(default)]
    pub exclude_regions: BTreeSet<i64>,
    #[serde(default)]
    pub require_space_types: BTreeSet<SpaceType>,
    #[serde(default)]
    pub exclude_space_types: BTreeSet<SpaceType>,
    #[serde(default)]
    pub require_visibility: BTreeSet<Visibility>,
    #[serde(default)]
    pub exclude_visibility: BTreeSet<Visibility>,
    #[serde(default)]
    pub is_important: Clause,
    #[serde(default)]
    pub is_opsec: Clause,
}

impl RuleClauses {
    /// Reject any dimension where a value is both required and excluded.
    pub fn validate(&self) -> Result<()> {
        check_disjoint(
            "require_timer_types",
            &self.require_timer_types,
            "exclude_timer_types",
            &self.exclude_timer_types,
            |v| v.label().to_string(),
        )?;
        check_disjoint(
            "require_objectives",
            &self.require_objectives,
            "exclude_objectives",
            &self.exclude_objectives,
            |v| v.label().to_string(),
        )?;
        check_disjoint(
            "require_visibility",
            &self.require_visibility,
            "exclude_visibility",
            &self.exclude_visibility,
            |v| v.label().to_string(),
        )?;
        check_disjoint(
            "require_corporations",
            &self.require_corporations,
            "exclude_corporations",
            &self.exclude_corporations,
            |v| v.to_string(),
        )?;
        check_disjoint(
            "require_alliances",
            &self.require_alliances,
            "exclude_alliances",
            &self.exclude_alliances,
            |v| v.to_string(),
        )?;
        check_disjoint(
            "require_regions",
            &self.require_regions,
            "exclude_regions",
            &self.exclude_regions,
            |v| v.to_string(),
        )?;
        check_disjoint(
            "require_space_types",
            &self.require_space_types,
            "exclude_space_types",
            &self.exclude_space_types,
            |v| v.label().to_string(),
        )
    }

    /// One line per active clause, e.g. `Require timer types = Armor, Hull`.
    pub fn summary(&self) -> Vec<String> {
        let mut lines = Vec::new();
        push_clause(&mut lines, "require_timer_types", &self.require_timer_types, |v| v.label().into());
        push_clause(&mut lines, "exclude_timer_types", &self.exclude_timer_types, |v| v.label().into());
        push_clause(&mut lines, "require_objectives", &self.require_objectives, |v| v.label().into());
        push_clause(&mut lines, "exclude_objectives", &self.exclude_objectives, |v| v.label().into());
        push_clause(&mut lines, "require_visibility", &self.require_visibility, |v| v.label().into());
        push_clause(&mut lines, "exclude_visibility", &self.exclude_visibility, |v| v.label().into());
        push_clause(&mut lines, "require_space_types", &self.require_space_types, |v| v.label().into());
        push_clause(&mut lines, "exclude_space_types", &self.exclude_space_types, |v| v.label().into());
        push_clause(&mut lines, "require_corporations", &self.require_corporations, |v| v.to_string());
        push_clause(&mut lines, "exclude_corporations", &self.exclude_corporations, |v| v.to_string());
        push_clause(&mut lines, "require_alliances", &self.require_alliances, |v| v.to_string());
        push_clause(&mut lines, "exclude_alliances", &self.exclude_alliances, |v| v.to_string());
        push_clause(&mut lines, "require_regions", &self.require_regions, |v| v.to_string());
        push_clause(&mut lines, "exclude_regions", &self.exclude_regions, |v| v.to_string());
        if self.is_important != Clause::Any {
            lines.push(format!("Is important = {}", self.is_important.label()));
        }
        if self.is_opsec != Clause::Any {
            lines.push(format!("Is opsec = {}", self.is_opsec.label()));
        }
        lines
    }
}

/// `require_timer_types` → `Require timer types`.
fn make_nice(name: &str) -> String {
    let spaced = name.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn check_disjoint<T: Ord>(
    name_1: &str,
    set_1: &BTreeSet<T>,
    name_2: &str,
    set_2: &BTreeSet<T>,
    display: impl Fn(&T) -> String,
) -> Result<()> {
    let same: Vec<String> = set_1.intersection(set_2).map(display).collect();
    if same.is_empty() {
        return Ok(());
    }
    Err(TimerboardError::Validation(format!(
        "Can not choose same options for {} & {}: {}",
        make_nice(name_1),
        make_nice(name_2),
        same.join(", ")
    )))
}

fn push_clause<T>(
    lines: &mut Vec<String>,
    name: &str,
    set: &BTreeSet<T>,
    display: impl Fn(&T) -> String,
) {
    if !set.is_empty() {
        let text: Vec<String> = set.iter().map(display).collect();
        lines.push(format!("{} = {}", make_nice(name), text.join(", ")));
    }
}

/// A named matching policy plus delivery parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: i64,
    pub trigger: Trigger,
    /// Minutes before the timer's date; only used by [`Trigger::ScheduledTime`].
    pub scheduled_time: u32,
    pub webhook_ids: Vec<i64>,
    pub ping_type: PingType,
    pub is_enabled: bool,
    pub clauses: RuleClauses,
}

impl NotificationRule {
    /// Enabled offset rule with no clauses.
    pub fn scheduled(minutes: u32, webhook_ids: Vec<i64>) -> Self {
        Self {
            id: 0,
            trigger: Trigger::ScheduledTime,
            scheduled_time: minutes,
            webhook_ids,
            ping_type: PingType::None,
            is_enabled: true,
            clauses: RuleClauses::default(),
        }
    }

    /// Enabled creation rule with no clauses.
    pub fn on_new_timer(webhook_ids: Vec<i64>) -> Self {
        Self {
            trigger: Trigger::NewTimer,
            scheduled_time: 0,
            ..Self::scheduled(0, webhook_ids)
        }
    }

    pub fn offset(&self) -> Duration {
        Duration::minutes(i64::from(self.scheduled_time))
    }

    /// `timer_date - offset`.
    pub fn notification_date(&self, timer_date: DateTime<Utc>) -> DateTime<Utc> {
        timer_date - self.offset()
    }

    pub fn validate(&self) -> Result<()> {
        self.clauses.validate()
    }
}

impl std::fmt::Display for NotificationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Notification Rule #{}", self.id)
    }
}

/// A pending job linking one timer to one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: i64,
    pub timer_id: i64,
    pub rule_id: i64,
    /// Timer date captured when the job was scheduled.
    pub timer_date: DateTime<Utc>,
    pub notification_date: DateTime<Utc>,
    /// Id of the deferred task expected to fire this job.
    pub task_id: String,
    pub fired_at: Option<DateTime<Utc>>,
}

/// Rich embed attached to an outbound message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
}

/// A single queued payload for one webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl OutboundMessage {
    pub fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            ..Self::default()
        }
    }

    /// A message must carry text content or at least one embed.
    pub fn validate(&self) -> Result<()> {
        let has_content = self.content.as_deref().is_some_and(|c| !c.is_empty());
        if !has_content && self.embeds.is_empty() {
            return Err(TimerboardError::InvalidMessage(
                "Message must have content or embeds to be valid".into(),
            ));
        }
        Ok(())
    }
}
