//! Enumerated dimensions and their display tables.
//!
//! Every dimension a rule can filter on is a closed set of values. Each set
//! carries an ordered `(value, code, label)` table: the code is what gets
//! stored, the label is what operators see. Lookups never guess; an unmapped
//! code is an [`TimerboardError::UnknownChoice`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, TimerboardError};

/// A closed, labelled set of values.
pub trait Choice: Sized + Copy + PartialEq + 'static {
    /// Ordered table of `(value, code, label)`.
    const CHOICES: &'static [(Self, &'static str, &'static str)];

    /// Storage code, e.g. `"AR"`.
    fn code(&self) -> &'static str {
        Self::CHOICES
            .iter()
            .find(|(v, _, _)| v == self)
            .map(|(_, code, _)| *code)
            .unwrap_or("")
    }

    /// Human-readable label, e.g. `"Armor"`.
    fn label(&self) -> &'static str {
        Self::CHOICES
            .iter()
            .find(|(v, _, _)| v == self)
            .map(|(_, _, label)| *label)
            .unwrap_or("")
    }

    fn from_code(code: &str) -> Result<Self> {
        Self::CHOICES
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(v, _, _)| *v)
            .ok_or_else(|| TimerboardError::UnknownChoice(code.to_string()))
    }

    /// All values in display order.
    fn all() -> Vec<Self> {
        Self::CHOICES.iter().map(|(v, _, _)| *v).collect()
    }
}

/// Label for a stored code of dimension `C`.
pub fn label_for<C: Choice>(code: &str) -> Result<&'static str> {
    C::from_code(code).map(|v| v.label())
}

/// Kind of structure timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimerType {
    #[serde(rename = "NO")]
    None,
    #[serde(rename = "AR")]
    Armor,
    #[serde(rename = "HL")]
    Hull,
    #[serde(rename = "FI")]
    Final,
    #[serde(rename = "AN")]
    Anchoring,
    #[serde(rename = "UA")]
    Unanchoring,
    #[serde(rename = "MM")]
    MoonMining,
}

impl Choice for TimerType {
    const CHOICES: &'static [(Self, &'static str, &'static str)] = &[
        (TimerType::None, "NO", "Unspecified"),
        (TimerType::Armor, "AR", "Armor"),
        (TimerType::Hull, "HL", "Hull"),
        (TimerType::Final, "FI", "Final"),
        (TimerType::Anchoring, "AN", "Anchoring"),
        (TimerType::Unanchoring, "UA", "Unanchoring"),
        (TimerType::MoonMining, "MM", "Moon Mining"),
    ];
}

/// Our stance towards the structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Objective {
    #[serde(rename = "UN")]
    Undefined,
    #[serde(rename = "HO")]
    Hostile,
    #[serde(rename = "FR")]
    Friendly,
    #[serde(rename = "NE")]
    Neutral,
}

impl Choice for Objective {
    const CHOICES: &'static [(Self, &'static str, &'static str)] = &[
        (Objective::Undefined, "UN", "undefined"),
        (Objective::Hostile, "HO", "hostile"),
        (Objective::Friendly, "FR", "friendly"),
        (Objective::Neutral, "NE", "neutral"),
    ];
}

/// Who may see a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Visibility {
    #[serde(rename = "UN")]
    Unrestricted,
    #[serde(rename = "AL")]
    AllianceOnly,
    #[serde(rename = "CO")]
    CorporationOnly,
}

impl Choice for Visibility {
    const CHOICES: &'static [(Self, &'static str, &'static str)] = &[
        (Visibility::Unrestricted, "UN", "unrestricted"),
        (Visibility::AllianceOnly, "AL", "Alliance only"),
        (Visibility::CorporationOnly, "CO", "Corporation only"),
    ];
}

/// Security classification of the timer's solar system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpaceType {
    #[serde(rename = "HS")]
    HighSec,
    #[serde(rename = "LS")]
    LowSec,
    #[serde(rename = "NS")]
    NullSec,
    #[serde(rename = "WH")]
    Wormhole,
}

impl Choice for SpaceType {
    const CHOICES: &'static [(Self, &'static str, &'static str)] = &[
        (SpaceType::HighSec, "HS", "High Sec"),
        (SpaceType::LowSec, "LS", "Low Sec"),
        (SpaceType::NullSec, "NS", "Null Sec"),
        (SpaceType::Wormhole, "WH", "W-Space"),
    ];
}

/// Mention prepended to every notification of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PingType {
    #[default]
    #[serde(rename = "PN")]
    None,
    #[serde(rename = "PH")]
    Here,
    #[serde(rename = "PE")]
    Everyone,
}

impl Choice for PingType {
    const CHOICES: &'static [(Self, &'static str, &'static str)] = &[
        (PingType::None, "PN", "(no ping)"),
        (PingType::Here, "PH", "@here"),
        (PingType::Everyone, "PE", "@everyone"),
    ];
}

impl PingType {
    /// Text to put in front of the message content.
    pub fn ping_text(&self) -> &'static str {
        match self {
            PingType::None => "",
            PingType::Here => "@here",
            PingType::Everyone => "@everyone",
        }
    }
}

/// When a rule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Trigger {
    /// A fixed number of minutes before the timer's date.
    #[default]
    #[serde(rename = "ST")]
    ScheduledTime,
    /// Once, right after a matching timer is created.
    #[serde(rename = "NT")]
    NewTimer,
}

impl Choice for Trigger {
    const CHOICES: &'static [(Self, &'static str, &'static str)] = &[
        (Trigger::ScheduledTime, "ST", "Scheduled time reached"),
        (Trigger::NewTimer, "NT", "New timer created"),
    ];
}

/// Tri-state clause over a boolean timer flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Clause {
    #[default]
    #[serde(rename = "AN")]
    Any,
    #[serde(rename = "RQ")]
    Required,
    #[serde(rename = "EX")]
    Excluded,
}

impl Choice for Clause {
    const CHOICES: &'static [(Self, &'static str, &'static str)] = &[
        (Clause::Any, "AN", "any"),
        (Clause::Required, "RQ", "required"),
        (Clause::Excluded, "EX", "excluded"),
    ];
}

impl Clause {
    pub fn accepts(&self, flag: bool) -> bool {
        match self {
            Clause::Any => true,
            Clause::Required => flag,
            Clause::Excluded => !flag,
        }
    }
}
