//! Team identity and per-team score arithmetic.
//!
//! The five identifiers form a closed set. Anything that varies per team
//! (display name, icon) is an exhaustive `match` on [`TeamId`], so there is
//! no lookup that can miss at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SnapshotError;

/// One of the five fixed team identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeamId {
    Fire,
    Earth,
    Air,
    Water,
    Lightning,
}

impl TeamId {
    /// All identifiers, in display order.
    pub const ALL: [TeamId; 5] = [
        TeamId::Fire,
        TeamId::Earth,
        TeamId::Air,
        TeamId::Water,
        TeamId::Lightning,
    ];

    /// Wire token for this identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            TeamId::Fire => "fire",
            TeamId::Earth => "earth",
            TeamId::Air => "air",
            TeamId::Water => "water",
            TeamId::Lightning => "lightning",
        }
    }

    /// Name shown on the shared displays when nothing else was configured.
    pub fn default_name(self) -> &'static str {
        match self {
            TeamId::Fire => "Feu",
            TeamId::Earth => "Terre",
            TeamId::Air => "Air",
            TeamId::Water => "Eau",
            TeamId::Lightning => "Foudre",
        }
    }

    /// Icon key used by the card renderer.
    pub fn icon(self) -> &'static str {
        match self {
            TeamId::Fire => "fire",
            TeamId::Earth => "earth",
            TeamId::Air => "airVent",
            TeamId::Water => "droplet",
            TeamId::Lightning => "cloudLightning",
        }
    }

    /// Theme color key.
    pub fn color(self) -> &'static str {
        self.as_str()
    }

    /// Card background gradient, as utility classes.
    pub fn gradient(self) -> &'static str {
        match self {
            TeamId::Fire => "from-orange-600/60 to-red-700/60",
            TeamId::Earth => "from-amber-600/60 to-amber-800/60",
            TeamId::Air => "from-sky-400/60 to-blue-500/60",
            TeamId::Water => "from-blue-500/60 to-blue-700/60",
            TeamId::Lightning => "from-purple-500/60 to-purple-700/60",
        }
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TeamId {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TeamId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| SnapshotError::UnknownTeam(s.to_string()))
    }
}

/// Score mutation requested by the admin panel.
///
/// `Set`, `IncrementBy` and `DecrementBy` read the optional value passed
/// alongside the action; the others ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreAction {
    Increment,
    Decrement,
    Set,
    IncrementBy,
    DecrementBy,
}

impl ScoreAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ScoreAction::Increment => "INCREMENT",
            ScoreAction::Decrement => "DECREMENT",
            ScoreAction::Set => "SET",
            ScoreAction::IncrementBy => "INCREMENT_BY",
            ScoreAction::DecrementBy => "DECREMENT_BY",
        }
    }

    /// Compute the new point total. Never returns a negative value.
    ///
    /// A missing value counts as zero for the `*_BY` actions and leaves the
    /// total untouched for `SET`.
    pub fn apply(self, points: i64, value: Option<i64>) -> i64 {
        let next = match self {
            ScoreAction::Increment => points.saturating_add(1),
            ScoreAction::Decrement => points.saturating_sub(1),
            ScoreAction::Set => value.unwrap_or(points),
            ScoreAction::IncrementBy => points.saturating_add(value.unwrap_or(0)),
            ScoreAction::DecrementBy => points.saturating_sub(value.unwrap_or(0)),
        };
        next.max(0)
    }
}

impl fmt::Display for ScoreAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScoreAction {
    type Err = SnapshotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCREMENT" => Ok(ScoreAction::Increment),
            "DECREMENT" => Ok(ScoreAction::Decrement),
            "SET" => Ok(ScoreAction::Set),
            "INCREMENT_BY" => Ok(ScoreAction::IncrementBy),
            "DECREMENT_BY" => Ok(ScoreAction::DecrementBy),
            other => Err(SnapshotError::UnknownAction(other.to_string())),
        }
    }
}

/// A team and its current score.
///
/// Unknown fields (older clients also sent `color` and `icon`) are ignored
/// when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub points: i64,
}

impl Team {
    pub fn new(id: TeamId, name: impl Into<String>, points: i64) -> Self {
        Self {
            id,
            name: name.into(),
            points,
        }
    }

    /// Zero-score team with the default display name.
    pub fn zeroed(id: TeamId) -> Self {
        Self::new(id, id.default_name(), 0)
    }
}
