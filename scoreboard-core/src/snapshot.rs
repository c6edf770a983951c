//! The full five-team score set exchanged between relay and clients.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::team::{ScoreAction, Team, TeamId};
use crate::SnapshotError;

/// Ordered sequence of teams. Always travels whole, never as a delta.
///
/// Serialized as a bare JSON array of team objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreSnapshot {
    teams: Vec<Team>,
}

impl Default for ScoreSnapshot {
    /// Every team at zero with its default name.
    fn default() -> Self {
        Self {
            teams: TeamId::ALL.into_iter().map(Team::zeroed).collect(),
        }
    }
}

impl ScoreSnapshot {
    pub fn new(teams: Vec<Team>) -> Self {
        Self { teams }
    }

    /// Snapshot with no teams at all.
    pub fn empty() -> Self {
        Self { teams: Vec::new() }
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn len(&self) -> usize {
        self.teams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.teams.is_empty()
    }

    pub fn get(&self, id: TeamId) -> Option<&Team> {
        self.teams.iter().find(|t| t.id == id)
    }

    /// Points for `id`, if that team is present.
    pub fn points(&self, id: TeamId) -> Option<i64> {
        self.get(id).map(|t| t.points)
    }

    /// Apply `action` to the team matching `id` and return the resulting
    /// snapshot. Other teams are copied unchanged. If no team matches, the
    /// result equals `self`.
    pub fn apply(&self, id: TeamId, action: ScoreAction, value: Option<i64>) -> Self {
        let teams = self
            .teams
            .iter()
            .map(|team| {
                if team.id == id {
                    Team {
                        points: action.apply(team.points, value),
                        ..team.clone()
                    }
                } else {
                    team.clone()
                }
            })
            .collect();
        Self { teams }
    }

    /// Copy of this snapshot with every team at zero.
    pub fn reset(&self) -> Self {
        let teams = self
            .teams
            .iter()
            .map(|team| Team {
                points: 0,
                ..team.clone()
            })
            .collect();
        Self { teams }
    }

    pub fn total_points(&self) -> i64 {
        self.teams.iter().map(|t| t.points).sum()
    }

    /// Team with the most points. On a tie the later team wins, which is
    /// what the scoreboard header has always shown.
    pub fn leader(&self) -> Option<&Team> {
        self.teams
            .iter()
            .reduce(|best, next| if best.points > next.points { best } else { next })
    }

    /// Check the invariants a well-behaved client upholds: no negative
    /// points, no duplicate identifiers, all five identifiers present.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut seen = HashSet::with_capacity(self.teams.len());
        for team in &self.teams {
            if team.points < 0 {
                return Err(SnapshotError::NegativePoints {
                    team: team.id,
                    points: team.points,
                });
            }
            if !seen.insert(team.id) {
                return Err(SnapshotError::DuplicateTeam(team.id));
            }
        }
        if let Some(missing) = TeamId::ALL.into_iter().find(|id| !seen.contains(id)) {
            return Err(SnapshotError::MissingTeam(missing));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<'a> IntoIterator for &'a ScoreSnapshot {
    type Item = &'a Team;
    type IntoIter = std::slice::Iter<'a, Team>;

    fn into_iter(self) -> Self::IntoIter {
        self.teams.iter()
    }
}
