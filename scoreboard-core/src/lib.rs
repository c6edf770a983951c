//! # scoreboard-core: Team scores shared by relay and clients
//!
//! Pure data: no I/O, no async. Both sides of the sync layer agree on these
//! types and on the arithmetic that turns an admin action into a new
//! snapshot.
//!
//! ## Modules
//!
//! - [`team`]: closed set of team identifiers, [`Team`], [`ScoreAction`]
//! - [`snapshot`]: [`ScoreSnapshot`], the unit of exchange on the wire

pub mod snapshot;
pub mod team;

use thiserror::Error;

pub use snapshot::ScoreSnapshot;
pub use team::{ScoreAction, Team, TeamId};

/// Errors raised while parsing or checking score data.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("unknown team identifier: {0}")]
    UnknownTeam(String),
    #[error("unknown score action: {0}")]
    UnknownAction(String),
    #[error("team {team} has negative points ({points})")]
    NegativePoints { team: TeamId, points: i64 },
    #[error("team {0} appears more than once")]
    DuplicateTeam(TeamId),
    #[error("team {0} is missing")]
    MissingTeam(TeamId),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
