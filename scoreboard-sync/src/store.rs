//! Authoritative in-memory score state held by the relay.
//!
//! Single writer: the store is owned by the relay's sequencing task and is
//! never shared, so it needs no locking of its own.

use scoreboard_core::ScoreSnapshot;

/// The relay's copy of the scores. Starts empty and is replaced wholesale
/// by every accepted update. Nothing is written to disk.
#[derive(Debug, Default)]
pub struct ScoreStore {
    current: Option<ScoreSnapshot>,
    /// Number of snapshots accepted since start.
    version: u64,
}

impl ScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the authoritative snapshot. No merge, no validation.
    /// Returns the new version number.
    pub fn replace(&mut self, snapshot: ScoreSnapshot) -> u64 {
        self.current = Some(snapshot);
        self.version += 1;
        self.version
    }

    /// Current snapshot, or `None` before the first update.
    pub fn current(&self) -> Option<&ScoreSnapshot> {
        self.current.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoreboard_core::{ScoreAction, Team, TeamId};

    #[test]
    fn test_store_starts_empty() {
        let store = ScoreStore::new();
        assert!(store.current().is_none());
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn test_replace_is_wholesale() {
        let mut store = ScoreStore::new();
        let first = ScoreSnapshot::default().apply(TeamId::Fire, ScoreAction::Set, Some(4));
        store.replace(first);

        // A later, partial snapshot fully wins; nothing from the first survives.
        let second = ScoreSnapshot::new(vec![Team::new(TeamId::Air, "Air", 2)]);
        assert_eq!(store.replace(second.clone()), 2);
        assert_eq!(store.current(), Some(&second));
        assert_eq!(store.current().unwrap().points(TeamId::Fire), None);
    }

    #[test]
    fn test_replace_accepts_negative_points() {
        let mut store = ScoreStore::new();
        let bad = ScoreSnapshot::new(vec![Team::new(TeamId::Water, "Eau", -3)]);
        store.replace(bad);
        assert_eq!(store.current().unwrap().points(TeamId::Water), Some(-3));
    }
}
