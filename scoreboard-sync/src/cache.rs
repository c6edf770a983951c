//! Client-side persisted cache: one key holding the last accepted snapshot.
//!
//! Only used to seed a client before its first connection succeeds. A
//! missing or unreadable entry is not an error for the caller; the
//! synchronizer falls back to zero scores.

use scoreboard_core::{ScoreSnapshot, SnapshotError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Key used when none is configured.
pub const DEFAULT_CACHE_KEY: &str = "elemental-scores";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cached snapshot is unreadable: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("cache lock poisoned")]
    Poisoned,
}

/// Storage for the single cached snapshot.
pub trait SnapshotCache: Send + Sync {
    /// The cached snapshot, or `None` if nothing was stored yet.
    fn load(&self) -> Result<Option<ScoreSnapshot>, CacheError>;

    /// Overwrite the cached snapshot.
    fn store(&self, snapshot: &ScoreSnapshot) -> Result<(), CacheError>;
}

/// A JSON file `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileCache {
    path: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        Self {
            path: dir.as_ref().join(format!("{key}.json")),
        }
    }

    /// Cache under `dir` with [`DEFAULT_CACHE_KEY`].
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir, DEFAULT_CACHE_KEY)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotCache for FileCache {
    fn load(&self) -> Result<Option<ScoreSnapshot>, CacheError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(ScoreSnapshot::from_json(&json)?))
    }

    fn store(&self, snapshot: &ScoreSnapshot) -> Result<(), CacheError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // Write-then-rename so a crash never leaves a truncated entry.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, snapshot.to_json()?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process cache, lost with the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entry: Mutex<Option<String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a raw entry, as if a previous run had written it.
    pub fn with_entry(json: impl Into<String>) -> Self {
        Self {
            entry: Mutex::new(Some(json.into())),
        }
    }

    /// The raw stored entry.
    pub fn entry(&self) -> Option<String> {
        self.entry.lock().ok().and_then(|e| e.clone())
    }
}

impl SnapshotCache for MemoryCache {
    fn load(&self) -> Result<Option<ScoreSnapshot>, CacheError> {
        let entry = self.entry.lock().map_err(|_| CacheError::Poisoned)?;
        match entry.as_deref() {
            Some(json) => Ok(Some(ScoreSnapshot::from_json(json)?)),
            None => Ok(None),
        }
    }

    fn store(&self, snapshot: &ScoreSnapshot) -> Result<(), CacheError> {
        let json = snapshot.to_json()?;
        *self.entry.lock().map_err(|_| CacheError::Poisoned)? = Some(json);
        Ok(())
    }
}

impl<C: SnapshotCache + ?Sized> SnapshotCache for std::sync::Arc<C> {
    fn load(&self) -> Result<Option<ScoreSnapshot>, CacheError> {
        (**self).load()
    }

    fn store(&self, snapshot: &ScoreSnapshot) -> Result<(), CacheError> {
        (**self).store(snapshot)
    }
}
