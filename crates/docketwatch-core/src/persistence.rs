//! Baseline persistence.
//!
//! Baselines live in a single `baselines.json` under the state directory:
//!
//! ```text
//! ~/.docketwatch/
//! └── baselines.json   # { "signature_blocks": ["A", "B"], ... }
//! ```
//!
//! Saves use write-then-rename so a crash never leaves a truncated file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use crate::watch::WatchType;

const BASELINES_FILE: &str = "baselines.json";

/// Error type for baseline persistence.
#[derive(Debug)]
pub enum PersistenceError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "IO error: {e}"),
            PersistenceError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Json(e)
    }
}

/// Reads and writes watch baselines in a state directory.
#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(BASELINES_FILE)
    }

    /// Load persisted baselines. A missing file means no baselines.
    ///
    /// Entries for unknown watch types are dropped with a warning.
    pub fn load(&self) -> Result<HashMap<WatchType, Vec<String>>, PersistenceError> {
        let path = self.path();
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let contents = fs::read_to_string(&path)?;
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(&contents)?;
        let mut baselines = HashMap::new();
        for (name, ids) in raw {
            match WatchType::parse(&name) {
                Some(watch_type) => {
                    baselines.insert(watch_type, ids);
                }
                None => log::warn!("Ignoring persisted baseline for unknown watch type {}", name),
            }
        }
        Ok(baselines)
    }

    /// Replace the persisted baselines with `baselines`.
    pub fn save(&self, baselines: &HashMap<WatchType, Vec<String>>) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;

        let raw: BTreeMap<&str, &Vec<String>> =
            baselines.iter().map(|(t, ids)| (t.as_str(), ids)).collect();
        let json = serde_json::to_string_pretty(&raw)?;

        let temp_path = self.dir.join(format!("{}.tmp", BASELINES_FILE));
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, self.path())?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
