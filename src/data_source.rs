//! Read-only snapshot source (§6.1): a small trait boundary plus a
//! JSON-file-backed implementation, the stand-in for "any iterator/cursor
//! over snapshot rows satisfies the contract."
//!
//! Modeled on the teacher's `ScoreProvider` trait (`src/live_scores/provider.rs`),
//! minus the async/push machinery this core doesn't need: the driver pulls a
//! whole game's rows at once rather than subscribing to live events.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::model::{MarketObservation, SnapshotRow};

pub trait SnapshotSource {
    fn load_game(&self, season: &str, game_id: &str) -> Result<Vec<SnapshotRow>, CoreError>;
    fn list_game_ids(&self, season: &str) -> Result<Vec<String>, CoreError>;
    /// The independent market-trade/candlestick stream the aligner matches
    /// snapshots against (§4.F). Empty (not missing) when a game has no
    /// market coverage at all.
    fn load_market(&self, season: &str, game_id: &str) -> Result<Vec<MarketObservation>, CoreError>;
}

/// Reads one JSON array of `SnapshotRow` per `(season, game_id)`, stored as
/// `<root>/<season>/<game_id>.json`. `root` defaults to the `DATA_SOURCE_DIR`
/// environment variable.
pub struct JsonFileSnapshotSource {
    root: PathBuf,
}

impl JsonFileSnapshotSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        JsonFileSnapshotSource { root: root.into() }
    }

    pub fn from_env() -> Result<Self, CoreError> {
        let root = std::env::var("DATA_SOURCE_DIR")
            .map_err(|_| CoreError::DataSourceError("DATA_SOURCE_DIR is not set".into()))?;
        Ok(JsonFileSnapshotSource::new(root))
    }

    fn game_path(&self, season: &str, game_id: &str) -> PathBuf {
        self.root.join(season).join(format!("{game_id}.json"))
    }

    fn market_path(&self, season: &str, game_id: &str) -> PathBuf {
        self.root.join(season).join(format!("{game_id}.market.json"))
    }
}

impl SnapshotSource for JsonFileSnapshotSource {
    fn load_game(&self, season: &str, game_id: &str) -> Result<Vec<SnapshotRow>, CoreError> {
        let path = self.game_path(season, game_id);
        let contents = fs::read_to_string(&path)
            .map_err(|e| CoreError::DataSourceError(format!("cannot read {}: {e}", path.display())))?;
        let mut rows: Vec<SnapshotRow> = serde_json::from_str(&contents)
            .map_err(|e| CoreError::DataSourceError(format!("malformed snapshot file {}: {e}", path.display())))?;
        rows.sort_by_key(|r| r.sequence_number);
        Ok(rows)
    }

    fn list_game_ids(&self, season: &str) -> Result<Vec<String>, CoreError> {
        let dir = self.root.join(season);
        let entries = fs::read_dir(&dir)
            .map_err(|e| CoreError::DataSourceError(format!("cannot list {}: {e}", dir.display())))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CoreError::DataSourceError(e.to_string()))?;
            let path: &Path = &entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    if !stem.ends_with(".market") {
                        ids.push(stem.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load_market(&self, season: &str, game_id: &str) -> Result<Vec<MarketObservation>, CoreError> {
        let path = self.market_path(season, game_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&path)
            .map_err(|e| CoreError::DataSourceError(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| CoreError::DataSourceError(format!("malformed market file {}: {e}", path.display())))
    }
}
