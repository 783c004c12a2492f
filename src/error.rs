//! Error taxonomy for the trading-strategy core.
//!
//! Driver-level conditions (`InvalidArguments`, `ArtifactLoadError`,
//! `DataSourceError`) are fatal and propagate via `anyhow::Result` at the
//! binary boundary. Per-row/per-game conditions (`FeatureEncodingError`,
//! `MissingFeature`, `InvalidProbability`) are captured into a game's
//! diagnostics instead of aborting the run — see [`crate::simulator::GameResult`].

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("artifact load error: {0}")]
    ArtifactLoadError(String),

    #[error("feature encoding error: {0}")]
    FeatureEncodingError(String),

    #[error("missing feature: {0}")]
    MissingFeature(String),

    #[error("invalid probability: {0}")]
    InvalidProbability(String),

    #[error("data source error: {0}")]
    DataSourceError(String),

    #[error("no usable games: {0}")]
    NoUsableGames(String),
}

/// Process-level exit codes, per the grid-search command interface contract.
impl CoreError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::InvalidArguments(_) => 2,
            CoreError::ArtifactLoadError(_) => 3,
            CoreError::NoUsableGames(_) => 4,
            CoreError::DataSourceError(_) => 1,
            CoreError::FeatureEncodingError(_)
            | CoreError::MissingFeature(_)
            | CoreError::InvalidProbability(_) => 1,
        }
    }
}

/// A game marked unusable is a diagnostic, not an error: other games in the
/// run proceed untouched. Kept distinct from [`CoreError`] per the "error vs
/// diagnostic" design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnusableReason {
    NoMarketCoverage,
    TooFewSnapshots,
    MissingFeatures,
}

impl std::fmt::Display for UnusableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnusableReason::NoMarketCoverage => "no_market_coverage",
            UnusableReason::TooFewSnapshots => "too_few_snapshots",
            UnusableReason::MissingFeatures => "missing_features",
        };
        write!(f, "{s}")
    }
}
