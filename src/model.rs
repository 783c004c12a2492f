//! Core data entities shared across the aligner, predictor and simulator.
//!
//! `SnapshotRow` and `AlignedPoint` are owned by a single game's simulation
//! scope and never outlive it. `TradeRecord`/`GameResult` are owned by the
//! simulator and handed up to the grid driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Possession {
    Home,
    Away,
    Unknown,
}

impl Possession {
    pub fn as_str(&self) -> &'static str {
        match self {
            Possession::Home => "home",
            Possession::Away => "away",
            Possession::Unknown => "unknown",
        }
    }
}

/// One ESPN + (optionally matched) market observation for a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub season_label: String,
    pub game_id: String,
    pub sequence_number: u64,
    pub snapshot_ts: DateTime<Utc>,

    pub espn_home_prob: Option<f64>,

    pub score_diff: i32,
    pub time_remaining_regulation: i64,
    pub home_score: i32,
    pub away_score: i32,
    pub period: u8,

    pub score_diff_div_sqrt_time_remaining: Option<f64>,
    pub espn_home_prob_lag_1: Option<f64>,
    pub espn_home_prob_delta_1: Option<f64>,
    pub possession: Possession,

    pub market_home_bid: Option<f64>,
    pub market_home_ask: Option<f64>,
    pub market_home_mid: Option<f64>,
    pub market_home_spread: Option<f64>,
    pub market_away_bid: Option<f64>,
    pub market_away_ask: Option<f64>,
    pub market_away_mid: Option<f64>,
    pub market_away_spread: Option<f64>,

    pub opening_prob_home_fair: Option<f64>,
    pub opening_overround: Option<f64>,
}

/// A market observation timestamp, used by the aligner to find the closest
/// match within the configured window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketObservation {
    pub ts: DateTime<Utc>,
    pub home_bid: f64,
    pub home_ask: f64,
    pub home_mid: f64,
    pub home_spread: f64,
}

/// A snapshot projected onto the normalized game timeline, with market data
/// filtered to the game window (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignedPoint {
    pub game_id: String,
    pub sequence_number: u64,
    pub game_time_seconds: f64,
    pub wall_ts_aligned: DateTime<Utc>,

    pub row: SnapshotRow,

    pub market_home_bid: Option<f64>,
    pub market_home_ask: Option<f64>,
    pub market_home_mid: Option<f64>,
}

impl AlignedPoint {
    pub fn has_market_data(&self) -> bool {
        self.market_home_bid.is_some() && self.market_home_ask.is_some() && self.market_home_mid.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    LongHome,
    ShortHome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Converged,
    ForcedEog,
    OppositeSignalBlocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub game_id: String,
    pub direction: Direction,
    pub entry_game_time_seconds: f64,
    pub exit_game_time_seconds: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub bet_amount_dollars: f64,
    pub num_contracts: f64,
    pub entry_fee: f64,
    pub exit_fee: f64,
    pub slippage_cost: f64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameDiagnostics {
    pub snapshots_total: usize,
    pub snapshots_aligned: usize,
    pub market_coverage_fraction: f64,
    pub skip_reason: Option<crate::error::UnusableReason>,
    pub per_row_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameMetrics {
    pub trade_count: usize,
    pub win_rate: f64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub avg_hold_seconds: f64,
    pub total_fees: f64,
    pub long_count: usize,
    pub short_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameResult {
    pub game_id: String,
    pub trades: Vec<TradeRecord>,
    pub metrics: GameMetrics,
    pub diagnostics: GameDiagnostics,
}

impl GameResult {
    pub fn unusable(game_id: impl Into<String>, reason: crate::error::UnusableReason) -> Self {
        GameResult {
            game_id: game_id.into(),
            trades: Vec::new(),
            metrics: GameMetrics::default(),
            diagnostics: GameDiagnostics {
                skip_reason: Some(reason),
                ..Default::default()
            },
        }
    }
}

/// Aggregate metrics for one (combination, split) pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub num_games: usize,
    pub num_trades: usize,
    pub win_rate: f64,
    pub gross_pnl: f64,
    pub net_pnl: f64,
    pub profit_factor: f64,
    pub max_drawdown: f64,
    pub total_fees: f64,
    pub avg_hold_seconds: f64,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinationResult {
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub train: SplitMetrics,
    pub valid: SplitMetrics,
    pub test: SplitMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitAssignment {
    pub train: Vec<String>,
    pub valid: Vec<String>,
    pub test: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalSelection {
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub train: SplitMetrics,
    pub valid: SplitMetrics,
    pub test: SplitMetrics,
    pub selection_method: String,
}
