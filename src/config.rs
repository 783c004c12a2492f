use clap::Parser;

use crate::error::CoreError;
use crate::execution::FeeRounding;

/// NBA win-probability vs prediction-market divergence trading core
#[derive(Parser, Debug, Clone)]
#[command(name = "divergence-core", version, about)]
pub struct Config {
    /// Season label to pull games from, e.g. "2025-26".
    #[arg(long, env = "SEASON")]
    pub season: Option<String>,

    /// Explicit comma-separated game-id list; overrides `--season` discovery.
    #[arg(long, env = "GAME_LIST", value_delimiter = ',')]
    pub game_list: Vec<String>,

    /// Model artifact name under the data source root. Required: the grid
    /// driver has no model-less code path.
    #[arg(long, env = "MODEL_NAME")]
    pub model_name: Option<String>,

    #[arg(long, env = "ENTRY_MIN", default_value = "0.02")]
    pub entry_min: f64,
    #[arg(long, env = "ENTRY_MAX", default_value = "0.10")]
    pub entry_max: f64,
    #[arg(long, env = "ENTRY_STEP", default_value = "0.01")]
    pub entry_step: f64,
    #[arg(long, env = "EXIT_MIN", default_value = "0.0")]
    pub exit_min: f64,
    #[arg(long, env = "EXIT_MAX", default_value = "0.05")]
    pub exit_max: f64,
    #[arg(long, env = "EXIT_STEP", default_value = "0.01")]
    pub exit_step: f64,

    /// Charge the Kalshi-style per-side fee on every trade.
    #[arg(long, env = "ENABLE_FEES", default_value = "true")]
    pub enable_fees: bool,
    #[arg(long, env = "SLIPPAGE_RATE", default_value = "0.0")]
    pub slippage_rate: f64,
    #[arg(long, env = "BET_AMOUNT", default_value = "20.0")]
    pub bet_amount: f64,
    #[arg(long, env = "FEE_ROUNDING", value_enum, default_value = "none")]
    pub fee_rounding: FeeRoundingArg,

    #[arg(long, env = "EXCLUDE_FIRST_SECONDS", default_value = "0.0")]
    pub exclude_first_seconds: f64,
    #[arg(long, env = "EXCLUDE_LAST_SECONDS", default_value = "0.0")]
    pub exclude_last_seconds: f64,
    #[arg(long, env = "MATCH_WINDOW_SECONDS", default_value = "60")]
    pub match_window_seconds: i64,

    #[arg(long, env = "TRAIN_RATIO", default_value = "0.6")]
    pub train_ratio: f64,
    #[arg(long, env = "VALID_RATIO", default_value = "0.2")]
    pub valid_ratio: f64,
    #[arg(long, env = "TEST_RATIO", default_value = "0.2")]
    pub test_ratio: f64,
    #[arg(long, env = "SEED", default_value = "42")]
    pub seed: u64,
    #[arg(long, env = "TOP_N", default_value = "10")]
    pub top_n: usize,
    #[arg(long, env = "MIN_TRADE_COUNT", default_value = "200")]
    pub min_trade_count: usize,
    /// Minimum hold time before a convergence exit is allowed.
    #[arg(long, env = "MIN_HOLD_SECONDS", default_value = "30.0")]
    pub min_hold_seconds: f64,

    /// Number of rayon worker threads; 0 uses rayon's default (num CPUs).
    #[arg(long, env = "WORKERS", default_value = "0")]
    pub workers: usize,
    #[arg(long, env = "MAX_GAMES")]
    pub max_games: Option<usize>,
    #[arg(long, env = "MAX_COMBINATIONS")]
    pub max_combinations: Option<usize>,
    #[arg(long, env = "OUTPUT_DIR", default_value = "output")]
    pub output_dir: String,
    #[arg(long, env = "NO_CACHE", default_value = "false")]
    pub no_cache: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeRoundingArg {
    None,
    CeilToCent,
}

impl From<FeeRoundingArg> for FeeRounding {
    fn from(value: FeeRoundingArg) -> Self {
        match value {
            FeeRoundingArg::None => FeeRounding::None,
            FeeRoundingArg::CeilToCent => FeeRounding::CeilToCent,
        }
    }
}

impl Config {
    /// Validate argument ranges; every failure here is an exit-code-2
    /// condition (§6.3 "invalid arguments"), never a generic fatal error.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.season.is_none() && self.game_list.is_empty() {
            return Err(CoreError::InvalidArguments(
                "one of --season or --game-list is required".into(),
            ));
        }
        if self.entry_min <= 0.0 || self.entry_max < self.entry_min || self.entry_step <= 0.0 {
            return Err(CoreError::InvalidArguments(
                "entry grid must satisfy 0 < entry_min <= entry_max, entry_step > 0".into(),
            ));
        }
        if self.exit_min < 0.0 || self.exit_max < self.exit_min || self.exit_step <= 0.0 {
            return Err(CoreError::InvalidArguments(
                "exit grid must satisfy 0 <= exit_min <= exit_max, exit_step > 0".into(),
            ));
        }
        let ratio_sum = self.train_ratio + self.valid_ratio + self.test_ratio;
        if (ratio_sum - 1.0).abs() > 1e-6 {
            return Err(CoreError::InvalidArguments(format!(
                "train/valid/test ratios must sum to 1.0, got {ratio_sum}"
            )));
        }
        if self.train_ratio < 0.0 || self.valid_ratio < 0.0 || self.test_ratio < 0.0 {
            return Err(CoreError::InvalidArguments("split ratios must be non-negative".into()));
        }
        if self.bet_amount <= 0.0 {
            return Err(CoreError::InvalidArguments("bet_amount must be positive".into()));
        }
        if self.slippage_rate < 0.0 {
            return Err(CoreError::InvalidArguments("slippage_rate must be non-negative".into()));
        }
        if self.match_window_seconds < 0 {
            return Err(CoreError::InvalidArguments(
                "match_window_seconds must be non-negative".into(),
            ));
        }
        if self.top_n == 0 {
            return Err(CoreError::InvalidArguments("top_n must be positive".into()));
        }
        Ok(())
    }
}
