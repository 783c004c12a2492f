use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

mod aligner;
mod artifact;
mod calibrator;
mod config;
mod data_source;
mod error;
mod execution;
mod features;
mod grid;
mod model;
mod numeric;
mod predictor;
mod simulator;
mod state_machine;

use aligner::AlignConfig;
use config::Config;
use data_source::{JsonFileSnapshotSource, SnapshotSource};
use error::CoreError;
use execution::CostConfig;
use grid::{GridParams, SplitParams};
use model::SnapshotRow;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let exit_code = match run() {
        Ok(()) => 0,
        Err(RunError::Core(e)) => {
            error!("{e}");
            e.exit_code()
        }
        Err(RunError::Other(e)) => {
            error!("{e:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

enum RunError {
    Core(CoreError),
    Other(anyhow::Error),
}

impl From<CoreError> for RunError {
    fn from(e: CoreError) -> Self {
        RunError::Core(e)
    }
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        RunError::Other(e)
    }
}

fn run() -> Result<(), RunError> {
    let config = Config::parse();
    config.validate()?;

    if config.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .build_global()
            .context("failed to build rayon thread pool")?;
    }

    let model_name = config
        .model_name
        .clone()
        .ok_or_else(|| CoreError::InvalidArguments("--model-name is required".into()))?;

    let source = JsonFileSnapshotSource::from_env()?;
    let manifest_path = std::env::var("DATA_SOURCE_DIR")
        .map(|root| Path::new(&root).join("models").join(&model_name).join("manifest.json"))
        .map_err(|_| CoreError::DataSourceError("DATA_SOURCE_DIR is not set".into()))?;
    let artifact = artifact::Artifact::load(&manifest_path)?;
    info!(version = %artifact.version, "loaded artifact");

    let season = config.season.clone().unwrap_or_default();
    let mut game_ids = if !config.game_list.is_empty() {
        config.game_list.clone()
    } else {
        source.list_game_ids(&season)?
    };
    if let Some(max_games) = config.max_games {
        game_ids.truncate(max_games);
    }
    if game_ids.is_empty() {
        return Err(CoreError::InvalidArguments("no games to evaluate".into()).into());
    }

    let mut games = HashMap::new();
    for id in &game_ids {
        let snapshots = source.load_game(&season, id)?;
        let market = source.load_market(&season, id)?;
        games.insert(id.clone(), (snapshots, market));
    }

    report_calibration(&artifact, &games);

    let grid_params = GridParams {
        entry_min: config.entry_min,
        entry_max: config.entry_max,
        entry_step: config.entry_step,
        exit_min: config.exit_min,
        exit_max: config.exit_max,
        exit_step: config.exit_step,
    };
    let split_params = SplitParams {
        train_ratio: config.train_ratio,
        valid_ratio: config.valid_ratio,
        test_ratio: config.test_ratio,
        seed: config.seed,
        top_n: config.top_n,
        min_trade_count: config.min_trade_count,
    };
    grid::validate_split_params(&split_params)?;

    let align_config = AlignConfig {
        match_window_seconds: config.match_window_seconds,
        exclude_first_seconds: config.exclude_first_seconds,
        exclude_last_seconds: config.exclude_last_seconds,
        ..AlignConfig::default()
    };
    let cost_config = CostConfig {
        enable_fees: config.enable_fees,
        slippage_rate: config.slippage_rate,
        bet_amount_dollars: config.bet_amount,
        fee_rounding: config.fee_rounding.into(),
    };
    let mut combinations = grid::enumerate_combinations(&grid_params);
    if let Some(max) = config.max_combinations {
        combinations.truncate(max);
    }
    if combinations.is_empty() {
        return Err(CoreError::InvalidArguments("grid produced zero valid combinations".into()).into());
    }

    let split = grid::split_games(&game_ids, &split_params);
    info!(
        train = split.train.len(),
        valid = split.valid.len(),
        test = split.test.len(),
        "split games"
    );

    let results: Vec<_> = grid::run_grid(
        &combinations,
        &split,
        &games,
        &artifact,
        &align_config,
        &cost_config,
        config.min_hold_seconds,
        config.exclude_last_seconds,
        config.min_trade_count,
    );

    let mut ok_results = Vec::new();
    for r in results {
        match r {
            Ok(r) => ok_results.push(r),
            Err(e) => warn!("combination failed: {e}"),
        }
    }
    if ok_results.is_empty() {
        return Err(CoreError::NoUsableGames("no usable games produced any valid combination".into()).into());
    }

    let season_or_games = if config.game_list.is_empty() { season.clone() } else { config.game_list.join(",") };
    let key = if config.no_cache {
        "no-cache".to_string()
    } else {
        grid::cache_key(
            &model_name,
            &season_or_games,
            &grid_params,
            &split_params,
            &cost_config,
            &align_config,
            &artifact.version,
        )
    };

    let selection = grid::select_final(&ok_results, split_params.top_n);
    let output_dir = Path::new(&config.output_dir);
    let persisted_at = grid::persist_results(output_dir, &key, &split, &ok_results, selection.as_ref())?;
    info!(path = %persisted_at.display(), "persisted grid results");

    match selection {
        Some(s) => info!(
            entry = s.entry_threshold,
            exit = s.exit_threshold,
            test_net_pnl = s.test.net_pnl,
            "final selection"
        ),
        None => warn!("no combination met the train/valid validity thresholds"),
    }

    Ok(())
}

/// Log model-calibration diagnostics (log-loss, Brier, ECE, ROC-AUC) over
/// every loaded game's final-outcome label, predicted once per game rather
/// than per trading combination. Failures here are logged and skipped; a
/// game that can't be scored for calibration should not block the grid run.
fn report_calibration(
    artifact: &artifact::Artifact,
    games: &HashMap<String, (Vec<SnapshotRow>, Vec<model::MarketObservation>)>,
) {
    let mut probs = Vec::new();
    let mut labels = Vec::new();
    for (game_id, (snapshots, _)) in games {
        let Some(last) = snapshots.last() else { continue };
        let label = if last.home_score > last.away_score { 1.0 } else { 0.0 };
        tracing::trace!(game_id, final_possession = last.possession.as_str(), "scoring game for calibration");
        let matrix = match features::build_design_matrix(artifact, snapshots) {
            Ok(m) => m,
            Err(e) => {
                warn!(game_id, "calibration diagnostics skipped: {e}");
                continue;
            }
        };
        let opening: Vec<Option<f64>> = snapshots.iter().map(|r| r.opening_prob_home_fair).collect();
        match predictor::predict(artifact, &matrix, &opening) {
            Ok(p) => {
                if let Some(&last_p) = p.last() {
                    probs.push(last_p);
                    labels.push(label);
                }
            }
            Err(e) => warn!(game_id, "calibration diagnostics skipped: {e}"),
        }
    }

    if probs.is_empty() {
        return;
    }
    info!(
        n = probs.len(),
        log_loss = numeric::log_loss(&probs, &labels),
        brier = numeric::brier(&probs, &labels),
        ece = numeric::ece(&probs, &labels, 10),
        roc_auc = ?numeric::roc_auc(&probs, &labels),
        "model calibration diagnostics"
    );
}
