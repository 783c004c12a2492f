//! Grid-search driver (§4.J): enumerate (entry, exit) combinations, split
//! games deterministically, evaluate combinations in parallel with rayon,
//! and select a single combination by the train/validation discipline in
//! §8 invariant 10.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::aligner::AlignConfig;
use crate::artifact::Artifact;
use crate::error::{CoreError, UnusableReason};
use crate::execution::CostConfig;
use crate::model::{CombinationResult, FinalSelection, GameResult, SplitAssignment, SplitMetrics};
use crate::simulator::simulate_game;
use crate::state_machine::StrategyConfig;

#[derive(Debug, Clone)]
pub struct GridParams {
    pub entry_min: f64,
    pub entry_max: f64,
    pub entry_step: f64,
    pub exit_min: f64,
    pub exit_max: f64,
    pub exit_step: f64,
}

#[derive(Debug, Clone)]
pub struct SplitParams {
    pub train_ratio: f64,
    pub valid_ratio: f64,
    pub test_ratio: f64,
    pub seed: u64,
    pub top_n: usize,
    pub min_trade_count: usize,
}

/// Enumerate `(entry, exit)` pairs satisfying `entry > 0, exit >= 0, exit <
/// entry`, stepping from `min` to `max` inclusive.
pub fn enumerate_combinations(grid: &GridParams) -> Vec<(f64, f64)> {
    let mut out = Vec::new();
    let mut entry = grid.entry_min;
    while entry <= grid.entry_max + 1e-12 {
        let mut exit = grid.exit_min;
        while exit <= grid.exit_max + 1e-12 {
            if entry > 0.0 && exit >= 0.0 && exit < entry {
                out.push((entry, exit));
            }
            exit += grid.exit_step;
        }
        entry += grid.entry_step;
    }
    out
}

/// Deterministic seeded shuffle-and-split of `game_ids` by ratio. Ratios
/// must sum to 1.0 (checked by the caller via `validate_split_params`).
pub fn split_games(game_ids: &[String], split: &SplitParams) -> SplitAssignment {
    let mut ids = game_ids.to_vec();
    ids.sort();
    let mut rng = ChaCha8Rng::seed_from_u64(split.seed);
    ids.shuffle(&mut rng);

    let n = ids.len();
    let n_train = (n as f64 * split.train_ratio).round() as usize;
    let n_valid = (n as f64 * split.valid_ratio).round() as usize;
    let n_train = n_train.min(n);
    let n_valid = n_valid.min(n - n_train);

    let train = ids[..n_train].to_vec();
    let valid = ids[n_train..n_train + n_valid].to_vec();
    let test = ids[n_train + n_valid..].to_vec();
    SplitAssignment { train, valid, test }
}

pub fn validate_split_params(split: &SplitParams) -> Result<(), CoreError> {
    let sum = split.train_ratio + split.valid_ratio + split.test_ratio;
    if (sum - 1.0).abs() > 1e-6 {
        return Err(CoreError::InvalidArguments(format!(
            "train/valid/test ratios must sum to 1.0, got {sum}"
        )));
    }
    if split.train_ratio < 0.0 || split.valid_ratio < 0.0 || split.test_ratio < 0.0 {
        return Err(CoreError::InvalidArguments("split ratios must be non-negative".into()));
    }
    Ok(())
}

/// Deterministic hash of everything that affects a combination's results,
/// per §6.4's cache-key contract.
pub fn cache_key(
    model_name: &str,
    season_or_games: &str,
    grid: &GridParams,
    split: &SplitParams,
    costs: &CostConfig,
    align: &AlignConfig,
    artifact_version: &str,
) -> String {
    #[derive(serde::Serialize)]
    struct KeyInput<'a> {
        model_name: &'a str,
        season_or_games: &'a str,
        entry_min: f64,
        entry_max: f64,
        entry_step: f64,
        exit_min: f64,
        exit_max: f64,
        exit_step: f64,
        train_ratio: f64,
        valid_ratio: f64,
        test_ratio: f64,
        seed: u64,
        top_n: usize,
        min_trade_count: usize,
        enable_fees: bool,
        slippage_rate: f64,
        bet_amount_dollars: f64,
        fee_rounding: crate::execution::FeeRounding,
        match_window_seconds: i64,
        exclude_first_seconds: f64,
        exclude_last_seconds: f64,
        min_aligned_snapshots: usize,
        artifact_version: &'a str,
    }
    let input = KeyInput {
        model_name,
        season_or_games,
        entry_min: grid.entry_min,
        entry_max: grid.entry_max,
        entry_step: grid.entry_step,
        exit_min: grid.exit_min,
        exit_max: grid.exit_max,
        exit_step: grid.exit_step,
        train_ratio: split.train_ratio,
        valid_ratio: split.valid_ratio,
        test_ratio: split.test_ratio,
        seed: split.seed,
        top_n: split.top_n,
        min_trade_count: split.min_trade_count,
        enable_fees: costs.enable_fees,
        slippage_rate: costs.slippage_rate,
        bet_amount_dollars: costs.bet_amount_dollars,
        fee_rounding: costs.fee_rounding,
        match_window_seconds: align.match_window_seconds,
        exclude_first_seconds: align.exclude_first_seconds,
        exclude_last_seconds: align.exclude_last_seconds,
        min_aligned_snapshots: align.min_aligned_snapshots,
        artifact_version,
    };
    let bytes = serde_json::to_vec(&input).expect("cache key input is always serializable");
    let mut hasher = blake3::Hasher::new();
    hasher.update(&bytes);
    hasher.finalize().to_hex().to_string()
}

/// Aggregate a list of per-game results, concatenating equity curves in
/// ascending `game_id` order (mandatory for deterministic max drawdown
/// under parallel per-combination evaluation — see design notes).
pub fn aggregate_split(results: &[GameResult], min_trade_count: usize) -> SplitMetrics {
    let mut ordered: Vec<&GameResult> = results.iter().collect();
    ordered.sort_by(|a, b| a.game_id.cmp(&b.game_id));

    let num_games = ordered.len();
    let mut all_trades_in_order = Vec::new();
    for r in &ordered {
        all_trades_in_order.extend(r.trades.iter());
    }
    let num_trades = all_trades_in_order.len();

    if num_trades == 0 {
        return SplitMetrics { num_games, is_valid: false, ..Default::default() };
    }

    let wins = all_trades_in_order.iter().filter(|t| t.net_pnl > 0.0).count();
    let gross_pnl: f64 = all_trades_in_order.iter().map(|t| t.gross_pnl).sum();
    let net_pnl: f64 = all_trades_in_order.iter().map(|t| t.net_pnl).sum();
    let total_fees: f64 = all_trades_in_order
        .iter()
        .map(|t| t.entry_fee + t.exit_fee + t.slippage_cost)
        .sum();
    let avg_hold_seconds: f64 = all_trades_in_order
        .iter()
        .map(|t| t.exit_game_time_seconds - t.entry_game_time_seconds)
        .sum::<f64>()
        / num_trades as f64;

    let gross_win: f64 = all_trades_in_order.iter().filter(|t| t.net_pnl > 0.0).map(|t| t.net_pnl).sum();
    let gross_loss: f64 = all_trades_in_order
        .iter()
        .filter(|t| t.net_pnl < 0.0)
        .map(|t| -t.net_pnl)
        .sum();
    let profit_factor = if gross_loss == 0.0 {
        if gross_win > 0.0 { f64::INFINITY } else { 0.0 }
    } else {
        gross_win / gross_loss
    };

    let mut equity = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown = 0.0;
    for t in &all_trades_in_order {
        equity += t.net_pnl;
        if equity > peak {
            peak = equity;
        }
        let drawdown = peak - equity;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    SplitMetrics {
        num_games,
        num_trades,
        win_rate: wins as f64 / num_trades as f64,
        gross_pnl,
        net_pnl,
        profit_factor,
        max_drawdown,
        total_fees,
        avg_hold_seconds,
        is_valid: num_trades >= min_trade_count,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_combination(
    entry: f64,
    exit: f64,
    split: &SplitAssignment,
    games: &HashMap<String, (Vec<crate::model::SnapshotRow>, Vec<crate::model::MarketObservation>)>,
    artifact: &Artifact,
    align: &AlignConfig,
    costs: &CostConfig,
    min_hold_seconds: f64,
    exclude_last_seconds: f64,
    min_trade_count: usize,
) -> Result<CombinationResult, CoreError> {
    let strategy = StrategyConfig {
        entry_threshold: entry,
        exit_threshold: exit,
        min_hold_seconds,
        exclude_last_seconds,
    };
    strategy
        .validate()
        .map_err(CoreError::InvalidArguments)?;

    // Per-game failures never abort a split: a single game hitting a
    // diagnostic condition (already converted to `GameResult::unusable` by
    // `simulate_game`) or even a stray hard error is folded into that one
    // game's result, so the rest of the split's games still get evaluated.
    let eval_split = |ids: &[String]| -> Vec<GameResult> {
        ids.iter()
            .filter_map(|id| games.get(id))
            .map(|(snapshots, market)| {
                let game_id = snapshots.first().map(|r| r.game_id.clone()).unwrap_or_default();
                match simulate_game(&game_id, snapshots, market, artifact, align, &strategy, costs) {
                    Ok(result) => result,
                    Err(e) => {
                        let mut result = GameResult::unusable(game_id, UnusableReason::MissingFeatures);
                        result.diagnostics.per_row_errors.push(e.to_string());
                        result
                    }
                }
            })
            .collect()
    };

    let train_results = eval_split(&split.train);
    let valid_results = eval_split(&split.valid);
    let test_results = eval_split(&split.test);

    Ok(CombinationResult {
        entry_threshold: entry,
        exit_threshold: exit,
        train: aggregate_split(&train_results, min_trade_count),
        valid: aggregate_split(&valid_results, min_trade_count),
        test: aggregate_split(&test_results, min_trade_count),
    })
}

/// Run every (entry, exit) combination in parallel over the given games,
/// using a rayon thread pool sized by `workers` (falls back to rayon's
/// global pool default when `None`).
#[allow(clippy::too_many_arguments)]
pub fn run_grid(
    combinations: &[(f64, f64)],
    split: &SplitAssignment,
    games: &HashMap<String, (Vec<crate::model::SnapshotRow>, Vec<crate::model::MarketObservation>)>,
    artifact: &Artifact,
    align: &AlignConfig,
    costs: &CostConfig,
    min_hold_seconds: f64,
    exclude_last_seconds: f64,
    min_trade_count: usize,
) -> Vec<Result<CombinationResult, CoreError>> {
    combinations
        .par_iter()
        .map(|&(entry, exit)| {
            run_combination(
                entry,
                exit,
                split,
                games,
                artifact,
                align,
                costs,
                min_hold_seconds,
                exclude_last_seconds,
                min_trade_count,
            )
        })
        .collect()
}

/// Selection discipline (§8 invariant 10): rank combinations by train net
/// P&L among those with `valid.is_valid && train.is_valid`, take the
/// top-N, then pick the maximum validation net P&L among those. The
/// winner is evaluated once more (already computed) on test — it is never
/// chosen by test performance.
pub fn select_final(results: &[CombinationResult], top_n: usize) -> Option<FinalSelection> {
    let mut eligible: Vec<&CombinationResult> =
        results.iter().filter(|r| r.train.is_valid && r.valid.is_valid).collect();
    if eligible.is_empty() {
        return None;
    }
    eligible.sort_by(|a, b| {
        b.train
            .net_pnl
            .partial_cmp(&a.train.net_pnl)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let top: Vec<&CombinationResult> = eligible.into_iter().take(top_n).collect();

    let winner = top.iter().max_by(|a, b| {
        a.valid
            .net_pnl
            .partial_cmp(&b.valid.net_pnl)
            .unwrap_or(std::cmp::Ordering::Equal)
    })?;

    Some(FinalSelection {
        entry_threshold: winner.entry_threshold,
        exit_threshold: winner.exit_threshold,
        train: winner.train.clone(),
        valid: winner.valid.clone(),
        test: winner.test.clone(),
        selection_method: "top_n_train_then_max_valid".to_string(),
    })
}

fn write_split_csv(path: &Path, results: &[CombinationResult], split: &str) -> Result<(), CoreError> {
    let mut f = fs::File::create(path)
        .map_err(|e| CoreError::DataSourceError(format!("cannot write {}: {e}", path.display())))?;
    writeln!(
        f,
        "entry_threshold,exit_threshold,num_games,num_trades,win_rate,gross_pnl,net_pnl,profit_factor,max_drawdown,total_fees,avg_hold_seconds,is_valid"
    )
    .map_err(|e| CoreError::DataSourceError(e.to_string()))?;
    for r in results {
        let m = match split {
            "train" => &r.train,
            "valid" => &r.valid,
            _ => &r.test,
        };
        writeln!(
            f,
            "{},{},{},{},{},{},{},{},{},{},{},{}",
            r.entry_threshold,
            r.exit_threshold,
            m.num_games,
            m.num_trades,
            m.win_rate,
            m.gross_pnl,
            m.net_pnl,
            m.profit_factor,
            m.max_drawdown,
            m.total_fees,
            m.avg_hold_seconds,
            m.is_valid,
        )
        .map_err(|e| CoreError::DataSourceError(e.to_string()))?;
    }
    Ok(())
}

/// Persist the §6.4 layout under `<output_dir>/<cache_key>/`.
pub fn persist_results(
    output_dir: &Path,
    key: &str,
    split: &SplitAssignment,
    results: &[CombinationResult],
    selection: Option<&FinalSelection>,
) -> Result<PathBuf, CoreError> {
    let dir = output_dir.join(key);
    fs::create_dir_all(&dir).map_err(|e| CoreError::DataSourceError(e.to_string()))?;

    for (name, ids) in [
        ("train_games.json", &split.train),
        ("valid_games.json", &split.valid),
        ("test_games.json", &split.test),
    ] {
        let json = serde_json::to_string_pretty(ids).map_err(|e| CoreError::DataSourceError(e.to_string()))?;
        fs::write(dir.join(name), json).map_err(|e| CoreError::DataSourceError(e.to_string()))?;
    }

    for split_name in ["train", "valid", "test"] {
        write_split_csv(&dir.join(format!("grid_results_{split_name}.csv")), results, split_name)?;
    }
    let results_json = serde_json::to_string_pretty(results)
        .map_err(|e| CoreError::DataSourceError(e.to_string()))?;
    for split_name in ["train", "valid", "test"] {
        fs::write(dir.join(format!("grid_results_{split_name}.json")), &results_json)
            .map_err(|e| CoreError::DataSourceError(e.to_string()))?;
    }

    if let Some(selection) = selection {
        let json = serde_json::to_string_pretty(selection)
            .map_err(|e| CoreError::DataSourceError(e.to_string()))?;
        fs::write(dir.join("final_selection.json"), json)
            .map_err(|e| CoreError::DataSourceError(e.to_string()))?;
    }

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridParams {
        GridParams { entry_min: 0.04, entry_max: 0.05, entry_step: 0.01, exit_min: 0.01, exit_max: 0.02, exit_step: 0.01 }
    }

    // Scenario S5 — combinations surviving the entry>0, exit>=0, exit<entry filter.
    #[test]
    fn scenario_s5_enumerate_combinations_filters_invalid() {
        let combos = enumerate_combinations(&grid());
        assert_eq!(combos.len(), 4);
        for (entry, exit) in &combos {
            assert!(*entry > 0.0);
            assert!(*exit >= 0.0);
            assert!(exit < entry);
        }
    }

    fn split_params() -> SplitParams {
        SplitParams { train_ratio: 0.6, valid_ratio: 0.2, test_ratio: 0.2, seed: 42, top_n: 3, min_trade_count: 1 }
    }

    #[test]
    fn split_games_is_disjoint_and_covers_all_ids() {
        let ids: Vec<String> = (0..10).map(|i| format!("g{i}")).collect();
        let split = split_games(&ids, &split_params());
        let mut all: Vec<&String> = split.train.iter().chain(&split.valid).chain(&split.test).collect();
        all.sort();
        let mut expected: Vec<&String> = ids.iter().collect();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn split_games_is_deterministic_given_same_seed() {
        let ids: Vec<String> = (0..20).map(|i| format!("g{i}")).collect();
        let a = split_games(&ids, &split_params());
        let b = split_games(&ids, &split_params());
        assert_eq!(a.train, b.train);
        assert_eq!(a.valid, b.valid);
        assert_eq!(a.test, b.test);
    }

    #[test]
    fn validate_split_params_rejects_bad_ratios() {
        let mut s = split_params();
        s.test_ratio = 0.3; // sums to 1.1
        assert!(validate_split_params(&s).is_err());
    }

    #[test]
    fn cache_key_is_deterministic_and_sensitive_to_inputs() {
        let g = grid();
        let s = split_params();
        let c = CostConfig::default();
        let a = AlignConfig::default();
        let k1 = cache_key("m1", "2025-26", &g, &s, &c, &a, "v1");
        let k2 = cache_key("m1", "2025-26", &g, &s, &c, &a, "v1");
        assert_eq!(k1, k2);
        let k3 = cache_key("m2", "2025-26", &g, &s, &c, &a, "v1");
        assert_ne!(k1, k3);
    }

    fn metrics(net_pnl: f64, is_valid: bool) -> SplitMetrics {
        SplitMetrics { net_pnl, is_valid, num_trades: 10, ..Default::default() }
    }

    #[test]
    fn selection_discipline_picks_max_valid_among_top_n_train() {
        let combos = vec![
            CombinationResult {
                entry_threshold: 0.04,
                exit_threshold: 0.01,
                train: metrics(10.0, true),
                valid: metrics(3.0, true),
                test: metrics(100.0, true), // highest test P&L, must NOT be chosen
            },
            CombinationResult {
                entry_threshold: 0.05,
                exit_threshold: 0.01,
                train: metrics(9.0, true),
                valid: metrics(7.0, true), // best valid among top-N(=2 by train)
                test: metrics(1.0, true),
            },
            CombinationResult {
                entry_threshold: 0.05,
                exit_threshold: 0.02,
                train: metrics(1.0, true),
                valid: metrics(50.0, true), // best valid overall, but not top-N by train
                test: metrics(1.0, true),
            },
        ];
        let selection = select_final(&combos, 2).unwrap();
        assert_eq!(selection.entry_threshold, 0.05);
        assert_eq!(selection.exit_threshold, 0.01);
        assert_eq!(selection.test.net_pnl, 1.0);
    }

    #[test]
    fn selection_returns_none_when_no_combination_is_valid() {
        let combos = vec![CombinationResult {
            entry_threshold: 0.04,
            exit_threshold: 0.01,
            train: metrics(10.0, false),
            valid: metrics(3.0, true),
            test: metrics(1.0, true),
        }];
        assert!(select_final(&combos, 10).is_none());
    }

    #[test]
    fn aggregate_split_empty_trades_is_invalid() {
        let m = aggregate_split(&[], 1);
        assert!(!m.is_valid);
        assert_eq!(m.num_trades, 0);
    }

    // One game with an unknown schema column must not discard the rest of
    // the split's games: run_combination should still produce a result that
    // accounts for both.
    #[test]
    fn run_combination_survives_one_games_diagnostic_failure() {
        use crate::artifact::{Artifact, BaselinePolicy, LogregWeights, ModelKind, Preprocess};
        use crate::calibrator::Calibrator;
        use crate::model::{MarketObservation, Possession, SnapshotRow};
        use chrono::Utc;

        let artifact = Artifact {
            version: "t".into(),
            model_kind: ModelKind::Logreg,
            feature_schema: vec!["not_a_real_column".into()],
            preprocess: Preprocess { numeric: HashMap::new(), nan_policy: HashMap::new() },
            calibrator: Calibrator::None,
            baseline_policy: BaselinePolicy::None,
            weights: Some(LogregWeights { w: vec![0.1], b: 0.0 }),
            tree_blob_path: None,
            tree: Default::default(),
        };

        let t0 = Utc::now();
        let make_row = |game_id: &str| SnapshotRow {
            season_label: "2025-26".into(),
            game_id: game_id.into(),
            sequence_number: 1,
            snapshot_ts: t0,
            espn_home_prob: Some(0.5),
            score_diff: 0,
            time_remaining_regulation: 2880,
            home_score: 0,
            away_score: 0,
            period: 1,
            score_diff_div_sqrt_time_remaining: None,
            espn_home_prob_lag_1: None,
            espn_home_prob_delta_1: None,
            possession: Possession::Unknown,
            market_home_bid: Some(0.5),
            market_home_ask: Some(0.51),
            market_home_mid: Some(0.505),
            market_home_spread: Some(0.01),
            market_away_bid: None,
            market_away_ask: None,
            market_away_mid: None,
            market_away_spread: None,
            opening_prob_home_fair: None,
            opening_overround: None,
        };
        let market = vec![MarketObservation {
            ts: t0,
            home_bid: 0.5,
            home_ask: 0.51,
            home_mid: 0.505,
            home_spread: 0.01,
        }];

        let mut games = HashMap::new();
        games.insert("g1".to_string(), (vec![make_row("g1")], market.clone()));
        games.insert("g2".to_string(), (vec![make_row("g2")], market));

        let split = SplitAssignment {
            train: vec!["g1".to_string(), "g2".to_string()],
            valid: Vec::new(),
            test: Vec::new(),
        };
        let align = AlignConfig { min_aligned_snapshots: 1, ..AlignConfig::default() };
        let costs = CostConfig::default();

        let result = run_combination(0.05, 0.01, &split, &games, &artifact, &align, &costs, 30.0, 0.0, 0)
            .unwrap();
        // Both games are accounted for (both unusable, given the bad schema
        // column), not just one — the whole split was not discarded.
        assert_eq!(result.train.num_games, 2);
    }
}
