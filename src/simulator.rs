//! Per-game simulator (§4.I): drives the aligner, predictor, and trade state
//! machine for a single game and aggregates its trade list into
//! [`GameMetrics`] and [`GameDiagnostics`].

use crate::aligner::{align_game, AlignConfig};
use crate::artifact::Artifact;
use crate::error::{CoreError, UnusableReason};
use crate::execution::CostConfig;
use crate::features::build_design_matrix;
use crate::model::{AlignedPoint, Direction, GameDiagnostics, GameMetrics, GameResult, MarketObservation, SnapshotRow, TradeRecord};
use crate::predictor::predict;
use crate::state_machine::{MarketPoint, StrategyConfig, TradeStateMachine};

/// Run one game end to end. Alignment failures, feature-encoding failures,
/// missing-feature failures, and invalid-probability failures out of
/// `predict` all surface as an "unusable" [`GameResult`] rather than aborting
/// the run — per-row/per-game conditions never fail other games. Only
/// artifact-level problems (e.g. a GBT tree blob that fails to load) are hard
/// errors, since they indicate every game in the run will fail identically.
pub fn simulate_game(
    game_id: &str,
    snapshots: &[SnapshotRow],
    market: &[MarketObservation],
    artifact: &Artifact,
    align_config: &AlignConfig,
    strategy: &StrategyConfig,
    costs: &CostConfig,
) -> Result<GameResult, CoreError> {
    let aligned = match align_game(snapshots, market, align_config) {
        Ok(a) => a,
        Err(reason) => return Ok(GameResult::unusable(game_id, reason)),
    };

    let rows: Vec<SnapshotRow> = aligned.points.iter().map(|p| p.row.clone()).collect();
    let matrix = match build_design_matrix(artifact, &rows) {
        Ok(m) => m,
        Err(CoreError::FeatureEncodingError(_)) | Err(CoreError::MissingFeature(_)) => {
            return Ok(GameResult::unusable(game_id, UnusableReason::MissingFeatures))
        }
        Err(e) => return Err(e),
    };
    let opening: Vec<Option<f64>> = rows.iter().map(|r| r.opening_prob_home_fair).collect();
    let probs = match predict(artifact, &matrix, &opening) {
        Ok(p) => p,
        Err(CoreError::FeatureEncodingError(_))
        | Err(CoreError::MissingFeature(_))
        | Err(CoreError::InvalidProbability(_)) => {
            return Ok(GameResult::unusable(game_id, UnusableReason::MissingFeatures))
        }
        Err(e) => return Err(e),
    };

    let trades = run_state_machine(game_id, &aligned.points, &probs, aligned.game_end_seconds, strategy, costs);
    let diagnostics = diagnostics_for(snapshots.len(), &aligned.points);
    let metrics = aggregate_metrics(&trades);

    Ok(GameResult { game_id: game_id.to_string(), trades, metrics, diagnostics })
}

fn run_state_machine(
    game_id: &str,
    points: &[AlignedPoint],
    probs: &[f64],
    game_end_seconds: f64,
    strategy: &StrategyConfig,
    costs: &CostConfig,
) -> Vec<TradeRecord> {
    let mut sm = TradeStateMachine::new(game_id, strategy, costs, game_end_seconds);
    let mut last_market_point: Option<MarketPoint> = None;

    for (point, &p_model) in points.iter().zip(probs) {
        if !point.has_market_data() {
            continue;
        }
        let mp = MarketPoint {
            game_time_seconds: point.game_time_seconds,
            p_model,
            bid: point.market_home_bid.unwrap(),
            ask: point.market_home_ask.unwrap(),
            mid: point.market_home_mid.unwrap(),
        };
        sm.on_point(&mp);
        last_market_point = Some(mp);
    }

    sm.finish(last_market_point.as_ref())
}

fn diagnostics_for(snapshots_total: usize, points: &[AlignedPoint]) -> GameDiagnostics {
    let aligned = points.len();
    let covered = points.iter().filter(|p| p.has_market_data()).count();
    let coverage = if aligned == 0 { 0.0 } else { covered as f64 / aligned as f64 };
    GameDiagnostics {
        snapshots_total,
        snapshots_aligned: aligned,
        market_coverage_fraction: coverage,
        skip_reason: None,
        per_row_errors: Vec::new(),
    }
}

/// Fold a game's trade list into summary metrics. Profit factor is `+inf`
/// when there are winning trades and no losses, and `0.0` when there are no
/// trades at all.
pub fn aggregate_metrics(trades: &[TradeRecord]) -> GameMetrics {
    if trades.is_empty() {
        return GameMetrics::default();
    }

    let trade_count = trades.len();
    let wins = trades.iter().filter(|t| t.net_pnl > 0.0).count();
    let gross_pnl: f64 = trades.iter().map(|t| t.gross_pnl).sum();
    let net_pnl: f64 = trades.iter().map(|t| t.net_pnl).sum();
    let total_fees: f64 = trades.iter().map(|t| t.entry_fee + t.exit_fee + t.slippage_cost).sum();
    let avg_hold_seconds: f64 = trades
        .iter()
        .map(|t| t.exit_game_time_seconds - t.entry_game_time_seconds)
        .sum::<f64>()
        / trade_count as f64;
    let long_count = trades.iter().filter(|t| t.direction == Direction::LongHome).count();
    let short_count = trade_count - long_count;

    let gross_win: f64 = trades.iter().filter(|t| t.net_pnl > 0.0).map(|t| t.net_pnl).sum();
    let gross_loss: f64 = trades.iter().filter(|t| t.net_pnl < 0.0).map(|t| -t.net_pnl).sum();
    let profit_factor = if gross_loss == 0.0 {
        if gross_win > 0.0 { f64::INFINITY } else { 0.0 }
    } else {
        gross_win / gross_loss
    };

    let mut equity = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown = 0.0;
    for t in trades {
        equity += t.net_pnl;
        if equity > peak {
            peak = equity;
        }
        let drawdown = peak - equity;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    GameMetrics {
        trade_count,
        win_rate: wins as f64 / trade_count as f64,
        gross_pnl,
        net_pnl,
        profit_factor,
        max_drawdown,
        avg_hold_seconds,
        total_fees,
        long_count,
        short_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::FeeRounding;
    use crate::model::ExitReason;

    fn trade(net_pnl: f64, direction: Direction) -> TradeRecord {
        TradeRecord {
            game_id: "g1".into(),
            direction,
            entry_game_time_seconds: 0.0,
            exit_game_time_seconds: 100.0,
            entry_price: 0.5,
            exit_price: 0.5,
            bet_amount_dollars: 20.0,
            num_contracts: 40.0,
            entry_fee: 0.0,
            exit_fee: 0.0,
            slippage_cost: 0.0,
            gross_pnl: net_pnl,
            net_pnl,
            exit_reason: ExitReason::Converged,
        }
    }

    #[test]
    fn aggregate_metrics_empty_is_default() {
        let m = aggregate_metrics(&[]);
        assert_eq!(m.trade_count, 0);
        assert_eq!(m.profit_factor, 0.0);
    }

    #[test]
    fn profit_factor_infinite_with_no_losses() {
        let trades = vec![trade(1.0, Direction::LongHome), trade(2.0, Direction::ShortHome)];
        let m = aggregate_metrics(&trades);
        assert!(m.profit_factor.is_infinite());
        assert_eq!(m.long_count, 1);
        assert_eq!(m.short_count, 1);
    }

    #[test]
    fn max_drawdown_tracks_running_equity() {
        // Equity path: +10, -15 (peak 10, trough -5, drawdown 15), +3.
        let trades = vec![
            trade(10.0, Direction::LongHome),
            trade(-15.0, Direction::LongHome),
            trade(3.0, Direction::LongHome),
        ];
        let m = aggregate_metrics(&trades);
        assert!((m.max_drawdown - 15.0).abs() < 1e-9);
    }

    #[test]
    fn win_rate_counts_positive_net_pnl_only() {
        let trades = vec![trade(5.0, Direction::LongHome), trade(-5.0, Direction::LongHome)];
        let m = aggregate_metrics(&trades);
        assert!((m.win_rate - 0.5).abs() < 1e-9);
    }

    // Regression guard for the costs plumbing; exercises the public
    // simulate_game surface with a no-coverage game (cheapest unusable path).
    #[test]
    fn simulate_game_with_no_market_returns_unusable() {
        use crate::artifact::{BaselinePolicy, ModelKind, Preprocess};
        use crate::calibrator::Calibrator;
        use crate::model::Possession;
        use chrono::Utc;
        use std::collections::HashMap;

        let artifact = Artifact {
            version: "t".into(),
            model_kind: ModelKind::Logreg,
            feature_schema: vec!["score_diff".into()],
            preprocess: Preprocess { numeric: HashMap::new(), nan_policy: HashMap::new() },
            calibrator: Calibrator::None,
            baseline_policy: BaselinePolicy::None,
            weights: Some(crate::artifact::LogregWeights { w: vec![0.1], b: 0.0 }),
            tree_blob_path: None,
            tree: Default::default(),
        };

        let row = SnapshotRow {
            season_label: "2025-26".into(),
            game_id: "g1".into(),
            sequence_number: 1,
            snapshot_ts: Utc::now(),
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
            market_home_bid: None,
            market_home_ask: None,
            market_home_mid: None,
            market_home_spread: None,
            market_away_bid: None,
            market_away_ask: None,
            market_away_mid: None,
            market_away_spread: None,
            opening_prob_home_fair: None,
            opening_overround: None,
        };

        let strategy = StrategyConfig {
            entry_threshold: 0.05,
            exit_threshold: 0.01,
            min_hold_seconds: 30.0,
            exclude_last_seconds: 0.0,
        };
        let costs = CostConfig {
            enable_fees: true,
            slippage_rate: 0.0,
            bet_amount_dollars: 20.0,
            fee_rounding: FeeRounding::None,
        };

        let result = simulate_game(
            "g1",
            &[row],
            &[],
            &artifact,
            &AlignConfig::default(),
            &strategy,
            &costs,
        )
        .unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.diagnostics.skip_reason, Some(UnusableReason::NoMarketCoverage));
    }

    // A schema column nobody recognizes is a per-game diagnostic, not a
    // fatal error: the game is marked unusable, other games proceed.
    #[test]
    fn unknown_feature_column_is_unusable_not_fatal() {
        use crate::artifact::{BaselinePolicy, ModelKind, Preprocess};
        use crate::calibrator::Calibrator;
        use crate::model::Possession;
        use chrono::Utc;
        use std::collections::HashMap;

        let artifact = Artifact {
            version: "t".into(),
            model_kind: ModelKind::Logreg,
            feature_schema: vec!["not_a_real_column".into()],
            preprocess: Preprocess { numeric: HashMap::new(), nan_policy: HashMap::new() },
            calibrator: Calibrator::None,
            baseline_policy: BaselinePolicy::None,
            weights: Some(crate::artifact::LogregWeights { w: vec![0.1], b: 0.0 }),
            tree_blob_path: None,
            tree: Default::default(),
        };

        let t0 = Utc::now();
        let row = SnapshotRow {
            season_label: "2025-26".into(),
            game_id: "g1".into(),
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

        let strategy = StrategyConfig {
            entry_threshold: 0.05,
            exit_threshold: 0.01,
            min_hold_seconds: 30.0,
            exclude_last_seconds: 0.0,
        };
        let costs = CostConfig {
            enable_fees: true,
            slippage_rate: 0.0,
            bet_amount_dollars: 20.0,
            fee_rounding: FeeRounding::None,
        };
        let align_config = AlignConfig { min_aligned_snapshots: 1, ..AlignConfig::default() };

        let result =
            simulate_game("g1", &[row], &market, &artifact, &align_config, &strategy, &costs).unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.diagnostics.skip_reason, Some(UnusableReason::MissingFeatures));
    }
}
