//! ESPN <-> market timeline aligner (§4.F) — a pure function of its inputs:
//! snapshots shifted onto game-clock seconds, matched to the nearest market
//! observation within a bounded window.

use chrono::{DateTime, Utc};

use crate::error::UnusableReason;
use crate::model::{AlignedPoint, MarketObservation, SnapshotRow};

#[derive(Debug, Clone, Copy)]
pub struct AlignConfig {
    pub match_window_seconds: i64,
    pub exclude_first_seconds: f64,
    pub exclude_last_seconds: f64,
    pub min_aligned_snapshots: usize,
}

impl Default for AlignConfig {
    fn default() -> Self {
        AlignConfig {
            match_window_seconds: 60,
            exclude_first_seconds: 0.0,
            exclude_last_seconds: 0.0,
            min_aligned_snapshots: 2,
        }
    }
}

#[derive(Debug)]
pub struct AlignedGame {
    pub points: Vec<AlignedPoint>,
    pub game_end_seconds: f64,
}

/// Align one game's snapshots against its (optional) market stream.
/// Snapshots must already be ordered by `sequence_number` (the aligner does
/// not re-sort; it is the caller's job to hand it a well-ordered stream).
pub fn align_game(
    snapshots: &[SnapshotRow],
    market: &[MarketObservation],
    config: &AlignConfig,
) -> Result<AlignedGame, UnusableReason> {
    let Some(first) = snapshots.first() else {
        return Err(UnusableReason::TooFewSnapshots);
    };
    let first_ts = first.snapshot_ts;
    let game_start = first_ts;
    let last_ts = snapshots.last().unwrap().snapshot_ts;
    let game_end_seconds = (last_ts - first_ts).num_milliseconds() as f64 / 1000.0;

    let mut market_sorted: Vec<&MarketObservation> = market
        .iter()
        .filter(|m| m.ts >= game_start && m.ts <= game_start + (last_ts - first_ts))
        .collect();
    market_sorted.sort_by_key(|m| m.ts);

    let mut points = Vec::with_capacity(snapshots.len());
    for row in snapshots {
        let game_time_seconds = (row.snapshot_ts - first_ts).num_milliseconds() as f64 / 1000.0;
        let wall_ts_aligned = game_start + (row.snapshot_ts - first_ts);

        if game_time_seconds < config.exclude_first_seconds
            || game_time_seconds > game_end_seconds - config.exclude_last_seconds
        {
            continue;
        }

        let matched = closest_within_window(&market_sorted, wall_ts_aligned, config.match_window_seconds);

        points.push(AlignedPoint {
            game_id: row.game_id.clone(),
            sequence_number: row.sequence_number,
            game_time_seconds,
            wall_ts_aligned,
            row: row.clone(),
            market_home_bid: matched.map(|m| m.home_bid),
            market_home_ask: matched.map(|m| m.home_ask),
            market_home_mid: matched.map(|m| m.home_mid),
        });
    }

    let covered = points.iter().filter(|p| p.has_market_data()).count();
    if covered < config.min_aligned_snapshots {
        // `TooFewSnapshots` is reserved for a raw snapshot list that is
        // genuinely too short to ever satisfy `min_aligned_snapshots`,
        // regardless of market data. Anything else — no market stream at
        // all, or a market stream present but never falling inside any
        // snapshot's window — is a market-coverage problem, not a snapshot
        // one, even if the raw snapshot count is large.
        return Err(if market.is_empty() {
            UnusableReason::NoMarketCoverage
        } else if points.len() < config.min_aligned_snapshots {
            UnusableReason::TooFewSnapshots
        } else {
            UnusableReason::NoMarketCoverage
        });
    }

    Ok(AlignedGame { points, game_end_seconds })
}

/// Closest market observation to `target` within `±window_seconds`,
/// preferring the later timestamp on ties.
fn closest_within_window<'a>(
    sorted: &[&'a MarketObservation],
    target: DateTime<Utc>,
    window_seconds: i64,
) -> Option<&'a MarketObservation> {
    if sorted.is_empty() {
        return None;
    }
    let window = chrono::Duration::seconds(window_seconds);
    let lo = target - window;
    let hi = target + window;

    let mut best: Option<&MarketObservation> = None;
    let mut best_abs_diff: i64 = i64::MAX;
    for &m in sorted {
        if m.ts < lo || m.ts > hi {
            continue;
        }
        let diff = (m.ts - target).num_milliseconds();
        let abs_diff = diff.abs();
        match best {
            None => {
                best = Some(m);
                best_abs_diff = abs_diff;
            }
            Some(b) => {
                if abs_diff < best_abs_diff || (abs_diff == best_abs_diff && m.ts > b.ts) {
                    best = Some(m);
                    best_abs_diff = abs_diff;
                }
            }
        }
    }
    best
}
