//! Design-matrix builder — turns a batch of [`SnapshotRow`]s into the exact
//! feature matrix an artifact expects, column order and preprocessing driven
//! entirely by `Artifact::feature_schema` / `Artifact::preprocess` (the
//! schema is the single source of truth; no side channel).

use crate::artifact::{Artifact, NanPolicy};
use crate::error::CoreError;
use crate::model::{Possession, SnapshotRow};

const MIN_STD: f64 = 1e-12;

fn possession_one_hot(p: Possession, col: &str) -> Option<f64> {
    match col {
        "possession_home" => Some(if p == Possession::Home { 1.0 } else { 0.0 }),
        "possession_away" => Some(if p == Possession::Away { 1.0 } else { 0.0 }),
        "possession_unknown" => Some(if p == Possession::Unknown { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn period_one_hot(period: u8, col: &str) -> Result<Option<f64>, CoreError> {
    if !col.starts_with("period_") {
        return Ok(None);
    }
    let n: u8 = col
        .trim_start_matches("period_")
        .parse()
        .map_err(|_| CoreError::FeatureEncodingError(format!("bad period column name {col}")))?;
    if !(1..=4).contains(&n) {
        return Err(CoreError::FeatureEncodingError(format!(
            "period column {col} out of range [1,4]"
        )));
    }
    if !(1..=4).contains(&period) {
        return Err(CoreError::FeatureEncodingError(format!(
            "row period {period} out of range [1,4]"
        )));
    }
    Ok(Some(if period == n { 1.0 } else { 0.0 }))
}

const NUMERIC_COLUMNS: &[&str] = &[
    "score_diff",
    "time_remaining_regulation",
    "home_score",
    "away_score",
    "score_diff_div_sqrt_time_remaining",
    "espn_home_prob_lag_1",
    "espn_home_prob_delta_1",
    "espn_home_prob",
    "opening_prob_home_fair",
    "opening_overround",
];

fn is_known_numeric_column(col: &str) -> bool {
    NUMERIC_COLUMNS.contains(&col)
}

/// Raw (unstandardized) numeric value for a schema column name. Optional
/// row fields that are absent surface as `NaN`, which the caller routes
/// through the artifact's per-feature `nan_policy`. Returns `None` only when
/// `col` names neither a numeric feature nor a categorical one-hot column.
fn raw_numeric_value(row: &SnapshotRow, col: &str) -> Option<f64> {
    if !is_known_numeric_column(col) {
        return None;
    }
    let value = match col {
        "score_diff" => row.score_diff as f64,
        "time_remaining_regulation" => row.time_remaining_regulation as f64,
        "home_score" => row.home_score as f64,
        "away_score" => row.away_score as f64,
        "score_diff_div_sqrt_time_remaining" => {
            row.score_diff_div_sqrt_time_remaining.unwrap_or(f64::NAN)
        }
        "espn_home_prob_lag_1" => row.espn_home_prob_lag_1.unwrap_or(f64::NAN),
        "espn_home_prob_delta_1" => row.espn_home_prob_delta_1.unwrap_or(f64::NAN),
        "espn_home_prob" => row.espn_home_prob.unwrap_or(f64::NAN),
        "opening_prob_home_fair" => row.opening_prob_home_fair.unwrap_or(f64::NAN),
        "opening_overround" => row.opening_overround.unwrap_or(f64::NAN),
        _ => unreachable!(),
    };
    Some(value)
}

/// Build the `float64` design matrix for `rows`, columns in the exact order
/// of `artifact.feature_schema`.
pub fn build_design_matrix(
    artifact: &Artifact,
    rows: &[SnapshotRow],
) -> Result<Vec<Vec<f64>>, CoreError> {
    let mut matrix = Vec::with_capacity(rows.len());
    for row in rows {
        let mut out_row = Vec::with_capacity(artifact.feature_schema.len());
        for col in &artifact.feature_schema {
            if let Some(v) = possession_one_hot(row.possession, col) {
                out_row.push(v);
                continue;
            }
            if let Some(v) = period_one_hot(row.period, col)? {
                out_row.push(v);
                continue;
            }
            let raw = raw_numeric_value(row, col).ok_or_else(|| {
                CoreError::FeatureEncodingError(format!("unknown feature column {col}"))
            })?;

            let value = match raw {
                v if v.is_nan() => {
                    let policy = artifact
                        .preprocess
                        .nan_policy
                        .get(col)
                        .copied()
                        .unwrap_or(NanPolicy::Reject);
                    match policy {
                        NanPolicy::Keep => f64::NAN,
                        NanPolicy::Reject => {
                            return Err(CoreError::MissingFeature(col.clone()));
                        }
                    }
                }
                v => {
                    let stats = artifact.preprocess.numeric.get(col);
                    match stats {
                        Some(s) => (v - s.mean) / s.std.max(MIN_STD),
                        None => v,
                    }
                }
            };
            out_row.push(value);
        }
        matrix.push(out_row);
    }
    Ok(matrix)
}
