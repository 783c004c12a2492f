//! Predictor — given an artifact and a design matrix, returns calibrated
//! home-win probabilities. Pure and re-entrant: the only shared mutable
//! state is the artifact's one-shot tree-blob load (see [`crate::artifact`]).

use crate::artifact::{Artifact, BaselinePolicy, ModelKind};
use crate::error::CoreError;
use crate::numeric::{logit, sigmoid};

/// Raw logit for a batch of rows, before baseline adjustment or calibration.
fn raw_logit(artifact: &Artifact, matrix: &[Vec<f64>]) -> Result<Vec<f64>, CoreError> {
    match artifact.model_kind {
        ModelKind::Logreg => {
            let weights = artifact
                .weights
                .as_ref()
                .ok_or_else(|| CoreError::ArtifactLoadError("LOGREG artifact missing weights".into()))?;
            matrix
                .iter()
                .map(|row| {
                    if row.len() != weights.w.len() {
                        return Err(CoreError::FeatureEncodingError(format!(
                            "row length {} does not match weight vector length {}",
                            row.len(),
                            weights.w.len()
                        )));
                    }
                    if row.iter().any(|v| v.is_nan()) {
                        return Err(CoreError::MissingFeature(
                            "LOGREG cannot accept NaN features".into(),
                        ));
                    }
                    let dot: f64 = row.iter().zip(&weights.w).map(|(x, w)| x * w).sum();
                    Ok(dot + weights.b)
                })
                .collect()
        }
        ModelKind::Gbt => {
            let tree = artifact.ensure_tree_loaded()?;
            Ok(matrix.iter().map(|row| tree.margin(row)).collect())
        }
    }
}

/// Predict calibrated home-win probabilities for `matrix`, one row per
/// `opening_prob_home_fair` entry when the baseline policy is active.
pub fn predict(
    artifact: &Artifact,
    matrix: &[Vec<f64>],
    opening_prob_home_fair: &[Option<f64>],
) -> Result<Vec<f64>, CoreError> {
    if matrix.len() != opening_prob_home_fair.len() {
        return Err(CoreError::FeatureEncodingError(
            "matrix and opening_prob_home_fair length mismatch".into(),
        ));
    }

    let mut z = raw_logit(artifact, matrix)?;

    if artifact.baseline_policy == BaselinePolicy::OpeningOddsLogit {
        for (zi, opening) in z.iter_mut().zip(opening_prob_home_fair) {
            let baseline = match opening {
                Some(p) if !p.is_nan() => logit(*p),
                _ => 0.0,
            };
            *zi += baseline;
        }
    }

    let p_base: Vec<f64> = z.into_iter().map(sigmoid).collect();
    artifact.calibrator.apply(&p_base)
}
