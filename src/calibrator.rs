//! Calibrator — applies a Platt or isotonic transform to base probabilities.
//!
//! Adapted from the teacher's Platt-scaling module (`bot::calibration`):
//! `p_cal = sigmoid(alpha + beta * logit(p_base))`. Isotonic calibration is
//! new: monotone piecewise-constant lookup via binary search.

use crate::error::CoreError;
use crate::numeric::{logit, sigmoid};
use serde::{Deserialize, Serialize};

const CLIP_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Calibrator {
    None,
    Platt { alpha: f64, beta: f64 },
    /// `xs` strictly increasing, `ys` non-decreasing, both in `[0, 1]`.
    Isotonic { xs: Vec<f64>, ys: Vec<f64> },
}

impl Calibrator {
    /// Apply the calibration transform to a batch of base probabilities.
    ///
    /// NaN is always rejected. Out-of-`[0,1]` inputs are rejected for `None`
    /// and `Platt` (there is no sound logit of a value outside `[0,1]`), but
    /// the isotonic lookup clamps at both ends instead of erroring — it is a
    /// piecewise-constant step function over `[xs[0], xs[last]]`, and the
    /// scenario this calibrator implements explicitly queries values outside
    /// that range and expects the boundary `y` back, not a failure.
    pub fn apply(&self, p_base: &[f64]) -> Result<Vec<f64>, CoreError> {
        if p_base.iter().any(|p| p.is_nan()) {
            return Err(CoreError::InvalidProbability("calibrator input is NaN".into()));
        }
        match self {
            Calibrator::None => {
                Self::reject_out_of_range(p_base)?;
                Ok(p_base.to_vec())
            }
            Calibrator::Platt { alpha, beta } => {
                Self::reject_out_of_range(p_base)?;
                Ok(p_base
                    .iter()
                    .map(|&p| {
                        let x = logit(p.clamp(0.0, 1.0));
                        sigmoid(alpha + beta * x).clamp(0.0, 1.0)
                    })
                    .collect())
            }
            Calibrator::Isotonic { xs, ys } => {
                Ok(p_base.iter().map(|&p| isotonic_lookup(xs, ys, p)).collect())
            }
        }
    }

    fn reject_out_of_range(p_base: &[f64]) -> Result<(), CoreError> {
        for &p in p_base {
            if !(-CLIP_TOLERANCE..=1.0 + CLIP_TOLERANCE).contains(&p) {
                return Err(CoreError::InvalidProbability(format!(
                    "calibrator input {p} out of [0,1] (tolerance {CLIP_TOLERANCE})"
                )));
            }
        }
        Ok(())
    }
}

/// Piecewise-constant isotonic lookup: for query `x`, return `y_i` where `i`
/// is the largest index with `x_i <= x`; clamp at both ends.
fn isotonic_lookup(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    if xs.is_empty() {
        return x.clamp(0.0, 1.0);
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }
    // Binary search for the largest index with xs[i] <= x.
    let mut lo = 0usize;
    let mut hi = xs.len() - 1;
    while lo < hi {
        let mid = (lo + hi).div_ceil(2);
        if xs[mid] <= x {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    ys[lo]
}
