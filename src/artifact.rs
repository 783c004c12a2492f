//! Model artifact — immutable in-memory representation of a trained
//! win-probability model, loaded once per process.
//!
//! Mirrors the teacher's "load once, never reload per call" discipline
//! (`src/polymarket/market_cache.rs` loads once and is queried many times);
//! here the heavy resource is a lazily-parsed tree ensemble blob, guarded by
//! a `OnceLock` so it is parsed at most once regardless of how many
//! predictions share the artifact.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::calibrator::Calibrator;
use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelKind {
    Logreg,
    Gbt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselinePolicy {
    None,
    OpeningOddsLogit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericPreprocess {
    pub mean: f64,
    pub std: f64,
}

/// How a numeric feature behaves when the input value is NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NanPolicy {
    /// GBT models accept NaN natively.
    Keep,
    /// Logistic models fail on NaN with `MissingFeature`.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprocess {
    pub numeric: HashMap<String, NumericPreprocess>,
    pub nan_policy: HashMap<String, NanPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogregWeights {
    pub w: Vec<f64>,
    pub b: f64,
}

/// An opaque gradient-boosted tree ensemble. Parsing is deferred to first
/// use — see [`Artifact::ensure_tree_loaded`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<Tree>,
    pub base_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub feature_index: usize,
    pub threshold: f64,
    pub left_value: f64,
    pub right_value: f64,
}

impl TreeEnsemble {
    /// Raw margin contribution of a single row (not a probability).
    pub fn margin(&self, row: &[f64]) -> f64 {
        let mut z = self.base_score;
        for t in &self.trees {
            let v = row.get(t.feature_index).copied().unwrap_or(f64::NAN);
            if v.is_nan() {
                // GBT models accept NaN features; route down a fixed branch.
                z += t.right_value;
            } else if v < t.threshold {
                z += t.left_value;
            } else {
                z += t.right_value;
            }
        }
        z
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArtifactManifest {
    version: String,
    model_kind: ModelKind,
    feature_schema: Vec<String>,
    preprocess: Preprocess,
    calibrator: Calibrator,
    baseline_policy: BaselinePolicy,
    weights: Option<LogregWeights>,
    tree_blob_path: Option<String>,
}

/// Immutable, process-wide shared model artifact.
#[derive(Debug)]
pub struct Artifact {
    pub version: String,
    pub model_kind: ModelKind,
    pub feature_schema: Vec<String>,
    pub preprocess: Preprocess,
    pub calibrator: Calibrator,
    pub baseline_policy: BaselinePolicy,
    pub weights: Option<LogregWeights>,

    pub(crate) tree_blob_path: Option<PathBuf>,
    pub(crate) tree: OnceLock<TreeEnsemble>,
}

impl Artifact {
    /// Load a manifest (and record the sibling tree blob path, if any) from
    /// disk. The tree blob itself is not read until first prediction.
    pub fn load(manifest_path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let manifest_path = manifest_path.as_ref();
        let contents = fs::read_to_string(manifest_path).map_err(|e| {
            CoreError::ArtifactLoadError(format!(
                "cannot read manifest {}: {e}",
                manifest_path.display()
            ))
        })?;
        let manifest: ArtifactManifest = serde_json::from_str(&contents)
            .map_err(|e| CoreError::ArtifactLoadError(format!("malformed manifest: {e}")))?;

        if manifest.feature_schema.is_empty() {
            return Err(CoreError::ArtifactLoadError(
                "feature_schema must be non-empty".into(),
            ));
        }

        match manifest.model_kind {
            ModelKind::Logreg => {
                let w = manifest.weights.as_ref().ok_or_else(|| {
                    CoreError::ArtifactLoadError("LOGREG artifact missing weights".into())
                })?;
                if w.w.len() != manifest.feature_schema.len() {
                    return Err(CoreError::ArtifactLoadError(format!(
                        "weight vector length {} does not match feature_schema length {}",
                        w.w.len(),
                        manifest.feature_schema.len()
                    )));
                }
            }
            ModelKind::Gbt => {
                if manifest.tree_blob_path.is_none() {
                    return Err(CoreError::ArtifactLoadError(
                        "GBT artifact missing tree_blob_path".into(),
                    ));
                }
            }
        }

        let tree_blob_path = manifest
            .tree_blob_path
            .as_ref()
            .map(|rel| manifest_path.parent().unwrap_or_else(|| Path::new(".")).join(rel));

        Ok(Artifact {
            version: manifest.version,
            model_kind: manifest.model_kind,
            feature_schema: manifest.feature_schema,
            preprocess: manifest.preprocess,
            calibrator: manifest.calibrator,
            baseline_policy: manifest.baseline_policy,
            weights: manifest.weights,
            tree_blob_path,
            tree: OnceLock::new(),
        })
    }

    /// Parse the tree ensemble blob on first use; subsequent calls reuse the
    /// cached value. Mandatory invariant per the design notes: never reload
    /// per prediction call.
    pub fn ensure_tree_loaded(&self) -> Result<&TreeEnsemble, CoreError> {
        if let Some(tree) = self.tree.get() {
            return Ok(tree);
        }
        let path = self.tree_blob_path.as_ref().ok_or_else(|| {
            CoreError::ArtifactLoadError("GBT artifact has no tree_blob_path".into())
        })?;
        let contents = fs::read_to_string(path).map_err(|e| {
            CoreError::ArtifactLoadError(format!("cannot read tree blob {}: {e}", path.display()))
        })?;
        let ensemble: TreeEnsemble = serde_json::from_str(&contents)
            .map_err(|e| CoreError::ArtifactLoadError(format!("malformed tree blob: {e}")))?;
        // OnceLock::set races benignly: the loser's parse is simply discarded.
        let _ = self.tree.set(ensemble);
        Ok(self.tree.get().expect("just set"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &tempfile_like::TempDir, json: &str) -> PathBuf {
        let path = dir.path.join("manifest.json");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    // Minimal self-contained tempdir so we don't need the `tempfile` crate
    // for this unit test; cleaned up on drop.
    mod tempfile_like {
        use std::path::PathBuf;
        pub struct TempDir {
            pub path: PathBuf,
        }
        impl TempDir {
            pub fn new(tag: &str) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "divergence-core-test-{tag}-{}",
                    std::process::id()
                ));
                std::fs::create_dir_all(&path).unwrap();
                TempDir { path }
            }
        }
        impl Drop for TempDir {
            fn drop(&mut self) {
                let _ = std::fs::remove_dir_all(&self.path);
            }
        }
    }

    fn logreg_manifest() -> String {
        r#"{
            "version": "v1",
            "model_kind": "LOGREG",
            "feature_schema": ["score_diff", "time_remaining_regulation"],
            "preprocess": {
                "numeric": {
                    "score_diff": {"mean": 0.0, "std": 10.0},
                    "time_remaining_regulation": {"mean": 1440.0, "std": 700.0}
                },
                "nan_policy": {
                    "score_diff": "Reject",
                    "time_remaining_regulation": "Reject"
                }
            },
            "calibrator": {"kind": "None"},
            "baseline_policy": "None",
            "weights": {"w": [0.5, -0.2], "b": 0.1},
            "tree_blob_path": null
        }"#
        .to_string()
    }

    #[test]
    fn loads_valid_logreg_manifest() {
        let dir = tempfile_like::TempDir::new("logreg");
        let path = write_manifest(&dir, &logreg_manifest());
        let artifact = Artifact::load(&path).unwrap();
        assert_eq!(artifact.feature_schema.len(), 2);
        assert!(artifact.weights.is_some());
    }

    #[test]
    fn rejects_weight_schema_mismatch() {
        let dir = tempfile_like::TempDir::new("mismatch");
        let bad = logreg_manifest().replace(r#""w": [0.5, -0.2]"#, r#""w": [0.5]"#);
        let path = write_manifest(&dir, &bad);
        let err = Artifact::load(&path).unwrap_err();
        assert!(matches!(err, CoreError::ArtifactLoadError(_)));
    }

    #[test]
    fn rejects_gbt_without_tree_blob_path() {
        let dir = tempfile_like::TempDir::new("gbt-missing");
        let bad = logreg_manifest().replace("\"LOGREG\"", "\"GBT\"");
        let path = write_manifest(&dir, &bad);
        let err = Artifact::load(&path).unwrap_err();
        assert!(matches!(err, CoreError::ArtifactLoadError(_)));
    }

    #[test]
    fn tree_is_loaded_lazily_and_cached() {
        let dir = tempfile_like::TempDir::new("gbt-ok");
        let tree_path = dir.path.join("tree.json");
        fs::write(
            &tree_path,
            r#"{"trees": [{"feature_index": 0, "threshold": 0.0, "left_value": -1.0, "right_value": 1.0}], "base_score": 0.0}"#,
        )
        .unwrap();
        let manifest = logreg_manifest()
            .replace("\"LOGREG\"", "\"GBT\"")
            .replace("\"weights\": {\"w\": [0.5, -0.2], \"b\": 0.1}", "\"weights\": null")
            .replace("\"tree_blob_path\": null", "\"tree_blob_path\": \"tree.json\"");
        let path = write_manifest(&dir, &manifest);
        let artifact = Artifact::load(&path).unwrap();
        assert!(artifact.tree.get().is_none());
        let t1 = artifact.ensure_tree_loaded().unwrap() as *const _;
        let t2 = artifact.ensure_tree_loaded().unwrap() as *const _;
        assert_eq!(t1, t2, "tree must not be reparsed on a second call");
    }
}
