//! Candidate estimators, their persisted form, and scoring functions.

pub mod forest;
pub mod linear;
pub mod logistic;
pub mod scaler;
pub mod tree;

use crate::frame::FrameError;
use btclab_core::config::Objective;
use forest::RandomForest;
use linear::LinearRegression;
use logistic::LogisticRegression;
use ndarray::{Array1, ArrayView1, ArrayView2};
use polars::prelude::PolarsError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use scaler::StandardScaler;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tree::{Criterion, DecisionTree, TreeParams};

/// Clip applied to probabilities before taking logs.
const LOG_LOSS_EPS: f64 = 1e-15;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing feature columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("no usable rows left after labelling")]
    NoData,

    #[error("model fit failed: {0}")]
    Fit(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("model serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

impl ModelError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The six candidate estimators, three per objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    LinearRegression,
    DecisionTreeRegressor,
    RandomForestRegressor,
    LogisticRegression,
    DecisionTreeClassifier,
    RandomForestClassifier,
}

impl ModelKind {
    /// Candidates for an objective, in evaluation order. Ties go to the
    /// earlier entry.
    pub fn candidates(objective: Objective) -> [ModelKind; 3] {
        match objective {
            Objective::Regression => [
                Self::LinearRegression,
                Self::DecisionTreeRegressor,
                Self::RandomForestRegressor,
            ],
            Objective::Classification => [
                Self::LogisticRegression,
                Self::DecisionTreeClassifier,
                Self::RandomForestClassifier,
            ],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::LinearRegression => "LinearRegression",
            Self::DecisionTreeRegressor => "DecisionTreeRegressor",
            Self::RandomForestRegressor => "RandomForestRegressor",
            Self::LogisticRegression => "LogisticRegression",
            Self::DecisionTreeClassifier => "DecisionTreeClassifier",
            Self::RandomForestClassifier => "RandomForestClassifier",
        }
    }

    pub fn objective(&self) -> Objective {
        match self {
            Self::LinearRegression | Self::DecisionTreeRegressor | Self::RandomForestRegressor => {
                Objective::Regression
            }
            _ => Objective::Classification,
        }
    }

    /// Fit this kind on already-scaled rows.
    pub fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, settings: &FitSettings) -> Result<Estimator, ModelError> {
        linear::check_shape(x, y)?;
        let mut rng = StdRng::seed_from_u64(settings.seed);
        let estimator = match self {
            Self::LinearRegression => Estimator::Linear(LinearRegression::fit(x, y)?),
            Self::LogisticRegression => Estimator::Logistic(LogisticRegression::fit(x, y, 1.0)?),
            Self::DecisionTreeRegressor => Estimator::Tree(DecisionTree::fit(
                x,
                y,
                TreeParams::new(Criterion::SquaredError),
                &mut rng,
            )),
            Self::DecisionTreeClassifier => Estimator::Tree(DecisionTree::fit(
                x,
                y,
                TreeParams::new(Criterion::Gini),
                &mut rng,
            )),
            Self::RandomForestRegressor => Estimator::Forest(RandomForest::fit(
                x,
                y,
                settings.forest_trees,
                Criterion::SquaredError,
                settings.seed,
            )),
            Self::RandomForestClassifier => Estimator::Forest(RandomForest::fit(
                x,
                y,
                settings.forest_trees,
                Criterion::Gini,
                settings.seed,
            )),
        };
        Ok(estimator)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings shared by every fit in one selection run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSettings {
    pub seed: u64,
    pub forest_trees: usize,
}

/// A fitted estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Estimator {
    Linear(LinearRegression),
    Logistic(LogisticRegression),
    Tree(DecisionTree),
    Forest(RandomForest),
}

impl Estimator {
    /// Raw output: a regression value, or the class-1 probability.
    pub fn predict_one(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            Self::Linear(m) => m.predict_one(row),
            Self::Logistic(m) => m.predict_proba(row),
            Self::Tree(m) => m.predict_one(row),
            Self::Forest(m) => m.predict_one(row),
        }
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.outer_iter().map(|r| self.predict_one(r)).collect()
    }
}

/// Everything needed to reproduce a prediction: the estimator, the scaler
/// it was trained behind, and the feature order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub kind: ModelKind,
    pub objective: Objective,
    pub features: Vec<String>,
    pub scaler: StandardScaler,
    pub estimator: Estimator,
}

impl ModelArtifact {
    /// Scale a raw feature row and run the estimator on it.
    pub fn predict_raw(&self, row: ArrayView1<f64>) -> f64 {
        self.estimator.predict_one(self.scaler.transform_row(row).view())
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        write_json_atomic(self, path)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let text = fs::read_to_string(path).map_err(|e| ModelError::io(path, e))?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Pretty JSON written to a temporary sibling and renamed into place.
pub(crate) fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<(), ModelError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ModelError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, text).map_err(|e| ModelError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        ModelError::io(path, e)
    })
}

// ─── Scoring ────────────────────────────────────────────────────────

pub fn mean_squared_error(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    (actual - predicted).mapv(|d| d * d).mean().unwrap_or(0.0)
}

pub fn log_loss(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    let p = predicted.mapv(|v| v.clamp(LOG_LOSS_EPS, 1.0 - LOG_LOSS_EPS));
    let losses = actual * &p.mapv(f64::ln) + &actual.mapv(|a| 1.0 - a) * &p.mapv(|v| (1.0 - v).ln());
    -losses.mean().unwrap_or(0.0)
}

/// Raw output to a 0/1 call. Strictly greater than one half is "up".
pub fn binarize(raw: f64) -> u8 {
    u8::from(raw > 0.5)
}

pub fn accuracy(actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let hits = actual
        .iter()
        .zip(predicted)
        .filter(|(a, p)| f64::from(binarize(**p)) == **a)
        .count();
    hits as f64 / actual.len() as f64
}

/// Higher is better for both objectives.
pub fn score(objective: Objective, actual: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    match objective {
        Objective::Regression => -mean_squared_error(actual, predicted),
        Objective::Classification => -log_loss(actual, predicted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn candidates_match_objective() {
        for objective in [Objective::Regression, Objective::Classification] {
            for kind in ModelKind::candidates(objective) {
                assert_eq!(kind.objective(), objective, "{kind}");
            }
        }
    }

    #[test]
    fn binarize_is_strict() {
        assert_eq!(binarize(0.5), 0);
        assert_eq!(binarize(0.5000001), 1);
        assert_eq!(binarize(-3.0), 0);
    }

    #[test]
    fn metrics_on_known_values() {
        let actual = arr1(&[1.0, 0.0, 1.0, 0.0]);
        let predicted = arr1(&[0.9, 0.2, 0.4, 0.6]);
        assert!((mean_squared_error(&actual, &predicted) - 0.1925).abs() < 1e-12);
        assert_eq!(accuracy(&actual, &predicted), 0.5);
        assert!(log_loss(&arr1(&[1.0]), &arr1(&[1.0])) < 1e-10);
        assert!(log_loss(&arr1(&[1.0]), &arr1(&[0.0])).is_finite());
        assert_eq!(score(Objective::Regression, &arr1(&[1.0]), &arr1(&[0.0])), -1.0);
        assert_eq!(mean_squared_error(&Array1::zeros(0), &Array1::zeros(0)), 0.0);
    }

    #[test]
    fn artifact_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let x = arr2(&[[0.0], [1.0], [2.0], [3.0]]);
        let y = arr1(&[0.0, 0.0, 1.0, 1.0]);
        let scaler = StandardScaler::fit(x.view());
        let settings = FitSettings {
            seed: 42,
            forest_trees: 5,
        };
        let estimator = ModelKind::DecisionTreeRegressor
            .fit(scaler.transform(x.view()).view(), y.view(), &settings)
            .unwrap();
        let artifact = ModelArtifact {
            name: "DecisionTreeRegressor".into(),
            kind: ModelKind::DecisionTreeRegressor,
            objective: Objective::Regression,
            features: vec!["close_price".into()],
            scaler,
            estimator,
        };
        let path = dir.path().join("models/best_model.json");

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();

        assert_eq!(loaded, artifact);
        assert_eq!(loaded.predict_raw(arr1(&[3.0]).view()), 1.0);
        assert_eq!(loaded.predict_raw(arr1(&[0.0]).view()), 0.0);
    }
}
