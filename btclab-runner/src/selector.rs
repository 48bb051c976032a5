//! Model selection: label the training frame, score each candidate with
//! K-fold cross-validation, persist every fitted candidate and the winner.

use crate::model::scaler::StandardScaler;
use crate::model::{
    self, binarize, write_json_atomic, FitSettings, ModelArtifact, ModelError, ModelKind,
};
use btclab_core::config::{Objective, PipelineConfig};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Model inputs, in matrix column order.
pub const FEATURE_COLUMNS: [&str; 7] = [
    "open_price",
    "high_price",
    "low_price",
    "close_price",
    "volume",
    "priceChange",
    "priceChangePercent",
];

/// Rows are put in this order before the forward difference is taken.
pub const ORDER_COLUMN: &str = "kline_open_time";

const CLOSE_INDEX: usize = 3;

pub const BEST_MODEL_FILE: &str = "best_model.json";
pub const SCALER_FILE: &str = "scaler.json";
pub const PREDICTIONS_FILE: &str = "predictions.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionOptions {
    pub objective: Objective,
    pub seed: u64,
    pub test_fraction: f64,
    pub folds: usize,
    pub forest_trees: usize,
    pub model_dir: PathBuf,
}

impl SelectionOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let t = &config.training;
        Self {
            objective: t.objective,
            seed: t.seed,
            test_fraction: t.test_fraction,
            folds: t.folds,
            forest_trees: t.forest_trees,
            model_dir: config.model_dir.clone(),
        }
    }

    fn fit_settings(&self) -> FitSettings {
        FitSettings {
            seed: self.seed,
            forest_trees: self.forest_trees,
        }
    }
}

/// Feature rows and their 0/1 trend labels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledSet {
    pub features: Array2<f64>,
    pub labels: Array1<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateScore {
    pub kind: ModelKind,
    /// Mean of the fold scores; higher is better.
    pub cv_score: f64,
    pub fold_scores: Vec<f64>,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionReport {
    pub best: ModelKind,
    pub objective: Objective,
    pub candidates: Vec<CandidateScore>,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Held-out mean squared error of the raw output.
    pub test_mse: f64,
    /// Held-out accuracy of the thresholded output.
    pub test_accuracy: f64,
    /// Held-out log-loss, classification objective only.
    pub test_log_loss: Option<f64>,
    pub model_dir: PathBuf,
}

impl SelectionReport {
    pub fn best_name(&self) -> &'static str {
        self.best.name()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.candidates
            .iter()
            .find(|c| c.kind == self.best)
            .map(|c| c.cv_score)
    }
}

/// Names from [`FEATURE_COLUMNS`] that `frame` lacks, in whitelist order.
pub fn missing_features(frame: &DataFrame) -> Vec<String> {
    FEATURE_COLUMNS
        .iter()
        .filter(|c| frame.column(c).is_err())
        .map(|c| c.to_string())
        .collect()
}

/// Sort by [`ORDER_COLUMN`] when the frame has it.
pub fn sort_chronologically(frame: &DataFrame) -> Result<DataFrame, ModelError> {
    if frame.column(ORDER_COLUMN).is_err() {
        return Ok(frame.clone());
    }
    Ok(frame
        .clone()
        .lazy()
        .sort(
            [ORDER_COLUMN],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?)
}

/// Feature columns as an `f64` matrix in [`FEATURE_COLUMNS`] order. Null or
/// unparseable cells are NaN.
pub fn feature_matrix(frame: &DataFrame) -> Result<Array2<f64>, ModelError> {
    let missing = missing_features(frame);
    if !missing.is_empty() {
        return Err(ModelError::MissingColumns(missing));
    }
    let mut matrix = Array2::from_elem((frame.height(), FEATURE_COLUMNS.len()), f64::NAN);
    for (j, name) in FEATURE_COLUMNS.iter().enumerate() {
        let values = frame.column(name)?.cast(&DataType::Float64)?;
        let column: Array1<f64> = values.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        matrix.column_mut(j).assign(&column);
    }
    Ok(matrix)
}

/// Label each row with whether the next row's close is higher.
///
/// The last row has no successor and is dropped, as is any row with a
/// missing or non-finite feature or next close.
pub fn prepare_data(frame: &DataFrame) -> Result<LabeledSet, ModelError> {
    let missing = missing_features(frame);
    if !missing.is_empty() {
        return Err(ModelError::MissingColumns(missing));
    }
    let sorted = sort_chronologically(frame)?;
    let matrix = feature_matrix(&sorted)?;

    let mut keep = Vec::new();
    let mut labels = Vec::new();
    for i in 1..matrix.nrows() {
        let current = matrix.row(i - 1);
        let next_close = matrix[[i, CLOSE_INDEX]];
        if !is_complete(current) || !next_close.is_finite() {
            continue;
        }
        labels.push(if next_close - current[CLOSE_INDEX] > 0.0 { 1.0 } else { 0.0 });
        keep.push(i - 1);
    }

    if keep.is_empty() {
        return Err(ModelError::NoData);
    }
    tracing::info!(rows = keep.len(), dropped = matrix.nrows() - keep.len(), "labelled rows prepared");
    Ok(LabeledSet {
        features: matrix.select(Axis(0), &keep),
        labels: Array1::from(labels),
    })
}

/// Every feature present and finite.
pub(crate) fn is_complete(row: ArrayView1<f64>) -> bool {
    row.iter().all(|v| v.is_finite())
}

/// Shuffled split: the first `ceil(n * test_fraction)` shuffled indices
/// are the test set, the rest the training set.
pub fn train_test_split(n: usize, test_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>), ModelError> {
    if n < 2 {
        return Err(ModelError::Fit(format!("{n} labelled row(s) cannot be split")));
    }
    let n_test = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let test = order[..n_test].to_vec();
    let train = order[n_test..].to_vec();
    Ok((train, test))
}

/// Contiguous folds without shuffling. The first `n % k` folds hold one
/// extra row. Returns `(train, validation)` index pairs.
pub fn kfold(n: usize, k: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let base = n / k;
    let extra = n % k;
    let mut start = 0;
    (0..k)
        .map(|fold| {
            let size = base + usize::from(fold < extra);
            let validation: Vec<usize> = (start..start + size).collect();
            let train: Vec<usize> = (0..start).chain(start + size..n).collect();
            start += size;
            (train, validation)
        })
        .collect()
}

/// Score `kind` on each fold; higher is better.
pub fn cross_val_scores(
    kind: ModelKind,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    folds: usize,
    settings: &FitSettings,
) -> Result<Vec<f64>, ModelError> {
    if x.nrows() < folds || folds < 2 {
        return Err(ModelError::Fit(format!(
            "{} training rows are too few for {folds}-fold cross-validation",
            x.nrows()
        )));
    }
    kfold(x.nrows(), folds)
        .into_iter()
        .map(|(train, validation)| {
            let (tx, ty) = gather(x, y, &train);
            let (vx, vy) = gather(x, y, &validation);
            let estimator = kind.fit(tx.view(), ty.view(), settings)?;
            Ok(model::score(kind.objective(), &vy, &estimator.predict(vx.view())))
        })
        .collect()
}

fn gather(x: ArrayView2<f64>, y: ArrayView1<f64>, idx: &[usize]) -> (Array2<f64>, Array1<f64>) {
    (x.select(Axis(0), idx), y.select(Axis(0), idx))
}

/// Train every candidate for the configured objective and keep the best.
///
/// Writes `{name}_model.json` per candidate, `scaler.json`,
/// `best_model.json` and `predictions.csv` under the model directory.
pub fn select_best(frame: &DataFrame, options: &SelectionOptions) -> Result<SelectionReport, ModelError> {
    let data = prepare_data(frame)?;
    let (train_idx, test_idx) = train_test_split(data.labels.len(), options.test_fraction, options.seed)?;
    let (x_train, y_train) = gather(data.features.view(), data.labels.view(), &train_idx);
    let (x_test, y_test) = gather(data.features.view(), data.labels.view(), &test_idx);

    let scaler = StandardScaler::fit(x_train.view());
    let x_train_scaled = scaler.transform(x_train.view());
    let x_test_scaled = scaler.transform(x_test.view());
    write_json_atomic(&scaler, &options.model_dir.join(SCALER_FILE))?;

    let settings = options.fit_settings();
    let features: Vec<String> = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut candidates = Vec::new();
    let mut best: Option<(f64, ModelArtifact)> = None;

    for kind in ModelKind::candidates(options.objective) {
        let fold_scores = cross_val_scores(kind, x_train_scaled.view(), y_train.view(), options.folds, &settings)?;
        let cv_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
        tracing::info!(model = %kind, score = cv_score, "cross-validated");

        let artifact = ModelArtifact {
            name: kind.name().to_string(),
            kind,
            objective: options.objective,
            features: features.clone(),
            scaler: scaler.clone(),
            estimator: kind.fit(x_train_scaled.view(), y_train.view(), &settings)?,
        };
        let path = options.model_dir.join(format!("{}_model.json", kind.name()));
        artifact.save(&path)?;

        candidates.push(CandidateScore {
            kind,
            cv_score,
            fold_scores,
            path,
        });
        if best.as_ref().map_or(true, |(s, _)| cv_score > *s) {
            best = Some((cv_score, artifact));
        }
    }

    let Some((best_score, best_artifact)) = best else {
        return Err(ModelError::Fit("no candidate models".into()));
    };
    best_artifact.save(&options.model_dir.join(BEST_MODEL_FILE))?;
    tracing::info!(model = %best_artifact.kind, score = best_score, "best model selected");

    let predicted = best_artifact.estimator.predict(x_test_scaled.view());
    write_predictions(&options.model_dir.join(PREDICTIONS_FILE), &y_test, &predicted)?;

    let test_mse = model::mean_squared_error(&y_test, &predicted);
    let test_accuracy = model::accuracy(&y_test, &predicted);
    let test_log_loss = match options.objective {
        Objective::Classification => Some(model::log_loss(&y_test, &predicted)),
        Objective::Regression => None,
    };
    tracing::info!(model = %best_artifact.kind, mse = test_mse, accuracy = test_accuracy, "held-out evaluation");

    Ok(SelectionReport {
        best: best_artifact.kind,
        objective: options.objective,
        candidates,
        train_rows: y_train.len(),
        test_rows: y_test.len(),
        test_mse,
        test_accuracy,
        test_log_loss,
        model_dir: options.model_dir.clone(),
    })
}

fn write_predictions(path: &Path, actual: &Array1<f64>, predicted: &Array1<f64>) -> Result<(), ModelError> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["Actual", "Predicted_Raw", "Predicted_Binary"])?;
    for (a, p) in actual.iter().zip(predicted) {
        wtr.write_record([
            (*a as u8).to_string(),
            p.to_string(),
            binarize(*p).to_string(),
        ])?;
    }
    wtr.flush().map_err(|e| ModelError::io(path, e))?;
    Ok(())
}
