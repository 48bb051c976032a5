//! Model selection and prediction on synthetic training frames.

use btclab_core::config::Objective;
use btclab_runner::model::{ModelArtifact, ModelError, ModelKind};
use btclab_runner::predict::{predict_latest, Trend};
use btclab_runner::selector::{
    prepare_data, select_best, SelectionOptions, BEST_MODEL_FILE, FEATURE_COLUMNS, PREDICTIONS_FILE, SCALER_FILE,
};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

const DAY1: i64 = 1_714_521_600_000;
const STEP: i64 = 300_000;

/// `n` candles with noisy prices and a previous-day statistics block.
fn synthetic_frame(n: usize, seed: u64) -> DataFrame {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut open_time = Vec::with_capacity(n);
    let mut open = Vec::with_capacity(n);
    let mut high = Vec::with_capacity(n);
    let mut low = Vec::with_capacity(n);
    let mut close = Vec::with_capacity(n);
    let mut volume = Vec::with_capacity(n);
    let mut change = Vec::with_capacity(n);
    let mut change_pct = Vec::with_capacity(n);

    let mut price = 60_000.0;
    for i in 0..n {
        let o: f64 = price;
        let c: f64 = o + rng.gen_range(-40.0..40.0);
        open_time.push(DAY1 + i as i64 * STEP);
        open.push(o);
        high.push(o.max(c) + rng.gen_range(0.0..15.0));
        low.push(o.min(c) - rng.gen_range(0.0..15.0));
        close.push(c);
        volume.push(rng.gen_range(5.0..50.0));
        change.push(rng.gen_range(-500.0..500.0));
        change_pct.push(rng.gen_range(-2.0..2.0));
        price = c;
    }

    df!(
        "kline_open_time" => open_time,
        "open_price" => open,
        "high_price" => high,
        "low_price" => low,
        "close_price" => close,
        "volume" => volume,
        "priceChange" => change,
        "priceChangePercent" => change_pct,
    )
    .unwrap()
}

fn options(objective: Objective, model_dir: &Path) -> SelectionOptions {
    SelectionOptions {
        objective,
        seed: 42,
        test_fraction: 0.2,
        folds: 3,
        forest_trees: 10,
        model_dir: model_dir.to_path_buf(),
    }
}

#[test]
fn missing_columns_are_listed_in_order() {
    let frame = synthetic_frame(10, 1)
        .drop("priceChangePercent")
        .unwrap()
        .drop("priceChange")
        .unwrap();

    let err = prepare_data(&frame).unwrap_err();

    match err {
        ModelError::MissingColumns(cols) => assert_eq!(cols, vec!["priceChange", "priceChangePercent"]),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn labels_compare_with_the_next_close() {
    let frame = df!(
        "kline_open_time" => [DAY1 + 2 * STEP, DAY1, DAY1 + STEP],
        "open_price" => [1.0, 1.0, 1.0],
        "high_price" => [1.0, 1.0, 1.0],
        "low_price" => [1.0, 1.0, 1.0],
        "close_price" => [9.0, 10.0, 12.0],
        "volume" => [1.0, 1.0, 1.0],
        "priceChange" => [0.0, 0.0, 0.0],
        "priceChangePercent" => [0.0, 0.0, 0.0],
    )
    .unwrap();

    let data = prepare_data(&frame).unwrap();

    // Sorted closes: 10, 12, 9. Last row has no successor.
    assert_eq!(data.labels.to_vec(), vec![1.0, 0.0]);
    assert_eq!(data.features[[0, 3]], 10.0);
}

#[test]
fn regression_selection_writes_every_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let frame = synthetic_frame(80, 7);

    let report = select_best(&frame, &options(Objective::Regression, dir.path())).unwrap();

    assert_eq!(report.candidates.len(), 3);
    assert_eq!(report.train_rows + report.test_rows, 79);
    assert_eq!(report.test_rows, 16);
    assert!(report.test_log_loss.is_none());
    assert!((0.0..=1.0).contains(&report.test_accuracy));
    for c in &report.candidates {
        assert_eq!(c.kind.objective(), Objective::Regression);
        assert_eq!(c.fold_scores.len(), 3);
        assert!(c.path.exists(), "{}", c.path.display());
    }
    let best_cv = report.best_score().unwrap();
    assert!(report.candidates.iter().all(|c| c.cv_score <= best_cv));
    assert!(dir.path().join(SCALER_FILE).exists());

    let best = ModelArtifact::load(&dir.path().join(BEST_MODEL_FILE)).unwrap();
    assert_eq!(best.kind, report.best);
    assert_eq!(best.features, FEATURE_COLUMNS.map(String::from).to_vec());

    let mut rdr = csv::Reader::from_path(dir.path().join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(
        rdr.headers().unwrap().iter().collect::<Vec<_>>(),
        vec!["Actual", "Predicted_Raw", "Predicted_Binary"]
    );
    assert_eq!(rdr.records().count(), report.test_rows);
}

#[test]
fn classification_selection_uses_classifiers() {
    let dir = tempfile::tempdir().unwrap();
    let frame = synthetic_frame(60, 11);

    let report = select_best(&frame, &options(Objective::Classification, dir.path())).unwrap();

    let kinds: Vec<ModelKind> = report.candidates.iter().map(|c| c.kind).collect();
    assert_eq!(kinds, ModelKind::candidates(Objective::Classification).to_vec());
    assert!(report.test_log_loss.unwrap().is_finite());
    assert!(dir.path().join("LogisticRegression_model.json").exists());
    assert!(dir.path().join("RandomForestClassifier_model.json").exists());
}

#[test]
fn selection_is_reproducible_for_a_seed() {
    let frame = synthetic_frame(50, 3);
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();

    let first = select_best(&frame, &options(Objective::Regression, a.path())).unwrap();
    let second = select_best(&frame, &options(Objective::Regression, b.path())).unwrap();

    assert_eq!(first.best, second.best);
    for (x, y) in first.candidates.iter().zip(&second.candidates) {
        assert_eq!(x.fold_scores, y.fold_scores);
    }
    assert_eq!(first.test_mse, second.test_mse);
}

#[test]
fn too_few_rows_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let frame = synthetic_frame(4, 5);

    let err = select_best(&frame, &options(Objective::Regression, dir.path())).unwrap_err();

    assert!(matches!(err, ModelError::Fit(_)), "{err}");
}

#[test]
fn prediction_uses_the_newest_row() {
    let dir = tempfile::tempdir().unwrap();
    let frame = synthetic_frame(60, 21);
    let report = select_best(&frame, &options(Objective::Classification, dir.path())).unwrap();

    let prediction = predict_latest(dir.path(), &frame).unwrap();

    assert_eq!(prediction.model, report.best_name());
    assert!((0.0..=1.0).contains(&prediction.raw));
    assert!((0.0..=1.0).contains(&prediction.confidence));
    let newest = chrono::DateTime::from_timestamp_millis(DAY1 + 59 * STEP).unwrap().naive_utc();
    assert_eq!(prediction.as_of, Some(newest));
    let expected = if prediction.raw > 0.5 { Trend::Up } else { Trend::Down };
    assert_eq!(prediction.trend, expected);
}
