//! Next-step trend call from the persisted best model.

use crate::frame::millis_to_datetime;
use crate::model::{binarize, ModelArtifact, ModelError};
use crate::selector::{feature_matrix, is_complete, sort_chronologically, BEST_MODEL_FILE, ORDER_COLUMN};
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Up,
    Down,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub model: String,
    pub raw: f64,
    pub trend: Trend,
    /// `|raw - 0.5| * 2`.
    pub confidence: f64,
    /// Open time of the row the call was made from, when known.
    pub as_of: Option<NaiveDateTime>,
}

impl Prediction {
    pub fn from_raw(model: impl Into<String>, raw: f64, as_of: Option<NaiveDateTime>) -> Self {
        let trend = if binarize(raw) == 1 { Trend::Up } else { Trend::Down };
        Self {
            model: model.into(),
            raw,
            trend,
            confidence: (raw - 0.5).abs() * 2.0,
            as_of,
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): raw {:.4}, confidence {:.1}%",
            self.trend,
            self.model,
            self.raw,
            self.confidence * 100.0
        )?;
        if let Some(t) = self.as_of {
            write!(f, ", as of {t}")?;
        }
        Ok(())
    }
}

/// Load `best_model.json` from `model_dir` and score the newest complete
/// feature row of `frame`.
pub fn predict_latest(model_dir: &Path, frame: &DataFrame) -> Result<Prediction, ModelError> {
    let artifact = ModelArtifact::load(&model_dir.join(BEST_MODEL_FILE))?;
    let sorted = sort_chronologically(frame)?;
    let matrix = feature_matrix(&sorted)?;

    let index = (0..matrix.nrows())
        .rev()
        .find(|&i| is_complete(matrix.row(i)))
        .ok_or(ModelError::NoData)?;

    let raw = artifact.predict_raw(matrix.row(index));
    let prediction = Prediction::from_raw(&artifact.name, raw, row_time(&sorted, index));
    tracing::info!(model = %artifact.name, raw, trend = %prediction.trend, "prediction made");
    Ok(prediction)
}

fn row_time(frame: &DataFrame, index: usize) -> Option<NaiveDateTime> {
    let millis = frame.column(ORDER_COLUMN).ok()?.cast(&DataType::Int64).ok()?;
    let value = millis.i64().ok()?.get(index)?;
    millis_to_datetime(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_maps_to_trend_and_confidence() {
        let up = Prediction::from_raw("m", 0.8, None);
        assert_eq!(up.trend, Trend::Up);
        assert!((up.confidence - 0.6).abs() < 1e-12);

        let down = Prediction::from_raw("m", 0.5, None);
        assert_eq!(down.trend, Trend::Down);
        assert_eq!(down.confidence, 0.0);

        let low = Prediction::from_raw("m", 0.1, None);
        assert_eq!(low.trend, Trend::Down);
        assert!((low.confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn missing_model_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let frame = df!("close_price" => [1.0]).unwrap();
        assert!(matches!(
            predict_latest(dir.path(), &frame),
            Err(ModelError::Io { .. })
        ));
    }
}
