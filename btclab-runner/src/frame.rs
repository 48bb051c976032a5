//! Training frame: candles joined to the previous day's trading statistics.
//!
//! Both tables are read whole into polars frames. Each side gets a calendar
//! day key derived from its epoch-millisecond open time; the daily side's
//! key is moved back one day so a candle lines up with the statistics of
//! the day before it. Duplicate non-key columns from the daily side carry
//! the `_right` suffix, so the candle `volume` keeps its name.

use btclab_core::config::{JoinKind, TrainingConfig};
use btclab_core::store::{Store, StoreError, TableData};
use chrono::{DateTime, NaiveDateTime};
use polars::prelude::*;
use rusqlite::types::Value;
use thiserror::Error;

pub const MS_PER_DAY: i64 = 86_400_000;

/// Day key added to the candle side.
pub const KLINE_DAY: &str = "kline_day";
/// Day key added to the daily side, one day before its open time.
pub const STATS_DAY: &str = "stats_day";

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("column '{column}' not found in table '{table}'")]
    MissingColumn { table: String, column: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

/// Which tables to read and how to line them up.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSpec {
    pub kline_table: String,
    pub daily_table: String,
    /// Candle column the day key is derived from.
    pub kline_key: String,
    /// Daily column the day key is derived from.
    pub daily_key: String,
    pub kline_time_columns: Vec<String>,
    pub daily_time_columns: Vec<String>,
    pub join: JoinKind,
}

impl FrameSpec {
    pub fn from_config(training: &TrainingConfig) -> Self {
        Self {
            kline_table: training.kline_table.clone(),
            daily_table: training.daily_table.clone(),
            kline_key: "kline_open_time".into(),
            daily_key: "openTime".into(),
            kline_time_columns: vec!["kline_open_time".into(), "kline_close_time".into()],
            daily_time_columns: vec!["openTime".into(), "closeTime".into()],
            join: training.join,
        }
    }
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self::from_config(&TrainingConfig::default())
    }
}

/// Epoch milliseconds to a UTC timestamp.
pub fn millis_to_datetime(ms: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Read both tables from the store and join them.
pub fn build_training_frame(store: &Store, spec: &FrameSpec) -> Result<DataFrame, FrameError> {
    let klines = table_to_frame(&store.read_table(&spec.kline_table)?)?;
    let daily = table_to_frame(&store.read_table(&spec.daily_table)?)?;
    join_frames(klines, daily, spec)
}

/// Join a candle frame and a daily frame with raw millisecond time columns.
pub fn join_frames(mut klines: DataFrame, mut daily: DataFrame, spec: &FrameSpec) -> Result<DataFrame, FrameError> {
    let kline_day = day_key(&klines, &spec.kline_table, &spec.kline_key, KLINE_DAY, 0)?;
    let stats_day = day_key(&daily, &spec.daily_table, &spec.daily_key, STATS_DAY, -1)?;
    klines.with_column(kline_day)?;
    daily.with_column(stats_day)?;

    convert_time_columns(&mut klines, &spec.kline_table, &spec.kline_time_columns)?;
    convert_time_columns(&mut daily, &spec.daily_table, &spec.daily_time_columns)?;

    let joined = klines
        .lazy()
        .join(
            daily.lazy(),
            [col(KLINE_DAY)],
            [col(STATS_DAY)],
            JoinArgs::new(join_type(spec.join)),
        )
        .sort(
            [spec.kline_key.as_str()],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?;
    tracing::info!(rows = joined.height(), join = ?spec.join, "training frame built");
    Ok(joined)
}

/// Turn a table read from the store into a frame.
///
/// Each column's type follows its values: any text makes a string column,
/// otherwise any real makes a float column, otherwise it is an integer column.
pub fn table_to_frame(data: &TableData) -> Result<DataFrame, FrameError> {
    let columns = data
        .columns
        .iter()
        .enumerate()
        .map(|(j, name)| infer_column(name, data.rows.iter().map(|row| &row[j])))
        .collect();
    Ok(DataFrame::new(columns)?)
}

fn infer_column<'a>(name: &str, values: impl Iterator<Item = &'a Value> + Clone) -> Column {
    let has_text = values.clone().any(|v| matches!(v, Value::Text(_) | Value::Blob(_)));
    let has_real = values.clone().any(|v| matches!(v, Value::Real(_)));

    if has_text {
        let cells: Vec<Option<String>> = values
            .map(|v| match v {
                Value::Null | Value::Blob(_) => None,
                Value::Integer(i) => Some(i.to_string()),
                Value::Real(f) => Some(f.to_string()),
                Value::Text(s) => Some(s.clone()),
            })
            .collect();
        Column::new(name.into(), cells)
    } else if has_real {
        let cells: Vec<Option<f64>> = values
            .map(|v| match v {
                Value::Integer(i) => Some(*i as f64),
                Value::Real(f) => Some(*f),
                _ => None,
            })
            .collect();
        Column::new(name.into(), cells)
    } else {
        let cells: Vec<Option<i64>> = values
            .map(|v| match v {
                Value::Integer(i) => Some(*i),
                _ => None,
            })
            .collect();
        Column::new(name.into(), cells)
    }
}

/// Calendar day of an epoch-millisecond column, shifted by `shift_days`.
fn day_key(
    frame: &DataFrame,
    table: &str,
    source: &str,
    name: &str,
    shift_days: i32,
) -> Result<Column, FrameError> {
    let millis = frame
        .column(source)
        .map_err(|_| FrameError::MissingColumn {
            table: table.to_string(),
            column: source.to_string(),
        })?
        .cast(&DataType::Int64)?;
    let days: Vec<Option<i32>> = millis
        .i64()?
        .into_iter()
        .map(|v| v.map(|ms| ms.div_euclid(MS_PER_DAY) as i32 + shift_days))
        .collect();
    Ok(Column::new(name.into(), days).cast(&DataType::Date)?)
}

/// Epoch-millisecond columns to `Datetime(ms)`. Absent columns are skipped
/// with a warning.
fn convert_time_columns(frame: &mut DataFrame, table: &str, columns: &[String]) -> Result<(), FrameError> {
    for name in columns {
        let Ok(column) = frame.column(name) else {
            tracing::warn!(table, column = %name, "time column not found, left unconverted");
            continue;
        };
        let converted = column
            .cast(&DataType::Int64)?
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        frame.with_column(converted)?;
    }
    Ok(())
}

fn join_type(kind: JoinKind) -> JoinType {
    match kind {
        JoinKind::Inner => JoinType::Inner,
        JoinKind::Left => JoinType::Left,
        JoinKind::Full => JoinType::Full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const DAY1: i64 = 1_714_521_600_000; // 2024-05-01T00:00:00Z

    fn candles() -> DataFrame {
        df!(
            "kline_open_time" => [DAY1, DAY1 + 300_000, DAY1 + MS_PER_DAY],
            "kline_close_time" => [DAY1 + 299_999, DAY1 + 599_999, DAY1 + MS_PER_DAY + 299_999],
            "close_price" => [60_000.0, 60_100.0, 61_000.0],
            "volume" => [10.0, 11.0, 12.0],
        )
        .unwrap()
    }

    fn daily() -> DataFrame {
        df!(
            "symbol" => ["BTCUSDT", "BTCUSDT"],
            "openTime" => [DAY1 + MS_PER_DAY, DAY1 + 2 * MS_PER_DAY],
            "closeTime" => [DAY1 + 2 * MS_PER_DAY - 1, DAY1 + 3 * MS_PER_DAY - 1],
            "priceChange" => [-94.99, 120.5],
            "volume" => [47_591.6, 51_000.2],
        )
        .unwrap()
    }

    #[test]
    fn millis_conversion_matches_known_instant() {
        let expected = NaiveDate::from_ymd_opt(2023, 11, 14)
            .unwrap()
            .and_hms_opt(22, 13, 20)
            .unwrap();
        assert_eq!(millis_to_datetime(1_700_000_000_000), Some(expected));
        assert_eq!(millis_to_datetime(0).unwrap().to_string(), "1970-01-01 00:00:00");
    }

    #[test]
    fn candles_meet_previous_day_stats() {
        let joined = join_frames(candles(), daily(), &FrameSpec::default()).unwrap();

        assert_eq!(joined.height(), 3);
        let change = joined.column("priceChange").unwrap().f64().unwrap();
        // Day-1 candles pair with the statistics that open on day 2.
        assert_eq!(change.get(0), Some(-94.99));
        assert_eq!(change.get(1), Some(-94.99));
        assert_eq!(change.get(2), Some(120.5));
    }

    #[test]
    fn daily_volume_gets_suffix() {
        let joined = join_frames(candles(), daily(), &FrameSpec::default()).unwrap();
        let volume = joined.column("volume").unwrap().f64().unwrap();
        assert_eq!(volume.get(0), Some(10.0));
        assert!(joined.column("volume_right").is_ok());
    }

    #[test]
    fn time_columns_become_datetimes() {
        let joined = join_frames(candles(), daily(), &FrameSpec::default()).unwrap();
        assert_eq!(
            joined.column("kline_open_time").unwrap().dtype(),
            &DataType::Datetime(TimeUnit::Milliseconds, None)
        );
        assert_eq!(joined.column(KLINE_DAY).unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn missing_time_column_is_skipped() {
        let mut spec = FrameSpec::default();
        spec.daily_time_columns.push("updateTime".into());
        assert!(join_frames(candles(), daily(), &spec).is_ok());
    }

    #[test]
    fn missing_join_key_is_an_error() {
        let no_open = daily().drop("openTime").unwrap();
        let err = join_frames(candles(), no_open, &FrameSpec::default()).unwrap_err();
        assert!(matches!(err, FrameError::MissingColumn { ref column, .. } if column == "openTime"));
    }

    #[test]
    fn left_join_keeps_unmatched_candles() {
        let spec = FrameSpec {
            join: JoinKind::Left,
            ..FrameSpec::default()
        };
        let only_day_two = daily().slice(1, 1);
        let joined = join_frames(candles(), only_day_two, &spec).unwrap();

        assert_eq!(joined.height(), 3);
        assert_eq!(joined.column("priceChange").unwrap().null_count(), 2);
    }

    #[test]
    fn table_data_types_follow_values() {
        let data = TableData {
            columns: vec!["t".into(), "p".into(), "s".into()],
            rows: vec![
                vec![Value::Integer(1), Value::Real(1.5), Value::Text("BTCUSDT".into())],
                vec![Value::Integer(2), Value::Integer(2), Value::Null],
            ],
        };
        let frame = table_to_frame(&data).unwrap();

        assert_eq!(frame.column("t").unwrap().dtype(), &DataType::Int64);
        assert_eq!(frame.column("p").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.column("s").unwrap().dtype(), &DataType::String);
        assert_eq!(frame.column("p").unwrap().f64().unwrap().get(1), Some(2.0));
    }
}
