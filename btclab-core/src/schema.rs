//! Destination table schemas.
//!
//! Column names follow the exchange payloads: snake_case names for candle
//! rows (the API returns positional arrays, so the names are ours) and the
//! API's camelCase keys for the two statistics endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Positional field names of one candlestick array as returned by the API.
/// The twelfth field carries no data and is dropped on staging.
pub const KLINE_API_FIELDS: [&str; 12] = [
    "kline_open_time",
    "open_price",
    "high_price",
    "low_price",
    "close_price",
    "volume",
    "kline_close_time",
    "quote_asset_volume",
    "number_of_trades",
    "taker_buy_base_asset_volume",
    "taker_buy_quote_asset_volume",
    "ignore",
];

/// Staged candle columns: the API fields minus the trailing "ignore".
pub const KLINE_COLUMNS: [&str; 11] = [
    "kline_open_time",
    "open_price",
    "high_price",
    "low_price",
    "close_price",
    "volume",
    "kline_close_time",
    "quote_asset_volume",
    "number_of_trades",
    "taker_buy_base_asset_volume",
    "taker_buy_quote_asset_volume",
];

pub const TICKER_24H_COLUMNS: [&str; 21] = [
    "symbol",
    "priceChange",
    "priceChangePercent",
    "weightedAvgPrice",
    "prevClosePrice",
    "lastPrice",
    "lastQty",
    "bidPrice",
    "bidQty",
    "askPrice",
    "askQty",
    "openPrice",
    "highPrice",
    "lowPrice",
    "volume",
    "quoteVolume",
    "openTime",
    "closeTime",
    "firstId",
    "lastId",
    "count",
];

pub const TRADING_DAY_COLUMNS: [&str; 15] = [
    "symbol",
    "priceChange",
    "priceChangePercent",
    "weightedAvgPrice",
    "openPrice",
    "highPrice",
    "lowPrice",
    "lastPrice",
    "volume",
    "quoteVolume",
    "openTime",
    "closeTime",
    "firstId",
    "lastId",
    "count",
];

/// SQL storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

/// The three destination tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Klines,
    Ticker24h,
    Daily,
}

impl Table {
    pub const ALL: [Table; 3] = [Self::Klines, Self::Ticker24h, Self::Daily];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Klines => "klines",
            Self::Ticker24h => "ticker24h",
            Self::Daily => "daily",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Columns in staged order.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Klines => &KLINE_COLUMNS,
            Self::Ticker24h => &TICKER_24H_COLUMNS,
            Self::Daily => &TRADING_DAY_COLUMNS,
        }
    }

    /// Natural idempotency key: a second row with the same key is ignored.
    pub fn natural_key(&self) -> &'static [&'static str] {
        match self {
            Self::Klines => &["kline_open_time"],
            Self::Ticker24h => &["symbol", "closeTime"],
            Self::Daily => &["symbol", "openTime"],
        }
    }

    /// Epoch-millisecond columns, converted to timestamps when read back.
    pub fn time_columns(&self) -> &'static [&'static str] {
        match self {
            Self::Klines => &["kline_open_time", "kline_close_time"],
            Self::Ticker24h | Self::Daily => &["openTime", "closeTime"],
        }
    }

    pub fn column_type(&self, column: &str) -> ColumnType {
        match column {
            "symbol" => ColumnType::Text,
            "kline_open_time" | "kline_close_time" | "number_of_trades" | "openTime"
            | "closeTime" | "firstId" | "lastId" | "count" => ColumnType::Integer,
            _ => ColumnType::Real,
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this table.
    pub fn create_sql(&self) -> String {
        let cols: Vec<String> = self
            .columns()
            .iter()
            .map(|c| format!("\"{c}\" {}", self.column_type(c).sql()))
            .collect();
        let key: Vec<String> = self
            .natural_key()
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({}, UNIQUE ({}))",
            self.name(),
            cols.join(", "),
            key.join(", ")
        )
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_columns_drop_ignore_field() {
        assert_eq!(&KLINE_API_FIELDS[..11], &KLINE_COLUMNS[..]);
        assert_eq!(KLINE_API_FIELDS[11], "ignore");
    }

    #[test]
    fn natural_keys_are_table_columns() {
        for table in Table::ALL {
            for key in table.natural_key() {
                assert!(table.columns().contains(key), "{table}: {key}");
            }
        }
    }

    #[test]
    fn create_sql_declares_unique_key() {
        let sql = Table::Daily.create_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS daily ("));
        assert!(sql.contains("\"openTime\" INTEGER"));
        assert!(sql.contains("\"symbol\" TEXT"));
        assert!(sql.ends_with("UNIQUE (\"symbol\", \"openTime\"))"));
    }

    #[test]
    fn table_names_roundtrip() {
        for table in Table::ALL {
            assert_eq!(Table::from_name(table.name()), Some(table));
        }
        assert_eq!(Table::from_name("unknownfile"), None);
    }
}
