//! Exchange endpoint kinds and the daily fetch window.
//!
//! The pipeline pulls three REST endpoints once per day. Each kind knows its
//! API path, the tag used in raw file names, and the table its rows end up in.

use crate::schema::Table;
use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The closed set of endpoints the fetcher knows how to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Candlestick series (`/api/v3/klines`).
    Klines,
    /// Rolling 24-hour window statistics (`/api/v3/ticker/24hr`).
    Ticker24h,
    /// Trading-day statistics (`/api/v3/ticker/tradingDay`).
    TradingDay,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 3] = [Self::Klines, Self::Ticker24h, Self::TradingDay];

    /// Path relative to the `/api/v3/` prefix.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Klines => "klines",
            Self::Ticker24h => "ticker/24hr",
            Self::TradingDay => "ticker/tradingDay",
        }
    }

    /// Prefix of the raw JSON file name.
    pub fn file_tag(&self) -> &'static str {
        match self {
            Self::Klines => "prices_BTC_KLINES",
            Self::Ticker24h => "prices_BTC_24h",
            Self::TradingDay => "prices_BTC_daily",
        }
    }

    /// Destination table for staged rows of this kind.
    pub fn table(&self) -> Table {
        match self {
            Self::Klines => Table::Klines,
            Self::Ticker24h => Table::Ticker24h,
            Self::TradingDay => Table::Daily,
        }
    }

    /// Raw file name for a snapshot taken for `date`: `{tag}_{YYYY-MM-DD}.json`.
    pub fn file_name(&self, date: NaiveDate) -> String {
        format!("{}_{}.json", self.file_tag(), date.format("%Y-%m-%d"))
    }

    /// Query parameters for this endpoint.
    ///
    /// Candle requests carry the symbol, interval, the day window and a page
    /// size; the stats endpoints only take the symbol.
    pub fn query(&self, params: &QueryParams, window: &FetchWindow) -> Vec<(String, String)> {
        let mut query = vec![("symbol".to_string(), params.symbol.clone())];
        if let Self::Klines = self {
            query.push(("interval".to_string(), params.interval.clone()));
            query.push(("startTime".to_string(), window.start_ms.to_string()));
            query.push(("endTime".to_string(), window.end_ms.to_string()));
            query.push(("limit".to_string(), params.limit.to_string()));
        }
        query
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Error)]
#[error("unsupported endpoint '{given}'; supported endpoints are: klines, ticker/24hr, ticker/tradingDay")]
pub struct UnsupportedEndpoint {
    pub given: String,
}

impl FromStr for EndpointKind {
    type Err = UnsupportedEndpoint;

    /// Accepts the API path or the descriptive name of a kind.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "klines" | "intraday-candles" => Ok(Self::Klines),
            "ticker/24hr" | "rolling-24h-stats" => Ok(Self::Ticker24h),
            "ticker/tradingDay" | "trading-day-stats" => Ok(Self::TradingDay),
            other => Err(UnsupportedEndpoint {
                given: other.to_string(),
            }),
        }
    }
}

/// Request parameters shared by all endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams {
    pub symbol: String,
    pub interval: String,
    pub limit: u32,
}

impl Default for QueryParams {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "5m".to_string(),
            limit: 1000,
        }
    }
}

/// One calendar day expressed in the exchange's millisecond convention.
///
/// The window spans `[D 00:00:00, D 23:59:59]` UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub date: NaiveDate,
    pub start_ms: i64,
    pub end_ms: i64,
}

impl FetchWindow {
    pub fn for_date(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = date
            .and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))
            .and_utc();
        Self {
            date,
            start_ms: start.timestamp_millis(),
            end_ms: end.timestamp_millis(),
        }
    }

    /// The default reference day: yesterday relative to now (UTC).
    pub fn yesterday() -> Self {
        Self::for_date(Utc::now().date_naive() - Duration::days(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_descriptive_names() {
        assert_eq!("klines".parse::<EndpointKind>().unwrap(), EndpointKind::Klines);
        assert_eq!(
            "rolling-24h-stats".parse::<EndpointKind>().unwrap(),
            EndpointKind::Ticker24h
        );
        assert_eq!(
            "ticker/tradingDay".parse::<EndpointKind>().unwrap(),
            EndpointKind::TradingDay
        );
    }

    #[test]
    fn unsupported_endpoint_names_the_input() {
        let err = "ticker/bookTicker".parse::<EndpointKind>().unwrap_err();
        assert_eq!(err.given, "ticker/bookTicker");
        assert!(err.to_string().contains("ticker/tradingDay"));
    }

    #[test]
    fn window_covers_whole_day_in_millis() {
        let window = FetchWindow::for_date(NaiveDate::from_ymd_opt(2023, 11, 14).unwrap());
        assert_eq!(window.start_ms, 1_699_920_000_000);
        assert_eq!(window.end_ms, 1_699_920_000_000 + 86_399_000);
    }

    #[test]
    fn kline_query_carries_window_and_limit() {
        let window = FetchWindow::for_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let query = EndpointKind::Klines.query(&QueryParams::default(), &window);
        let keys: Vec<&str> = query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["symbol", "interval", "startTime", "endTime", "limit"]);
        assert_eq!(query[4].1, "1000");
    }

    #[test]
    fn stats_query_is_symbol_only() {
        let window = FetchWindow::for_date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let query = EndpointKind::Ticker24h.query(&QueryParams::default(), &window);
        assert_eq!(query, vec![("symbol".to_string(), "BTCUSDT".to_string())]);
    }

    #[test]
    fn file_name_is_tag_and_date() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            EndpointKind::TradingDay.file_name(date),
            "prices_BTC_daily_2024-03-09.json"
        );
    }
}
