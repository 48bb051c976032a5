//! Fetcher: one HTTP GET per endpoint, raw JSON written to a dated file.
//!
//! Failures are logged and turn into "no snapshot". There is no retry; a
//! missed day simply produces no file and downstream staging finds nothing
//! for that tag.

use crate::endpoint::{EndpointKind, FetchWindow, QueryParams};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("response is not valid JSON: {0}")]
    Json(String),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A raw API response that was persisted to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSnapshot {
    pub kind: EndpointKind,
    pub window: FetchWindow,
    pub path: PathBuf,
}

/// Source of raw endpoint payloads.
///
/// Abstracts the exchange so tests can serve canned JSON.
pub trait SnapshotSource {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Perform one request and return the parsed body.
    fn get_json(&self, kind: EndpointKind, query: &[(String, String)]) -> Result<Value, FetchError>;
}

/// Blocking client for the public Binance REST API.
pub struct BinanceClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, kind: EndpointKind) -> String {
        format!("{}/api/v3/{}", self.base_url, kind.path())
    }
}

impl SnapshotSource for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    fn get_json(&self, kind: EndpointKind, query: &[(String, String)]) -> Result<Value, FetchError> {
        let url = self.url(kind);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .map_err(|e| FetchError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        resp.json::<Value>()
            .map_err(|e| FetchError::Json(e.to_string()))
    }
}

/// What one endpoint request came to.
#[derive(Debug)]
pub enum FetchOutcome {
    Saved(RawSnapshot),
    /// The endpoint answered with nothing worth writing.
    Empty,
    Failed(FetchError),
}

impl FetchOutcome {
    pub fn snapshot(self) -> Option<RawSnapshot> {
        match self {
            Self::Saved(snapshot) => Some(snapshot),
            Self::Empty | Self::Failed(_) => None,
        }
    }
}

/// Calls a [`SnapshotSource`] and writes what it returns under `data_dir`.
pub struct Fetcher<'a> {
    source: &'a dyn SnapshotSource,
    params: QueryParams,
    data_dir: PathBuf,
}

impl<'a> Fetcher<'a> {
    pub fn new(source: &'a dyn SnapshotSource, params: QueryParams, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            params,
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Fetch one endpoint for one day. `None` means nothing was written.
    pub fn fetch(&self, kind: EndpointKind, window: FetchWindow) -> Option<RawSnapshot> {
        self.fetch_outcome(kind, window).snapshot()
    }

    /// Like [`Fetcher::fetch`], but tells an empty answer apart from a failure.
    pub fn fetch_outcome(&self, kind: EndpointKind, window: FetchWindow) -> FetchOutcome {
        let query = kind.query(&self.params, &window);
        let body = match self.source.get_json(kind, &query) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(endpoint = %kind, source = self.source.name(), "request failed: {e}");
                return FetchOutcome::Failed(e);
            }
        };

        let path = self.data_dir.join(kind.file_name(window.date));
        match write_json(&body, &path) {
            Ok(true) => {
                tracing::info!(endpoint = %kind, path = %path.display(), "snapshot saved");
                FetchOutcome::Saved(RawSnapshot { kind, window, path })
            }
            Ok(false) => {
                tracing::warn!(endpoint = %kind, "no data to save");
                FetchOutcome::Empty
            }
            Err(e) => {
                tracing::error!(endpoint = %kind, "{e}");
                FetchOutcome::Failed(e)
            }
        }
    }
}

/// Pretty-print `data` to `path`, creating parent directories. The text goes
/// to a temporary sibling first and is renamed into place.
///
/// Returns `Ok(false)` without touching the filesystem when there is nothing
/// to write (`null`, empty array, empty object).
pub fn write_json(data: &Value, path: &Path) -> Result<bool, FetchError> {
    if is_empty_payload(data) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let text = serde_json::to_string_pretty(data).map_err(|e| FetchError::Json(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_error(path, e)
    })?;
    Ok(true)
}

fn io_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
