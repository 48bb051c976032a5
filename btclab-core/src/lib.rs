//! BtcLab Core — exchange snapshots, staging, routing and storage.
//!
//! This crate contains the ingestion half of the pipeline:
//! - Endpoint descriptions and dated fetch windows
//! - Fetcher writing raw JSON snapshots behind a swappable source
//! - Stager turning raw JSON into header-bearing CSV
//! - File-name classification into destination tables
//! - SQLite store with idempotent inserts and a checksum ledger
//! - Pipeline and database configuration

pub mod classify;
pub mod config;
pub mod endpoint;
pub mod fetch;
pub mod schema;
pub mod stage;
pub mod store;

pub use classify::{classify, classify_path, Destination};
pub use config::{ConfigError, DatabaseConfig, JoinKind, Objective, PipelineConfig};
pub use endpoint::{EndpointKind, FetchWindow, QueryParams};
pub use fetch::{BinanceClient, FetchError, FetchOutcome, Fetcher, RawSnapshot, SnapshotSource};
pub use schema::Table;
pub use stage::StageError;
pub use store::{LoadOutcome, Store, StoreError, TableData};
