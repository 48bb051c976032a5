//! BtcLab Runner — ingest orchestration, training frame, model selection.
//!
//! This crate builds on `btclab-core` to provide:
//! - Fetch, stage and load steps with per-file outcomes and archiving
//! - The candle/daily-statistics training frame
//! - Candidate estimators with cross-validated selection
//! - Persisted best model and next-step trend prediction

pub mod archive;
pub mod frame;
pub mod ingest;
pub mod model;
pub mod predict;
pub mod progress;
pub mod selector;
pub mod summary;

pub use archive::archive;
pub use frame::{build_training_frame, join_frames, FrameError, FrameSpec};
pub use ingest::{run_fetch, run_ingest, run_load, run_stage, table_counts, with_store, IngestError};
pub use model::{Estimator, FitSettings, ModelArtifact, ModelError, ModelKind};
pub use predict::{predict_latest, Prediction, Trend};
pub use progress::{NoProgress, PipelineProgress, StdoutProgress, Step};
pub use selector::{prepare_data, select_best, CandidateScore, LabeledSet, SelectionOptions, SelectionReport};
pub use summary::{FileOutcome, FileStatus, RunSummary};
