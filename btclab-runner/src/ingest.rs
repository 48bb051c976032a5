//! Ingest orchestration: fetch → stage → load, with archiving.
//!
//! Each step returns a [`RunSummary`]. A failure in one file is recorded
//! and the batch moves on; only problems with the directories themselves or
//! the database connection abort a step.

use crate::archive::archive;
use crate::progress::{PipelineProgress, Step};
use crate::summary::{FileOutcome, FileStatus, RunSummary};
use btclab_core::classify::{classify_path, Destination};
use btclab_core::config::PipelineConfig;
use btclab_core::endpoint::{EndpointKind, FetchWindow};
use btclab_core::fetch::{FetchOutcome, Fetcher, SnapshotSource};
use btclab_core::schema::Table;
use btclab_core::stage::{self, StageError};
use btclab_core::store::{Store, StoreError};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("staging error: {0}")]
    Stage(#[from] StageError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cannot list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Open the store, run `body`, and close the store whether or not `body`
/// succeeded. The body's result is returned after the close; a failed close
/// is logged and does not replace it.
pub fn with_store<T, E>(db_path: &Path, body: impl FnOnce(&mut Store) -> Result<T, E>) -> Result<T, E>
where
    E: From<StoreError>,
{
    let mut store = Store::open(db_path)?;
    tracing::info!(path = %db_path.display(), "database opened");
    let result = body(&mut store);
    after_close(result, store.close(), db_path)
}

fn after_close<T, E>(result: Result<T, E>, close: Result<(), StoreError>, db_path: &Path) -> Result<T, E> {
    if let Err(close_err) = close {
        tracing::error!(path = %db_path.display(), "closing database: {close_err}");
    }
    result
}

/// Fetch every endpoint for one day into the data directory.
///
/// An endpoint that answers with no data is counted as skipped, not failed.
pub fn run_fetch(
    source: &dyn SnapshotSource,
    config: &PipelineConfig,
    window: FetchWindow,
    progress: &dyn PipelineProgress,
) -> RunSummary {
    let fetcher = Fetcher::new(source, config.api.query_params(), &config.data_dir);
    let total = EndpointKind::ALL.len();
    let mut summary = RunSummary::default();
    progress.on_step_start(Step::Fetch, total);

    for (i, kind) in EndpointKind::ALL.into_iter().enumerate() {
        let target = config.data_dir.join(kind.file_name(window.date));
        let outcome = match fetcher.fetch_outcome(kind, window) {
            FetchOutcome::Saved(snapshot) => FileOutcome::new(snapshot.path, FileStatus::Fetched),
            FetchOutcome::Empty => FileOutcome::new(target, FileStatus::Skipped),
            FetchOutcome::Failed(e) => FileOutcome::new(
                target,
                FileStatus::Failed {
                    reason: format!("no snapshot for {kind}: {e}"),
                },
            ),
        };
        progress.on_file(Step::Fetch, i, total, &outcome);
        summary.record(outcome);
    }

    progress.on_step_complete(Step::Fetch, &summary);
    summary
}

/// Convert every raw JSON file in the data directory to CSV next to it.
///
/// Converted raw files go to `interim/`, unconvertible ones to `failed/`.
pub fn run_stage(config: &PipelineConfig, progress: &dyn PipelineProgress) -> Result<RunSummary, IngestError> {
    let results = stage::convert_all(&config.data_dir, &config.data_dir)?;
    let total = results.len();
    let mut summary = RunSummary::default();
    progress.on_step_start(Step::Stage, total);

    for (i, converted) in results.into_iter().enumerate() {
        let (status, dest_dir) = match &converted.result {
            Ok(_) => (FileStatus::Staged, config.interim_dir()),
            Err(e) => (
                FileStatus::Failed {
                    reason: e.to_string(),
                },
                config.failed_dir(),
            ),
        };
        let mut outcome = FileOutcome::new(&converted.raw, status);
        outcome.archived_to = move_or_log(&converted.raw, &dest_dir);
        progress.on_file(Step::Stage, i, total, &outcome);
        summary.record(outcome);
    }

    progress.on_step_complete(Step::Stage, &summary);
    Ok(summary)
}

/// Load every staged CSV in the data directory into its routed table.
///
/// Loaded files go to `interim/`, rejected ones to `failed/`. Files whose
/// name matches no table are left in place and counted as skipped.
pub fn run_load(
    store: &mut Store,
    config: &PipelineConfig,
    progress: &dyn PipelineProgress,
) -> Result<RunSummary, IngestError> {
    let mut files = stage::list_with_extension(&config.data_dir, "csv").map_err(|source| IngestError::List {
        path: config.data_dir.clone(),
        source,
    })?;
    files.sort();
    let total = files.len();
    let mut summary = RunSummary::default();
    progress.on_step_start(Step::Load, total);

    for (i, file) in files.iter().enumerate() {
        let outcome = match classify_path(file) {
            Destination::Unknown => {
                tracing::warn!(file = %file.display(), "no destination table matches, skipped");
                FileOutcome::new(file, FileStatus::Skipped)
            }
            Destination::Table(table) => load_one(store, table, file, config),
        };
        progress.on_file(Step::Load, i, total, &outcome);
        summary.record(outcome);
    }

    progress.on_step_complete(Step::Load, &summary);
    Ok(summary)
}

fn load_one(store: &mut Store, table: Table, file: &Path, config: &PipelineConfig) -> FileOutcome {
    let (status, dest_dir) = match store.load_csv(table, file) {
        Ok(loaded) if loaded.already_loaded => (FileStatus::AlreadyLoaded, config.interim_dir()),
        Ok(loaded) => (
            FileStatus::Loaded {
                inserted: loaded.inserted,
                duplicates: loaded.duplicates,
            },
            config.interim_dir(),
        ),
        Err(e) => {
            tracing::error!(file = %file.display(), table = %table, "load failed: {e}");
            (
                FileStatus::Failed {
                    reason: e.to_string(),
                },
                config.failed_dir(),
            )
        }
    };
    let mut outcome = FileOutcome::new(file, status);
    outcome.archived_to = move_or_log(file, &dest_dir);
    outcome
}

fn move_or_log(file: &Path, dir: &Path) -> Option<PathBuf> {
    match archive(file, dir) {
        Ok(dest) => Some(dest),
        Err(e) => {
            tracing::error!(file = %file.display(), dir = %dir.display(), "archive failed: {e}");
            None
        }
    }
}

/// Full daily run: fetch, stage, then load.
///
/// The store is opened before anything is fetched, so an unusable database
/// fails the run before any file is written.
pub fn run_ingest(
    source: &dyn SnapshotSource,
    config: &PipelineConfig,
    db_path: &Path,
    window: FetchWindow,
    progress: &dyn PipelineProgress,
) -> Result<RunSummary, IngestError> {
    let summary = with_store(db_path, |store| {
        let mut summary = run_fetch(source, config, window, progress);
        summary.merge(run_stage(config, progress)?);
        summary.merge(run_load(store, config, progress)?);
        Ok::<_, IngestError>(summary)
    })?;
    tracing::info!(%summary, "ingest finished");
    Ok(summary)
}

/// Row counts for the destination tables and the load ledger.
pub fn table_counts(store: &Store) -> Result<Vec<(String, usize)>, StoreError> {
    Table::ALL
        .iter()
        .map(|t| t.name())
        .chain(std::iter::once("loaded_files"))
        .map(|name| Ok((name.to_string(), store.row_count(name)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::fs;

    fn config(root: &Path) -> PipelineConfig {
        PipelineConfig {
            data_dir: root.join("raw"),
            archive_dir: root.join("archive"),
            model_dir: root.join("models"),
            db_dir: root.join("db"),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn with_store_closes_and_returns_body_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("t.db");

        let result: Result<(), IngestError> = with_store(&db, |store| {
            store.read_table("nope")?;
            Ok(())
        });

        assert!(matches!(result, Err(IngestError::Store(StoreError::UnknownTable(_)))));
        // A second session opens cleanly once the first was closed.
        let counts = with_store(&db, |store| table_counts(store).map_err(IngestError::from)).unwrap();
        assert_eq!(counts.len(), 4);
        assert!(counts.iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn close_failure_keeps_the_body_result() {
        let summary = RunSummary {
            inserted: 3,
            ..RunSummary::default()
        };
        let close = Err(StoreError::UnknownTable("loaded_files".into()));

        let kept: Result<RunSummary, IngestError> = after_close(Ok(summary.clone()), close, Path::new("btc.db"));

        assert_eq!(kept.unwrap(), summary);
    }

    #[test]
    fn stage_archives_raw_files_by_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        fs::create_dir_all(&cfg.data_dir).unwrap();
        fs::write(cfg.data_dir.join("prices_BTC_24h_2024-05-01.json"), r#"{"symbol":"BTCUSDT"}"#).unwrap();
        fs::write(cfg.data_dir.join("prices_BTC_KLINES_2024-05-01.json"), "[]").unwrap();

        let summary = run_stage(&cfg, &NoProgress).unwrap();

        assert_eq!(summary.staged, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.archived, 2);
        assert!(cfg.interim_dir().join("prices_BTC_24h_2024-05-01.json").exists());
        assert!(cfg.failed_dir().join("prices_BTC_KLINES_2024-05-01.json").exists());
        assert!(cfg.data_dir.join("prices_BTC_24h_2024-05-01.csv").exists());
        assert!(!cfg.data_dir.join("prices_BTC_KLINES_2024-05-01.csv").exists());
    }
}
