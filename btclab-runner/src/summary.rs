//! Per-run accounting: what happened to each file, and the totals.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Terminal state of one file in one step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Fetched,
    Staged,
    Loaded { inserted: usize, duplicates: usize },
    /// Content was already recorded in the ledger; archived without inserting.
    AlreadyLoaded,
    /// Nothing to do: no destination table matched, or the endpoint
    /// returned no data. Nothing was moved.
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
    /// Where the file ended up, when it was moved.
    pub archived_to: Option<PathBuf>,
}

impl FileOutcome {
    pub fn new(file: impl Into<PathBuf>, status: FileStatus) -> Self {
        Self {
            file: file.into(),
            status,
            archived_to: None,
        }
    }

    pub fn file_name(&self) -> String {
        display_name(&self.file)
    }
}

/// Counts for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub fetched: usize,
    pub staged: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub archived: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<FileOutcome>,
}

impl RunSummary {
    /// Add one file's outcome and bump the matching counters.
    pub fn record(&mut self, outcome: FileOutcome) {
        match &outcome.status {
            FileStatus::Fetched => self.fetched += 1,
            FileStatus::Staged => self.staged += 1,
            FileStatus::Loaded {
                inserted,
                duplicates,
            } => {
                self.inserted += inserted;
                self.duplicates += duplicates;
            }
            FileStatus::AlreadyLoaded => self.duplicates += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Failed { .. } => self.failed += 1,
        }
        if outcome.archived_to.is_some() {
            self.archived += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Fold a later step's summary into this one.
    pub fn merge(&mut self, other: RunSummary) {
        self.fetched += other.fetched;
        self.staged += other.staged;
        self.inserted += other.inserted;
        self.duplicates += other.duplicates;
        self.archived += other.archived;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.outcomes.extend(other.outcomes);
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, FileStatus::Failed { .. }))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetched {}, staged {}, inserted {} rows ({} duplicates), archived {}, failed {}, skipped {}",
            self.fetched,
            self.staged,
            self.inserted,
            self.duplicates,
            self.archived,
            self.failed,
            self.skipped
        )
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_counts_by_status() {
        let mut summary = RunSummary::default();
        let mut loaded = FileOutcome::new(
            "a.csv",
            FileStatus::Loaded {
                inserted: 10,
                duplicates: 2,
            },
        );
        loaded.archived_to = Some(PathBuf::from("interim/a.csv"));
        summary.record(loaded);
        summary.record(FileOutcome::new("b.csv", FileStatus::Skipped));
        summary.record(FileOutcome::new(
            "c.csv",
            FileStatus::Failed {
                reason: "bad header".into(),
            },
        ));

        assert_eq!(summary.inserted, 10);
        assert_eq!(summary.duplicates, 2);
        assert_eq!(summary.archived, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.failures().count(), 1);
    }

    #[test]
    fn merge_adds_counts_and_outcomes() {
        let mut a = RunSummary::default();
        a.record(FileOutcome::new("x.json", FileStatus::Fetched));
        let mut b = RunSummary::default();
        b.record(FileOutcome::new("x.json", FileStatus::Staged));

        a.merge(b);

        assert_eq!(a.fetched, 1);
        assert_eq!(a.staged, 1);
        assert_eq!(a.outcomes.len(), 2);
    }

    #[test]
    fn display_lists_every_counter() {
        let text = RunSummary::default().to_string();
        for word in ["fetched", "staged", "inserted", "archived", "failed", "skipped"] {
            assert!(text.contains(word), "{text}");
        }
    }
}
