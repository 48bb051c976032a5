//! Progress reporting for pipeline steps.

use crate::summary::{FileOutcome, FileStatus, RunSummary};
use std::fmt;

/// A pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Fetch,
    Stage,
    Load,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Stage => "stage",
            Self::Load => "load",
        })
    }
}

/// Callback for step-by-step progress.
pub trait PipelineProgress: Send {
    /// Called when a step begins with `total` items to process.
    fn on_step_start(&self, step: Step, total: usize);

    /// Called once per processed item.
    fn on_file(&self, step: Step, index: usize, total: usize, outcome: &FileOutcome);

    /// Called when a step is done.
    fn on_step_complete(&self, step: Step, summary: &RunSummary);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl PipelineProgress for StdoutProgress {
    fn on_step_start(&self, step: Step, total: usize) {
        println!("{step}: {total} item(s)");
    }

    fn on_file(&self, _step: Step, index: usize, total: usize, outcome: &FileOutcome) {
        let name = outcome.file_name();
        let line = match &outcome.status {
            FileStatus::Fetched => format!("saved {name}"),
            FileStatus::Staged => format!("staged {name}"),
            FileStatus::Loaded {
                inserted,
                duplicates,
            } => format!("loaded {name}: {inserted} rows, {duplicates} duplicates"),
            FileStatus::AlreadyLoaded => format!("already loaded {name}"),
            FileStatus::Skipped => format!("SKIP {name}: no matching table"),
            FileStatus::Failed { reason } => format!("FAIL {name}: {reason}"),
        };
        println!("  [{}/{}] {line}", index + 1, total);
    }

    fn on_step_complete(&self, step: Step, summary: &RunSummary) {
        println!("{step} complete: {summary}");
    }
}

/// Reporter that ignores everything.
pub struct NoProgress;

impl PipelineProgress for NoProgress {
    fn on_step_start(&self, _step: Step, _total: usize) {}
    fn on_file(&self, _step: Step, _index: usize, _total: usize, _outcome: &FileOutcome) {}
    fn on_step_complete(&self, _step: Step, _summary: &RunSummary) {}
}
