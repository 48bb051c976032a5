//! File-name based routing of staged files to destination tables.

use crate::schema::Table;
use std::fmt;
use std::path::Path;

/// Ordered routing table. First match wins, so the more specific
/// `btc_24h` marker is checked before the bare `24h`.
const ROUTES: [(&str, Table); 4] = [
    ("klines", Table::Klines),
    ("btc_24h", Table::Ticker24h),
    ("24h", Table::Ticker24h),
    ("daily", Table::Daily),
];

/// Where a staged file goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Table(Table),
    /// No marker matched. The file is skipped and left where it is.
    Unknown,
}

impl Destination {
    pub fn table(&self) -> Option<Table> {
        match self {
            Self::Table(t) => Some(*t),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table(t) => t.fmt(f),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// Route a file name to its table. Matching is case-insensitive.
pub fn classify(file_name: &str) -> Destination {
    let lower = file_name.to_lowercase();
    ROUTES
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, table)| Destination::Table(*table))
        .unwrap_or(Destination::Unknown)
}

/// Route by the final path component.
pub fn classify_path(path: &Path) -> Destination {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(classify)
        .unwrap_or(Destination::Unknown)
}
