//! Invalidation reports returned by the workspace change entry points

use serde::{Deserialize, Serialize};

/// What triggered an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Changed,
    Added,
    Removed,
    LibraryChanged,
}

/// One cleaned unit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvalidatedUnit {
    pub path: String,
    pub name: String,
    /// The unit dropped its file scope, not only its cross-unit resolution.
    pub fully_cleared: bool,
}

/// Summary of one invalidation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    /// Monotonically increasing per workspace.
    pub sequence: u64,
    pub kind: ChangeKind,
    /// The changed path; `None` for library swaps.
    pub path: Option<String>,
    /// Cleaned units, ordered by path then name.
    pub invalidated: Vec<InvalidatedUnit>,
    /// Units whose `clean` failed; they were skipped.
    pub failed: Vec<String>,
}

impl InvalidationReport {
    pub fn new(sequence: u64, kind: ChangeKind, path: Option<String>) -> Self {
        InvalidationReport {
            sequence,
            kind,
            path,
            invalidated: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.invalidated.is_empty() && self.failed.is_empty()
    }

    /// Names of the cleaned units, in report order.
    pub fn unit_names(&self) -> Vec<&str> {
        self.invalidated.iter().map(|unit| unit.name.as_str()).collect()
    }

    pub fn fully_cleared(&self) -> impl Iterator<Item = &InvalidatedUnit> {
        self.invalidated.iter().filter(|unit| unit.fully_cleared)
    }

    pub(crate) fn finish(mut self) -> Self {
        self.invalidated.sort();
        self.failed.sort();
        self
    }
}
