//! Batch output types.
//!
//! [`BatchResult`] always holds exactly one [`FileOutcome`] per submitted
//! file, ordered by submission index. Units finish in any order; the
//! coordinator sorts them before returning so reports read naturally.

use crate::error::{TaskError, TaskErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// A spreadsheet record created in the storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    /// Backend-issued record identifier.
    pub id: String,
    /// Collection the record was created in.
    pub collection: String,
    /// File name of the uploaded spreadsheet.
    pub file_name: String,
    pub owner_id: String,
}

/// Final outcome for one file of the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    /// Position in the submitted batch (0-based).
    pub index: usize,
    /// File name as submitted.
    pub name: String,
    /// The stored record, or why the file could not be converted.
    pub result: Result<StorageRecord, TaskError>,
    /// Table extraction fell back to the raw model response.
    pub degraded: bool,
    /// Wall-clock time spent on this file.
    pub duration_ms: u64,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.result.as_ref().err()
    }

    pub fn record(&self) -> Option<&StorageRecord> {
        self.result.as_ref().ok()
    }
}

/// Outcome of a whole batch: one entry per submitted file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<FileOutcome>,
    pub total_duration_ms: u64,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn degraded(&self) -> usize {
        self.files.iter().filter(|f| f.degraded).count()
    }

    /// First outcome whose submitted name equals `name`.
    pub fn outcome(&self, name: &str) -> Option<&FileOutcome> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| !f.is_success())
    }

    /// Count of failures of the given kind.
    pub fn failures_of(&self, kind: TaskErrorKind) -> usize {
        self.failures()
            .filter(|f| f.error().map(TaskError::kind) == Some(kind))
            .count()
    }

    /// Human-readable partial-success line, e.g.
    /// `8 of 10 files processed; 2 failed: a.jpg (…); b.jpg (…)`.
    pub fn summary(&self) -> String {
        let mut s = format!("{} of {} files processed", self.succeeded(), self.len());
        if self.failed() > 0 {
            let _ = write!(s, "; {} failed: ", self.failed());
            let reasons: Vec<String> = self
                .failures()
                .filter_map(|f| f.error().map(|e| format!("{} ({})", f.name, e)))
                .collect();
            s.push_str(&reasons.join("; "));
        }
        s
    }

    /// Turn any failure into an error, for callers with zero tolerance.
    pub fn into_result(self) -> Result<Self, TaskError> {
        let first = self.failures().find_map(FileOutcome::error).cloned();
        match first {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}
