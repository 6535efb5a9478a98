//! Error types for the invoice-sheets library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BatchError`] — **Fatal**: the batch cannot start at all (too many
//!   files, invalid configuration, no LLM provider). Returned as
//!   `Err(BatchError)` from [`crate::convert::BatchConverter::convert`]
//!   before any file is read or any request is sent.
//!
//! * [`TaskError`] — **Non-fatal**: a single file failed at one stage
//!   (OCR rejected the image, storage refused the upload) while its
//!   siblings carry on. Stored inside [`crate::output::FileOutcome`] so
//!   callers can report partial success instead of losing the whole batch.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the invoice-sheets library.
///
/// Per-file failures use [`TaskError`] and are stored in
/// [`crate::output::BatchResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BatchError {
    /// More files were submitted than a single batch admits.
    #[error("Batch of {count} files exceeds the limit of {max} files per batch")]
    BatchTooLarge { count: usize, max: usize },

    /// The configured LLM provider could not be initialised.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file of the batch.
///
/// Every variant carries enough text to be shown to an end user as the
/// reason the file was not converted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TaskError {
    /// The source image could not be read from disk.
    #[error("could not read source image '{path}': {detail}")]
    SourceUnreadable { path: PathBuf, detail: String },

    /// Network or transport failure talking to the OCR service.
    #[error("OCR service unavailable: {detail}")]
    RecognitionUnavailable { detail: String },

    /// The OCR service refused the image, reported the operation as
    /// failed, or never finished it. `status` is absent when no HTTP
    /// status applies (polling ran out of attempts).
    #[error("OCR service rejected the request{}: {body}", status_suffix(.status))]
    RecognitionRejected { status: Option<u16>, body: String },

    /// The text-generation service could not be reached or returned nothing.
    #[error("table extraction unavailable: {detail}")]
    ExtractionUnavailable { detail: String },

    /// Writing the spreadsheet to local storage failed.
    #[error("failed to write spreadsheet '{path}': {detail}")]
    MaterializationFailed { path: PathBuf, detail: String },

    /// The storage backend rejected the upload or could not be reached.
    #[error("storage backend rejected the upload{}: {body}", status_suffix(.status))]
    PersistenceFailed { status: Option<u16>, body: String },

    /// The unit of work panicked or was cancelled before finishing.
    #[error("conversion task aborted: {detail}")]
    TaskAborted { detail: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Discriminant of [`TaskError`], handy for tallies and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskErrorKind {
    SourceUnreadable,
    RecognitionUnavailable,
    RecognitionRejected,
    ExtractionUnavailable,
    MaterializationFailed,
    PersistenceFailed,
    TaskAborted,
}

impl TaskError {
    pub fn kind(&self) -> TaskErrorKind {
        match self {
            TaskError::SourceUnreadable { .. } => TaskErrorKind::SourceUnreadable,
            TaskError::RecognitionUnavailable { .. } => TaskErrorKind::RecognitionUnavailable,
            TaskError::RecognitionRejected { .. } => TaskErrorKind::RecognitionRejected,
            TaskError::ExtractionUnavailable { .. } => TaskErrorKind::ExtractionUnavailable,
            TaskError::MaterializationFailed { .. } => TaskErrorKind::MaterializationFailed,
            TaskError::PersistenceFailed { .. } => TaskErrorKind::PersistenceFailed,
            TaskError::TaskAborted { .. } => TaskErrorKind::TaskAborted,
        }
    }
}
