//! Progress-callback trait for per-file conversion events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::convert::BatchConverter::with_progress`] to receive real-time
//! events as each file moves through the pipeline.
//!
//! # Example
//!
//! ```rust
//! use invoice_sheets::BatchProgressCallback;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, index: usize, name: &str, total: usize, degraded: bool) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}/{total}: {name} (#{index}) degraded={degraded}");
//!     }
//! }
//! ```

use crate::task::TaskState;
use std::sync::Arc;

/// Called by the coordinator as it processes each file.
///
/// Files are converted concurrently, so every method except
/// `on_batch_start`/`on_batch_complete` may be called from several threads
/// at once. Implementations must protect shared mutable state with
/// `Mutex`, atomics or similar. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after the batch passed admission, before any file is read.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called each time a file enters a new pipeline stage.
    ///
    /// # Arguments
    /// * `index` — 0-based position of the file in the batch
    /// * `name`  — file name as submitted
    /// * `state` — the state just entered (never `Pending`)
    fn on_stage(&self, index: usize, name: &str, state: &TaskState) {
        let _ = (index, name, state);
    }

    /// Called when a file has been stored successfully.
    fn on_file_complete(&self, index: usize, name: &str, total_files: usize, degraded: bool) {
        let _ = (index, name, total_files, degraded);
    }

    /// Called when a file reaches the `Failed` state.
    fn on_file_error(&self, index: usize, name: &str, total_files: usize, error: &str) {
        let _ = (index, name, total_files, error);
    }

    /// Called once after every file reached a terminal state.
    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let _ = (total_files, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias for the shared callback handle.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
