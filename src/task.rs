//! Per-file conversion task and its state machine.
//!
//! ```text
//! Pending ─▶ Recognizing ─▶ Extracting ─▶ Materializing ─▶ Persisting ─▶ Succeeded
//!    │            │              │               │               │
//!    └────────────┴──────────────┴───────┬───────┴───────────────┘
//!                                        ▼
//!                                 Failed(TaskError)
//! ```
//!
//! Stages only advance on success of the current stage and never skip.
//! `Succeeded` and `Failed` are absorbing.

use crate::error::TaskError;
use crate::output::StorageRecord;
use crate::pipeline::input::BatchFile;
use serde::Serialize;
use std::fmt;

/// Lifecycle state of one [`ConversionTask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Recognizing,
    Extracting,
    Materializing,
    Persisting,
    Succeeded,
    Failed(TaskError),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed(_))
    }

    /// The state that follows a successful stage, or `None` from a terminal state.
    pub fn next(&self) -> Option<TaskState> {
        match self {
            TaskState::Pending => Some(TaskState::Recognizing),
            TaskState::Recognizing => Some(TaskState::Extracting),
            TaskState::Extracting => Some(TaskState::Materializing),
            TaskState::Materializing => Some(TaskState::Persisting),
            TaskState::Persisting => Some(TaskState::Succeeded),
            TaskState::Succeeded | TaskState::Failed(_) => None,
        }
    }

    /// Short lower-case label used in logs and progress output.
    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Recognizing => "recognizing",
            TaskState::Extracting => "extracting",
            TaskState::Materializing => "materializing",
            TaskState::Persisting => "persisting",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// One file of a batch travelling through the pipeline.
///
/// Owned by the unit of work that drives it; never shared between units.
#[derive(Debug)]
pub struct ConversionTask {
    /// Position of the file in the submitted batch (0-based).
    pub index: usize,
    pub source: BatchFile,
    pub owner_id: String,
    state: TaskState,
    /// Set when table extraction fell back to the raw model response.
    degraded: bool,
    record: Option<StorageRecord>,
}

impl ConversionTask {
    pub fn new(index: usize, source: BatchFile, owner_id: impl Into<String>) -> Self {
        Self {
            index,
            source,
            owner_id: owner_id.into(),
            state: TaskState::Pending,
            degraded: false,
            record: None,
        }
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }

    /// Move to the next stage. Returns the new state, or `None` when the
    /// task is already terminal (the state is left unchanged).
    pub fn advance(&mut self) -> Option<&TaskState> {
        let next = self.state.next()?;
        self.state = next;
        Some(&self.state)
    }

    /// Record the storage record and move `Persisting → Succeeded`.
    ///
    /// Ignored unless the task is currently persisting.
    pub fn succeed(&mut self, record: StorageRecord) -> bool {
        if self.state != TaskState::Persisting {
            return false;
        }
        self.record = Some(record);
        self.state = TaskState::Succeeded;
        true
    }

    /// Enter the absorbing `Failed` state. A terminal task keeps its state.
    pub fn fail(&mut self, reason: TaskError) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = TaskState::Failed(reason);
        true
    }

    /// Consume a terminal task into its outcome.
    ///
    /// A task that never reached a terminal state is reported as aborted.
    pub fn into_outcome(self) -> Result<StorageRecord, TaskError> {
        match (self.state, self.record) {
            (TaskState::Succeeded, Some(record)) => Ok(record),
            (TaskState::Failed(reason), _) => Err(reason),
            (state, _) => Err(TaskError::TaskAborted {
                detail: format!("task ended in non-terminal state '{}'", state.label()),
            }),
        }
    }
}
