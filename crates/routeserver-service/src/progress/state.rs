use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::TaskId;

/// Lifecycle of a background task as seen by its progress sink.
///
/// `Completed` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Waiting,
    InProgress,
    Completed,
    Errored,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Errored => "ERRORED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition the state machine does not allow.
///
/// This is a programming error in the task body, and aborts whatever operation attempted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} a task that is {from}")]
pub struct InvalidTransition {
    pub from: TaskState,
    pub action: &'static str,
}

/// Name of the event carrying [`ProgressEvent`]s.
pub const PROGRESS_EVENT: &str = "progress";

/// A progress update as pushed to the owner of a task.
///
/// Serializes to `{"id": …, "type": "begin" | "step" | "done", …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub id: TaskId,
    #[serde(flatten)]
    pub kind: ProgressEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEventKind {
    /// The task started working through `total` steps.
    Begin { title: String, total: u64 },
    /// The task reached `step` of `total`.
    Step {
        step: u64,
        total: u64,
        /// Estimated seconds until completion, `null` while no estimate is available.
        #[serde(rename = "secRemain")]
        sec_remain: Option<u64>,
    },
    /// The task finished.
    Done {
        #[serde(rename = "durationSec")]
        duration_sec: u64,
    },
}

impl ProgressEventKind {
    /// The value of the `type` field, used for logging and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Begin { .. } => "begin",
            Self::Step { .. } => "step",
            Self::Done { .. } => "done",
        }
    }
}
