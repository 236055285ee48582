use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ProgressConfig;
use crate::events::EventSinkRef;
use crate::progress::{ProgressSink, TaskState};
use crate::types::{Identity, TaskId};

/// A unit of work executed on the background task pool on behalf of a user.
#[derive(Debug)]
pub struct BackgroundTask {
    id: TaskId,
    owner: Identity,
    created: DateTime<Utc>,
    progress: ProgressSink,
}

impl BackgroundTask {
    pub fn new(
        owner: Identity,
        title: impl Into<String>,
        events: EventSinkRef,
        config: &ProgressConfig,
    ) -> Self {
        let id = TaskId::new();
        let progress = ProgressSink::new(id, owner.clone(), title, events, config);
        Self {
            id,
            owner,
            created: Utc::now(),
            progress,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// The progress sink the task body reports to.
    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    pub fn state(&self) -> TaskState {
        self.progress.state()
    }

    /// Takes a consistent snapshot of the task for listing.
    pub fn info(&self) -> TaskInfo {
        let snapshot = self.progress.snapshot();
        TaskInfo {
            id: self.id,
            owner: self.owner.clone(),
            title: snapshot.title,
            state: snapshot.state,
            steps_completed: snapshot.steps_completed,
            total_steps: snapshot.total_steps,
            created: self.created,
        }
    }
}

/// The listing representation of a [`BackgroundTask`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub id: TaskId,
    pub owner: Identity,
    pub title: String,
    pub state: TaskState,
    pub steps_completed: u64,
    pub total_steps: u64,
    pub created: DateTime<Utc>,
}
