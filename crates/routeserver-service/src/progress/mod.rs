//! Progress tracking for background tasks.
//!
//! Every background task owns a [`ProgressSink`]. The task body reports its progress by calling
//! [`begin_task`](ProgressSink::begin_task) once it knows how much work lies ahead, and
//! [`increment`](ProgressSink::increment) for every unit of work done. The sink turns these calls
//! into [`ProgressEvent`]s which are pushed to the owner of the task.
//!
//! ## Throttling
//!
//! Work is frequently reported at a much finer granularity than what is useful to a client.
//! Step events are therefore throttled twice:
//!
//! - by count: a step event is only considered once `push_after` steps have been completed since
//!   the last one. `push_after` defaults to `total / max_events`, so that a task emits at most
//!   about `max_events` step events no matter how many steps it has.
//! - by time: a step event is only pushed if at least `min_time_between_events` have passed since
//!   the previous one. An opportunity skipped this way is not queued, the next crossing of the
//!   step threshold tries again.
//!
//! `begin` and `done` events are never throttled.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::ProgressConfig;
use crate::events::{EventSinkRef, to_payload};
use crate::types::{Identity, TaskId};

mod state;

pub use state::*;

/// Progress state of a single task, shared by all threads working on it.
pub struct ProgressSink {
    task_id: TaskId,
    owner: Identity,
    events: EventSinkRef,
    inner: Mutex<ProgressInner>,
}

struct ProgressInner {
    title: String,
    state: TaskState,
    total_steps: u64,
    steps_completed: u64,
    start_time: Option<Instant>,
    end_time: Option<Instant>,

    max_events: u64,
    /// Explicit override of the step threshold, see [`ProgressSink::push_event_after`].
    push_after_override: Option<u64>,
    push_after: u64,
    min_time_between_events: Duration,

    last_pushed_step: u64,
    last_push_time: Option<Instant>,
}

/// A point-in-time copy of the state of a [`ProgressSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub title: String,
    pub state: TaskState,
    pub steps_completed: u64,
    pub total_steps: u64,
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ProgressSink")
            .field("task_id", &self.task_id)
            .field("state", &inner.state)
            .field("steps_completed", &inner.steps_completed)
            .field("total_steps", &inner.total_steps)
            .finish()
    }
}

impl ProgressSink {
    pub fn new(
        task_id: TaskId,
        owner: Identity,
        title: impl Into<String>,
        events: EventSinkRef,
        config: &ProgressConfig,
    ) -> Self {
        let inner = ProgressInner {
            title: title.into(),
            state: TaskState::Waiting,
            total_steps: 0,
            steps_completed: 0,
            start_time: None,
            end_time: None,
            max_events: config.max_events.max(1),
            push_after_override: None,
            push_after: 0,
            min_time_between_events: config.min_time_between_events,
            last_pushed_step: 0,
            last_push_time: None,
        };

        Self {
            task_id,
            owner,
            events,
            inner: Mutex::new(inner),
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let inner = self.lock();
        ProgressSnapshot {
            title: inner.title.clone(),
            state: inner.state,
            steps_completed: inner.steps_completed,
            total_steps: inner.total_steps,
        }
    }

    /// Time since the task first started, up to its end if it already finished.
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.lock();
        let start = inner.start_time?;
        Some(match inner.end_time {
            Some(end) => end.duration_since(start),
            None => start.elapsed(),
        })
    }

    /// Emit a step event at most every `steps` steps, instead of deriving this from the total.
    pub fn push_event_after(&self, steps: u64) {
        let mut inner = self.lock();
        inner.push_after_override = Some(steps);
        inner.push_after = steps;
    }

    /// Overrides the minimum time between two step events.
    pub fn min_time_between_events(&self, interval: Duration) {
        self.lock().min_time_between_events = interval;
    }

    /// Starts (or restarts) the task with a new title and `total_steps` steps of work ahead.
    ///
    /// Restarting a task which is already in progress resets its step counters, but keeps the
    /// original start time.
    pub fn begin_task(
        &self,
        title: impl Into<String>,
        total_steps: u64,
    ) -> Result<(), InvalidTransition> {
        self.begin(Some(title.into()), total_steps)
    }

    /// Like [`begin_task`](Self::begin_task), keeping the current title.
    pub fn start(&self, total_steps: u64) -> Result<(), InvalidTransition> {
        self.begin(None, total_steps)
    }

    fn begin(&self, title: Option<String>, total_steps: u64) -> Result<(), InvalidTransition> {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return Err(InvalidTransition {
                from: inner.state,
                action: "begin",
            });
        }

        let now = Instant::now();
        inner.start_time.get_or_insert(now);
        if let Some(title) = title {
            inner.title = title;
        }
        inner.state = TaskState::InProgress;
        inner.total_steps = total_steps;
        inner.steps_completed = 0;
        inner.push_after = inner
            .push_after_override
            .unwrap_or(total_steps / inner.max_events);
        inner.last_pushed_step = 0;
        inner.last_push_time = None;

        tracing::debug!(
            task_id = %self.task_id,
            title = %inner.title,
            total_steps,
            "Task started",
        );
        let kind = ProgressEventKind::Begin {
            title: inner.title.clone(),
            total: total_steps,
        };
        self.push(kind);
        Ok(())
    }

    /// Records `steps` more completed steps.
    ///
    /// This may be called concurrently from any number of threads working on the same task.
    /// Reaching the total completes the task. Once the task is completed or errored, further
    /// increments are ignored.
    pub fn increment(&self, steps: u64) -> Result<(), InvalidTransition> {
        let mut inner = self.lock();
        match inner.state {
            TaskState::InProgress => {}
            TaskState::Completed | TaskState::Errored => return Ok(()),
            TaskState::Waiting => {
                return Err(InvalidTransition {
                    from: TaskState::Waiting,
                    action: "increment",
                });
            }
        }

        inner.steps_completed = inner.steps_completed.saturating_add(steps);
        if inner.steps_completed >= inner.total_steps {
            self.complete(&mut inner);
            return Ok(());
        }

        if inner.steps_completed < inner.last_pushed_step.saturating_add(inner.push_after) {
            return Ok(());
        }

        let now = Instant::now();
        if let Some(last_push) = inner.last_push_time {
            if now.duration_since(last_push) < inner.min_time_between_events {
                return Ok(());
            }
        }

        inner.last_pushed_step = inner.steps_completed;
        inner.last_push_time = Some(now);

        let elapsed = inner
            .start_time
            .map(|start| now.duration_since(start))
            .unwrap_or_default();
        let kind = ProgressEventKind::Step {
            step: inner.steps_completed,
            total: inner.total_steps,
            sec_remain: estimate_remaining(elapsed, inner.steps_completed, inner.total_steps),
        };
        self.push(kind);
        Ok(())
    }

    /// Marks the task as completed.
    ///
    /// Completing an already completed task does nothing.
    pub fn completed(&self) -> Result<(), InvalidTransition> {
        let mut inner = self.lock();
        match inner.state {
            TaskState::Completed => Ok(()),
            TaskState::Errored => Err(InvalidTransition {
                from: TaskState::Errored,
                action: "complete",
            }),
            TaskState::Waiting | TaskState::InProgress => {
                self.complete(&mut inner);
                Ok(())
            }
        }
    }

    /// Marks the task as failed, replacing its title with `message`.
    ///
    /// No event is pushed for this, surfacing the error is up to the caller.
    pub fn error(&self, message: impl Into<String>) {
        let mut inner = self.lock();
        self.fail(&mut inner, message.into());
    }

    /// Like [`error`](Self::error), but leaves a completed or errored task untouched.
    ///
    /// Returns whether the task was marked as errored.
    pub fn error_unless_terminal(&self, message: impl Into<String>) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return false;
        }
        self.fail(&mut inner, message.into());
        true
    }

    fn fail(&self, inner: &mut ProgressInner, message: String) {
        inner.title = message;
        inner.state = TaskState::Errored;
        inner.end_time.get_or_insert_with(Instant::now);

        tracing::debug!(task_id = %self.task_id, message = %inner.title, "Task errored");
    }

    fn complete(&self, inner: &mut ProgressInner) {
        let now = Instant::now();
        let start = *inner.start_time.get_or_insert(now);
        inner.end_time = Some(now);
        inner.state = TaskState::Completed;
        inner.steps_completed = inner.steps_completed.min(inner.total_steps);

        let duration = now.duration_since(start);
        tracing::debug!(task_id = %self.task_id, ?duration, "Task completed");
        self.push(ProgressEventKind::Done {
            duration_sec: duration.as_secs(),
        });
    }

    /// Pushes an event to the owner.
    ///
    /// This is called with the state lock held, which keeps the events of one task in order.
    fn push(&self, kind: ProgressEventKind) {
        metric!(counter("progress.events") += 1, "type" => kind.name());
        let event = ProgressEvent {
            id: self.task_id,
            kind,
        };
        self.events
            .send_event(&self.owner, PROGRESS_EVENT, to_payload(&event));
    }

    fn lock(&self) -> MutexGuard<'_, ProgressInner> {
        // A task body panicking between two counter updates leaves nothing half-written.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Estimates the seconds left, assuming the remaining steps take as long as the completed ones.
///
/// Returns `None` as long as no step has been completed.
fn estimate_remaining(elapsed: Duration, steps_completed: u64, total_steps: u64) -> Option<u64> {
    if steps_completed == 0 {
        return None;
    }
    let remaining = total_steps.saturating_sub(steps_completed);
    let secs = elapsed.as_secs_f64() * remaining as f64 / steps_completed as f64;
    Some(secs.round() as u64)
}
