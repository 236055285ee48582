//! Execution and bookkeeping of long running background tasks.
//!
//! Tasks are submitted to the [`TaskRegistry`], which runs them on a dedicated pool with a fixed
//! number of concurrently executing tasks. Every task stays visible in the registry, together
//! with its progress, until it has finished and [`TaskRegistry::clear_completed`] is called.
//!
//! A task body that fails, either by returning an error or by panicking, is marked as errored.
//! Neither affects the pool or any other task.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::FutureExt;
use sentry::{Hub, SentryFutureExt};
use tokio::sync::Semaphore;

use crate::config::{ProgressConfig, TaskConfig};
use crate::events::EventSinkRef;
use crate::types::{Identity, TaskId};
use crate::utils::futures::CallOnDrop;

mod task;

pub use task::{BackgroundTask, TaskInfo};

/// An error returned when a task is submitted while the maximum number of tasks is pending.
#[derive(Debug, Clone, thiserror::Error)]
#[error("maximum number of pending background tasks reached")]
pub struct TaskRejected;

/// Runs background tasks and keeps track of them.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<TaskRegistryInner>,
}

struct TaskRegistryInner {
    tasks: Mutex<Vec<Arc<BackgroundTask>>>,

    pool: tokio::runtime::Handle,
    /// One permit per task that may execute at the same time.
    permits: Arc<Semaphore>,
    max_pending_tasks: Option<usize>,
    /// Tasks that are queued or running.
    pending_tasks: Arc<AtomicUsize>,

    events: EventSinkRef,
    progress: ProgressConfig,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.lock().len())
            .field("pending_tasks", &self.pending_tasks())
            .field("max_pending_tasks", &self.inner.max_pending_tasks)
            .finish()
    }
}

impl TaskRegistry {
    /// Creates a registry that spawns tasks onto `pool`.
    ///
    /// No more than `config.worker_threads` tasks execute at any time, independent of the size
    /// of the runtime behind `pool`.
    pub fn new(
        config: &TaskConfig,
        progress: &ProgressConfig,
        pool: tokio::runtime::Handle,
        events: EventSinkRef,
    ) -> Self {
        let inner = TaskRegistryInner {
            tasks: Mutex::new(Vec::new()),
            pool,
            permits: Arc::new(Semaphore::new(config.worker_threads.max(1))),
            max_pending_tasks: config.max_pending_tasks,
            pending_tasks: Arc::new(AtomicUsize::new(0)),
            events,
            progress: *progress,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Registers a new task and schedules `work` on the pool.
    ///
    /// Returns immediately with the registered task. The task body receives the same task and
    /// reports its progress through [`BackgroundTask::progress`].
    ///
    /// Once `work` resolves, its sink is completed unless the body already finished it. If `work`
    /// fails or panics, the sink is marked as errored instead.
    ///
    /// Returns `Err` if the registry already has the maximum number of tasks queued or running,
    /// as configured by the `max_pending_tasks` option. A rejected task is not registered.
    pub fn submit<F, Fut>(
        &self,
        owner: Identity,
        title: impl Into<String>,
        work: F,
    ) -> Result<Arc<BackgroundTask>, TaskRejected>
    where
        F: FnOnce(Arc<BackgroundTask>) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let pending_tasks = Arc::clone(&self.inner.pending_tasks);
        let max_pending_tasks = self.inner.max_pending_tasks;
        let admitted = pending_tasks.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |num| {
            match max_pending_tasks {
                Some(max) if num >= max => None,
                _ => Some(num + 1),
            }
        });
        let num_pending = match admitted {
            Ok(previous) => previous + 1,
            Err(_) => {
                metric!(counter("tasks.rejected") += 1);
                tracing::warn!(user = %owner, "Rejecting background task, too many pending");
                return Err(TaskRejected);
            }
        };
        metric!(gauge("tasks.pending") = num_pending as u64);
        metric!(counter("tasks.submitted") += 1);

        let task = Arc::new(BackgroundTask::new(
            owner,
            title,
            Arc::clone(&self.inner.events),
            &self.inner.progress,
        ));
        self.lock().push(Arc::clone(&task));
        tracing::debug!(task_id = %task.id(), user = %task.owner(), "Submitted background task");

        let token = CallOnDrop::new(move || {
            let num_pending = pending_tasks.fetch_sub(1, Ordering::SeqCst) - 1;
            metric!(gauge("tasks.pending") = num_pending as u64);
        });

        let hub = Arc::new(Hub::new_from_top(Hub::current()));
        let task_id = task.id();
        hub.configure_scope(|scope| scope.set_tag("task_id", task_id));

        let permits = Arc::clone(&self.inner.permits);
        let spawned = Arc::clone(&task);
        let future = async move {
            let _token = token;
            let task = spawned;

            let Ok(_permit) = permits.acquire_owned().await else {
                task.progress().error("background task pool is shut down");
                return;
            };

            let start = Instant::now();
            let body = {
                let task = Arc::clone(&task);
                async move { work(task).await }
            };
            let outcome = AssertUnwindSafe(body).catch_unwind().await;
            let status = finish(&task, outcome);

            metric!(timer("tasks.duration") = start.elapsed(), "status" => status);
            metric!(counter("tasks.finished") += 1, "status" => status);
        }
        .bind_hub(hub);

        self.inner.pool.spawn(future);

        Ok(task)
    }

    /// A snapshot of all tasks, in order of submission.
    pub fn list(&self) -> Vec<TaskInfo> {
        self.lock().iter().map(|task| task.info()).collect()
    }

    /// A snapshot of the tasks owned by `user`, in order of submission.
    pub fn list_for_user(&self, user: &str) -> Vec<TaskInfo> {
        self.lock()
            .iter()
            .filter(|task| task.owner().user == user)
            .map(|task| task.info())
            .collect()
    }

    pub fn get(&self, task_id: TaskId) -> Option<Arc<BackgroundTask>> {
        self.lock()
            .iter()
            .find(|task| task.id() == task_id)
            .cloned()
    }

    /// Removes all completed and errored tasks, returning how many were removed.
    pub fn clear_completed(&self) -> usize {
        let mut tasks = self.lock();
        let before = tasks.len();
        tasks.retain(|task| !task.state().is_terminal());
        let removed = before - tasks.len();
        tracing::debug!(removed, "Cleared finished background tasks");
        removed
    }

    /// Number of tasks that are queued or running.
    pub fn pending_tasks(&self) -> usize {
        self.inner.pending_tasks.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<BackgroundTask>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Brings the sink of a finished task into a terminal state, returning the metrics status.
fn finish(
    task: &BackgroundTask,
    outcome: Result<anyhow::Result<()>, Box<dyn Any + Send>>,
) -> &'static str {
    let progress = task.progress();
    match outcome {
        Ok(Ok(())) => {
            if !progress.state().is_terminal() {
                if let Err(err) = progress.completed() {
                    tracing::warn!(task_id = %task.id(), error = &err as &dyn std::error::Error);
                }
            }
            "completed"
        }
        Ok(Err(err)) => {
            let error: &dyn std::error::Error = err.as_ref();
            tracing::error!(task_id = %task.id(), error, "Background task failed");
            mark_errored(task, format!("{err:#}"));
            "failed"
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(task_id = %task.id(), message, "Background task panicked");
            mark_errored(task, message);
            "panicked"
        }
    }
}

/// Marks the task as errored, unless the body already brought it into a terminal state.
fn mark_errored(task: &BackgroundTask, message: String) {
    task.progress().error_unless_terminal(message);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "background task panicked".to_owned()
    }
}
