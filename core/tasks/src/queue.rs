//! Sequential task queue with observable state transitions.
//!
//! One run-loop drains queued tasks in arrival order, running a single task
//! to completion before looking for the next. The loop exits when nothing is
//! queued and is restarted by the next `submit` or `retry`.
//!
//! Listeners are called inline, in registration order, before the call that
//! caused the transition returns. They must not block. Every transition and
//! its event happen under one ordering lock, so listeners see transitions in
//! the order they were applied.

use futures::FutureExt;
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::task::{Task, TaskAction, TaskId, TaskInfo, TaskStatus};
use veilvault_common::{Error, Result};

/// Kind of a task event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEventKind {
    #[serde(rename = "task-added")]
    Added,
    #[serde(rename = "task-status-changed")]
    StatusChanged,
    #[serde(rename = "task-progress-changed")]
    ProgressChanged,
    #[serde(rename = "task-removed")]
    Removed,
}

impl TaskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEventKind::Added => "task-added",
            TaskEventKind::StatusChanged => "task-status-changed",
            TaskEventKind::ProgressChanged => "task-progress-changed",
            TaskEventKind::Removed => "task-removed",
        }
    }
}

/// Observer of task events.
pub trait TaskListener: Send + Sync {
    fn on_event(&self, kind: TaskEventKind, task: &TaskInfo);
}

impl<F> TaskListener for F
where
    F: Fn(TaskEventKind, &TaskInfo) + Send + Sync,
{
    fn on_event(&self, kind: TaskEventKind, task: &TaskInfo) {
        self(kind, task)
    }
}

/// Handle returned by [`TaskQueue::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Lets a running task report progress.
#[derive(Clone)]
pub struct ProgressReporter {
    id: TaskId,
    queue: Weak<QueueInner>,
}

impl ProgressReporter {
    pub fn task_id(&self) -> TaskId {
        self.id
    }

    /// Set progress (clamped to 100). Ignored once the queue is gone or the
    /// task has been removed.
    pub fn report(&self, progress: u8) {
        if let Some(queue) = self.queue.upgrade() {
            let _ = queue.set_progress(self.id, progress);
        }
    }
}

struct Entry {
    info: TaskInfo,
    action: TaskAction,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<TaskId, Entry>,
    /// Arrival order.
    order: Vec<TaskId>,
    running: bool,
}

impl QueueState {
    fn get_mut(&mut self, id: TaskId) -> Result<&mut Entry> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    fn next_queued(&self) -> Option<TaskId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.tasks.get(id).is_some_and(|e| e.info.status == TaskStatus::Queued))
    }
}

struct QueueInner {
    /// Held across a transition and its event. Taken before `state`, and
    /// reentrant so listeners may call back into the queue.
    transitions: ReentrantMutex<()>,
    state: Mutex<QueueState>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn TaskListener>)>>,
    next_listener: Mutex<u64>,
    idle: watch::Sender<bool>,
}

impl QueueInner {
    fn emit(&self, kind: TaskEventKind, task: &TaskInfo) {
        let listeners: Vec<_> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener.on_event(kind, task);
        }
    }

    fn set_progress(&self, id: TaskId, progress: u8) -> Result<()> {
        let _ordered = self.transitions.lock();
        let snapshot = {
            let mut state = self.state.lock();
            let entry = state.get_mut(id)?;
            entry.info.progress = progress.min(100);
            entry.info.clone()
        };
        self.emit(TaskEventKind::ProgressChanged, &snapshot);
        Ok(())
    }

    /// Start the run-loop unless it is already running.
    fn ensure_running(self: &Arc<Self>, runtime: &Handle) {
        {
            let mut state = self.state.lock();
            if state.running || state.next_queued().is_none() {
                return;
            }
            state.running = true;
            self.idle.send_replace(false);
        }
        debug!("Task loop started");
        runtime.spawn(Arc::clone(self).run());
    }

    /// Mark the next queued task as processing and announce it. `None` once
    /// nothing is queued, with the loop marked idle.
    fn start_next(&self) -> Option<(TaskId, TaskAction)> {
        let _ordered = self.transitions.lock();
        let (id, action, started) = {
            let mut state = self.state.lock();
            let Some(id) = state.next_queued() else {
                state.running = false;
                self.idle.send_replace(true);
                return None;
            };
            // `next_queued` only yields ids present in `tasks`.
            let entry = state.get_mut(id).ok()?;
            entry.info.status = TaskStatus::Processing;
            (id, Arc::clone(&entry.action), entry.info.clone())
        };
        info!(task_id = %id, kind = ?started.kind, "Task started");
        self.emit(TaskEventKind::StatusChanged, &started);
        Some((id, action))
    }

    /// Record the outcome of a processing task and announce it.
    fn finish(&self, id: TaskId, outcome: Result<()>) {
        let _ordered = self.transitions.lock();
        let finished = {
            let mut state = self.state.lock();
            // Processing tasks cannot be deleted, so the entry is still here.
            let Some(entry) = state.tasks.get_mut(&id) else {
                return;
            };
            match &outcome {
                Ok(()) => {
                    entry.info.status = TaskStatus::Completed;
                    entry.info.progress = 100;
                }
                Err(e) => {
                    entry.info.status = TaskStatus::Failed;
                    entry.info.error = Some(e.to_string());
                }
            }
            entry.info.clone()
        };
        match &outcome {
            Ok(()) => info!(task_id = %id, "Task completed"),
            Err(e) => error!(task_id = %id, error = %e, "Task failed"),
        }
        self.emit(TaskEventKind::StatusChanged, &finished);
    }

    async fn run(self: Arc<Self>) {
        loop {
            let Some((id, action)) = self.start_next() else {
                debug!("Task loop idle");
                return;
            };

            let reporter = ProgressReporter {
                id,
                queue: Arc::downgrade(&self),
            };
            let outcome = match AssertUnwindSafe(action(reporter)).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Error::TaskPanicked(panic_message(&*payload))),
            };
            self.finish(id, outcome);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Sequential task queue. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(QueueInner {
                transitions: ReentrantMutex::new(()),
                state: Mutex::new(QueueState::default()),
                listeners: Mutex::new(Vec::new()),
                next_listener: Mutex::new(0),
                idle,
            }),
        }
    }

    fn runtime() -> Result<Handle> {
        Handle::try_current()
            .map_err(|_| Error::InvalidInput("TaskQueue requires a tokio runtime".to_string()))
    }

    /// Add a task and start the run-loop if it is idle.
    ///
    /// # Errors
    /// - Called outside a tokio runtime
    pub fn submit(&self, task: Task) -> Result<TaskId> {
        let runtime = Self::runtime()?;
        let Task { info, action } = task;
        let id = info.id;
        let snapshot = info.clone();
        let _ordered = self.inner.transitions.lock();
        {
            let mut state = self.inner.state.lock();
            state.order.push(id);
            state.tasks.insert(id, Entry { info, action });
        }
        debug!(task_id = %id, label = %snapshot.label, "Task added");
        self.inner.emit(TaskEventKind::Added, &snapshot);
        self.inner.ensure_running(&runtime);
        Ok(id)
    }

    /// Cancel a queued task so that it never starts.
    ///
    /// # Errors
    /// - `TaskNotFound`
    /// - `TaskNotCancellable` unless the task is queued
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        let _ordered = self.inner.transitions.lock();
        let snapshot = {
            let mut state = self.inner.state.lock();
            let entry = state.get_mut(id)?;
            if entry.info.status != TaskStatus::Queued {
                return Err(Error::TaskNotCancellable {
                    id: id.to_string(),
                    status: entry.info.status.to_string(),
                });
            }
            entry.info.status = TaskStatus::Cancelled;
            entry.info.clone()
        };
        info!(task_id = %id, "Task cancelled");
        self.inner.emit(TaskEventKind::StatusChanged, &snapshot);
        Ok(())
    }

    /// Queue a failed task again with its progress reset.
    ///
    /// # Errors
    /// - `TaskNotFound`
    /// - `TaskNotRetryable` unless the task failed
    /// - Called outside a tokio runtime
    pub fn retry(&self, id: TaskId) -> Result<()> {
        let runtime = Self::runtime()?;
        let _ordered = self.inner.transitions.lock();
        let snapshot = {
            let mut state = self.inner.state.lock();
            let entry = state.get_mut(id)?;
            if entry.info.status != TaskStatus::Failed {
                return Err(Error::TaskNotRetryable {
                    id: id.to_string(),
                    status: entry.info.status.to_string(),
                });
            }
            entry.info.status = TaskStatus::Queued;
            entry.info.progress = 0;
            entry.info.error = None;
            entry.info.clone()
        };
        info!(task_id = %id, "Task retried");
        self.inner.emit(TaskEventKind::StatusChanged, &snapshot);
        self.inner.ensure_running(&runtime);
        Ok(())
    }

    /// Remove a task from the queue.
    ///
    /// # Errors
    /// - `TaskNotFound`
    /// - `TaskNotDeletable` while the task is processing
    pub fn delete(&self, id: TaskId) -> Result<()> {
        let _ordered = self.inner.transitions.lock();
        let removed = {
            let mut state = self.inner.state.lock();
            let status = state.get_mut(id)?.info.status;
            if status == TaskStatus::Processing {
                return Err(Error::TaskNotDeletable {
                    id: id.to_string(),
                    status: status.to_string(),
                });
            }
            state.order.retain(|t| *t != id);
            state
                .tasks
                .remove(&id)
                .map(|entry| entry.info)
                .ok_or_else(|| Error::TaskNotFound(id.to_string()))?
        };
        debug!(task_id = %id, "Task removed");
        self.inner.emit(TaskEventKind::Removed, &removed);
        Ok(())
    }

    /// Update a task's progress (clamped to 100).
    pub fn set_progress(&self, id: TaskId, progress: u8) -> Result<()> {
        self.inner.set_progress(id, progress)
    }

    /// All tasks in arrival order.
    pub fn list_all(&self) -> Vec<TaskInfo> {
        let state = self.inner.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id).map(|e| e.info.clone()))
            .collect()
    }

    pub fn get(&self, id: TaskId) -> Option<TaskInfo> {
        self.inner.state.lock().tasks.get(&id).map(|e| e.info.clone())
    }

    /// Register a listener. Listeners are called in registration order.
    pub fn subscribe(&self, listener: Arc<dyn TaskListener>) -> ListenerId {
        let id = {
            let mut next = self.inner.next_listener.lock();
            *next += 1;
            ListenerId(*next)
        };
        self.inner.listeners.lock().push((id, listener));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    /// Wait until the run-loop has nothing left to do.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
