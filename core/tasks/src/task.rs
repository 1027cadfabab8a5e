//! Task model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

use crate::queue::ProgressReporter;
use veilvault_common::{Result, VaultId};

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Upload,
    Download,
    Delete,
    Move,
    Copy,
    CreateFolder,
}

impl TaskKind {
    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskKind::Upload => "Upload",
            TaskKind::Download => "Download",
            TaskKind::Delete => "Delete",
            TaskKind::Move => "Move",
            TaskKind::Copy => "Copy",
            TaskKind::CreateFolder => "Create Folder",
        }
    }
}

/// Lifecycle state of a task.
///
/// `Queued -> Processing -> {Completed | Failed}`, `Queued -> Cancelled`,
/// and `Failed -> Queued` on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Display label, e.g. the file name.
    pub label: String,
    pub vault_id: VaultId,
    pub status: TaskStatus,
    /// 0 to 100. Advisory.
    pub progress: u8,
    /// Message of the last failure.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// The work bound to a task. Callable more than once so that failed tasks
/// can be retried.
pub type TaskAction = Arc<dyn Fn(ProgressReporter) -> TaskFuture + Send + Sync>;

/// A unit of work ready to be submitted to a [`TaskQueue`](crate::TaskQueue).
pub struct Task {
    pub(crate) info: TaskInfo,
    pub(crate) action: TaskAction,
}

impl Task {
    /// Create a queued task.
    pub fn new<F, Fut>(kind: TaskKind, label: impl Into<String>, vault_id: VaultId, action: F) -> Self
    where
        F: Fn(ProgressReporter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            info: TaskInfo {
                id: TaskId::new(),
                kind,
                label: label.into(),
                vault_id,
                status: TaskStatus::Queued,
                progress: 0,
                error: None,
                created_at: Utc::now(),
            },
            action: Arc::new(move |progress| -> TaskFuture { Box::pin(action(progress)) }),
        }
    }

    pub fn id(&self) -> TaskId {
        self.info.id
    }

    pub fn info(&self) -> &TaskInfo {
        &self.info
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("info", &self.info).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_queued() {
        let task = Task::new(
            TaskKind::Upload,
            "a.txt",
            VaultId::new("v").unwrap(),
            |_| async { Ok(()) },
        );
        assert_eq!(task.info().status, TaskStatus::Queued);
        assert_eq!(task.info().progress, 0);
        assert_eq!(task.info().label, "a.txt");
        assert!(task.info().error.is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert_eq!(TaskStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskKind::CreateFolder).unwrap(),
            "\"create_folder\""
        );
        assert_eq!(TaskKind::CreateFolder.display_name(), "Create Folder");
    }
}
