//! Task scheduling for VeilVault.
//!
//! Mutating vault operations are wrapped as [`Task`]s and executed one at a
//! time by a [`TaskQueue`], which publishes every state transition to its
//! listeners.

pub mod queue;
pub mod task;

pub use queue::{ListenerId, ProgressReporter, TaskEventKind, TaskListener, TaskQueue};
pub use task::{Task, TaskAction, TaskFuture, TaskId, TaskInfo, TaskKind, TaskStatus};
