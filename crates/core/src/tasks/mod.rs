//! Structured, abortable, nestable task pipelines.
//!
//! Every user-visible operation in the server is a [`TaskList`]: an ordered
//! (or concurrent) set of [`Task`]s sharing a [`TaskContext`], observable
//! through a progress stream, abortable through a cooperative cancellation
//! token, and composable by returning a nested list from a task body.

mod context;
mod list;
mod task;

pub use context::TaskContext;
pub use list::{TaskList, TaskListBuilder, TaskStatus};
pub use task::{Task, TaskOutcome};
