//! A single unit of work within a task list.

use std::future::Future;

use futures::future::BoxFuture;

use super::context::TaskContext;
use super::list::TaskList;
use crate::error::TaskError;

/// What a task body produced: plain completion, or a nested list to run in
/// its place.
pub enum TaskOutcome {
    Complete,
    Nested(TaskList),
}

pub(crate) type EnabledFn = Box<dyn Fn(&TaskContext) -> bool + Send + Sync>;
pub(crate) type SkipFn = Box<dyn Fn(&TaskContext) -> Option<String> + Send + Sync>;
pub(crate) type WorkFn =
    Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, Result<TaskOutcome, TaskError>> + Send>;

/// One step of a [`TaskList`].
///
/// `enabled` is evaluated lazily at the task's turn; a disabled task is
/// omitted silently. `skip` likewise, but a skip reason is surfaced on the
/// progress stream. A task without a body only contributes its title.
pub struct Task {
    pub(crate) title: String,
    pub(crate) enabled: Option<EnabledFn>,
    pub(crate) skip: Option<SkipFn>,
    pub(crate) work: Option<WorkFn>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            enabled: None,
            skip: None,
            work: None,
        }
    }

    pub fn enabled<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TaskContext) -> bool + Send + Sync + 'static,
    {
        self.enabled = Some(Box::new(predicate));
        self
    }

    /// Skip predicate returning `None` to run the task or `Some(reason)` to
    /// skip it, surfacing the reason to progress listeners.
    pub fn skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TaskContext) -> Option<String> + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(predicate));
        self
    }

    pub fn run<F, Fut>(mut self, work: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutcome, TaskError>> + Send + 'static,
    {
        self.work = Some(Box::new(move |ctx| Box::pin(work(ctx))));
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}
