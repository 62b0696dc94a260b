//! Task list execution engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::context::TaskContext;
use super::task::{Task, TaskOutcome};
use crate::error::TaskError;
use crate::progress::ProgressEvent;

/// Where a list currently is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed { code: String, message: String },
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed { .. } | TaskStatus::Aborted
        )
    }
}

type OnErrorFn = Box<dyn FnOnce(&TaskError, &TaskContext) + Send>;
type OnCompleteFn = Box<dyn FnOnce() + Send>;
type OnDoneFn = Box<dyn FnOnce(bool, &TaskContext) + Send>;

struct RunState {
    tasks: Vec<Task>,
    on_error: Option<OnErrorFn>,
    on_complete: Option<OnCompleteFn>,
    on_done: Option<OnDoneFn>,
}

/// Buffered event log plus live subscribers. Subscribing replays the log, so
/// every subscriber observes the identical event sequence regardless of when
/// it attached.
#[derive(Default)]
struct ProgressHub {
    log: Vec<ProgressEvent>,
    subscribers: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    closed: bool,
}

impl ProgressHub {
    fn publish(&mut self, event: ProgressEvent) {
        if self.closed {
            return;
        }
        let terminal = event.is_terminal();
        self.log.push(event.clone());
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if terminal {
            self.closed = true;
            self.subscribers.clear();
        }
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in &self.log {
            let _ = tx.send(event.clone());
        }
        if !self.closed {
            self.subscribers.push(tx);
        }
        rx
    }
}

struct ListInner {
    id: Uuid,
    concurrent: bool,
    collapse: bool,
    fresh_context: bool,
    cancel: CancellationToken,
    /// Set when the engine itself cancelled the token to stop in-flight
    /// siblings after a failure, as opposed to an external `abort()`.
    failure_cancel: AtomicBool,
    status_tx: watch::Sender<TaskStatus>,
    run_state: Mutex<Option<RunState>>,
    progress: Mutex<ProgressHub>,
}

/// Cancels the linked watcher when the engine settles.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A cloneable handle to one pipeline. All clones refer to the same
/// execution; re-entrant operations hand the same handle back to every
/// caller.
#[derive(Clone)]
pub struct TaskList {
    inner: Arc<ListInner>,
}

pub struct TaskListBuilder {
    tasks: Vec<Task>,
    concurrent: bool,
    collapse: bool,
    fresh_context: bool,
    on_error: Option<OnErrorFn>,
    on_complete: Option<OnCompleteFn>,
    on_done: Option<OnDoneFn>,
}

impl TaskListBuilder {
    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Display hint only; carried for progress consumers.
    pub fn collapse(mut self, collapse: bool) -> Self {
        self.collapse = collapse;
        self
    }

    /// Begin with a new, empty shared context instead of inheriting the
    /// parent's.
    pub fn fresh_context(mut self, fresh: bool) -> Self {
        self.fresh_context = fresh;
        self
    }

    /// Fires once with the first error and the context current at failure.
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&TaskError, &TaskContext) + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Fires exactly once after the list settles, with the final context;
    /// `failed` is true for both errors and aborts.
    pub fn on_done<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(bool, &TaskContext) + Send + 'static,
    {
        self.on_done = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> TaskList {
        let (status_tx, _) = watch::channel(TaskStatus::Pending);
        TaskList {
            inner: Arc::new(ListInner {
                id: Uuid::new_v4(),
                concurrent: self.concurrent,
                collapse: self.collapse,
                fresh_context: self.fresh_context,
                cancel: CancellationToken::new(),
                failure_cancel: AtomicBool::new(false),
                status_tx,
                run_state: Mutex::new(Some(RunState {
                    tasks: self.tasks,
                    on_error: self.on_error,
                    on_complete: self.on_complete,
                    on_done: self.on_done,
                })),
                progress: Mutex::new(ProgressHub::default()),
            }),
        }
    }
}

impl TaskList {
    pub fn builder() -> TaskListBuilder {
        TaskListBuilder {
            tasks: Vec::new(),
            concurrent: false,
            collapse: false,
            fresh_context: false,
            on_error: None,
            on_complete: None,
            on_done: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn collapse(&self) -> bool {
        self.inner.collapse
    }

    /// Marks the list aborted. The currently-running task observes the
    /// cancellation through its context; not-yet-started tasks are dropped;
    /// running nested lists are aborted recursively.
    pub fn abort(&self) {
        debug!(list = %self.inner.id, "task list abort requested");
        self.inner.cancel.cancel();
    }

    /// True once an engine has claimed the list for execution.
    pub fn has_started(&self) -> bool {
        self.inner.run_state.lock().unwrap().is_none()
    }

    pub fn current_status(&self) -> TaskStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn status(&self) -> watch::Receiver<TaskStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Subscribes to the progress stream. Buffered events are replayed first,
    /// so late subscribers see the identical sequence. The channel closes
    /// after the terminal event.
    pub fn progress(&self) -> mpsc::UnboundedReceiver<ProgressEvent> {
        self.inner.progress.lock().unwrap().subscribe()
    }

    /// Resolves on completion, fails with the list's error on failure, and
    /// fails with [`TaskError::Aborted`] after an abort.
    pub async fn wait(&self) -> Result<(), TaskError> {
        let mut rx = self.inner.status_tx.subscribe();
        loop {
            let status = rx.borrow_and_update().clone();
            match status {
                TaskStatus::Done => return Ok(()),
                TaskStatus::Failed { code, message } => {
                    return Err(TaskError::Failed { code, message })
                }
                TaskStatus::Aborted => return Err(TaskError::Aborted),
                TaskStatus::Pending | TaskStatus::Running => {}
            }
            if rx.changed().await.is_err() {
                return Err(TaskError::Aborted);
            }
        }
    }

    /// Launches the list on the runtime with a fresh context. Subsequent
    /// calls (or a nested execution racing this one) are no-ops; the first
    /// engine to claim the run state drives the list.
    pub fn spawn(&self) {
        let list = self.clone();
        tokio::spawn(async move {
            let _ = list.execute(None).await;
        });
    }

    fn execute(self, parent: Option<TaskContext>) -> BoxFuture<'static, Result<(), TaskError>> {
        Box::pin(async move { self.execute_inner(parent).await })
    }

    async fn execute_inner(&self, parent: Option<TaskContext>) -> Result<(), TaskError> {
        let claimed = self.inner.run_state.lock().unwrap().take();
        let Some(run) = claimed else {
            // Another engine owns the run; observe it instead.
            return self.wait().await;
        };

        // Propagate the parent's abort into this list while it runs.
        let _link = parent.as_ref().map(|parent_ctx| {
            let parent_token = parent_ctx.token();
            let own = self.inner.cancel.clone();
            AbortOnDrop(tokio::spawn(async move {
                parent_token.cancelled().await;
                own.cancel();
            }))
        });

        let ctx = match parent {
            Some(parent_ctx) if !self.inner.fresh_context => {
                parent_ctx.with_token(self.inner.cancel.clone())
            }
            _ => TaskContext::new(self.inner.cancel.clone()),
        };

        self.inner.status_tx.send_replace(TaskStatus::Running);

        let outcome = if self.inner.concurrent {
            self.run_concurrent(run.tasks, &ctx).await
        } else {
            self.run_sequential(run.tasks, &ctx).await
        };

        let externally_aborted = self.inner.cancel.is_cancelled()
            && !self.inner.failure_cancel.load(Ordering::SeqCst);

        let result = match outcome {
            Err(TaskError::Aborted) => Err(TaskError::Aborted),
            _ if externally_aborted => Err(TaskError::Aborted),
            other => other,
        };

        match result {
            Ok(()) => {
                if let Some(on_complete) = run.on_complete {
                    on_complete();
                }
                if let Some(on_done) = run.on_done {
                    on_done(false, &ctx);
                }
                self.finish(TaskStatus::Done, ProgressEvent::Done);
                Ok(())
            }
            Err(TaskError::Aborted) => {
                if let Some(on_done) = run.on_done {
                    on_done(true, &ctx);
                }
                self.finish(TaskStatus::Aborted, ProgressEvent::Aborted);
                Err(TaskError::Aborted)
            }
            Err(err) => {
                if let Some(on_error) = run.on_error {
                    on_error(&err, &ctx);
                }
                if let Some(on_done) = run.on_done {
                    on_done(true, &ctx);
                }
                let (code, message) = match &err {
                    TaskError::Failed { code, message } => (code.clone(), message.clone()),
                    TaskError::Aborted => unreachable!("aborted handled above"),
                };
                self.finish(
                    TaskStatus::Failed {
                        code: code.clone(),
                        message: message.clone(),
                    },
                    ProgressEvent::Error { code, message },
                );
                Err(err)
            }
        }
    }

    async fn run_sequential(&self, tasks: Vec<Task>, ctx: &TaskContext) -> Result<(), TaskError> {
        for task in tasks {
            if self.inner.cancel.is_cancelled() {
                return Err(TaskError::Aborted);
            }
            self.run_one(task, ctx).await?;
        }
        Ok(())
    }

    async fn run_concurrent(&self, tasks: Vec<Task>, ctx: &TaskContext) -> Result<(), TaskError> {
        let mut in_flight: FuturesUnordered<_> = tasks
            .into_iter()
            .map(|task| self.run_one(task, ctx))
            .collect();
        let mut first_err: Option<TaskError> = None;
        while let Some(result) = in_flight.next().await {
            if let Err(err) = result {
                if first_err.is_none() {
                    if !self.inner.cancel.is_cancelled() {
                        self.inner.failure_cancel.store(true, Ordering::SeqCst);
                        self.inner.cancel.cancel();
                    }
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn run_one(&self, task: Task, ctx: &TaskContext) -> Result<(), TaskError> {
        if let Some(enabled) = &task.enabled {
            if !enabled(ctx) {
                return Ok(());
            }
        }
        self.publish(ProgressEvent::message(task.title.clone()));
        if let Some(skip) = &task.skip {
            if let Some(reason) = skip(ctx) {
                self.publish(ProgressEvent::message(reason));
                return Ok(());
            }
        }
        let Some(work) = task.work else {
            return Ok(());
        };
        match work(ctx.clone()).await {
            Ok(TaskOutcome::Complete) => Ok(()),
            Ok(TaskOutcome::Nested(child)) => self.run_child(child, ctx).await,
            Err(err) => Err(err),
        }
    }

    async fn run_child(&self, child: TaskList, ctx: &TaskContext) -> Result<(), TaskError> {
        // Surface the child's progress on this list's stream. The forwarder
        // drains until the child's hub closes after its terminal event.
        let mut child_rx = child.progress();
        let forward_to = self.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = child_rx.recv().await {
                if matches!(event, ProgressEvent::Progress { .. }) {
                    forward_to.publish(event);
                }
            }
        });

        let result = if child.has_started() {
            child.join_running(self.inner.cancel.clone()).await
        } else {
            child.clone().execute(Some(ctx.clone())).await
        };
        let _ = forwarder.await;
        result
    }

    /// Awaits a list some other engine is already driving, aborting it if
    /// this list is aborted first.
    async fn join_running(&self, parent_cancel: CancellationToken) -> Result<(), TaskError> {
        tokio::select! {
            result = self.wait() => result,
            _ = parent_cancel.cancelled() => {
                self.abort();
                self.wait().await
            }
        }
    }

    fn publish(&self, event: ProgressEvent) {
        self.inner.progress.lock().unwrap().publish(event);
    }

    fn finish(&self, status: TaskStatus, event: ProgressEvent) {
        self.publish(event);
        self.inner.status_tx.send_replace(status);
    }
}
