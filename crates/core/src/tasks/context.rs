//! Shared per-list state bag.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::ports::ResourceAdapter;
use crate::resource::ResourceDependency;

/// The typed context shared by the tasks of one list (and inherited by
/// nested lists that do not request a fresh context). The three fields are
/// the ones operation pipelines communicate through: the adapter produced by
/// a create, and the dependency edges it declared.
#[derive(Default)]
struct TaskContextData {
    resource_adapter: Option<Arc<dyn ResourceAdapter>>,
    dependencies: Option<Vec<ResourceDependency>>,
    dependents: Option<Vec<ResourceDependency>>,
}

/// Cloneable handle to a list's shared context plus its cancellation signal.
///
/// Task bodies must treat the token as cooperative: check
/// [`is_cancelled`](Self::is_cancelled) (or await
/// [`cancelled`](Self::cancelled)) at every natural suspension point.
#[derive(Clone)]
pub struct TaskContext {
    data: Arc<Mutex<TaskContextData>>,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self {
            data: Arc::new(Mutex::new(TaskContextData::default())),
            cancel,
        }
    }

    /// Same data, different cancellation scope. Used when a nested list
    /// inherits its parent's context.
    pub(crate) fn with_token(&self, cancel: CancellationToken) -> Self {
        Self {
            data: Arc::clone(&self.data),
            cancel,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the surrounding list is aborted.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn resource_adapter(&self) -> Option<Arc<dyn ResourceAdapter>> {
        self.data.lock().unwrap().resource_adapter.clone()
    }

    pub fn set_resource_adapter(&self, adapter: Arc<dyn ResourceAdapter>) {
        self.data.lock().unwrap().resource_adapter = Some(adapter);
    }

    pub fn dependencies(&self) -> Option<Vec<ResourceDependency>> {
        self.data.lock().unwrap().dependencies.clone()
    }

    pub fn set_dependencies(&self, dependencies: Vec<ResourceDependency>) {
        self.data.lock().unwrap().dependencies = Some(dependencies);
    }

    pub fn dependents(&self) -> Option<Vec<ResourceDependency>> {
        self.data.lock().unwrap().dependents.clone()
    }

    pub fn set_dependents(&self, dependents: Vec<ResourceDependency>) {
        self.data.lock().unwrap().dependents = Some(dependents);
    }
}
