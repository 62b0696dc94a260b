//! Per-instance resource drivers and their per-type factories.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::describe::DescribeTable;
use crate::error::TaskError;
use crate::resource::{Resource, ResourceOptions};
use crate::tasks::TaskList;

/// Identity and storage location handed to an adapter at creation or
/// rehydration time. `data_path` is the adapter's private directory; the
/// manager never looks inside it.
#[derive(Debug, Clone)]
pub struct AdapterSpec {
    pub name: String,
    pub data_path: PathBuf,
}

/// Driver for one resource instance. Each adapter is owned by exactly one
/// manager.
///
/// Contract for partially-constructed adapters: an adapter that reaches the
/// task context during a failed create is still installed so it can be
/// cleaned up, so `destroy` and `delete` must tolerate being called on an
/// adapter whose construction never finished and whose `start` never ran.
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Starts the resource. Failures surface through the returned list,
    /// which the manager nests into its own pipeline.
    fn start(&self, options: &ResourceOptions) -> TaskList;

    /// Stops the resource.
    fn stop(&self, options: &ResourceOptions) -> TaskList;

    /// Destructive cleanup of the underlying storage.
    fn delete(&self, options: &ResourceOptions) -> TaskList;

    /// Tears down in-memory state only (subscriptions, mirrored child
    /// processes). Idempotent.
    async fn destroy(&self) -> Result<(), TaskError>;

    /// Live snapshot stream. Holds `None` until the first snapshot is
    /// available; the sender side closes on `destroy`.
    fn resource_watch(&self) -> watch::Receiver<Option<Resource>>;

    /// Human-oriented introspection.
    fn describe(&self) -> DescribeTable;
}

/// Per-type factory creating and rehydrating [`ResourceAdapter`]s.
#[async_trait]
pub trait MasterResourceAdapter: Send + Sync {
    /// Builds the creation pipeline for a new resource. The list's final
    /// context must carry the adapter plus any dependency edges the create
    /// declared (`resource_adapter`, `dependencies`, `dependents`).
    fn create_resource_adapter(&self, spec: &AdapterSpec, options: &ResourceOptions) -> TaskList;

    /// Rehydrates the adapter for an existing resource at manager init.
    async fn init_resource_adapter(
        &self,
        spec: &AdapterSpec,
    ) -> Result<Arc<dyn ResourceAdapter>, TaskError>;
}
