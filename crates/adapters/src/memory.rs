//! In-memory resource adapter.
//!
//! The in-process driver used by the application tests and by embedders
//! that want resource bookkeeping without external processes. The resource
//! "runs" only as a state flag; storage is a real directory with a small
//! manifest so rehydration exercises the same path as heavyweight adapters.
//!
//! Create options understood by the master adapter (all optional):
//! `dependencies`/`dependents` seed the dependency edges of the new
//! resource; `failCreate`, `failCreateLate`, `failStart`, `failStop`,
//! `failDelete` and `hangStart` inject failures for lifecycle tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use berth_core::{
    simple_name, AdapterSpec, DescribeTable, MasterResourceAdapter, Resource, ResourceAdapter,
    ResourceDependency, ResourceOptions, ResourceState, Task, TaskError, TaskList, TaskOutcome,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::watch;
use tracing::debug;

use crate::fs::write_atomic;

/// Failure-injection flags carried by the adapter for its lifetime. They are
/// persisted in the manifest so a rehydrated adapter behaves the same.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryBehavior {
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_delete: bool,
    pub hang_start: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct MemoryCreateOptions {
    dependencies: Vec<ResourceDependency>,
    dependents: Vec<ResourceDependency>,
    fail_create: bool,
    /// Fail after the adapter has reached the task context, exercising the
    /// partial-adapter compensation path.
    fail_create_late: bool,
    /// Park after the adapter has reached the task context until the list
    /// is aborted, for abort-mid-create tests.
    hang_create: bool,
    #[serde(flatten)]
    behavior: MemoryBehavior,
}

fn parse_create_options(options: &ResourceOptions) -> MemoryCreateOptions {
    serde_json::from_value(options.clone()).unwrap_or_default()
}

const MANIFEST_FILE: &str = "adapter.json";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdapterManifest {
    name: String,
    behavior: MemoryBehavior,
}

struct AdapterInner {
    name: String,
    data_path: PathBuf,
    behavior: MemoryBehavior,
    tx: Mutex<Option<watch::Sender<Option<Resource>>>>,
    rx: watch::Receiver<Option<Resource>>,
}

impl AdapterInner {
    fn set_state(&self, state: ResourceState) {
        if let Some(tx) = &*self.tx.lock().unwrap() {
            tx.send_modify(|snapshot| {
                if let Some(resource) = snapshot {
                    resource.state = state;
                }
            });
        }
    }
}

pub struct MemoryResourceAdapter {
    inner: Arc<AdapterInner>,
}

impl MemoryResourceAdapter {
    fn new(
        plugin: &str,
        resource_type: &str,
        name: String,
        data_path: PathBuf,
        behavior: MemoryBehavior,
    ) -> Self {
        let resource = Resource {
            plugin: plugin.to_string(),
            resource_type: resource_type.to_string(),
            base_name: simple_name(&name).to_string(),
            name: name.clone(),
            state: ResourceState::Stopped,
            ports: Vec::new(),
            labels: Default::default(),
        };
        let (tx, rx) = watch::channel(Some(resource));
        Self {
            inner: Arc::new(AdapterInner {
                name,
                data_path,
                behavior,
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

#[async_trait]
impl ResourceAdapter for MemoryResourceAdapter {
    fn start(&self, _options: &ResourceOptions) -> TaskList {
        let inner = Arc::clone(&self.inner);
        let title = format!("Launch {}", simple_name(&self.inner.name));
        TaskList::builder()
            .task(Task::new(title).run(move |ctx| async move {
                if inner.behavior.hang_start {
                    ctx.cancelled().await;
                    return Err(TaskError::Aborted);
                }
                if inner.behavior.fail_start {
                    return Err(TaskError::failed(
                        "memory_start",
                        format!("{} refused to start", inner.name),
                    ));
                }
                inner.set_state(ResourceState::Started);
                Ok(TaskOutcome::Complete)
            }))
            .build()
    }

    fn stop(&self, _options: &ResourceOptions) -> TaskList {
        let inner = Arc::clone(&self.inner);
        let title = format!("Halt {}", simple_name(&self.inner.name));
        TaskList::builder()
            .task(Task::new(title).run(move |_ctx| async move {
                if inner.behavior.fail_stop {
                    return Err(TaskError::failed(
                        "memory_stop",
                        format!("{} refused to stop", inner.name),
                    ));
                }
                inner.set_state(ResourceState::Stopped);
                Ok(TaskOutcome::Complete)
            }))
            .build()
    }

    fn delete(&self, _options: &ResourceOptions) -> TaskList {
        let inner = Arc::clone(&self.inner);
        let title = format!("Remove {} storage", simple_name(&self.inner.name));
        TaskList::builder()
            .task(Task::new(title).run(move |_ctx| async move {
                if inner.behavior.fail_delete {
                    return Err(TaskError::failed(
                        "memory_delete",
                        format!("{} refused to delete", inner.name),
                    ));
                }
                crate::fs::remove_dir_if_exists(&inner.data_path).await?;
                Ok(TaskOutcome::Complete)
            }))
            .build()
    }

    async fn destroy(&self) -> Result<(), TaskError> {
        // Dropping the sender terminates the snapshot stream.
        let taken = self.inner.tx.lock().unwrap().take();
        if taken.is_some() {
            debug!(name = %self.inner.name, "memory adapter destroyed");
        }
        Ok(())
    }

    fn resource_watch(&self) -> watch::Receiver<Option<Resource>> {
        self.inner.rx.clone()
    }

    fn describe(&self) -> DescribeTable {
        let state = match self.inner.rx.borrow().as_ref().map(|r| r.state) {
            Some(ResourceState::Started) => "started",
            Some(ResourceState::Stopped) => "stopped",
            None => "destroyed",
        };
        DescribeTable::new()
            .push("Name", self.inner.name.clone())
            .push("State", state)
            .push("Data Path", self.inner.data_path.display().to_string())
    }
}

/// Factory for [`MemoryResourceAdapter`]s of one resource type.
pub struct MemoryMasterResourceAdapter {
    plugin: String,
    resource_type: String,
}

impl MemoryMasterResourceAdapter {
    pub fn new(plugin: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            resource_type: resource_type.into(),
        }
    }
}

#[async_trait]
impl MasterResourceAdapter for MemoryMasterResourceAdapter {
    fn create_resource_adapter(&self, spec: &AdapterSpec, options: &ResourceOptions) -> TaskList {
        let opts = parse_create_options(options);
        let behavior = opts.behavior.clone();
        let fail_create_late = opts.fail_create_late;
        let hang_create = opts.hang_create;
        let plugin = self.plugin.clone();
        let resource_type = self.resource_type.clone();
        let init_spec = spec.clone();
        let manifest_spec = spec.clone();
        let manifest_behavior = behavior.clone();

        TaskList::builder()
            .task(
                Task::new(format!(
                    "Initialize storage for {}",
                    simple_name(&spec.name)
                ))
                .run(move |ctx| async move {
                    if opts.fail_create {
                        return Err(TaskError::failed(
                            "memory_create",
                            format!("{} refused to create", init_spec.name),
                        ));
                    }
                    fs::create_dir_all(&init_spec.data_path).await?;
                    let adapter = Arc::new(MemoryResourceAdapter::new(
                        &plugin,
                        &resource_type,
                        init_spec.name.clone(),
                        init_spec.data_path.clone(),
                        behavior,
                    ));
                    ctx.set_resource_adapter(adapter);
                    ctx.set_dependencies(opts.dependencies.clone());
                    ctx.set_dependents(opts.dependents.clone());
                    Ok(TaskOutcome::Complete)
                }),
            )
            .task(
                Task::new(format!("Register {}", simple_name(&spec.name))).run(
                    move |ctx| async move {
                        if hang_create {
                            ctx.cancelled().await;
                            return Err(TaskError::Aborted);
                        }
                        if fail_create_late {
                            return Err(TaskError::failed(
                                "memory_create",
                                format!("{} failed after partial construction", manifest_spec.name),
                            ));
                        }
                        let manifest = AdapterManifest {
                            name: manifest_spec.name.clone(),
                            behavior: manifest_behavior,
                        };
                        let bytes = serde_json::to_vec(&manifest)?;
                        write_atomic(&manifest_spec.data_path.join(MANIFEST_FILE), &bytes).await?;
                        Ok(TaskOutcome::Complete)
                    },
                ),
            )
            .build()
    }

    async fn init_resource_adapter(
        &self,
        spec: &AdapterSpec,
    ) -> Result<Arc<dyn ResourceAdapter>, TaskError> {
        let bytes = fs::read(spec.data_path.join(MANIFEST_FILE)).await?;
        let manifest: AdapterManifest = serde_json::from_slice(&bytes)?;
        Ok(Arc::new(MemoryResourceAdapter::new(
            &self.plugin,
            &self.resource_type,
            spec.name.clone(),
            spec.data_path.clone(),
            manifest.behavior,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dir: &std::path::Path, name: &str) -> AdapterSpec {
        AdapterSpec {
            name: name.to_string(),
            data_path: dir.join("resources").join(name),
        }
    }

    #[tokio::test]
    async fn create_then_rehydrate() {
        let dir = tempfile::tempdir().unwrap();
        let master = MemoryMasterResourceAdapter::new("p", "node");
        let spec = spec(dir.path(), "alice");

        let captured: Arc<Mutex<Option<Arc<dyn ResourceAdapter>>>> = Default::default();
        let capture = Arc::clone(&captured);
        let create = master.create_resource_adapter(&spec, &serde_json::json!({}));
        let outer = TaskList::builder()
            .task(Task::new("create").run(move |_ctx| async move { Ok(TaskOutcome::Nested(create)) }))
            .task(Task::new("capture").run(move |ctx| async move {
                *capture.lock().unwrap() = ctx.resource_adapter();
                Ok(TaskOutcome::Complete)
            }))
            .build();
        outer.spawn();
        outer.wait().await.unwrap();

        let adapter = captured.lock().unwrap().take().expect("adapter in context");
        let snapshot = adapter.resource_watch().borrow().clone().unwrap();
        assert_eq!(snapshot.name, "alice");
        assert_eq!(snapshot.state, ResourceState::Stopped);

        let rehydrated = master.init_resource_adapter(&spec).await.unwrap();
        let snapshot = rehydrated.resource_watch().borrow().clone().unwrap();
        assert_eq!(snapshot.name, "alice");
    }

    #[tokio::test]
    async fn start_and_stop_flip_the_snapshot() {
        let adapter = MemoryResourceAdapter::new(
            "p",
            "node",
            "alice".to_string(),
            std::env::temp_dir().join("berth-memory-test-alice"),
            MemoryBehavior::default(),
        );
        let start = adapter.start(&serde_json::json!({}));
        start.spawn();
        start.wait().await.unwrap();
        assert_eq!(
            adapter.resource_watch().borrow().as_ref().unwrap().state,
            ResourceState::Started
        );

        let stop = adapter.stop(&serde_json::json!({}));
        stop.spawn();
        stop.wait().await.unwrap();
        assert_eq!(
            adapter.resource_watch().borrow().as_ref().unwrap().state,
            ResourceState::Stopped
        );
    }

    #[tokio::test]
    async fn fail_start_surfaces_through_the_list() {
        let adapter = MemoryResourceAdapter::new(
            "p",
            "node",
            "alice".to_string(),
            std::env::temp_dir().join("berth-memory-test-fail"),
            MemoryBehavior {
                fail_start: true,
                ..Default::default()
            },
        );
        let start = adapter.start(&serde_json::json!({}));
        start.spawn();
        let err = start.wait().await.unwrap_err();
        assert_eq!(err.code(), "memory_start");
    }

    #[tokio::test]
    async fn destroy_terminates_the_snapshot_stream() {
        let adapter = MemoryResourceAdapter::new(
            "p",
            "node",
            "alice".to_string(),
            std::env::temp_dir().join("berth-memory-test-destroy"),
            MemoryBehavior::default(),
        );
        let mut rx = adapter.resource_watch();
        adapter.destroy().await.unwrap();
        adapter.destroy().await.unwrap();
        assert!(rx.changed().await.is_err());
    }

    #[tokio::test]
    async fn missing_manifest_fails_rehydration() {
        let dir = tempfile::tempdir().unwrap();
        let master = MemoryMasterResourceAdapter::new("p", "node");
        let err = match master.init_resource_adapter(&spec(dir.path(), "ghost")).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert_eq!(err.code(), "io");
    }
}
