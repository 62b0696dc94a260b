//! Lifecycle manager for one `(plugin, resourceType)` pair.
//!
//! Every user operation (create, delete, start, stop) is built as a task
//! list. The manager serializes operations per resource name (one in-flight
//! create-or-delete and one start-or-stop per name, with re-entrant calls
//! receiving the same list handle), cascades through the dependency graph via
//! sibling managers, and compensates on failure: a failed create schedules a
//! best-effort delete, a failed start schedules a best-effort stop.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use berth_adapters::fs::escape_name;
use berth_adapters::{DependencyStore, ReadyRegistry};
use berth_core::{
    simple_name, unique_deps, AdapterSpec, DescribeTable, InitError, MasterResourceAdapter,
    PortAllocator, PortScope, Resource, ResourceAdapter, ResourceDependency, ResourceError,
    ResourceOptions, ResourceTypeDescriptor, Task, TaskError, TaskList, TaskOutcome,
};
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::events::{OperationKind, OperationLog};
use crate::projection;
use crate::registry::ManagerRegistry;

/// Input handed to every registered create hook.
#[derive(Debug, Clone)]
pub struct CreateHookInput {
    pub name: String,
    pub options: ResourceOptions,
}

/// Extension point run concurrently at the end of a successful create.
pub type CreateHook = Arc<dyn Fn(&CreateHookInput) -> TaskList + Send + Sync>;

pub struct ManagerOptions {
    pub data_path: PathBuf,
    pub master: Arc<dyn MasterResourceAdapter>,
    pub port_allocator: Arc<dyn PortAllocator>,
    pub registry: Arc<ManagerRegistry>,
    pub descriptor: ResourceTypeDescriptor,
}

#[derive(Default)]
struct ManagerState {
    adapters: HashMap<String, Arc<dyn ResourceAdapter>>,
    started: HashMap<String, bool>,
    /// Children this resource created during its own create. Persisted.
    direct_dependents: HashMap<String, Vec<ResourceDependency>>,
    /// Inverse edges contributed by siblings at their create time. Rebuilt
    /// at init, mutated in memory thereafter.
    resource_dependents: HashMap<String, Vec<ResourceDependency>>,
    /// This resource's own dependency list, mirroring its persisted file.
    dependencies: HashMap<String, Vec<ResourceDependency>>,
    create_tasks: HashMap<String, TaskList>,
    delete_tasks: HashMap<String, TaskList>,
    start_tasks: HashMap<String, TaskList>,
    stop_tasks: HashMap<String, TaskList>,
}

pub struct ResourcesManager {
    descriptor: ResourceTypeDescriptor,
    data_path: PathBuf,
    resources_path: PathBuf,
    master: Arc<dyn MasterResourceAdapter>,
    port_allocator: Arc<dyn PortAllocator>,
    registry: Arc<ManagerRegistry>,
    ready: ReadyRegistry,
    dependencies_store: DependencyStore,
    dependents_store: DependencyStore,
    state: Mutex<ManagerState>,
    create_hooks: Mutex<Vec<CreateHook>>,
    update_tx: watch::Sender<u64>,
    resources_rx: watch::Receiver<Vec<Resource>>,
    log: OperationLog,
}

impl ResourcesManager {
    pub fn new(options: ManagerOptions) -> Arc<Self> {
        let ManagerOptions {
            data_path,
            master,
            port_allocator,
            registry,
            descriptor,
        } = options;
        let (update_tx, update_rx) = watch::channel(0u64);
        let (resources_tx, resources_rx) = watch::channel(Vec::new());
        let manager = Arc::new(Self {
            resources_path: data_path.join("resources"),
            ready: ReadyRegistry::new(data_path.join("ready")),
            dependencies_store: DependencyStore::new(data_path.join("dependencies")),
            dependents_store: DependencyStore::new(data_path.join("dependents")),
            data_path,
            master,
            port_allocator,
            registry: Arc::clone(&registry),
            descriptor,
            state: Mutex::new(ManagerState::default()),
            create_hooks: Mutex::new(Vec::new()),
            update_tx,
            resources_rx,
            log: OperationLog::new(1_000),
        });
        registry.register(&manager);
        projection::spawn(Arc::downgrade(&manager), update_rx, resources_tx);
        manager
    }

    pub fn plugin(&self) -> &str {
        &self.descriptor.plugin
    }

    pub fn resource_type(&self) -> &str {
        &self.descriptor.name
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn supports_start(&self) -> bool {
        self.descriptor.crud.start.is_some()
    }

    pub fn supports_stop(&self) -> bool {
        self.descriptor.crud.stop.is_some()
    }

    // ---- init ----------------------------------------------------------

    /// Full single-manager init: rehydrate adapters, then publish inverse
    /// edges. Multi-manager setups go through `PluginManager::init_all`,
    /// which runs the two phases across all managers instead.
    pub async fn init(self: &Arc<Self>) -> Result<Vec<InitError>, TaskError> {
        let errors = self.init_adapters().await?;
        self.publish_dependents()?;
        self.touch();
        Ok(errors)
    }

    /// Phase one: scan the ready registry and rehydrate every resource.
    /// A duplicate name fails the whole init; per-resource failures are
    /// collected as `InitError`s and the resource is left broken (marker
    /// kept, no adapter).
    pub async fn init_adapters(self: &Arc<Self>) -> Result<Vec<InitError>, TaskError> {
        tokio::fs::create_dir_all(&self.resources_path)
            .await
            .map_err(TaskError::from)?;
        self.ready.ensure().await.map_err(TaskError::from)?;
        self.dependencies_store
            .ensure()
            .await
            .map_err(TaskError::from)?;
        self.dependents_store
            .ensure()
            .await
            .map_err(TaskError::from)?;

        let names = self.ready.get_all().await.map_err(TaskError::from)?;
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.clone()) {
                return Err(ResourceError::DuplicateResourceName { name: name.clone() }.into());
            }
        }

        let results = join_all(names.iter().map(|name| self.init_one(name))).await;
        let mut errors = Vec::new();
        let mut loaded = Vec::new();
        for result in results {
            match result {
                Ok(entry) => loaded.push(entry),
                Err(init_error) => {
                    warn!(
                        resource = %init_error.name,
                        error = %init_error.message,
                        "resource failed to initialize"
                    );
                    errors.push(init_error);
                }
            }
        }

        let mut state = self.state.lock().unwrap();
        state.started.clear();
        for (name, adapter, dependencies, dependents) in loaded {
            state.adapters.insert(name.clone(), adapter);
            state.dependencies.insert(name.clone(), dependencies);
            state.direct_dependents.insert(name, dependents);
        }
        drop(state);

        info!(
            plugin = %self.descriptor.plugin,
            resource_type = %self.descriptor.name,
            resources = names.len() - errors.len(),
            errors = errors.len(),
            "resources manager initialized"
        );
        Ok(errors)
    }

    async fn init_one(
        &self,
        name: &str,
    ) -> Result<
        (
            String,
            Arc<dyn ResourceAdapter>,
            Vec<ResourceDependency>,
            Vec<ResourceDependency>,
        ),
        InitError,
    > {
        let spec = AdapterSpec {
            name: name.to_string(),
            data_path: self.resource_data_path(name),
        };
        let load = async {
            let (adapter, dependencies, dependents) = tokio::try_join!(
                self.master.init_resource_adapter(&spec),
                async {
                    self.dependencies_store
                        .load(name)
                        .await
                        .map_err(TaskError::from)
                },
                async {
                    self.dependents_store
                        .load(name)
                        .await
                        .map_err(TaskError::from)
                },
            )?;
            Ok::<_, TaskError>((adapter, dependencies, dependents))
        };
        match load.await {
            Ok((adapter, dependencies, dependents)) => {
                Ok((name.to_string(), adapter, dependencies, dependents))
            }
            Err(err) => Err(InitError {
                plugin: self.descriptor.plugin.clone(),
                resource_type: self.descriptor.name.clone(),
                name: name.to_string(),
                message: err.to_string(),
            }),
        }
    }

    /// Phase two: push this manager's persisted dependency edges into the
    /// owning managers' `resource_dependents`.
    pub fn publish_dependents(&self) -> Result<(), TaskError> {
        let entries: Vec<(String, Vec<ResourceDependency>)> = {
            let state = self.state.lock().unwrap();
            state
                .dependencies
                .iter()
                .map(|(name, deps)| (name.clone(), deps.clone()))
                .collect()
        };
        for (name, dependencies) in entries {
            self.add_dependents_for(&name, &dependencies)?;
        }
        Ok(())
    }

    // ---- create --------------------------------------------------------

    pub fn create(self: &Arc<Self>, name: &str, options: ResourceOptions) -> TaskList {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.create_tasks.get(name) {
            debug!(resource = %name, "create already in flight; returning existing handle");
            return existing.clone();
        }

        let type_name = self.descriptor.name.clone();
        let crud = self.descriptor.crud.clone();
        let simple = simple_name(name).to_string();
        let name = name.to_string();

        let create_title = format!("{} {} {}", crud.create.names.capital, type_name, simple);
        let adapter_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            let type_name = type_name.clone();
            let simple = simple.clone();
            Task::new(create_title)
                .skip({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| {
                        this.adapter(&name)
                            .map(|_| format!("{type_name} {simple} already exists"))
                    }
                })
                .run(move |_ctx| async move {
                    let spec = AdapterSpec {
                        name: name.clone(),
                        data_path: this.resource_data_path(&name),
                    };
                    Ok(TaskOutcome::Nested(
                        this.master.create_resource_adapter(&spec, &options),
                    ))
                })
        };

        let finalize_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            Task::new(format!("Save {type_name} {simple}"))
                .enabled(|ctx| ctx.resource_adapter().is_some())
                .run(move |ctx| async move {
                    let adapter = ctx.resource_adapter().ok_or_else(|| {
                        TaskError::failed("create_finalize", "adapter missing from context")
                    })?;
                    let dependencies = ctx.dependencies().unwrap_or_default();
                    let dependents = ctx.dependents().unwrap_or_default();

                    this.install_adapter(&name, Arc::clone(&adapter), &dependencies, &dependents);
                    this.add_dependents_for(&name, &dependencies)?;
                    this.touch();

                    tokio::select! {
                        result = wait_first_snapshot(&adapter) => result?,
                        _ = ctx.cancelled() => return Err(TaskError::Aborted),
                    }

                    this.ready.write(&name).await.map_err(TaskError::from)?;
                    this.dependencies_store
                        .save(&name, &dependencies)
                        .await
                        .map_err(TaskError::from)?;
                    this.dependents_store
                        .save(&name, &dependents)
                        .await
                        .map_err(TaskError::from)?;
                    Ok(TaskOutcome::Complete)
                })
        };

        let start_on_create = crud.create.start_on_create
            && self.supports_start()
            && self.supports_stop();
        let start_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            let start_capital = crud
                .start
                .as_ref()
                .map(|start| start.names.capital.clone())
                .unwrap_or_else(|| "Start".to_string());
            Task::new(format!("{start_capital} {type_name} {simple}"))
                .enabled(move |ctx| start_on_create && ctx.resource_adapter().is_some())
                .run(move |_ctx| async move {
                    let nested = this.start(&name, options.clone())?;
                    Ok(TaskOutcome::Nested(nested))
                })
        };

        let hooks_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            Task::new("Run create hooks")
                .enabled({
                    let this = Arc::clone(self);
                    move |ctx| {
                        ctx.resource_adapter().is_some()
                            && !this.create_hooks.lock().unwrap().is_empty()
                    }
                })
                .run(move |_ctx| async move {
                    let hooks: Vec<CreateHook> = this.create_hooks.lock().unwrap().clone();
                    let input = CreateHookInput {
                        name: name.clone(),
                        options: options.clone(),
                    };
                    let nested = TaskList::builder()
                        .concurrent(true)
                        .tasks(hooks.into_iter().enumerate().map(|(index, hook)| {
                            let input = input.clone();
                            Task::new(format!("Create hook {}", index + 1)).run(
                                move |_ctx| async move { Ok(TaskOutcome::Nested(hook(&input))) },
                            )
                        }))
                        .build();
                    Ok(TaskOutcome::Nested(nested))
                })
        };

        // Distinguishes a real error from an abort in on_done: the
        // compensation delete runs only for real errors, while the partial
        // adapter is installed in both cases so a later delete can clean up.
        let errored = Arc::new(AtomicBool::new(false));

        let list = TaskList::builder()
            .fresh_context(true)
            .task(adapter_task)
            .task(finalize_task)
            .task(start_task)
            .task(hooks_task)
            .on_error({
                let errored = Arc::clone(&errored);
                let name = name.clone();
                move |err, _ctx| {
                    error!(resource = %name, error = %err, "create failed");
                    errored.store(true, Ordering::SeqCst);
                }
            })
            .on_done({
                let this = Arc::clone(self);
                let name = name.clone();
                let options = options.clone();
                move |failed, ctx| {
                    if failed {
                        // Install whatever fragment reached the context so a
                        // later delete can clean it up.
                        if let Some(adapter) = ctx.resource_adapter() {
                            this.install_adapter(
                                &name,
                                adapter,
                                &ctx.dependencies().unwrap_or_default(),
                                &ctx.dependents().unwrap_or_default(),
                            );
                        }
                        if errored.load(Ordering::SeqCst) {
                            warn!(resource = %name, "scheduling cleanup delete after failed create");
                            let this_cleanup = Arc::clone(&this);
                            let name_cleanup = name.clone();
                            let options_cleanup = options.clone();
                            tokio::spawn(async move {
                                let cleanup = this_cleanup.delete(&name_cleanup, options_cleanup);
                                if let Err(err) = cleanup.wait().await {
                                    warn!(
                                        resource = %name_cleanup,
                                        error = %err,
                                        "cleanup delete failed"
                                    );
                                }
                            });
                        }
                    }
                    this.clear_slot(SlotKind::Create, &name);
                    this.log.record(OperationKind::Create, &name, failed);
                    this.touch();
                }
            })
            .build();

        state.create_tasks.insert(name.clone(), list.clone());
        drop(state);
        info!(resource = %name, resource_type = %self.descriptor.name, "create requested");
        list.spawn();
        list
    }

    // ---- delete --------------------------------------------------------

    pub fn delete(self: &Arc<Self>, name: &str, options: ResourceOptions) -> TaskList {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.delete_tasks.get(name) {
            debug!(resource = %name, "delete already in flight; returning existing handle");
            return existing.clone();
        }

        let type_name = self.descriptor.name.clone();
        let crud = self.descriptor.crud.clone();
        let simple = simple_name(name).to_string();
        let name = name.to_string();

        let abort_create_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            Task::new("Abort pending create")
                .enabled({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| this.slot(SlotKind::Create, &name).is_some()
                })
                .run(move |_ctx| async move {
                    if let Some(create) = this.slot(SlotKind::Create, &name) {
                        create.abort();
                        let _ = create.wait().await;
                    }
                    Ok(TaskOutcome::Complete)
                })
        };

        let stop_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            let stop_capital = crud
                .stop
                .as_ref()
                .map(|stop| stop.names.capital.clone())
                .unwrap_or_else(|| "Stop".to_string());
            Task::new(format!("{stop_capital} {type_name} {simple}"))
                .enabled({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| {
                        this.supports_start()
                            && (this.slot(SlotKind::Start, &name).is_some()
                                || this.is_started(&name))
                    }
                })
                .run(move |_ctx| async move {
                    if let Some(start) = this.slot(SlotKind::Start, &name) {
                        start.abort();
                        let _ = start.wait().await;
                    }
                    if this.supports_stop() && this.is_started(&name) {
                        let nested = this.stop(&name, options.clone())?;
                        return Ok(TaskOutcome::Nested(nested));
                    }
                    Ok(TaskOutcome::Complete)
                })
        };

        let dependents_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            Task::new("Delete dependent resources")
                .enabled({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| !this.all_dependents_of(&name).is_empty()
                })
                .run(move |_ctx| async move {
                    let dependents = this.all_dependents_of(&name);
                    let nested = TaskList::builder()
                        .concurrent(true)
                        .tasks(dependents.into_iter().map(|dep| {
                            let this = Arc::clone(&this);
                            let options = options.clone();
                            let title = format!(
                                "Delete {} {}",
                                dep.resource_type,
                                simple_name(&dep.name)
                            );
                            Task::new(title).run(move |_ctx| async move {
                                let manager = this
                                    .registry
                                    .get(&dep.plugin, &dep.resource_type)
                                    .map_err(TaskError::from)?;
                                Ok(TaskOutcome::Nested(manager.delete(&dep.name, options)))
                            })
                        }))
                        .build();
                    Ok(TaskOutcome::Nested(nested))
                })
        };

        let adapter_delete_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            let type_name = type_name.clone();
            let simple = simple.clone();
            Task::new(format!(
                "{} {} {}",
                crud.delete.names.capital, type_name, simple
            ))
            .skip({
                let this = Arc::clone(self);
                let name = name.clone();
                move |_ctx| match this.adapter(&name) {
                    Some(_) => None,
                    None => Some(format!("{type_name} {simple} does not exist")),
                }
            })
            .run(move |ctx| async move {
                let Some(adapter) = this.adapter(&name) else {
                    return Ok(TaskOutcome::Complete);
                };
                ctx.set_resource_adapter(Arc::clone(&adapter));
                Ok(TaskOutcome::Nested(adapter.delete(&options)))
            })
        };

        let cleanup_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            Task::new(format!("Clean up {simple}"))
                .enabled(|ctx| ctx.resource_adapter().is_some())
                .run(move |_ctx| async move {
                    this.destroy_adapter(&name).await;
                    this.port_allocator
                        .release(&PortScope {
                            plugin: this.descriptor.plugin.clone(),
                            resource_type: this.descriptor.name.clone(),
                            resource: name.clone(),
                            name: None,
                        })
                        .await;
                    this.ready.delete(&name).await.map_err(TaskError::from)?;
                    this.dependencies_store
                        .delete(&name)
                        .await
                        .map_err(TaskError::from)?;
                    this.dependents_store
                        .delete(&name)
                        .await
                        .map_err(TaskError::from)?;
                    this.forget(&name);
                    Ok(TaskOutcome::Complete)
                })
        };

        let list = TaskList::builder()
            .fresh_context(true)
            .task(abort_create_task)
            .task(stop_task)
            .task(dependents_task)
            .task(adapter_delete_task)
            .task(cleanup_task)
            .on_done({
                let this = Arc::clone(self);
                let name = name.clone();
                move |failed, _ctx| {
                    this.clear_slot(SlotKind::Delete, &name);
                    this.log.record(OperationKind::Delete, &name, failed);
                    this.touch();
                }
            })
            .build();

        state.delete_tasks.insert(name.clone(), list.clone());
        drop(state);
        info!(resource = %name, resource_type = %self.descriptor.name, "delete requested");
        list.spawn();
        list
    }

    // ---- start ---------------------------------------------------------

    pub fn start(
        self: &Arc<Self>,
        name: &str,
        options: ResourceOptions,
    ) -> Result<TaskList, ResourceError> {
        let start_crud = self
            .descriptor
            .crud
            .start
            .as_ref()
            .ok_or_else(|| self.no_start())?
            .clone();
        if !self.supports_stop() {
            return Err(self.no_stop());
        }

        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.start_tasks.get(name) {
            debug!(resource = %name, "start already in flight; returning existing handle");
            return Ok(existing.clone());
        }

        let type_name = self.descriptor.name.clone();
        let simple = simple_name(name).to_string();
        let name = name.to_string();

        let abort_stop_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            Task::new("Abort pending stop")
                .enabled({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| this.slot(SlotKind::Stop, &name).is_some()
                })
                .run(move |_ctx| async move {
                    if let Some(stop) = this.slot(SlotKind::Stop, &name) {
                        stop.abort();
                        let _ = stop.wait().await;
                    }
                    Ok(TaskOutcome::Complete)
                })
        };

        // Created children come up before the resource itself, in the
        // persisted order.
        let children_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            Task::new("Start dependencies")
                .enabled({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| !this.startable_children(&name).is_empty()
                })
                .run(move |_ctx| async move {
                    let children = this.startable_children(&name);
                    let nested = TaskList::builder()
                        .tasks(children.into_iter().map(|dep| {
                            let this = Arc::clone(&this);
                            let options = options.clone();
                            let title = format!(
                                "Start {} {}",
                                dep.resource_type,
                                simple_name(&dep.name)
                            );
                            Task::new(title).run(move |_ctx| async move {
                                let manager = this
                                    .registry
                                    .get(&dep.plugin, &dep.resource_type)
                                    .map_err(TaskError::from)?;
                                let nested = manager.start(&dep.name, options)?;
                                Ok(TaskOutcome::Nested(nested))
                            })
                        }))
                        .build();
                    Ok(TaskOutcome::Nested(nested))
                })
        };

        let adapter_start_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            let type_name = type_name.clone();
            let simple = simple.clone();
            let started_ed = start_crud.names.ed.clone();
            Task::new(format!(
                "{} {} {}",
                start_crud.names.capital, type_name, simple
            ))
            .skip({
                let this = Arc::clone(self);
                let name = name.clone();
                move |_ctx| {
                    if this.adapter(&name).is_none() {
                        Some(format!(
                            "{type_name} {simple} does not exist; create it first"
                        ))
                    } else if this.is_started(&name) {
                        Some(format!("{type_name} {simple} already {started_ed}"))
                    } else {
                        None
                    }
                }
            })
            .run(move |_ctx| async move {
                let Some(adapter) = this.adapter(&name) else {
                    return Ok(TaskOutcome::Complete);
                };
                Ok(TaskOutcome::Nested(adapter.start(&options)))
            })
        };

        let list = TaskList::builder()
            .fresh_context(true)
            .task(abort_stop_task)
            .task(children_task)
            .task(adapter_start_task)
            .on_done({
                let this = Arc::clone(self);
                let name = name.clone();
                let options = options.clone();
                move |failed, _ctx| {
                    if failed {
                        warn!(resource = %name, "start failed; rolling back with stop");
                        let this_rollback = Arc::clone(&this);
                        let name_rollback = name.clone();
                        tokio::spawn(async move {
                            match this_rollback.stop(&name_rollback, options) {
                                Ok(rollback) => {
                                    if let Err(err) = rollback.wait().await {
                                        warn!(
                                            resource = %name_rollback,
                                            error = %err,
                                            "rollback stop failed"
                                        );
                                    }
                                }
                                Err(err) => {
                                    warn!(resource = %name_rollback, error = %err, "rollback stop unavailable");
                                }
                            }
                        });
                    } else {
                        this.mark_started(&name);
                    }
                    this.clear_slot(SlotKind::Start, &name);
                    this.log.record(OperationKind::Start, &name, failed);
                    this.touch();
                }
            })
            .build();

        state.start_tasks.insert(name.clone(), list.clone());
        drop(state);
        info!(resource = %name, resource_type = %self.descriptor.name, "start requested");
        list.spawn();
        Ok(list)
    }

    // ---- stop ----------------------------------------------------------

    pub fn stop(
        self: &Arc<Self>,
        name: &str,
        options: ResourceOptions,
    ) -> Result<TaskList, ResourceError> {
        let stop_crud = self
            .descriptor
            .crud
            .stop
            .as_ref()
            .ok_or_else(|| self.no_stop())?
            .clone();
        if !self.supports_start() {
            return Err(self.no_start());
        }

        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.stop_tasks.get(name) {
            debug!(resource = %name, "stop already in flight; returning existing handle");
            return Ok(existing.clone());
        }

        let type_name = self.descriptor.name.clone();
        let simple = simple_name(name).to_string();
        let name = name.to_string();

        let abort_start_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            Task::new("Abort pending start")
                .enabled({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| this.slot(SlotKind::Start, &name).is_some()
                })
                .run(move |_ctx| async move {
                    if let Some(start) = this.slot(SlotKind::Start, &name) {
                        start.abort();
                        let _ = start.wait().await;
                    }
                    Ok(TaskOutcome::Complete)
                })
        };

        // Dependents go down before the resource they depend on.
        let dependents_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            Task::new("Stop dependent resources")
                .enabled({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| !this.stoppable(this.resource_dependents_of(&name)).is_empty()
                })
                .run(move |_ctx| async move {
                    let dependents = this.stoppable(this.resource_dependents_of(&name));
                    Ok(TaskOutcome::Nested(this.stop_many(dependents, &options)))
                })
        };

        let adapter_stop_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            let type_name = type_name.clone();
            let simple = simple.clone();
            Task::new(format!(
                "{} {} {}",
                stop_crud.names.capital, type_name, simple
            ))
            .skip({
                let this = Arc::clone(self);
                let name = name.clone();
                move |_ctx| match this.adapter(&name) {
                    Some(_) => None,
                    None => Some(format!("{type_name} {simple} does not exist")),
                }
            })
            .run(move |_ctx| async move {
                let Some(adapter) = this.adapter(&name) else {
                    return Ok(TaskOutcome::Complete);
                };
                Ok(TaskOutcome::Nested(adapter.stop(&options)))
            })
        };

        let children_task = {
            let this = Arc::clone(self);
            let name = name.clone();
            let options = options.clone();
            Task::new("Stop created dependencies")
                .enabled({
                    let this = Arc::clone(self);
                    let name = name.clone();
                    move |_ctx| !this.stoppable(this.direct_dependents_of(&name)).is_empty()
                })
                .run(move |_ctx| async move {
                    let children = this.stoppable(this.direct_dependents_of(&name));
                    Ok(TaskOutcome::Nested(this.stop_many(children, &options)))
                })
        };

        let list = TaskList::builder()
            .fresh_context(true)
            .task(abort_start_task)
            .task(dependents_task)
            .task(adapter_stop_task)
            .task(children_task)
            .on_complete({
                let this = Arc::clone(self);
                let name = name.clone();
                move || {
                    this.clear_started(&name);
                }
            })
            .on_done({
                let this = Arc::clone(self);
                let name = name.clone();
                move |failed, _ctx| {
                    this.clear_slot(SlotKind::Stop, &name);
                    this.log.record(OperationKind::Stop, &name, failed);
                    this.touch();
                }
            })
            .build();

        state.stop_tasks.insert(name.clone(), list.clone());
        drop(state);
        info!(resource = %name, resource_type = %self.descriptor.name, "stop requested");
        list.spawn();
        Ok(list)
    }

    /// Concurrent fan-out of stop across sibling managers.
    fn stop_many(
        self: &Arc<Self>,
        deps: Vec<ResourceDependency>,
        options: &ResourceOptions,
    ) -> TaskList {
        TaskList::builder()
            .concurrent(true)
            .tasks(deps.into_iter().map(|dep| {
                let this = Arc::clone(self);
                let options = options.clone();
                let title = format!("Stop {} {}", dep.resource_type, simple_name(&dep.name));
                Task::new(title).run(move |_ctx| async move {
                    let manager = this
                        .registry
                        .get(&dep.plugin, &dep.resource_type)
                        .map_err(TaskError::from)?;
                    let nested = manager.stop(&dep.name, options)?;
                    Ok(TaskOutcome::Nested(nested))
                })
            }))
            .build()
    }

    // ---- dependency propagation ---------------------------------------

    /// Records `dep` as a resource for which `name` is a dependency. No
    /// dedup at append time; consumers dedup on read.
    pub fn add_dependent(&self, name: &str, dep: ResourceDependency) {
        let mut state = self.state.lock().unwrap();
        state
            .resource_dependents
            .entry(name.to_string())
            .or_default()
            .push(dep);
    }

    /// Registers the inverse edge of every dependency of `name` with the
    /// owning manager.
    fn add_dependents_for(
        &self,
        name: &str,
        dependencies: &[ResourceDependency],
    ) -> Result<(), TaskError> {
        for dep in dependencies {
            let manager = self
                .registry
                .get(&dep.plugin, &dep.resource_type)
                .map_err(TaskError::from)?;
            manager.add_dependent(
                &dep.name,
                ResourceDependency {
                    plugin: self.descriptor.plugin.clone(),
                    resource_type: self.descriptor.name.clone(),
                    name: name.to_string(),
                },
            );
        }
        Ok(())
    }

    // ---- observables ---------------------------------------------------

    /// Replay-last stream of every resource's current snapshot.
    pub fn resources_watch(&self) -> watch::Receiver<Vec<Resource>> {
        self.resources_rx.clone()
    }

    pub fn get_resources(&self, options: &ResourceOptions) -> Vec<Resource> {
        let all = self.resources_rx.borrow().clone();
        self.descriptor.filter_resources(all, options)
    }

    pub fn get_resource(&self, name: &str, options: &ResourceOptions) -> Option<Resource> {
        self.get_resources(options)
            .into_iter()
            .find(|resource| resource.name == name)
    }

    // ---- miscellaneous -------------------------------------------------

    pub fn add_create_hook(&self, hook: CreateHook) {
        self.create_hooks.lock().unwrap().push(hook);
    }

    pub fn get_resource_adapter(
        &self,
        name: &str,
    ) -> Result<Arc<dyn ResourceAdapter>, ResourceError> {
        self.adapter(name).ok_or_else(|| ResourceError::NotFound {
            name: name.to_string(),
        })
    }

    pub fn describe_all(&self) -> DescribeTable {
        let adapters: Vec<(String, Arc<dyn ResourceAdapter>)> = {
            let state = self.state.lock().unwrap();
            state
                .adapters
                .iter()
                .map(|(name, adapter)| (name.clone(), Arc::clone(adapter)))
                .collect()
        };
        let mut table = DescribeTable::new();
        for (name, adapter) in adapters {
            table = table.push_sub(name, adapter.describe());
        }
        table
    }

    pub fn simple_name<'a>(&self, name: &'a str) -> &'a str {
        simple_name(name)
    }

    pub fn recent_events(&self, limit: Option<usize>) -> Vec<crate::events::OperationEvent> {
        self.log.recent(limit)
    }

    pub fn stats(&self) -> crate::events::ManagerStats {
        self.log.stats()
    }

    /// In-memory teardown: abort in-flight operations, destroy every
    /// adapter (errors swallowed), clear all bookkeeping.
    pub async fn destroy(&self) {
        let (adapters, in_flight) = {
            let mut state = self.state.lock().unwrap();
            let adapters: Vec<_> = state.adapters.drain().collect();
            let mut in_flight: Vec<TaskList> = Vec::new();
            in_flight.extend(state.create_tasks.values().cloned());
            in_flight.extend(state.delete_tasks.values().cloned());
            in_flight.extend(state.start_tasks.values().cloned());
            in_flight.extend(state.stop_tasks.values().cloned());
            *state = ManagerState::default();
            (adapters, in_flight)
        };
        for list in in_flight {
            list.abort();
        }
        for (name, adapter) in adapters {
            if let Err(err) = adapter.destroy().await {
                warn!(resource = %name, error = %err, "adapter destroy failed");
            }
        }
        self.touch();
    }

    // ---- internal state helpers ---------------------------------------

    pub(crate) fn touch(&self) {
        self.update_tx.send_modify(|tick| *tick += 1);
    }

    pub(crate) fn snapshot_receivers(&self) -> Vec<watch::Receiver<Option<Resource>>> {
        let state = self.state.lock().unwrap();
        state
            .adapters
            .values()
            .map(|adapter| adapter.resource_watch())
            .collect()
    }

    fn resource_data_path(&self, name: &str) -> PathBuf {
        self.resources_path.join(escape_name(name))
    }

    pub fn has_adapter(&self, name: &str) -> bool {
        self.state.lock().unwrap().adapters.contains_key(name)
    }

    fn adapter(&self, name: &str) -> Option<Arc<dyn ResourceAdapter>> {
        self.state.lock().unwrap().adapters.get(name).cloned()
    }

    pub fn adapter_names(&self) -> Vec<String> {
        self.state.lock().unwrap().adapters.keys().cloned().collect()
    }

    pub fn is_started(&self, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .started
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    pub fn direct_dependents_of(&self, name: &str) -> Vec<ResourceDependency> {
        self.state
            .lock()
            .unwrap()
            .direct_dependents
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn resource_dependents_of(&self, name: &str) -> Vec<ResourceDependency> {
        unique_deps(
            self.state
                .lock()
                .unwrap()
                .resource_dependents
                .get(name)
                .cloned()
                .unwrap_or_default(),
        )
    }

    fn all_dependents_of(&self, name: &str) -> Vec<ResourceDependency> {
        let state = self.state.lock().unwrap();
        let mut combined = state
            .resource_dependents
            .get(name)
            .cloned()
            .unwrap_or_default();
        combined.extend(state.direct_dependents.get(name).cloned().unwrap_or_default());
        drop(state);
        unique_deps(combined)
    }

    /// Children of `name` whose type supports start (and stop, which start
    /// requires).
    fn startable_children(&self, name: &str) -> Vec<ResourceDependency> {
        self.direct_dependents_of(name)
            .into_iter()
            .filter(|dep| {
                self.registry
                    .get(&dep.plugin, &dep.resource_type)
                    .map(|manager| manager.supports_start() && manager.supports_stop())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn stoppable(&self, deps: Vec<ResourceDependency>) -> Vec<ResourceDependency> {
        deps.into_iter()
            .filter(|dep| {
                self.registry
                    .get(&dep.plugin, &dep.resource_type)
                    .map(|manager| manager.supports_stop() && manager.supports_start())
                    .unwrap_or(false)
            })
            .collect()
    }

    fn install_adapter(
        &self,
        name: &str,
        adapter: Arc<dyn ResourceAdapter>,
        dependencies: &[ResourceDependency],
        dependents: &[ResourceDependency],
    ) {
        let mut state = self.state.lock().unwrap();
        state.adapters.insert(name.to_string(), adapter);
        state
            .dependencies
            .insert(name.to_string(), dependencies.to_vec());
        state
            .direct_dependents
            .insert(name.to_string(), dependents.to_vec());
    }

    async fn destroy_adapter(&self, name: &str) {
        let adapter = self.state.lock().unwrap().adapters.remove(name);
        if let Some(adapter) = adapter {
            if let Err(err) = adapter.destroy().await {
                warn!(resource = %name, error = %err, "adapter destroy failed");
            }
        }
    }

    /// Drops every in-memory trace of `name` after a completed delete.
    fn forget(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.started.remove(name);
        state.dependencies.remove(name);
        state.direct_dependents.remove(name);
        state.resource_dependents.remove(name);
    }

    fn mark_started(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if state.adapters.contains_key(name) {
            state.started.insert(name.to_string(), true);
        }
    }

    fn clear_started(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .started
            .insert(name.to_string(), false);
    }

    fn slot(&self, kind: SlotKind, name: &str) -> Option<TaskList> {
        let state = self.state.lock().unwrap();
        let map = match kind {
            SlotKind::Create => &state.create_tasks,
            SlotKind::Delete => &state.delete_tasks,
            SlotKind::Start => &state.start_tasks,
            SlotKind::Stop => &state.stop_tasks,
        };
        map.get(name).cloned()
    }

    fn clear_slot(&self, kind: SlotKind, name: &str) {
        let mut state = self.state.lock().unwrap();
        let map = match kind {
            SlotKind::Create => &mut state.create_tasks,
            SlotKind::Delete => &mut state.delete_tasks,
            SlotKind::Start => &mut state.start_tasks,
            SlotKind::Stop => &mut state.stop_tasks,
        };
        map.remove(name);
    }

    fn no_start(&self) -> ResourceError {
        ResourceError::NoStart {
            plugin: self.descriptor.plugin.clone(),
            resource_type: self.descriptor.name.clone(),
        }
    }

    fn no_stop(&self) -> ResourceError {
        ResourceError::NoStop {
            plugin: self.descriptor.plugin.clone(),
            resource_type: self.descriptor.name.clone(),
        }
    }
}

#[derive(Clone, Copy)]
enum SlotKind {
    Create,
    Delete,
    Start,
    Stop,
}

async fn wait_first_snapshot(adapter: &Arc<dyn ResourceAdapter>) -> Result<(), TaskError> {
    let mut rx = adapter.resource_watch();
    rx.wait_for(|snapshot| snapshot.is_some())
        .await
        .map(|_| ())
        .map_err(|_| {
            TaskError::failed(
                "create_finalize",
                "adapter snapshot stream ended before the first snapshot",
            )
        })
}
