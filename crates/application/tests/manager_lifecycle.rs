//! End-to-end lifecycle scenarios across managers backed by the in-memory
//! adapter and real on-disk state.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use berth_adapters::{InMemoryPortAllocator, MemoryMasterResourceAdapter, ReadyRegistry};
use berth_application::{
    CreateHookInput, ManagerOptions, ManagerRegistry, PluginManager, ResourcesManager,
};
use berth_core::{
    CrudMetadata, ProgressEvent, ResourceDependency, ResourceError, ResourceState,
    ResourceTypeDescriptor, TaskList,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn manager(
    registry: &Arc<ManagerRegistry>,
    root: &Path,
    plugin: &str,
    resource_type: &str,
    crud: CrudMetadata,
) -> Arc<ResourcesManager> {
    init_tracing();
    ResourcesManager::new(ManagerOptions {
        data_path: root.join(plugin).join(resource_type),
        master: Arc::new(MemoryMasterResourceAdapter::new(plugin, resource_type)),
        port_allocator: Arc::new(InMemoryPortAllocator::default()),
        registry: Arc::clone(registry),
        descriptor: ResourceTypeDescriptor::new(plugin, resource_type, crud),
    })
}

fn dep(plugin: &str, resource_type: &str, name: &str) -> ResourceDependency {
    ResourceDependency {
        plugin: plugin.to_string(),
        resource_type: resource_type.to_string(),
        name: name.to_string(),
    }
}

/// Drains a settled list's progress stream and returns the plain messages.
async fn progress_messages(list: &TaskList) -> Vec<String> {
    let mut rx = list.progress();
    let mut messages = Vec::new();
    while let Some(event) = rx.recv().await {
        if let ProgressEvent::Progress { message, .. } = event {
            messages.push(message);
        }
    }
    messages
}

fn position(messages: &[String], needle: &str) -> usize {
    messages
        .iter()
        .position(|message| message == needle)
        .unwrap_or_else(|| panic!("missing '{needle}' in {messages:?}"))
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

fn walk(dir: &Path) -> Vec<String> {
    fn recurse(base: &Path, dir: &Path, out: &mut Vec<String>) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                out.push(path.strip_prefix(base).unwrap().display().to_string());
                if path.is_dir() {
                    recurse(base, &path, out);
                }
            }
        }
    }
    let mut out = Vec::new();
    recurse(dir, dir, &mut out);
    out.sort();
    out
}

#[tokio::test]
async fn create_start_stop_delete_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(true));
    assert!(node.init().await.unwrap().is_empty());

    node.create("alice", json!({})).wait().await.unwrap();

    assert!(node.has_adapter("alice"));
    assert!(node.is_started("alice"), "startOnCreate starts the resource");
    let node_dir = dir.path().join("chain/node");
    assert!(node_dir.join("ready/alice").exists());
    assert_eq!(
        std::fs::read_to_string(node_dir.join("dependencies/alice.json")).unwrap(),
        "[]"
    );
    assert_eq!(
        std::fs::read_to_string(node_dir.join("dependents/alice.json")).unwrap(),
        "[]"
    );

    node.stop("alice", json!({})).unwrap().wait().await.unwrap();
    assert!(!node.is_started("alice"));

    node.delete("alice", json!({})).wait().await.unwrap();
    assert!(!node.has_adapter("alice"));
    assert!(!node_dir.join("ready/alice").exists());
}

#[tokio::test]
async fn delete_cascades_to_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    let wallet = manager(
        &registry,
        dir.path(),
        "chain",
        "wallet",
        CrudMetadata::full(false),
    );
    node.init().await.unwrap();
    wallet.init().await.unwrap();

    // The node's create brings up its wallet child, which declares the node
    // as its dependency.
    let wallet_for_hook = Arc::clone(&wallet);
    node.add_create_hook(Arc::new(move |input: &CreateHookInput| {
        if input.name == "parent" {
            wallet_for_hook.create(
                "parent/w1",
                json!({
                    "dependencies": [
                        {"plugin": "chain", "resourceType": "node", "name": "parent"}
                    ]
                }),
            )
        } else {
            TaskList::builder().build()
        }
    }));

    node.create(
        "parent",
        json!({
            "dependents": [
                {"plugin": "chain", "resourceType": "wallet", "name": "parent/w1"}
            ]
        }),
    )
    .wait()
    .await
    .unwrap();

    assert!(wallet.has_adapter("parent/w1"));
    assert_eq!(
        node.direct_dependents_of("parent"),
        vec![dep("chain", "wallet", "parent/w1")]
    );
    assert_eq!(
        node.resource_dependents_of("parent"),
        vec![dep("chain", "wallet", "parent/w1")]
    );

    let delete = node.delete("parent", json!({}));
    delete.wait().await.unwrap();
    let messages = progress_messages(&delete).await;
    assert!(
        position(&messages, "Delete wallet w1") < position(&messages, "Delete node parent"),
        "dependent goes first: {messages:?}"
    );

    assert!(!node.has_adapter("parent"));
    assert!(!wallet.has_adapter("parent/w1"));
    assert!(!dir.path().join("chain/wallet/ready").join("parent%2Fw1").exists());
}

#[tokio::test]
async fn start_brings_created_children_up_first() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    let disk = manager(&registry, dir.path(), "chain", "disk", CrudMetadata::full(false));
    node.init().await.unwrap();
    disk.init().await.unwrap();

    let disk_for_hook = Arc::clone(&disk);
    node.add_create_hook(Arc::new(move |input: &CreateHookInput| {
        if input.name == "db" {
            disk_for_hook.create("d1", json!({}))
        } else {
            TaskList::builder().build()
        }
    }));

    node.create(
        "db",
        json!({
            "dependents": [
                {"plugin": "chain", "resourceType": "disk", "name": "d1"}
            ]
        }),
    )
    .wait()
    .await
    .unwrap();

    let start = node.start("db", json!({})).unwrap();
    start.wait().await.unwrap();
    let messages = progress_messages(&start).await;
    assert!(
        position(&messages, "Launch d1") < position(&messages, "Launch db"),
        "children come up before the parent: {messages:?}"
    );
    assert!(disk.is_started("d1"));
    assert!(node.is_started("db"));
}

#[tokio::test]
async fn abort_during_create_then_delete_leaves_no_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    node.init().await.unwrap();

    let resource_dir = dir.path().join("chain/node/resources/x");
    let create = node.create("x", json!({"hangCreate": true}));
    {
        let resource_dir = resource_dir.clone();
        wait_until("resource dir to appear", move || resource_dir.exists()).await;
    }

    create.abort();
    assert!(create.wait().await.unwrap_err().is_aborted());

    // The partial adapter was installed so delete can find and clean it.
    assert!(node.has_adapter("x"));
    node.delete("x", json!({})).wait().await.unwrap();

    assert!(!node.has_adapter("x"));
    assert!(!resource_dir.exists());
    assert!(!dir.path().join("chain/node/ready/x").exists());
}

#[tokio::test]
async fn reentrant_create_returns_the_same_task_list() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    node.init().await.unwrap();

    let first = node.create("y", json!({"hangCreate": true}));
    let second = node.create("y", json!({}));
    assert_eq!(first.id(), second.id(), "idempotent in-flight handle");

    first.abort();
    assert!(first.wait().await.unwrap_err().is_aborted());
    assert!(second.wait().await.unwrap_err().is_aborted());

    let first_events = progress_messages(&first).await;
    let second_events = progress_messages(&second).await;
    assert_eq!(first_events, second_events);

    node.delete("y", json!({})).wait().await.unwrap();
}

#[tokio::test]
async fn init_rejects_markers_decoding_to_the_same_name() {
    let dir = tempfile::tempdir().unwrap();
    let ready_dir = dir.path().join("chain/node/ready");
    std::fs::create_dir_all(&ready_dir).unwrap();
    // Both markers decode to the compound name "%99dup".
    std::fs::write(ready_dir.join("%99dup"), b"").unwrap();
    std::fs::write(ready_dir.join("%2599dup"), b"").unwrap();

    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    let err = node.init().await.unwrap_err();
    assert_eq!(err.code(), "duplicate_resource_name");
    assert!(node.adapter_names().is_empty());
}

#[tokio::test]
async fn ready_registry_tracks_adapters_at_quiescence() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    node.init().await.unwrap();

    node.create("a", json!({})).wait().await.unwrap();
    node.create("b", json!({})).wait().await.unwrap();
    node.delete("a", json!({})).wait().await.unwrap();
    node.create("c", json!({})).wait().await.unwrap();

    let ready = ReadyRegistry::new(dir.path().join("chain/node/ready"));
    let mut on_disk = ready.get_all().await.unwrap();
    on_disk.sort();
    let mut in_memory = node.adapter_names();
    in_memory.sort();
    assert_eq!(on_disk, in_memory);
    assert_eq!(on_disk, vec!["b", "c"]);
}

#[tokio::test]
async fn create_then_delete_restores_the_on_disk_tree() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    node.init().await.unwrap();

    let before = walk(dir.path());
    node.create("alice", json!({})).wait().await.unwrap();
    node.delete("alice", json!({})).wait().await.unwrap();
    assert_eq!(walk(dir.path()), before);
}

#[tokio::test]
async fn inverse_edges_are_rebuilt_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let plugins = PluginManager::new();
        let registry = plugins.registry();
        let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
        let wallet = manager(
            &registry,
            dir.path(),
            "chain",
            "wallet",
            CrudMetadata::full(false),
        );
        plugins.add_resources_manager(Arc::clone(&node));
        plugins.add_resources_manager(Arc::clone(&wallet));
        plugins.init_all().await.unwrap();

        node.create("n", json!({})).wait().await.unwrap();
        wallet
            .create(
                "w",
                json!({
                    "dependencies": [
                        {"plugin": "chain", "resourceType": "node", "name": "n"}
                    ]
                }),
            )
            .wait()
            .await
            .unwrap();
        plugins.destroy_all().await;
    }

    let plugins = PluginManager::new();
    let registry = plugins.registry();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    let wallet = manager(
        &registry,
        dir.path(),
        "chain",
        "wallet",
        CrudMetadata::full(false),
    );
    plugins.add_resources_manager(Arc::clone(&node));
    plugins.add_resources_manager(Arc::clone(&wallet));
    assert!(plugins.init_all().await.unwrap().is_empty());

    assert!(node.has_adapter("n"));
    assert!(wallet.has_adapter("w"));
    assert_eq!(
        node.resource_dependents_of("n"),
        vec![dep("chain", "wallet", "w")]
    );
}

#[tokio::test]
async fn stop_orders_dependents_then_resource_then_children() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    let wallet = manager(
        &registry,
        dir.path(),
        "chain",
        "wallet",
        CrudMetadata::full(false),
    );
    let disk = manager(&registry, dir.path(), "chain", "disk", CrudMetadata::full(false));
    node.init().await.unwrap();
    wallet.init().await.unwrap();
    disk.init().await.unwrap();

    let disk_for_hook = Arc::clone(&disk);
    node.add_create_hook(Arc::new(move |input: &CreateHookInput| {
        if input.name == "n" {
            disk_for_hook.create("d", json!({}))
        } else {
            TaskList::builder().build()
        }
    }));
    node.create(
        "n",
        json!({
            "dependents": [
                {"plugin": "chain", "resourceType": "disk", "name": "d"}
            ]
        }),
    )
    .wait()
    .await
    .unwrap();
    wallet
        .create(
            "w",
            json!({
                "dependencies": [
                    {"plugin": "chain", "resourceType": "node", "name": "n"}
                ]
            }),
        )
        .wait()
        .await
        .unwrap();

    node.start("n", json!({})).unwrap().wait().await.unwrap();
    wallet.start("w", json!({})).unwrap().wait().await.unwrap();

    let stop = node.stop("n", json!({})).unwrap();
    stop.wait().await.unwrap();
    let messages = progress_messages(&stop).await;
    let dependent = position(&messages, "Halt w");
    let resource = position(&messages, "Halt n");
    let child = position(&messages, "Halt d");
    assert!(
        dependent < resource && resource < child,
        "dependents, then the resource, then its children: {messages:?}"
    );
    assert!(!node.is_started("n"));
}

#[tokio::test]
async fn init_collects_per_resource_errors() {
    let dir = tempfile::tempdir().unwrap();
    let ready_dir = dir.path().join("chain/node/ready");
    std::fs::create_dir_all(&ready_dir).unwrap();
    std::fs::write(ready_dir.join("ghost"), b"").unwrap();

    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    let errors = node.init().await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].name, "ghost");
    assert_eq!(errors[0].resource_type, "node");
    // Broken, not absent: the marker survives but no adapter is installed.
    assert!(!node.has_adapter("ghost"));
    assert!(ready_dir.join("ghost").exists());
}

#[tokio::test]
async fn start_and_stop_require_crud_support() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let frozen = manager(
        &registry,
        dir.path(),
        "chain",
        "snapshot",
        CrudMetadata::create_delete_only(),
    );
    frozen.init().await.unwrap();
    frozen.create("s1", json!({})).wait().await.unwrap();

    assert!(matches!(
        frozen.start("s1", json!({})),
        Err(ResourceError::NoStart { .. })
    ));
    assert!(matches!(
        frozen.stop("s1", json!({})),
        Err(ResourceError::NoStop { .. })
    ));
}

#[tokio::test]
async fn failed_start_rolls_back_with_stop() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    node.init().await.unwrap();

    node.create("f", json!({"failStart": true})).wait().await.unwrap();
    let err = node
        .start("f", json!({}))
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.code(), "memory_start");
    assert!(!node.is_started("f"));

    let stats_node = Arc::clone(&node);
    wait_until("rollback stop to run", move || {
        stats_node.stats().stops >= 1
    })
    .await;
}

#[tokio::test]
async fn failed_create_schedules_a_cleanup_delete() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    node.init().await.unwrap();

    let err = node
        .create("g", json!({"failCreateLate": true}))
        .wait()
        .await
        .unwrap_err();
    assert_eq!(err.code(), "memory_create");

    let resource_dir = dir.path().join("chain/node/resources/g");
    let cleanup_node = Arc::clone(&node);
    wait_until("cleanup delete to finish", move || {
        cleanup_node.stats().deletes >= 1 && !cleanup_node.has_adapter("g")
    })
    .await;
    assert!(!resource_dir.exists());
}

#[tokio::test]
async fn projection_tracks_membership_and_state() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    node.init().await.unwrap();
    assert!(node.get_resources(&json!({})).is_empty());

    node.create("alice", json!({})).wait().await.unwrap();
    let projection_node = Arc::clone(&node);
    wait_until("projection to pick up the create", move || {
        projection_node.get_resources(&json!({})).len() == 1
    })
    .await;
    let snapshot = node.get_resource("alice", &json!({})).unwrap();
    assert_eq!(snapshot.state, ResourceState::Stopped);
    assert_eq!(snapshot.base_name, "alice");

    node.start("alice", json!({})).unwrap().wait().await.unwrap();
    let projection_node = Arc::clone(&node);
    wait_until("projection to observe the start", move || {
        projection_node
            .get_resource("alice", &json!({}))
            .map(|resource| resource.state == ResourceState::Started)
            .unwrap_or(false)
    })
    .await;

    node.delete("alice", json!({})).wait().await.unwrap();
    let projection_node = Arc::clone(&node);
    wait_until("projection to empty", move || {
        projection_node.get_resources(&json!({})).is_empty()
    })
    .await;
}

#[tokio::test]
async fn unknown_manager_lookup_fails_loudly() {
    let plugins = PluginManager::new();
    assert!(matches!(
        plugins.get_resources_manager("nope", "node"),
        Err(ResourceError::UnknownManager { .. })
    ));
}

#[tokio::test]
async fn operations_are_recorded_in_the_event_log() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ManagerRegistry::new();
    let node = manager(&registry, dir.path(), "chain", "node", CrudMetadata::full(false));
    node.init().await.unwrap();

    node.create("alice", json!({})).wait().await.unwrap();
    node.start("alice", json!({})).unwrap().wait().await.unwrap();
    node.stop("alice", json!({})).unwrap().wait().await.unwrap();
    node.delete("alice", json!({})).wait().await.unwrap();

    let stats = node.stats();
    assert_eq!(stats.creates, 1);
    assert_eq!(stats.starts, 1);
    assert_eq!(stats.stops, 1);
    assert_eq!(stats.deletes, 1);
    assert_eq!(stats.failures, 0);
    assert_eq!(node.recent_events(Some(1))[0].name, "alice");
}
