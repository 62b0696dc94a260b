//! Manager lookup by `(plugin, resourceType)`.
//!
//! The registry holds weak handles so managers can reference it (and, through
//! it, each other) without ownership cycles; the [`PluginManager`] owns the
//! strong handles and drives whole-server init and teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use berth_core::{InitError, ResourceError, TaskError};
use tracing::info;

use crate::resources_manager::ResourcesManager;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagerKey {
    pub plugin: String,
    pub resource_type: String,
}

impl ManagerKey {
    pub fn new(plugin: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            resource_type: resource_type.into(),
        }
    }
}

#[derive(Default)]
pub struct ManagerRegistry {
    inner: RwLock<HashMap<ManagerKey, Weak<ResourcesManager>>>,
}

impl ManagerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, manager: &Arc<ResourcesManager>) {
        let key = ManagerKey::new(manager.plugin(), manager.resource_type());
        self.inner
            .write()
            .unwrap()
            .insert(key, Arc::downgrade(manager));
    }

    /// Total lookup: unknown or dropped managers fail loudly.
    pub fn get(
        &self,
        plugin: &str,
        resource_type: &str,
    ) -> Result<Arc<ResourcesManager>, ResourceError> {
        let key = ManagerKey::new(plugin, resource_type);
        self.inner
            .read()
            .unwrap()
            .get(&key)
            .and_then(Weak::upgrade)
            .ok_or_else(|| ResourceError::UnknownManager {
                plugin: plugin.to_string(),
                resource_type: resource_type.to_string(),
            })
    }
}

/// Owns every manager of the server and resolves cross-type lookups.
#[derive(Default)]
pub struct PluginManager {
    registry: Arc<ManagerRegistry>,
    managers: Mutex<HashMap<ManagerKey, Arc<ResourcesManager>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> Arc<ManagerRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn add_resources_manager(&self, manager: Arc<ResourcesManager>) {
        self.registry.register(&manager);
        let key = ManagerKey::new(manager.plugin(), manager.resource_type());
        self.managers.lock().unwrap().insert(key, manager);
    }

    pub fn get_resources_manager(
        &self,
        plugin: &str,
        resource_type: &str,
    ) -> Result<Arc<ResourcesManager>, ResourceError> {
        self.registry.get(plugin, resource_type)
    }

    fn all(&self) -> Vec<Arc<ResourcesManager>> {
        self.managers.lock().unwrap().values().cloned().collect()
    }

    /// Two-phase init across every manager: rehydrate all adapter maps
    /// first, then publish inverse dependency edges, so cross-manager
    /// registration never races a peer that has not loaded yet.
    pub async fn init_all(&self) -> Result<Vec<InitError>, TaskError> {
        let managers = self.all();
        let mut errors = Vec::new();
        for manager in &managers {
            errors.extend(manager.init_adapters().await?);
        }
        for manager in &managers {
            manager.publish_dependents()?;
            manager.touch();
        }
        info!(
            managers = managers.len(),
            init_errors = errors.len(),
            "all resources managers initialized"
        );
        Ok(errors)
    }

    pub async fn destroy_all(&self) {
        for manager in self.all() {
            manager.destroy().await;
        }
    }
}
