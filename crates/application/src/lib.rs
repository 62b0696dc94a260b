//! Application layer of the berth resource server.
//!
//! One [`ResourcesManager`] per `(plugin, resourceType)` pair owns the
//! lifecycle of that type's resource instances. Managers cooperate through
//! the [`ManagerRegistry`] for cross-type dependency cascades, and each
//! manager publishes a live projection of its resources' current state.

pub mod config;
pub mod events;
pub mod projection;
pub mod registry;
pub mod resources_manager;

pub use config::ServerConfig;
pub use events::{ManagerStats, OperationEvent, OperationKind};
pub use registry::{ManagerKey, ManagerRegistry, PluginManager};
pub use resources_manager::{CreateHook, CreateHookInput, ManagerOptions, ResourcesManager};
