//! Storage and driver implementations behind the core's port traits:
//! the on-disk ready registry and dependency store, an in-memory port
//! allocator, and an in-memory resource adapter for tests and embedders.

pub mod dependency;
pub mod fs;
pub mod memory;
pub mod port_allocator;
pub mod ready;

pub use dependency::DependencyStore;
pub use fs::StoreError;
pub use memory::{MemoryMasterResourceAdapter, MemoryResourceAdapter};
pub use port_allocator::InMemoryPortAllocator;
pub use ready::ReadyRegistry;
