//! Port traits implemented outside the core: resource adapters, their
//! per-type factories, and the port allocator.

mod port_allocator;
mod resource_adapter;

pub use port_allocator::{PortAllocator, PortScope};
pub use resource_adapter::{AdapterSpec, MasterResourceAdapter, ResourceAdapter};
