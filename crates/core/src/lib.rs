//! Core domain of the berth resource server.
//!
//! This crate carries the pieces every other layer builds on:
//! - domain types for resources, dependencies and CRUD metadata
//! - the error taxonomy shared across the workspace
//! - the [`tasks`] runtime: abortable, nestable, observable task lists
//! - the port traits implemented by resource adapters and allocators

pub mod crud;
pub mod describe;
pub mod error;
pub mod name;
pub mod ports;
pub mod progress;
pub mod resource;
pub mod tasks;

pub use crud::{CrudMetadata, CrudNames, ResourceTypeDescriptor};
pub use describe::{DescribeTable, DescribeValue};
pub use error::{InitError, ResourceError, TaskError};
pub use name::{simple_name, CompoundName};
pub use ports::{AdapterSpec, MasterResourceAdapter, PortAllocator, PortScope, ResourceAdapter};
pub use progress::ProgressEvent;
pub use resource::{unique_deps, Resource, ResourceDependency, ResourceOptions, ResourceState};
pub use tasks::{Task, TaskContext, TaskList, TaskListBuilder, TaskOutcome, TaskStatus};
