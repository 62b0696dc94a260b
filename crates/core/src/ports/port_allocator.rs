//! Port leasing scoped to a resource.

use async_trait::async_trait;

use crate::error::TaskError;

/// Lease scope: every port belongs to one `(plugin, resourceType, resource)`
/// triple, optionally qualified by a label for adapters holding several
/// ports per resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortScope {
    pub plugin: String,
    pub resource_type: String,
    pub resource: String,
    pub name: Option<String>,
}

#[async_trait]
pub trait PortAllocator: Send + Sync {
    async fn reserve(&self, scope: &PortScope) -> Result<u16, TaskError>;

    /// Releases every lease under the scope. Idempotent; releasing an
    /// unknown scope is a no-op.
    async fn release(&self, scope: &PortScope);
}
