//! In-memory port allocator.
//!
//! Support implementation of the allocator port for tests and embedded
//! servers; a production allocator (OS probing, persistence) plugs in behind
//! the same trait.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use berth_core::{PortAllocator, PortScope, TaskError};
use tracing::debug;

pub struct InMemoryPortAllocator {
    state: Mutex<AllocatorState>,
}

struct AllocatorState {
    next: u16,
    end: u16,
    leases: HashMap<PortScope, Vec<u16>>,
}

impl InMemoryPortAllocator {
    pub fn new(range: std::ops::Range<u16>) -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                next: range.start,
                end: range.end,
                leases: HashMap::new(),
            }),
        }
    }

    pub fn leased_ports(&self, scope: &PortScope) -> Vec<u16> {
        self.state
            .lock()
            .unwrap()
            .leases
            .get(scope)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryPortAllocator {
    fn default() -> Self {
        Self::new(40_000..50_000)
    }
}

#[async_trait]
impl PortAllocator for InMemoryPortAllocator {
    async fn reserve(&self, scope: &PortScope) -> Result<u16, TaskError> {
        let mut state = self.state.lock().unwrap();
        if state.next >= state.end {
            return Err(TaskError::failed(
                "ports_exhausted",
                format!("no ports left for {}/{}", scope.plugin, scope.resource_type),
            ));
        }
        let port = state.next;
        state.next += 1;
        state.leases.entry(scope.clone()).or_default().push(port);
        debug!(port, resource = %scope.resource, "reserved port");
        Ok(port)
    }

    async fn release(&self, scope: &PortScope) {
        let released = self.state.lock().unwrap().leases.remove(scope);
        if let Some(ports) = released {
            debug!(?ports, resource = %scope.resource, "released ports");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(resource: &str) -> PortScope {
        PortScope {
            plugin: "p".to_string(),
            resource_type: "node".to_string(),
            resource: resource.to_string(),
            name: None,
        }
    }

    #[tokio::test]
    async fn reserve_hands_out_distinct_ports() {
        let allocator = InMemoryPortAllocator::new(100..200);
        let a = allocator.reserve(&scope("a")).await.unwrap();
        let b = allocator.reserve(&scope("b")).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.leased_ports(&scope("a")), vec![a]);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let allocator = InMemoryPortAllocator::new(100..200);
        allocator.reserve(&scope("a")).await.unwrap();
        allocator.release(&scope("a")).await;
        allocator.release(&scope("a")).await;
        assert!(allocator.leased_ports(&scope("a")).is_empty());
    }

    #[tokio::test]
    async fn exhaustion_is_an_error() {
        let allocator = InMemoryPortAllocator::new(100..101);
        allocator.reserve(&scope("a")).await.unwrap();
        let err = allocator.reserve(&scope("b")).await.unwrap_err();
        assert_eq!(err.code(), "ports_exhausted");
    }
}
