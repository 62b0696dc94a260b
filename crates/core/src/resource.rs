//! Runtime resource snapshots and dependency edges.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Opaque per-type options bag passed through every operation.
pub type ResourceOptions = serde_json::Value;

/// Whether a resource is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Started,
    Stopped,
}

/// Live view of a resource instance, as reported by its adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub plugin: String,
    pub resource_type: String,
    /// Compound name uniquely identifying the resource within its type.
    pub name: String,
    /// Leaf segment of `name`.
    pub base_name: String,
    pub state: ResourceState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    /// Adapter-specific extras.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A reference to a resource owned by some `(plugin, resourceType)` manager.
///
/// Equality is structural over all three fields. This is the unit persisted
/// in the `dependencies/` and `dependents/` files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDependency {
    pub plugin: String,
    pub resource_type: String,
    pub name: String,
}

/// Order-preserving dedup of dependency triples.
pub fn unique_deps(deps: Vec<ResourceDependency>) -> Vec<ResourceDependency> {
    let mut seen = HashSet::new();
    deps.into_iter()
        .filter(|dep| seen.insert(dep.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(name: &str) -> ResourceDependency {
        ResourceDependency {
            plugin: "p".to_string(),
            resource_type: "node".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn unique_deps_preserves_first_occurrence_order() {
        let deps = vec![dep("a"), dep("b"), dep("a"), dep("c"), dep("b")];
        let unique = unique_deps(deps);
        assert_eq!(
            unique.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn dependency_json_shape_is_camel_case() {
        let json = serde_json::to_value(dep("main/alice")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "plugin": "p",
                "resourceType": "node",
                "name": "main/alice",
            })
        );
    }
}
