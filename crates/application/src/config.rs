//! Server-level configuration for embedders wiring up managers.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Root of all manager state; each manager gets
    /// `<data_dir>/<plugin>/<resource_type>`.
    pub data_dir: PathBuf,
    /// Inclusive start, exclusive end of the leasable port range.
    pub port_range: (u16, u16),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            port_range: (40_000, 50_000),
        }
    }
}

impl ServerConfig {
    pub fn manager_data_path(&self, plugin: &str, resource_type: &str) -> PathBuf {
        self.data_dir.join(plugin).join(resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let config: ServerConfig =
            serde_json::from_value(serde_json::json!({"dataDir": "/srv/berth"})).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/berth"));
        assert_eq!(config.port_range, (40_000, 50_000));
    }

    #[test]
    fn manager_paths_nest_plugin_and_type() {
        let config = ServerConfig::default();
        assert_eq!(
            config.manager_data_path("chain", "node"),
            PathBuf::from("data/chain/node")
        );
    }
}
