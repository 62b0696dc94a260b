//! Persisted dependency edge lists.
//!
//! Each resource owns one JSON file per edge direction: the resources it
//! depends on, and the resources it created as children. A missing file is
//! semantically an empty list; all other I/O errors propagate.

use std::path::{Path, PathBuf};

use berth_core::ResourceDependency;
use tokio::fs;

use crate::fs::{escape_name, remove_if_exists, write_atomic, StoreError};

#[derive(Debug, Clone)]
pub struct DependencyStore {
    dir: PathBuf,
}

impl DependencyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn ensure(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_name(name)))
    }

    pub async fn load(&self, name: &str) -> Result<Vec<ResourceDependency>, StoreError> {
        let bytes = match fs::read(self.path_for(name)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn save(&self, name: &str, deps: &[ResourceDependency]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(deps)?;
        write_atomic(&self.path_for(name), &bytes).await
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.path_for(name)).await
    }
}
