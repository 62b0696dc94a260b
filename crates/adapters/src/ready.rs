//! On-disk marker set recording which resources completed creation.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::fs::{escape_name, remove_if_exists, unescape_name, write_atomic, StoreError};

/// A directory of empty marker files, one per created resource. Existence of
/// a marker means the resource's create pipeline completed at least once.
#[derive(Debug, Clone)]
pub struct ReadyRegistry {
    dir: PathBuf,
}

impl ReadyRegistry {
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
        self.dir.join(escape_name(name))
    }

    /// Atomic marker creation (write-then-rename).
    pub async fn write(&self, name: &str) -> Result<(), StoreError> {
        write_atomic(&self.path_for(name), b"").await
    }

    /// Tolerates an already-missing marker.
    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.path_for(name)).await
    }

    pub async fn exists(&self, name: &str) -> bool {
        fs::try_exists(self.path_for(name)).await.unwrap_or(false)
    }

    /// Directory scan; returns names in no particular order. Dotfiles
    /// (in-flight temporaries) are skipped.
    pub async fn get_all(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            names.push(unescape_name(&file_name));
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_scan_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ReadyRegistry::new(dir.path().join("ready"));
        registry.ensure().await.unwrap();

        registry.write("main/alice").await.unwrap();
        registry.write("bob").await.unwrap();

        let mut names = registry.get_all().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["bob", "main/alice"]);
        assert!(registry.exists("main/alice").await);

        registry.delete("main/alice").await.unwrap();
        registry.delete("main/alice").await.unwrap();
        assert_eq!(registry.get_all().await.unwrap(), vec!["bob"]);
    }

    #[tokio::test]
    async fn rewrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ReadyRegistry::new(dir.path().join("ready"));
        registry.ensure().await.unwrap();
        registry.write("alice").await.unwrap();
        registry.write("alice").await.unwrap();
        assert_eq!(registry.get_all().await.unwrap(), vec!["alice"]);
    }
}
