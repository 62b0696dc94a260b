//! Atomic file helpers shared by the on-disk stores.
//!
//! Writes go through a temporary sibling followed by a rename, so readers
//! never observe a half-written file. Compound resource names contain `/`
//! and cannot be used as file names directly; [`escape_name`] maps them to a
//! flat, bijective encoding.

use std::io;
use std::path::{Path, PathBuf};

use berth_core::TaskError;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] io::Error),
    #[error("store json: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io(inner) => TaskError::failed("store_io", inner),
            StoreError::Json(inner) => TaskError::failed("store_json", inner),
        }
    }
}

/// Escapes a compound name into a single path segment. `%` is the escape
/// character; `/` and a leading `.` are encoded so the result is never a
/// dotfile (temporary files are dotfiles and directory scans skip them).
pub fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for (i, c) in name.chars().enumerate() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '.' if i == 0 => escaped.push_str("%2E"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Inverse of [`escape_name`]. Unknown escapes pass through untouched.
pub fn unescape_name(escaped: &str) -> String {
    let mut name = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            name.push(c);
            continue;
        }
        let code: String = chars.by_ref().take(2).collect();
        match code.as_str() {
            "25" => name.push('%'),
            "2F" => name.push('/'),
            "2E" => name.push('.'),
            other => {
                name.push('%');
                name.push_str(other);
            }
        }
    }
    name
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file}.tmp"))
}

/// Write-then-rename. The temporary sibling lives in the same directory so
/// the rename stays on one filesystem.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = tmp_sibling(path);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Removal tolerating an already-missing file.
pub async fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Directory removal tolerating an already-missing directory.
pub async fn remove_dir_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_roundtrip() {
        for name in ["alice", "main/alice", "a%b/c", ".hidden", "x/.y", "a.b"] {
            assert_eq!(unescape_name(&escape_name(name)), name, "{name}");
        }
    }

    #[test]
    fn escaped_names_are_never_dotfiles() {
        assert!(!escape_name(".hidden").starts_with('.'));
    }

    #[test]
    fn distinct_names_stay_distinct() {
        assert_ne!(escape_name("a/b"), escape_name("a%2Fb"));
    }

    #[tokio::test]
    async fn write_atomic_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        write_atomic(&path, b"[1,2]").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"[1,2]");
        // Overwrite goes through the same path.
        write_atomic(&path, b"[3]").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"[3]");
    }

    #[tokio::test]
    async fn remove_if_exists_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        remove_if_exists(&dir.path().join("missing")).await.unwrap();
    }
}
