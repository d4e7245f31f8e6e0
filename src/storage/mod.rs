use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::error::VerdantError;
use crate::Result;

/// File-backed object store for plant photos. Objects live under a single
/// root directory and are addressed by relative paths namespaced as
/// `{owner_id}/{plant_id}/{millis}.jpg`.
pub struct PhotoStorage {
    root: PathBuf,
}

impl PhotoStorage {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            VerdantError::Storage(format!(
                "failed to create photo root {}: {e}",
                root.to_string_lossy()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn upload(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VerdantError::Storage(format!("failed to create {path}: {e}")))?;
        }
        std::fs::write(&full, bytes)
            .map_err(|e| VerdantError::Storage(format!("failed to write {path}: {e}")))?;
        tracing::debug!(path, size = bytes.len(), "stored photo object");
        Ok(())
    }

    /// Object paths directly under `prefix`. A prefix that was never written
    /// to is an empty listing, not an error.
    pub fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| VerdantError::Storage(format!("failed to list {prefix}: {e}")))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| VerdantError::Storage(format!("failed to list {prefix}: {e}")))?;
            if entry.path().is_file() {
                paths.push(format!("{}/{}", prefix, entry.file_name().to_string_lossy()));
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub fn delete(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            let full = self.resolve(path)?;
            match std::fs::remove_file(&full) {
                Ok(()) => tracing::debug!(path, "deleted photo object"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(VerdantError::Storage(format!("failed to delete {path}: {e}")))
                }
            }
        }
        Ok(())
    }

    pub fn public_url(&self, path: &str) -> String {
        format!("file://{}/{}", self.root.to_string_lossy(), path)
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });
        if path.is_empty() || escapes {
            return Err(VerdantError::Storage(format!("invalid object path `{path}`")));
        }
        Ok(self.root.join(relative))
    }
}

/// Millisecond timestamps alone can collide when two uploads land in the
/// same instant, so a process-wide counter keeps the names distinct.
pub fn photo_object_path(owner_id: &str, plant_id: i32, taken_at: DateTime<Utc>) -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "{owner_id}/{plant_id}/{}-{seq}.jpg",
        taken_at.timestamp_millis()
    )
}

pub fn plant_photo_prefix(owner_id: &str, plant_id: i32) -> String {
    format!("{owner_id}/{plant_id}")
}
