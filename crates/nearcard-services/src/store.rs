//! Durable flags — small named booleans that survive process restarts.
//!
//! The broadcaster keeps its "broadcasting enabled" intent here so that the
//! host can tell, after a restart, whether the user had it switched on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

/// Key under which the broadcaster records its durable on/off intent.
pub const BROADCAST_ENABLED_KEY: &str = "profile_broadcast_started";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, serde_json::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(serde_json::Error),
}

/// Get/set named booleans. Unset flags read as `false`.
pub trait FlagStore: Send + Sync {
    fn get(&self, key: &str) -> Result<bool, StoreError>;
    fn set(&self, key: &str, value: bool) -> Result<(), StoreError>;
}

/// Flags held in memory only. Useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct MemoryFlagStore {
    flags: Arc<DashMap<String, bool>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn get(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.flags.get(key).map(|v| *v).unwrap_or(false))
    }

    fn set(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.flags.insert(key.to_string(), value);
        Ok(())
    }
}

/// Flags persisted as a JSON object, rewritten atomically on every change.
#[derive(Clone)]
pub struct JsonFlagStore {
    flags: Arc<DashMap<String, bool>>,
    path: Arc<PathBuf>,
}

impl JsonFlagStore {
    /// Open the store at `path`, loading existing flags if the file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let flags = DashMap::new();

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let map: HashMap<String, bool> = serde_json::from_str(&text)
                    .map_err(|e| StoreError::ParseFailed(path.clone(), e))?;
                tracing::debug!(count = map.len(), path = %path.display(), "loaded durable flags");
                for (key, value) in map {
                    flags.insert(key, value);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::ReadFailed(path, e)),
        }

        Ok(Self {
            flags: Arc::new(flags),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        let snapshot: HashMap<String, bool> = self
            .flags
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        let json = serde_json::to_string_pretty(&snapshot).map_err(StoreError::SerializeFailed)?;
        write_atomic(&self.path, json.as_bytes())
    }
}

impl FlagStore for JsonFlagStore {
    fn get(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.flags.get(key).map(|v| *v).unwrap_or(false))
    }

    fn set(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.flags.insert(key.to_string(), value);
        self.save()
    }
}

/// Write via temp file + rename so a crash never leaves a torn file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::WriteFailed(parent.to_path_buf(), e))?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, data).map_err(|e| StoreError::WriteFailed(tmp_path.clone(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| StoreError::WriteFailed(path.to_path_buf(), e))
}
