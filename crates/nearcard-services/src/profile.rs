//! The local user's own profile — what this device broadcasts.

use std::path::PathBuf;
use std::sync::Arc;

use nearcard_core::ContactRecord;
use tokio::sync::RwLock;

use crate::store::{write_atomic, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile name must not be blank")]
    NameRequired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Holds the profile in memory, optionally mirrored to a JSON file.
#[derive(Clone, Default)]
pub struct ProfileStore {
    profile: Arc<RwLock<Option<ContactRecord>>>,
    persist_path: Arc<Option<PathBuf>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store backed by `path`, loading the profile if one was saved.
    pub fn with_persistence(path: PathBuf) -> Result<Self, ProfileError> {
        let profile = match std::fs::read_to_string(&path) {
            Ok(text) => Some(
                serde_json::from_str::<ContactRecord>(&text)
                    .map_err(|e| StoreError::ParseFailed(path.clone(), e))?,
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(StoreError::ReadFailed(path, e).into()),
        };

        if profile.is_some() {
            tracing::debug!(path = %path.display(), "loaded stored profile");
        }

        Ok(Self {
            profile: Arc::new(RwLock::new(profile)),
            persist_path: Arc::new(Some(path)),
        })
    }

    /// The stored profile, if the user has created one.
    pub async fn get(&self) -> Option<ContactRecord> {
        self.profile.read().await.clone()
    }

    /// Replace the profile. A blank name is rejected.
    pub async fn set(&self, record: ContactRecord) -> Result<(), ProfileError> {
        if !record.has_name() {
            return Err(ProfileError::NameRequired);
        }

        let mut profile = self.profile.write().await;
        if let Some(path) = self.persist_path.as_ref() {
            let json = serde_json::to_string_pretty(&record).map_err(StoreError::SerializeFailed)?;
            write_atomic(path, json.as_bytes())?;
        }
        *profile = Some(record);
        tracing::info!("profile updated");
        Ok(())
    }
}
