//! Durable single-slot "active job" pointers.
//!
//! A [`JobPointerStore`] maps one key per job family to the id of the
//! job currently being tracked, so a restarted client can resume it.
//! [`PersistedJobPointer`] binds a store to one family and turns store
//! failures into log lines: losing the pointer degrades resume, it never
//! blocks a command.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use closet_core::job::JobFamily;
use closet_core::types::JobId;
use tokio::sync::RwLock;

/// Errors from a pointer store backend.
#[derive(Debug, thiserror::Error)]
pub enum PointerError {
    #[error("Pointer store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Keyed single-slot store of active job ids.
#[async_trait]
pub trait JobPointerStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<JobId>, PointerError>;
    async fn set(&self, key: &str, job_id: &str) -> Result<(), PointerError>;
    async fn clear(&self, key: &str) -> Result<(), PointerError>;
}

// ---------------------------------------------------------------------------
// MemoryJobPointerStore
// ---------------------------------------------------------------------------

/// Process-local store; pointers do not survive a restart.
#[derive(Default)]
pub struct MemoryJobPointerStore {
    slots: RwLock<HashMap<String, JobId>>,
}

impl MemoryJobPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobPointerStore for MemoryJobPointerStore {
    async fn get(&self, key: &str) -> Result<Option<JobId>, PointerError> {
        Ok(self.slots.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, job_id: &str) -> Result<(), PointerError> {
        self.slots
            .write()
            .await
            .insert(key.to_string(), job_id.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), PointerError> {
        self.slots.write().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FileJobPointerStore
// ---------------------------------------------------------------------------

/// One file per key under a directory; each file holds a bare job id.
///
/// Writes go to a temporary sibling first and are renamed into place, so
/// a crash mid-write never leaves a truncated id behind.
pub struct FileJobPointerStore {
    dir: PathBuf,
}

impl FileJobPointerStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl JobPointerStore for FileJobPointerStore {
    async fn get(&self, key: &str) -> Result<Option<JobId>, PointerError> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, job_id: &str) -> Result<(), PointerError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = self.dir.join(format!(".{key}.tmp"));
        tokio::fs::write(&tmp, job_id).await?;
        tokio::fs::rename(&tmp, self.path(key)).await?;
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<(), PointerError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// PersistedJobPointer
// ---------------------------------------------------------------------------

/// The active-job pointer of one family.
#[derive(Clone)]
pub struct PersistedJobPointer {
    store: Arc<dyn JobPointerStore>,
    family: JobFamily,
}

impl PersistedJobPointer {
    pub fn new(store: Arc<dyn JobPointerStore>, family: JobFamily) -> Self {
        Self { store, family }
    }

    pub fn family(&self) -> JobFamily {
        self.family
    }

    /// The persisted job id, or `None` when absent or unreadable.
    pub async fn load(&self) -> Option<JobId> {
        match self.store.get(self.family.pointer_key()).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(family = %self.family, error = %e, "Failed to read job pointer");
                None
            }
        }
    }

    pub async fn persist(&self, job_id: &str) {
        if let Err(e) = self.store.set(self.family.pointer_key(), job_id).await {
            tracing::warn!(family = %self.family, job_id, error = %e, "Failed to persist job pointer");
        }
    }

    pub async fn clear(&self) {
        if let Err(e) = self.store.clear(self.family.pointer_key()).await {
            tracing::warn!(family = %self.family, error = %e, "Failed to clear job pointer");
        }
    }
}
