//! Durable state of a migration target: tables and ledger in one document.

use crate::core::{MigrateError, Result};
use crate::ledger::Ledger;
use crate::storage::InMemoryStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub const STATE_FORMAT_VERSION: u32 = 1;

// ============================================================================
// Persisted document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub format_version: u32,
    pub tables: InMemoryStorage,
    pub ledger: Ledger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl PersistedState {
    pub fn new(tables: InMemoryStorage, ledger: Ledger) -> Self {
        Self {
            format_version: STATE_FORMAT_VERSION,
            tables,
            ledger,
            saved_at: None,
        }
    }

    fn check_version(self) -> Result<Self> {
        if self.format_version > STATE_FORMAT_VERSION {
            return Err(MigrateError::Serialization(format!(
                "state format version {} is newer than supported version {}",
                self.format_version, STATE_FORMAT_VERSION
            )));
        }
        Ok(self)
    }
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new(InMemoryStorage::new(), Ledger::new())
    }
}

// ============================================================================
// State store backends
// ============================================================================

/// Where the migrator keeps its state. Every `save` replaces the whole
/// document atomically: after a crash, `load` returns either the previous
/// or the new document, never a mix.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedState>>;

    async fn save(&self, state: &PersistedState) -> Result<()>;

    /// Human readable location, used in logs.
    fn describe(&self) -> String;
}

/// JSON document on disk, replaced through write-to-temp, fsync and rename.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            MigrateError::Io(format!("Failed to create state directory: {}", e))
        })?;
    }
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)
        .map_err(|e| MigrateError::Io(format!("Failed to create temp file: {}", e)))?;
    file.write_all(bytes)
        .map_err(|e| MigrateError::Io(format!("Failed to write state: {}", e)))?;
    file.sync_all()
        .map_err(|e| MigrateError::Io(format!("Failed to sync state: {}", e)))?;
    fs::rename(&temp_path, path)
        .map_err(|e| MigrateError::Io(format!("Failed to rename state: {}", e)))?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        let path = self.path.clone();
        let bytes = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
            if !path.exists() {
                return Ok(None);
            }
            fs::read(&path)
                .map(Some)
                .map_err(|e| MigrateError::Io(format!("Failed to read state: {}", e)))
        })
        .await
        .map_err(|e| MigrateError::Io(e.to_string()))??;

        match bytes {
            Some(bytes) => {
                let state: PersistedState = serde_json::from_slice(&bytes)?;
                state.check_version().map(Some)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let mut state = state.clone();
        state.saved_at = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| MigrateError::Io(e.to_string()))??;
        debug!(path = %self.path.display(), "state checkpoint written");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Process-local store. Clones share the same document, which lets a test
/// drop a migrator and open a new one over what the first one persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Option<PersistedState>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(state))),
        }
    }

    pub async fn snapshot(&self) -> Option<PersistedState> {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, state: &PersistedState) -> Result<()> {
        let mut state = state.clone();
        state.saved_at = Some(Utc::now());
        *self.inner.lock().await = Some(state);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
