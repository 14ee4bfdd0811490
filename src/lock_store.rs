use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::{LockStoreConfig, LockStoreKind};
use crate::error::LockStoreError;

/// Whole-blob persistence for one session's lock state. The blob is opaque
/// here; `LockRegistry` owns its format.
#[async_trait]
pub trait LockStore: Send + Sync + Debug {
    async fn load(&self, session_id: Uuid) -> Result<Option<String>, LockStoreError>;
    async fn save(&self, session_id: Uuid, blob: &str) -> Result<(), LockStoreError>;
    async fn remove(&self, session_id: Uuid) -> Result<(), LockStoreError>;
}

/// One `<session id>.json` file per session under a directory.
#[derive(Debug)]
pub struct FileLockStore {
    directory: PathBuf,
}

impl FileLockStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.directory.join(format!("{session_id}.json"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LockStoreError {
    LockStoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl LockStore for FileLockStore {
    async fn load(&self, session_id: Uuid) -> Result<Option<String>, LockStoreError> {
        let path = self.path_for(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn save(&self, session_id: Uuid, blob: &str) -> Result<(), LockStoreError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| io_error(&self.directory, e))?;

        // Readers never observe a half-written blob.
        let path = self.path_for(session_id);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, blob)
            .await
            .map_err(|e| io_error(&staging, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn remove(&self, session_id: Uuid) -> Result<(), LockStoreError> {
        let path = self.path_for(session_id);
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(io_error(&path, e)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryLockStore {
    blobs: RwLock<HashMap<Uuid, String>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn load(&self, session_id: Uuid) -> Result<Option<String>, LockStoreError> {
        Ok(self.blobs.read().await.get(&session_id).cloned())
    }

    async fn save(&self, session_id: Uuid, blob: &str) -> Result<(), LockStoreError> {
        self.blobs
            .write()
            .await
            .insert(session_id, blob.to_string());
        Ok(())
    }

    async fn remove(&self, session_id: Uuid) -> Result<(), LockStoreError> {
        self.blobs.write().await.remove(&session_id);
        Ok(())
    }
}

pub fn build_lock_store(config: &LockStoreConfig) -> Arc<dyn LockStore> {
    match config.kind {
        LockStoreKind::File => {
            tracing::info!(lock_store.directory = %config.directory.display(), "Using file lock store");
            Arc::new(FileLockStore::new(config.directory.clone()))
        }
        LockStoreKind::Memory => {
            tracing::info!("Using in-memory lock store");
            Arc::new(MemoryLockStore::new())
        }
    }
}
