//! Durable correlation storage.
//!
//! The whole handshake hinges on this: between `persist` and `consume` the
//! initiating process may be killed, so the persisted map is the only state
//! that matters. `consume` is destructive by contract; a second consume for
//! the same flow key sees nothing.

use std::{collections::HashMap, path::PathBuf};

use error_stack::ResultExt;
use switch_env::logger;

use crate::{
    errors::{CustomResult, SwitchError},
    types::CorrelationState,
};

/// Keyed, durable, single-use correlation state.
///
/// Keys isolate unrelated flows; no handshake issues concurrent operations
/// for the same key (a new attempt is not started while one is
/// outstanding), but different keys may be touched concurrently.
#[async_trait::async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Write state for a flow, overwriting any previous entry for the key.
    async fn persist(
        &self,
        flow_key: &str,
        state: CorrelationState,
    ) -> CustomResult<(), SwitchError>;

    /// Read and invalidate the state for a flow. Returns `None` when nothing
    /// is persisted, including after a previous consume of the same key.
    async fn consume(&self, flow_key: &str) -> CustomResult<Option<CorrelationState>, SwitchError>;

    /// Drop the state for a flow without reading it, e.g. when a caller
    /// discards a pending flow before the actor returns.
    async fn remove(&self, flow_key: &str) -> CustomResult<(), SwitchError>;
}

/// Process-local store for tests and demos. Not durable.
#[derive(Debug, Default)]
pub struct InMemoryCorrelationStore {
    entries: tokio::sync::Mutex<HashMap<String, CorrelationState>>,
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn persist(
        &self,
        flow_key: &str,
        state: CorrelationState,
    ) -> CustomResult<(), SwitchError> {
        self.entries
            .lock()
            .await
            .insert(flow_key.to_string(), state);
        Ok(())
    }

    async fn consume(&self, flow_key: &str) -> CustomResult<Option<CorrelationState>, SwitchError> {
        Ok(self.entries.lock().await.remove(flow_key))
    }

    async fn remove(&self, flow_key: &str) -> CustomResult<(), SwitchError> {
        self.entries.lock().await.remove(flow_key);
        Ok(())
    }
}

/// File-backed store: the keyed map as one JSON document, replaced through a
/// temp file and an atomic rename so a crash never leaves a half-written
/// snapshot. Portable stand-in for a platform key-value store.
#[derive(Debug)]
pub struct FileCorrelationStore {
    path: PathBuf,
    guard: tokio::sync::Mutex<()>,
}

impl FileCorrelationStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            guard: tokio::sync::Mutex::new(()),
        }
    }

    async fn load(&self) -> CustomResult<HashMap<String, CorrelationState>, SwitchError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .change_context(SwitchError::StorageFailure)
                .attach_printable("Correlation snapshot is corrupt"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(error) => Err(error)
                .change_context(SwitchError::StorageFailure)
                .attach_printable("Failed to read the correlation snapshot"),
        }
    }

    async fn save(
        &self,
        entries: &HashMap<String, CorrelationState>,
    ) -> CustomResult<(), SwitchError> {
        let raw = serde_json::to_vec(entries).change_context(SwitchError::StorageFailure)?;

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, raw)
            .await
            .change_context(SwitchError::StorageFailure)
            .attach_printable("Failed to write the correlation snapshot")?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .change_context(SwitchError::StorageFailure)
            .attach_printable("Failed to replace the correlation snapshot")
    }
}

#[async_trait::async_trait]
impl CorrelationStore for FileCorrelationStore {
    async fn persist(
        &self,
        flow_key: &str,
        state: CorrelationState,
    ) -> CustomResult<(), SwitchError> {
        let _guard = self.guard.lock().await;
        let mut entries = self.load().await?;
        entries.insert(flow_key.to_string(), state);
        self.save(&entries).await
    }

    async fn consume(&self, flow_key: &str) -> CustomResult<Option<CorrelationState>, SwitchError> {
        let _guard = self.guard.lock().await;
        let mut entries = self.load().await?;
        let state = entries.remove(flow_key);
        if state.is_some() {
            self.save(&entries).await?;
        } else {
            logger::debug!(flow_key, "No correlation state to consume");
        }
        Ok(state)
    }

    async fn remove(&self, flow_key: &str) -> CustomResult<(), SwitchError> {
        let _guard = self.guard.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(flow_key).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }
}
