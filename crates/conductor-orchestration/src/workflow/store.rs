//! Persistence of workflow states between pause and resume.
//!
//! - **InMemoryCheckpointStore**: process-local, for tests and single-process hosts
//! - **FileCheckpointStore**: one JSON file per run id

use async_trait::async_trait;
use conductor_core::validate_id;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::state::WorkflowState;
use crate::error::{OrchestrationError, OrchestrationResult};

/// Storage for serialized [`WorkflowState`]s keyed by run id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or replace the state of `state.run_id`.
    async fn save(&self, state: &WorkflowState) -> OrchestrationResult<()>;

    async fn load(&self, run_id: &str) -> OrchestrationResult<Option<WorkflowState>>;

    /// Returns whether anything was removed.
    async fn delete(&self, run_id: &str) -> OrchestrationResult<bool>;

    /// Stored run ids, sorted.
    async fn list(&self) -> OrchestrationResult<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    states: RwLock<HashMap<String, WorkflowState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> OrchestrationResult<()> {
        self.states
            .write()
            .await
            .insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> OrchestrationResult<Option<WorkflowState>> {
        Ok(self.states.read().await.get(run_id).cloned())
    }

    async fn delete(&self, run_id: &str) -> OrchestrationResult<bool> {
        Ok(self.states.write().await.remove(run_id).is_some())
    }

    async fn list(&self) -> OrchestrationResult<Vec<String>> {
        let mut ids: Vec<String> = self.states.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Stores each run as `<directory>/<run_id>.json`, written atomically via a
/// temporary file and rename.
#[derive(Debug)]
pub struct FileCheckpointStore {
    directory: PathBuf,
}

impl FileCheckpointStore {
    /// Creates the directory if it doesn't exist.
    pub fn new(directory: impl Into<PathBuf>) -> OrchestrationResult<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory).map_err(storage_error)?;
        info!(directory = %directory.display(), "Created file checkpoint store");
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &std::path::Path {
        &self.directory
    }

    fn run_path(&self, run_id: &str) -> OrchestrationResult<PathBuf> {
        validate_id(run_id)
            .map_err(|e| OrchestrationError::Storage(format!("invalid run id '{}': {}", run_id, e)))?;
        Ok(self.directory.join(format!("{}.json", run_id)))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &WorkflowState) -> OrchestrationResult<()> {
        let path = self.run_path(&state.run_id)?;
        let content = serde_json::to_string_pretty(state).map_err(storage_error)?;

        let temp_path = path.with_extension("json.tmp");
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::write(&temp_path, &content)?;
            std::fs::rename(&temp_path, &target)
        })
        .await
        .map_err(storage_error)?
        .map_err(storage_error)?;

        debug!(run_id = %state.run_id, path = %path.display(), "Saved workflow state");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> OrchestrationResult<Option<WorkflowState>> {
        let path = self.run_path(run_id)?;
        let content = tokio::task::spawn_blocking(move || {
            match std::fs::read_to_string(&path) {
                Ok(content) => Ok(Some(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(storage_error)?
        .map_err(storage_error)?;

        content
            .map(|c| WorkflowState::from_json(&c).map_err(storage_error))
            .transpose()
    }

    async fn delete(&self, run_id: &str) -> OrchestrationResult<bool> {
        let path = self.run_path(run_id)?;
        let removed = tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        })
        .await
        .map_err(storage_error)?
        .map_err(storage_error)?;

        if removed {
            debug!(run_id = %run_id, "Deleted workflow state");
        }
        Ok(removed)
    }

    async fn list(&self) -> OrchestrationResult<Vec<String>> {
        let directory = self.directory.clone();
        let mut ids = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<String>> {
            let mut ids = Vec::new();
            for entry in std::fs::read_dir(&directory)?.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "json")
                    && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                {
                    ids.push(stem.to_string());
                }
            }
            Ok(ids)
        })
        .await
        .map_err(storage_error)?
        .map_err(storage_error)?;

        ids.sort();
        Ok(ids)
    }
}

fn storage_error(e: impl std::fmt::Display) -> OrchestrationError {
    OrchestrationError::Storage(e.to_string())
}
