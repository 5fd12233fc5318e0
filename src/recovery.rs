//! Minimal recovery bookkeeping for unclean shutdowns.
//!
//! The orchestrator does not persist task or flow state across restarts
//! (spec.md Non-goals) — the one thing it does persist is the list of
//! Sandbox Gateway instances a task had open, so a fresh process can ask the
//! (out-of-scope) Sandbox Gateway to reclaim them instead of leaking
//! containers/VMs forever.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSandboxInstance {
    pub task_id: Uuid,
    pub sandbox_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecoveryManifest {
    pub open_sandboxes: Vec<OpenSandboxInstance>,
}

pub struct RecoveryStore {
    path: PathBuf,
}

impl RecoveryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn write(&self, manifest: &RecoveryManifest) -> Result<(), std::io::Error> {
        let json = serde_json::to_vec_pretty(manifest).unwrap_or_default();
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await
    }

    /// Reads a previously written manifest, or an empty one if none exists
    /// (a clean prior shutdown, or a first run).
    pub async fn read(&self) -> Result<RecoveryManifest, std::io::Error> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(RecoveryManifest::default()),
            Err(err) => Err(err),
        }
    }

    pub async fn clear(&self) -> Result<(), std::io::Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
