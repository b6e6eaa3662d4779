//! Durable per-run checkpoints
//!
//! One JSON record per run id, containing the full shared state snapshot and
//! the name of the step to resume into. Written before every suspension so a
//! separate process invocation can pick the run back up.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::state::SharedState;

/// A durable snapshot of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    /// Name of the step the engine re-enters on resume
    pub resume_step: String,
    pub saved_at: DateTime<Utc>,
    pub state: SharedState,
}

/// Filesystem-backed checkpoint store, one file per run id
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).context("Failed to create checkpoint directory")?;
        Ok(Self { dir })
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    /// Persist the state plus resume point, replacing any prior record for
    /// the run.
    pub fn save(&self, resume_step: &str, state: &SharedState) -> Result<()> {
        let checkpoint = Checkpoint {
            run_id: state.run_id.clone(),
            resume_step: resume_step.to_string(),
            saved_at: Utc::now(),
            state: state.clone(),
        };
        let contents = serde_json::to_string_pretty(&checkpoint)
            .context("Failed to serialize checkpoint")?;
        let path = self.path_for(&state.run_id);
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write checkpoint {}", path.display()))?;
        debug!(run_id = %state.run_id, resume_step, "checkpoint saved");
        Ok(())
    }

    /// Load the checkpoint for a run id.
    pub fn load(&self, run_id: &str) -> Result<Checkpoint> {
        let path = self.path_for(run_id);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("No checkpoint found for run '{}'", run_id))?;
        serde_json::from_str(&contents).context("Failed to parse checkpoint")
    }

    /// Remove a run's checkpoint (abandoning the run).
    pub fn delete(&self, run_id: &str) -> Result<()> {
        let path = self.path_for(run_id);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete checkpoint {}", path.display()))?;
        }
        Ok(())
    }

    /// List run ids with stored checkpoints.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut run_ids = Vec::new();
        for entry in fs::read_dir(&self.dir).context("Failed to read checkpoint directory")? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    run_ids.push(stem.to_string());
                }
            }
        }
        run_ids.sort();
        Ok(run_ids)
    }
}
