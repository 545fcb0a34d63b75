use crate::core::models::run::{PipelineRun, StageId, StageStatus};
use crate::engine::error::PersistenceError;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const STATE_FILE: &str = "pipeline_state.json";

/// Persists and loads per-stage completion status for one run directory.
///
/// Every write is atomic (write-temp-then-rename), so a crash mid-write
/// never corrupts the previous valid state. All stage transition helpers
/// save before returning: the on-disk state always reflects the last fully
/// applied transition.
pub struct CheckpointStore {
    state_path: PathBuf,
}

impl CheckpointStore {
    pub fn new(run_dir: &Path) -> Self {
        Self {
            state_path: run_dir.join(STATE_FILE),
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Loads the persisted run, or `None` when no state file exists yet.
    ///
    /// Any `Running` stage record is downgraded to `Pending`: no process
    /// survives a restart, so the stage will be re-run.
    pub fn load(&self) -> Result<Option<PipelineRun>, PersistenceError> {
        let text = match fs::read_to_string(&self.state_path) {
            Ok(text) => text,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.state_path.display().to_string(),
                    source,
                });
            }
        };

        let mut run: PipelineRun =
            serde_json::from_str(&text).map_err(|source| PersistenceError::Corrupt {
                path: self.state_path.display().to_string(),
                source,
            })?;
        run.downgrade_running();
        debug!(path = %self.state_path.display(), "Loaded pipeline state");
        Ok(Some(run))
    }

    /// Atomically persists `run`.
    pub fn save(&self, run: &PipelineRun) -> Result<(), PersistenceError> {
        let write_err = |source: std::io::Error| PersistenceError::Write {
            path: self.state_path.display().to_string(),
            source,
        };

        if let Some(parent) = self.state_path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(run).map_err(|source| {
            // Serialization of an in-memory run only fails on pathological
            // inputs, but it must still surface as a persistence failure.
            PersistenceError::Write {
                path: self.state_path.display().to_string(),
                source: std::io::Error::other(source),
            }
        })?;

        let tmp_path = self.state_path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(write_err)?;
        fs::rename(&tmp_path, &self.state_path).map_err(write_err)?;
        Ok(())
    }

    /// Marks `stage` as `Running` and persists.
    pub fn mark_started(
        &self,
        run: &mut PipelineRun,
        stage: &StageId,
    ) -> Result<(), PersistenceError> {
        let record = run.stage_mut(stage);
        record.status = StageStatus::Running;
        record.failure = None;
        record.timestamp = Some(Utc::now());
        self.save(run)
    }

    /// Marks `stage` as `Completed` with its output artifacts and persists.
    pub fn mark_completed(
        &self,
        run: &mut PipelineRun,
        stage: &StageId,
        artifacts: Vec<PathBuf>,
    ) -> Result<(), PersistenceError> {
        let record = run.stage_mut(stage);
        record.status = StageStatus::Completed;
        record.artifacts = artifacts;
        record.failure = None;
        record.timestamp = Some(Utc::now());
        self.save(run)
    }

    /// Marks `stage` as `Failed` with a diagnostic and persists.
    pub fn mark_failed(
        &self,
        run: &mut PipelineRun,
        stage: &StageId,
        reason: impl Into<String>,
    ) -> Result<(), PersistenceError> {
        let reason = reason.into();
        warn!(stage = %stage, %reason, "Stage failed");
        let record = run.stage_mut(stage);
        record.status = StageStatus::Failed;
        record.artifacts.clear();
        record.failure = Some(reason);
        record.timestamp = Some(Utc::now());
        self.save(run)
    }
}
