//! Checkpoint save/restore for runs.
//!
//! After each merged stage the executor can persist a [`RunCheckpoint`] to
//! `<dir>/checkpoint.json`. A later run resumes from `next_stage` with the
//! saved state, or the state can be edited by hand and passed back in.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use slidecast_types::{Result, RunState, SlidecastError, StageId};

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Snapshot of a run after its last merged stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub state: RunState,
    pub completed_stages: Vec<StageId>,
    /// The stage to run next, or `None` when the run reached its end.
    pub next_stage: Option<StageId>,
    /// RFC 3339 timestamp of when the checkpoint was created.
    pub timestamp: String,
}

impl RunCheckpoint {
    pub fn new(
        state: RunState,
        completed_stages: Vec<StageId>,
        next_stage: Option<StageId>,
    ) -> Self {
        Self {
            state,
            completed_stages,
            next_stage,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub fn checkpoint_path(dir: &Path) -> PathBuf {
    dir.join(CHECKPOINT_FILE)
}

/// Save a checkpoint to `<dir>/checkpoint.json`, creating `dir` if needed.
pub async fn save_checkpoint(checkpoint: &RunCheckpoint, dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = checkpoint_path(dir);
    let json = serde_json::to_string_pretty(checkpoint)?;
    tokio::fs::write(&path, json).await?;
    tracing::debug!(path = %path.display(), version = checkpoint.state.version, "Checkpoint saved");
    Ok(path)
}

/// Load the checkpoint from `dir`, or `None` if there is none.
pub async fn load_checkpoint(dir: &Path) -> Result<Option<RunCheckpoint>> {
    let path = checkpoint_path(dir);
    if !tokio::fs::try_exists(&path).await? {
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(&path).await?;
    let checkpoint: RunCheckpoint = serde_json::from_str(&json)?;
    Ok(Some(checkpoint))
}

/// Delete the saved checkpoint, if any.
pub async fn clear_checkpoint(dir: &Path) -> Result<()> {
    let path = checkpoint_path(dir);
    if tokio::fs::try_exists(&path).await? {
        tokio::fs::remove_file(&path).await?;
    }
    Ok(())
}

/// Read a state file given on the command line.
///
/// Accepts either a full checkpoint or a bare serialised [`RunState`].
pub async fn load_state_file(path: &Path) -> Result<RunCheckpoint> {
    let json = tokio::fs::read_to_string(path).await?;
    let value: serde_json::Value = serde_json::from_str(&json)?;

    if value.get("state").is_some() && value.get("completed_stages").is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    if value.get("run_id").is_some() {
        let state: RunState = serde_json::from_value(value)?;
        return Ok(RunCheckpoint::new(state, Vec::new(), None));
    }
    Err(SlidecastError::Other(format!(
        "{} is neither a checkpoint nor a run state",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidecast_types::{RunMode, StateUpdate};

    fn sample_checkpoint() -> RunCheckpoint {
        let mut state = RunState::new(RunMode::ScriptOnly).with_topic("Glaciers");
        state.merge(StateUpdate::new().outline("1. Ice\n2. Motion"));
        RunCheckpoint::new(state, vec![StageId::Script], Some(StageId::Review))
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cp = sample_checkpoint();

        let path = save_checkpoint(&cp, dir.path()).await.unwrap();
        assert!(path.exists());

        let loaded = load_checkpoint(dir.path()).await.unwrap().unwrap();
        assert_eq!(loaded.state, cp.state);
        assert_eq!(loaded.completed_stages, vec![StageId::Script]);
        assert_eq!(loaded.next_stage, Some(StageId::Review));
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_checkpoint(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        save_checkpoint(&sample_checkpoint(), dir.path()).await.unwrap();
        clear_checkpoint(dir.path()).await.unwrap();
        assert!(!checkpoint_path(dir.path()).exists());
        // Clearing twice is fine.
        clear_checkpoint(dir.path()).await.unwrap();
    }

    #[tokio::test]
    async fn state_file_accepts_bare_run_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new(RunMode::VideoProduction).with_topic("Bees");
        let path = dir.path().join("approved.json");
        std::fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let cp = load_state_file(&path).await.unwrap();
        assert_eq!(cp.state, state);
        assert!(cp.completed_stages.is_empty());
        assert_eq!(cp.next_stage, None);
    }

    #[tokio::test]
    async fn state_file_accepts_checkpoint_and_rejects_other_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_checkpoint(&sample_checkpoint(), dir.path()).await.unwrap();
        let cp = load_state_file(&path).await.unwrap();
        assert_eq!(cp.next_stage, Some(StageId::Review));

        let other = dir.path().join("other.json");
        std::fs::write(&other, r#"{"slides": []}"#).unwrap();
        assert!(load_state_file(&other).await.is_err());
    }
}
