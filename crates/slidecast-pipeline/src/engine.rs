//! Run executor: drives the stage graph from the entry stage to the end.
//!
//! Each stage sees the current [`RunState`], returns a [`StateUpdate`], and the
//! executor checks the update against the stage's declared writes before
//! merging it and following the successor edge.

use std::path::PathBuf;
use std::time::Instant;

use slidecast_types::{Result, RunState, SlidecastError, StageId, StateUpdate};

use crate::checkpoint::{save_checkpoint, RunCheckpoint};
use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::{entry_stage, successor};
use crate::stage::StageRegistry;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Owns the stage registry and drives graph traversal.
pub struct PipelineExecutor {
    registry: StageRegistry,
    events: EventEmitter,
    checkpoint_dir: Option<PathBuf>,
}

/// The result of a completed run.
#[derive(Debug)]
pub struct PipelineResult {
    pub state: RunState,
    pub completed_stages: Vec<StageId>,
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    pub fn new(registry: StageRegistry) -> Self {
        Self {
            registry,
            events: EventEmitter::default(),
            checkpoint_dir: None,
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Save a checkpoint under `dir` after every merged stage.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Run from the entry stage selected by the state's mode.
    pub async fn run(&self, state: RunState) -> Result<PipelineResult> {
        let entry = entry_stage(&state);
        self.run_from(state, entry, Vec::new()).await
    }

    /// Continue a checkpointed run at its next stage.
    pub async fn resume(&self, checkpoint: RunCheckpoint) -> Result<PipelineResult> {
        match checkpoint.next_stage {
            Some(next) => {
                tracing::info!(stage = %next, "Resuming from checkpoint");
                self.run_from(checkpoint.state, next, checkpoint.completed_stages)
                    .await
            }
            None => Ok(PipelineResult {
                state: checkpoint.state,
                completed_stages: checkpoint.completed_stages,
            }),
        }
    }

    /// Run the chain of stages starting at `start`.
    ///
    /// A stage error ends the run with [`SlidecastError::RunFailed`], which
    /// carries the state as it was after the last successful merge.
    pub async fn run_from(
        &self,
        mut state: RunState,
        start: StageId,
        mut completed: Vec<StageId>,
    ) -> Result<PipelineResult> {
        let run_id = state.run_id.to_string();
        let run_started = Instant::now();
        tracing::info!(run_id = %run_id, mode = %state.mode, entry = %start, "Run started");
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            mode: state.mode,
            entry: start,
        });

        let mut current = Some(start);
        while let Some(id) = current {
            let stage_started = Instant::now();
            let update = match self.run_stage(id, &state).await {
                Ok(update) => update,
                Err(e) => {
                    tracing::error!(run_id = %run_id, stage = %id, error = %e, "Stage failed");
                    self.events.emit(PipelineEvent::StageFailed {
                        stage: id,
                        error: e.to_string(),
                    });
                    self.events.emit(PipelineEvent::RunFailed {
                        run_id: run_id.clone(),
                        stage: id,
                        error: e.to_string(),
                    });
                    self.checkpoint(&state, &completed, Some(id)).await;
                    return Err(SlidecastError::RunFailed {
                        stage: id,
                        source: Box::new(e),
                        state: Box::new(state),
                    });
                }
            };

            let written = state.merge(update);
            completed.push(id);
            let duration_ms = stage_started.elapsed().as_millis() as u64;
            tracing::info!(
                stage = %id,
                version = state.version,
                written = ?written,
                duration_ms,
                "Stage completed"
            );
            self.events.emit(PipelineEvent::StageCompleted {
                stage: id,
                written,
                version: state.version,
                duration_ms,
            });

            current = successor(id);
            self.checkpoint(&state, &completed, current).await;
        }

        let duration_ms = run_started.elapsed().as_millis() as u64;
        tracing::info!(run_id = %run_id, stages = completed.len(), duration_ms, "Run completed");
        self.events.emit(PipelineEvent::RunCompleted {
            run_id,
            completed_stages: completed.clone(),
            duration_ms,
        });

        Ok(PipelineResult {
            state,
            completed_stages: completed,
        })
    }

    async fn run_stage(&self, id: StageId, state: &RunState) -> Result<StateUpdate> {
        let stage = self
            .registry
            .get(id)
            .ok_or_else(|| SlidecastError::StageFailed {
                stage: id,
                message: "no stage registered".into(),
            })?;

        tracing::info!(stage = %id, reads = ?stage.reads(), "Stage started");
        self.events.emit(PipelineEvent::StageStarted { stage: id });

        let update = stage.execute(state).await?;
        if let Some(field) = stage.undeclared_writes(&update).first() {
            return Err(SlidecastError::UndeclaredWrite {
                stage: id,
                field: *field,
            });
        }
        Ok(update)
    }

    async fn checkpoint(&self, state: &RunState, completed: &[StageId], next: Option<StageId>) {
        let Some(dir) = &self.checkpoint_dir else {
            return;
        };
        let checkpoint = RunCheckpoint::new(state.clone(), completed.to_vec(), next);
        match save_checkpoint(&checkpoint, dir).await {
            Ok(_) => {
                if let Some(stage) = completed.last() {
                    self.events.emit(PipelineEvent::CheckpointSaved {
                        stage: *stage,
                        version: state.version,
                    });
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to save checkpoint"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
