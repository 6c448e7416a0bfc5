//! Run event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (the CLI progress log, tests) can follow a run without coupling
//! to the executor.

use serde::{Deserialize, Serialize};

use slidecast_types::{RunMode, StageId, StateField};

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        mode: RunMode,
        entry: StageId,
    },
    RunCompleted {
        run_id: String,
        completed_stages: Vec<StageId>,
        duration_ms: u64,
    },
    RunFailed {
        run_id: String,
        stage: StageId,
        error: String,
    },
    StageStarted {
        stage: StageId,
    },
    StageCompleted {
        stage: StageId,
        written: Vec<StateField>,
        version: u64,
        duration_ms: u64,
    },
    StageFailed {
        stage: StageId,
        error: String,
    },
    EvaluationAttempted {
        iteration: u32,
        passed: bool,
        feedback: String,
    },
    OptimisationRequested {
        iteration: u32,
    },
    CheckpointSaved {
        stage: StageId,
        version: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
