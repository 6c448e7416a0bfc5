//! Stage graph executor and stages for narrated slide presentations.
//!
//! This crate drives a run from topic or outline through script generation,
//! the review loop, slide rendering, narration, and the final synchronized
//! video. Stages are routed by run mode, checkpointed between steps, and
//! report progress through [`EventEmitter`].

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod evaluation;
pub mod events;
pub mod graph;
pub mod pool;
pub mod process;
pub mod retry;
pub mod stage;
pub mod stages;
pub mod sync;

pub use checkpoint::{
    checkpoint_path, clear_checkpoint, load_checkpoint, load_state_file, save_checkpoint,
    RunCheckpoint,
};
pub use config::{NarrationStrategy, PipelineConfig};
pub use engine::{PipelineExecutor, PipelineResult};
pub use evaluation::{
    decide, EvaluationLoop, LoopDecision, LoopPhase, LoopReport, QualityChecker, ScriptOptimiser,
    DEFAULT_MAX_ITERATIONS,
};
pub use events::{EventEmitter, PipelineEvent};
pub use graph::{entry_stage, stage_plan, stages_from, successor};
pub use pool::{PoolLimits, ServicePool};
pub use process::{run_tool, CommandOutput};
pub use retry::{retry_transient, BackoffPolicy, RetryPolicy};
pub use stage::{DynStage, Stage, StageRegistry};
pub use stages::{default_registry, Services};
pub use sync::{build_sync_plan, BackgroundSlice, PageShortfall, SyncEntry, SyncPlan};
