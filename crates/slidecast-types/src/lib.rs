//! Shared types, errors, script model and run state for the slidecast pipeline.
//!
//! This crate provides the foundational types used across all other slidecast crates:
//! - `SlidecastError`: unified error taxonomy
//! - `Presentation` / `Slide`: the script model and its narration invariant
//! - `RunState` / `StateUpdate`: versioned state threaded through a run
//! - `EvaluationResult`: a single quality-check verdict

pub mod script;
pub mod state;

use std::path::PathBuf;

pub use script::{strip_code_fence, Presentation, Slide, SlideKind, SlideLayout};
pub use state::{
    AudioTrack, Audience, CompiledDeck, EvaluationResult, EvaluationState, RunMode, RunState,
    SlideAudio, StageId, StateField, StateUpdate,
};

/// Unified error type for all slidecast subsystems.
#[derive(Debug, thiserror::Error)]
pub enum SlidecastError {
    // === External service errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout { provider: String, timeout_ms: u64 },

    // === Pipeline errors ===
    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: StageId, message: String },

    #[error("Stage '{stage}' wrote undeclared field '{field}'")]
    UndeclaredWrite { stage: StageId, field: StateField },

    #[error("Stage '{stage}' requires {artifact}, which is missing")]
    MissingArtifact { stage: StageId, artifact: String },

    #[error("LaTeX compilation failed: {message}")]
    CompileFailed {
        message: String,
        log_path: Option<PathBuf>,
    },

    #[error("Run failed at stage '{stage}': {source}")]
    RunFailed {
        stage: StageId,
        source: Box<SlidecastError>,
        state: Box<RunState>,
    },

    // === External process errors ===
    #[error("{tool} exited with code {exit_code}: {message}")]
    CommandFailed {
        tool: String,
        exit_code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_ms}ms")]
    CommandTimeout { tool: String, timeout_ms: u64 },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SlidecastError {
    /// Returns `true` if the error is transient and the call may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SlidecastError::RateLimited { .. }
                | SlidecastError::RequestTimeout { .. }
                | SlidecastError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SlidecastError::AuthError { .. }
                | SlidecastError::CompileFailed { .. }
                | SlidecastError::UndeclaredWrite { .. }
        )
    }

    /// The stage a run-level failure is attributed to, if any.
    pub fn failed_stage(&self) -> Option<StageId> {
        match self {
            SlidecastError::RunFailed { stage, .. }
            | SlidecastError::StageFailed { stage, .. }
            | SlidecastError::MissingArtifact { stage, .. }
            | SlidecastError::UndeclaredWrite { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The last merged run state carried by a run-level failure.
    pub fn partial_state(&self) -> Option<&RunState> {
        match self {
            SlidecastError::RunFailed { state, .. } => Some(state),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, SlidecastError>`.
pub type Result<T> = std::result::Result<T, SlidecastError>;
