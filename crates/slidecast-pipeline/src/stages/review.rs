//! Review stage: the bounded evaluate/optimise loop over the current script.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use slidecast_llm::{LlmClient, Request};
use slidecast_types::{
    strip_code_fence, EvaluationResult, Presentation, Result, RunState, SlidecastError, StageId,
    StateField, StateUpdate,
};

use crate::evaluation::{EvaluationLoop, QualityChecker, ScriptOptimiser};
use crate::retry::{retry_transient, RetryPolicy};
use crate::stage::Stage;

const RUBRIC: &str = "\
Check the script against these rules:
1. Every narration sentence is under 80 characters.
2. Narration contains no arrows, dashes or symbols that cannot be read aloud.
3. Language is simple and each sentence is complete.
4. Each slide's narration introduces the slide, then covers its bullets in order.
5. Transitions between slides are smooth and explain why before how.
Reply with JSON {\"passed\": bool, \"feedback\": string}. When failing, name the slides and rules.";

// ---------------------------------------------------------------------------
// LlmQualityChecker
// ---------------------------------------------------------------------------

pub struct LlmQualityChecker {
    client: Arc<LlmClient>,
    model: String,
    retry: RetryPolicy,
}

impl LlmQualityChecker {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            model: model.into(),
            retry,
        }
    }
}

#[derive(Deserialize)]
struct Verdict {
    passed: bool,
    #[serde(default)]
    feedback: String,
}

/// Parse the checker's `{passed, feedback}` reply.
pub fn parse_verdict(text: &str) -> Result<EvaluationResult> {
    let verdict: Verdict = serde_json::from_str(strip_code_fence(text))?;
    Ok(EvaluationResult {
        passed: verdict.passed,
        feedback: verdict.feedback,
    })
}

#[async_trait]
impl QualityChecker for LlmQualityChecker {
    async fn check(&self, presentation: &Presentation) -> Result<EvaluationResult> {
        let script = serde_json::to_string_pretty(presentation)?;
        let request = Request::new(&self.model)
            .system("You are a strict reviewer of scripts for narrated teaching videos.")
            .user(format!("{RUBRIC}\n\nScript:\n{script}"))
            .json()
            .temperature(0.0);
        let response =
            retry_transient(&self.retry, "evaluate", || self.client.complete(&request)).await?;
        parse_verdict(&response.text)
    }
}

// ---------------------------------------------------------------------------
// LlmScriptOptimiser
// ---------------------------------------------------------------------------

pub struct LlmScriptOptimiser {
    client: Arc<LlmClient>,
    model: String,
    retry: RetryPolicy,
}

impl LlmScriptOptimiser {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            model: model.into(),
            retry,
        }
    }
}

#[async_trait]
impl ScriptOptimiser for LlmScriptOptimiser {
    async fn optimise(&self, presentation: &Presentation, feedback: &str) -> Result<Presentation> {
        let script = serde_json::to_string_pretty(presentation)?;
        let request = Request::new(&self.model)
            .system("You revise scripts for narrated teaching videos.")
            .user(format!(
                "Revise this script to address the reviewer feedback. Keep the same JSON \
                 shape and return only the JSON.\n\nFeedback:\n{feedback}\n\nScript:\n{script}"
            ))
            .json()
            .temperature(0.4);
        let response =
            retry_transient(&self.retry, "optimise", || self.client.complete(&request)).await?;
        Presentation::from_generated_text(&response.text)
    }
}

// ---------------------------------------------------------------------------
// ReviewStage
// ---------------------------------------------------------------------------

pub struct ReviewStage {
    evaluation: EvaluationLoop,
}

impl ReviewStage {
    pub fn new(evaluation: EvaluationLoop) -> Self {
        Self { evaluation }
    }
}

#[async_trait]
impl Stage for ReviewStage {
    fn id(&self) -> StageId {
        StageId::Review
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Presentation, StateField::Evaluation]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Presentation, StateField::Evaluation]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let presentation = state
            .presentation
            .clone()
            .ok_or_else(|| SlidecastError::MissingArtifact {
                stage: StageId::Review,
                artifact: "a script".into(),
            })?;

        let report = self.evaluation.run(presentation, &state.evaluation).await;
        tracing::info!(
            passed = report.evaluation.passed,
            iteration = report.evaluation.iteration,
            optimisations = report.optimisations,
            "Review finished"
        );
        Ok(StateUpdate::new()
            .presentation(report.presentation)
            .evaluation(report.evaluation))
    }
}
