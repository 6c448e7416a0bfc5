//! Outline stage: topic (or a rough outline) into a structured teaching outline.

use std::sync::Arc;

use async_trait::async_trait;

use slidecast_llm::{LlmClient, Request};
use slidecast_types::{Result, RunState, SlidecastError, StageId, StateField, StateUpdate};

use crate::retry::{retry_transient, RetryPolicy};
use crate::stage::Stage;

#[async_trait]
pub trait OutlineWriter: Send + Sync {
    async fn write_outline(&self, subject: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// LlmOutlineWriter
// ---------------------------------------------------------------------------

pub struct LlmOutlineWriter {
    client: Arc<LlmClient>,
    model: String,
    retry: RetryPolicy,
}

impl LlmOutlineWriter {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            model: model.into(),
            retry,
        }
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let request = Request::new(&self.model)
            .system("You plan short narrated teaching presentations.")
            .user(prompt)
            .temperature(0.7);
        let response =
            retry_transient(&self.retry, "outline", || self.client.complete(&request)).await?;
        let text = response.text.trim().to_string();
        if text.is_empty() {
            return Err(SlidecastError::Other("model returned an empty outline".into()));
        }
        Ok(text)
    }
}

fn detailed_prompt(subject: &str) -> String {
    format!(
        "Write a teaching outline for a short narrated presentation on: {subject}\n\n\
         Use markdown. Give a one-paragraph overview, two or three learning objectives, \
         prerequisites, then numbered sections with three to five bullet points each. \
         Finish with a short summary section."
    )
}

fn fallback_prompt(subject: &str) -> String {
    format!(
        "Create a simple outline for a presentation about {subject}. \
         List 6-8 main sections, each with 2-3 bullet points."
    )
}

/// Wrap generated outline text with the document heading.
pub fn format_outline(subject: &str, body: &str) -> String {
    format!(
        "# Presentation Outline\n\n**Topic:** {}\n\n{}",
        subject.trim(),
        body.trim()
    )
}

#[async_trait]
impl OutlineWriter for LlmOutlineWriter {
    async fn write_outline(&self, subject: &str) -> Result<String> {
        let body = match self.generate(detailed_prompt(subject)).await {
            Ok(text) => text,
            Err(e) if !e.is_terminal() => {
                tracing::warn!(error = %e, "Outline generation failed, trying simpler prompt");
                self.generate(fallback_prompt(subject)).await?
            }
            Err(e) => return Err(e),
        };
        Ok(format_outline(subject, &body))
    }
}

// ---------------------------------------------------------------------------
// OutlineStage
// ---------------------------------------------------------------------------

pub struct OutlineStage {
    writer: Arc<dyn OutlineWriter>,
}

impl OutlineStage {
    pub fn new(writer: Arc<dyn OutlineWriter>) -> Self {
        Self { writer }
    }
}

/// The topic when given, otherwise an existing outline to refine.
fn outline_subject(state: &RunState) -> Option<&str> {
    [state.topic.as_deref(), state.outline.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
}

#[async_trait]
impl Stage for OutlineStage {
    fn id(&self) -> StageId {
        StageId::Outline
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Topic, StateField::Outline]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Outline]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let subject = outline_subject(state).ok_or_else(|| SlidecastError::MissingArtifact {
            stage: StageId::Outline,
            artifact: "a topic or outline".into(),
        })?;
        tracing::info!(subject_len = subject.len(), "Generating outline");
        let outline = self.writer.write_outline(subject).await?;
        Ok(StateUpdate::new().outline(outline))
    }
}
