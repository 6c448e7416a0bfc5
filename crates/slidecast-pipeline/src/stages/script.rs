//! Script stage: outline or topic into a repaired [`Presentation`].

use std::sync::Arc;

use async_trait::async_trait;

use slidecast_llm::{LlmClient, Request};
use slidecast_types::{
    Audience, EvaluationState, Presentation, Result, RunState, SlidecastError, StageId,
    StateField, StateUpdate,
};

use crate::retry::{retry_transient, RetryPolicy};
use crate::stage::Stage;

#[async_trait]
pub trait ScriptWriter: Send + Sync {
    async fn write_script(&self, source: &str, audience: Audience) -> Result<Presentation>;
}

// ---------------------------------------------------------------------------
// LlmScriptWriter
// ---------------------------------------------------------------------------

/// Shape of the JSON the generator is asked for.
pub(crate) const SCRIPT_SCHEMA_HINT: &str = r#"{
  "presentation_title": string,
  "module": string,
  "episode": string,
  "learning_objectives": [string],
  "duration": string,
  "outline": [string],
  "meta_tags": [string],
  "prerequisites": string,
  "slides": [{
    "type": "title_slide" | "content_slide",
    "title": string,
    "content": [string],
    "narration": [string],
    "image_prompt": string,
    "video_prompt": string,
    "is_video_slide": bool,
    "layout": "standard" | "image_left"
  }]
}"#;

pub struct LlmScriptWriter {
    client: Arc<LlmClient>,
    model: String,
    retry: RetryPolicy,
}

impl LlmScriptWriter {
    pub fn new(client: Arc<LlmClient>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            model: model.into(),
            retry,
        }
    }
}

fn script_prompt(source: &str, audience: Audience) -> String {
    format!(
        "Write the script for a narrated slide presentation for a {audience} audience, \
         based on this material:\n\n{source}\n\n\
         Return only JSON of this shape:\n{SCRIPT_SCHEMA_HINT}\n\n\
         Rules: 8 to 12 slides, the first a title slide. Each slide has at most four short \
         bullets. `narration` has exactly one more sentence group than `content`: the first \
         introduces the slide and each following entry narrates the matching bullet. \
         Mark at most two slides with is_video_slide and give them a video_prompt."
    )
}

#[async_trait]
impl ScriptWriter for LlmScriptWriter {
    async fn write_script(&self, source: &str, audience: Audience) -> Result<Presentation> {
        let request = Request::new(&self.model)
            .system("You write scripts for short narrated teaching videos.")
            .user(script_prompt(source, audience))
            .json()
            .temperature(0.7);
        let response =
            retry_transient(&self.retry, "script", || self.client.complete(&request)).await?;
        Presentation::from_generated_text(&response.text)
    }
}

// ---------------------------------------------------------------------------
// ScriptStage
// ---------------------------------------------------------------------------

pub struct ScriptStage {
    writer: Arc<dyn ScriptWriter>,
}

impl ScriptStage {
    pub fn new(writer: Arc<dyn ScriptWriter>) -> Self {
        Self { writer }
    }
}

/// An existing outline wins over the bare topic.
fn script_source(state: &RunState) -> Option<&str> {
    [state.outline.as_deref(), state.topic.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
}

#[async_trait]
impl Stage for ScriptStage {
    fn id(&self) -> StageId {
        StageId::Script
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Topic, StateField::Outline]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Presentation, StateField::Evaluation]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let source = script_source(state).ok_or_else(|| SlidecastError::MissingArtifact {
            stage: StageId::Script,
            artifact: "a topic or outline".into(),
        })?;

        let mut presentation = self.writer.write_script(source, state.audience).await?;
        presentation.repair();
        tracing::info!(
            slides = presentation.slides.len(),
            pages = presentation.total_pages(),
            "Script generated"
        );

        // A fresh script starts its review from scratch.
        Ok(StateUpdate::new()
            .presentation(presentation)
            .evaluation(EvaluationState::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidecast_types::{RunMode, Slide};

    struct Canned;

    #[async_trait]
    impl ScriptWriter for Canned {
        async fn write_script(&self, source: &str, _audience: Audience) -> Result<Presentation> {
            Ok(Presentation {
                presentation_title: source.to_string(),
                slides: vec![Slide {
                    title: "Intro".into(),
                    content: vec!["a".into(), "b".into()],
                    narration: vec!["Hello.".into()],
                    ..Default::default()
                }],
                ..Default::default()
            })
        }
    }

    struct Prose;

    #[async_trait]
    impl ScriptWriter for Prose {
        async fn write_script(&self, _source: &str, _audience: Audience) -> Result<Presentation> {
            Presentation::from_generated_text("Sure! Here is your script about owls.")
        }
    }

    #[tokio::test]
    async fn script_is_repaired_and_evaluation_reset() {
        let stage = ScriptStage::new(Arc::new(Canned));
        let mut state = RunState::new(RunMode::ScriptOnly).with_topic("Owls");
        state.evaluation.iteration = 3;

        let update = stage.execute(&state).await.unwrap();
        let presentation = update.presentation.unwrap();
        assert_eq!(presentation.presentation_title, "Owls");
        assert_eq!(presentation.slides[0].narration.len(), 3);
        assert_eq!(update.evaluation, Some(EvaluationState::default()));
    }

    #[tokio::test]
    async fn outline_preferred_as_source() {
        let stage = ScriptStage::new(Arc::new(Canned));
        let state = RunState::new(RunMode::ScriptOnly)
            .with_topic("Owls")
            .with_outline("1. Night hunters");
        let update = stage.execute(&state).await.unwrap();
        assert_eq!(update.presentation.unwrap().presentation_title, "1. Night hunters");
    }

    #[tokio::test]
    async fn unparseable_output_is_error() {
        let stage = ScriptStage::new(Arc::new(Prose));
        let state = RunState::new(RunMode::ScriptOnly).with_topic("Owls");
        assert!(stage.execute(&state).await.is_err());
    }

    #[test]
    fn prompt_mentions_audience_and_source() {
        let prompt = script_prompt("Volcanoes", Audience::Kids);
        assert!(prompt.contains("kids"));
        assert!(prompt.contains("Volcanoes"));
        assert!(prompt.contains("\"slides\""));
    }
}
