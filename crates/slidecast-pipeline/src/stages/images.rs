//! Images stage: one still image or motion clip per slide.
//!
//! Failures are per slide and never fail the stage: a slide whose clip fails
//! falls back to a still image, and a slide whose image fails has none.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use slidecast_llm::GeminiMedia;
use slidecast_types::{
    Audience, Result, RunState, Slide, SlidecastError, StageId, StateField, StateUpdate,
};

use crate::pool::ServicePool;
use crate::retry::{retry_transient, RetryPolicy};
use crate::stage::Stage;

#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Generate a still image; the returned path may differ in extension from `dest`.
    async fn image(&self, prompt: &str, dest: &Path) -> Result<PathBuf>;

    async fn video(&self, prompt: &str, dest: &Path) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// GeminiMediaSource
// ---------------------------------------------------------------------------

pub struct GeminiMediaSource {
    media: GeminiMedia,
    retry: RetryPolicy,
}

impl GeminiMediaSource {
    pub fn new(media: GeminiMedia, retry: RetryPolicy) -> Self {
        Self { media, retry }
    }
}

#[async_trait]
impl MediaSource for GeminiMediaSource {
    async fn image(&self, prompt: &str, dest: &Path) -> Result<PathBuf> {
        retry_transient(&self.retry, "image", || self.media.generate_image(prompt, dest)).await
    }

    async fn video(&self, prompt: &str, dest: &Path) -> Result<PathBuf> {
        retry_transient(&self.retry, "video", || self.media.generate_video(prompt, dest)).await
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

fn dedicated_video_prompt(slide: &Slide) -> Option<&str> {
    slide
        .video_prompt
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Whether the slide carries anything to generate media from.
fn wants_media(slide: &Slide) -> bool {
    !slide.image_prompt.trim().is_empty()
        || (slide.is_video_slide && dedicated_video_prompt(slide).is_some())
}

/// Still-image prompt; a motion slide with no image prompt reuses its video prompt.
pub fn image_prompt(style: &str, slide: &Slide) -> String {
    let subject = match slide.image_prompt.trim() {
        "" => dedicated_video_prompt(slide).unwrap_or_default(),
        prompt => prompt,
    };
    format!("{style} {subject}")
}

pub fn video_prompt(style: &str, slide: &Slide) -> String {
    let subject = dedicated_video_prompt(slide).unwrap_or_else(|| slide.image_prompt.trim());
    format!("{style} {subject}. Cinematic, smooth motion, high quality.")
}

/// Resolve media for one slide. Returns `None` when nothing could be made.
async fn slide_media(
    source: Arc<dyn MediaSource>,
    slide: Slide,
    audience: Audience,
    dest: PathBuf,
    index: usize,
) -> Option<PathBuf> {
    let style = audience.image_style();
    if slide.is_video_slide {
        match source.video(&video_prompt(style, &slide), &dest).await {
            Ok(path) => return Some(path),
            Err(e) => {
                tracing::warn!(
                    slide = index,
                    error = %e,
                    "Clip generation failed, falling back to still image"
                );
            }
        }
    }
    match source.image(&image_prompt(style, &slide), &dest).await {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(
                slide = index,
                error = %e,
                "Image generation failed, slide keeps no image"
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// ImagesStage
// ---------------------------------------------------------------------------

pub struct ImagesStage {
    source: Arc<dyn MediaSource>,
    pool: ServicePool,
    images_dir: PathBuf,
}

impl ImagesStage {
    pub fn new(
        source: Arc<dyn MediaSource>,
        pool: ServicePool,
        images_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            pool,
            images_dir: images_dir.into(),
        }
    }
}

#[async_trait]
impl Stage for ImagesStage {
    fn id(&self) -> StageId {
        StageId::Images
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Presentation]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Presentation]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let mut presentation = state
            .presentation
            .clone()
            .ok_or_else(|| SlidecastError::MissingArtifact {
                stage: StageId::Images,
                artifact: "a script".into(),
            })?;
        tokio::fs::create_dir_all(&self.images_dir).await?;

        let wanted: Vec<usize> = presentation
            .slides
            .iter()
            .enumerate()
            .filter(|(_, s)| wants_media(s))
            .map(|(i, _)| i)
            .collect();
        tracing::info!(slides = wanted.len(), "Generating slide media");

        let jobs: Vec<_> = wanted
            .iter()
            .map(|&index| {
                let source = self.source.clone();
                let slide = presentation.slides[index].clone();
                let audience = state.audience;
                let dest = self.images_dir.join(format!("slide_{index}"));
                move || async move {
                    Ok::<_, SlidecastError>(slide_media(source, slide, audience, dest, index).await)
                }
            })
            .collect();

        let results = self.pool.run_all(jobs).await;
        for (index, result) in wanted.into_iter().zip(results) {
            match result {
                Ok(path) => presentation.slides[index].image_path = path,
                Err(e) => tracing::warn!(slide = index, error = %e, "Media worker failed"),
            }
        }

        Ok(StateUpdate::new().presentation(presentation))
    }
}
