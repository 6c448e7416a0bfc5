//! Narration stage: text-to-speech audio per slide (or per reveal step).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use slidecast_llm::GeminiMedia;
use slidecast_types::{
    AudioTrack, Audience, Result, RunState, Slide, SlideAudio, SlidecastError, StageId,
    StateField, StateUpdate,
};

use crate::config::NarrationStrategy;
use crate::pool::ServicePool;
use crate::retry::{retry_transient, RetryPolicy};
use crate::stage::Stage;

#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, audience: Audience, dest: &Path) -> Result<AudioTrack>;
}

// ---------------------------------------------------------------------------
// GeminiNarrator
// ---------------------------------------------------------------------------

pub struct GeminiNarrator {
    media: GeminiMedia,
    retry: RetryPolicy,
}

impl GeminiNarrator {
    pub fn new(media: GeminiMedia, retry: RetryPolicy) -> Self {
        Self { media, retry }
    }
}

#[async_trait]
impl NarrationSynthesizer for GeminiNarrator {
    async fn synthesize(&self, text: &str, audience: Audience, dest: &Path) -> Result<AudioTrack> {
        let utterance = format!("{} {}", audience.delivery(), text);
        retry_transient(&self.retry, "speech", || {
            self.media.synthesize_speech(&utterance, audience.voice(), dest)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Text selection
// ---------------------------------------------------------------------------

/// Utterances for one slide under `strategy`: `(reveal step, file stem, text)`.
///
/// Per-segment steps keep their position even when a segment has nothing to
/// say, so step `k` always belongs to the slide's `k`-th reveal page.
fn utterances(
    slide: &Slide,
    index: usize,
    strategy: NarrationStrategy,
) -> Vec<(usize, String, String)> {
    match strategy {
        NarrationStrategy::PerSlide => vec![(0, format!("slide_{index}"), slide.spoken_text())],
        NarrationStrategy::PerSegment => slide
            .spoken_segments()
            .into_iter()
            .enumerate()
            .map(|(k, segment)| {
                let text = if segment.trim().is_empty() {
                    slide.title.trim().to_string()
                } else {
                    segment.trim().to_string()
                };
                (k, format!("slide_{index}_seg_{k}"), text)
            })
            .filter(|(_, _, text)| !text.is_empty())
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// NarrationStage
// ---------------------------------------------------------------------------

pub struct NarrationStage {
    synthesizer: Arc<dyn NarrationSynthesizer>,
    pool: ServicePool,
    strategy: NarrationStrategy,
    audio_dir: PathBuf,
}

impl NarrationStage {
    pub fn new(
        synthesizer: Arc<dyn NarrationSynthesizer>,
        pool: ServicePool,
        strategy: NarrationStrategy,
        audio_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            synthesizer,
            pool,
            strategy,
            audio_dir: audio_dir.into(),
        }
    }
}

#[async_trait]
impl Stage for NarrationStage {
    fn id(&self) -> StageId {
        StageId::Narration
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Presentation]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Audio]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let presentation = state
            .presentation
            .as_ref()
            .ok_or_else(|| SlidecastError::MissingArtifact {
                stage: StageId::Narration,
                artifact: "a script".into(),
            })?;
        tokio::fs::create_dir_all(&self.audio_dir).await?;

        let mut owners = Vec::new();
        let mut jobs = Vec::new();
        for (index, slide) in presentation.slides.iter().enumerate() {
            for (step, stem, text) in utterances(slide, index, self.strategy) {
                let synthesizer = self.synthesizer.clone();
                let dest = self.audio_dir.join(format!("{stem}.wav"));
                let audience = state.audience;
                owners.push((index, step));
                jobs.push(move || async move {
                    synthesizer.synthesize(&text, audience, &dest).await
                });
            }
        }
        tracing::info!(
            requests = jobs.len(),
            strategy = ?self.strategy,
            pool = self.pool.name(),
            "Synthesizing narration"
        );

        let mut per_slide: BTreeMap<usize, Vec<Option<AudioTrack>>> = BTreeMap::new();
        for ((index, step), result) in owners.into_iter().zip(self.pool.run_all(jobs).await) {
            match result {
                Ok(track) => {
                    let slots = per_slide.entry(index).or_default();
                    if slots.len() <= step {
                        slots.resize(step + 1, None);
                    }
                    slots[step] = Some(track);
                }
                Err(e) => {
                    tracing::warn!(slide = index, step, error = %e, "Narration failed for slide")
                }
            }
        }

        let audio: BTreeMap<usize, SlideAudio> = per_slide
            .into_iter()
            .filter_map(|(index, mut slots)| match self.strategy {
                NarrationStrategy::PerSlide => {
                    slots.pop().flatten().map(|t| (index, SlideAudio::Single(t)))
                }
                NarrationStrategy::PerSegment => Some((index, SlideAudio::Segmented(slots))),
            })
            .collect();

        if audio.is_empty() && !presentation.is_empty() {
            return Err(SlidecastError::StageFailed {
                stage: StageId::Narration,
                message: "no narration audio could be synthesized".into(),
            });
        }
        Ok(StateUpdate::new().audio(audio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolLimits;
    use slidecast_types::{Presentation, RunMode};
    use std::sync::Mutex;

    struct FakeVoice {
        texts: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl FakeVoice {
        fn new(fail_on: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                texts: Mutex::new(Vec::new()),
                fail_on,
            })
        }
    }

    #[async_trait]
    impl NarrationSynthesizer for FakeVoice {
        async fn synthesize(
            &self,
            text: &str,
            _audience: Audience,
            dest: &Path,
        ) -> Result<AudioTrack> {
            self.texts.lock().unwrap().push(text.to_string());
            if self.fail_on.is_some_and(|f| text.contains(f)) {
                return Err(SlidecastError::Other("voice unavailable".into()));
            }
            Ok(AudioTrack {
                path: dest.to_path_buf(),
                duration_secs: text.len() as f64 / 10.0,
            })
        }
    }

    fn presentation() -> Presentation {
        Presentation {
            slides: vec![
                Slide {
                    title: "Intro".into(),
                    content: vec!["a".into()],
                    narration: vec!["**Hello** there.".into(), "Point a.".into()],
                    ..Default::default()
                },
                Slide {
                    title: "Quiet slide".into(),
                    narration: vec!["".into()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    fn stage(voice: Arc<FakeVoice>, strategy: NarrationStrategy, dir: &Path) -> NarrationStage {
        let pool = ServicePool::new("speech", PoolLimits::unbounded(1));
        NarrationStage::new(voice, pool, strategy, dir)
    }

    #[tokio::test]
    async fn per_slide_produces_one_track_each() {
        let dir = tempfile::tempdir().unwrap();
        let voice = FakeVoice::new(None);
        let state = RunState::new(RunMode::VideoProduction).with_presentation(presentation());

        let update = stage(voice.clone(), NarrationStrategy::PerSlide, dir.path())
            .execute(&state)
            .await
            .unwrap();
        let audio = update.audio.unwrap();

        assert_eq!(audio.len(), 2);
        match &audio[&0] {
            SlideAudio::Single(track) => assert!(track.path.ends_with("slide_0.wav")),
            other => panic!("expected single track, got {other:?}"),
        }
        let texts = voice.texts.lock().unwrap();
        assert_eq!(texts[0], "Hello there. Point a.");
        // Empty narration falls back to the title.
        assert_eq!(texts[1], "Quiet slide");
    }

    #[tokio::test]
    async fn per_segment_produces_ordered_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new(RunMode::VideoProduction).with_presentation(presentation());
        let update = stage(FakeVoice::new(None), NarrationStrategy::PerSegment, dir.path())
            .execute(&state)
            .await
            .unwrap();
        let audio = update.audio.unwrap();
        match &audio[&0] {
            SlideAudio::Segmented(tracks) => {
                assert_eq!(tracks.len(), 2);
                assert!(tracks[0].as_ref().unwrap().path.ends_with("slide_0_seg_0.wav"));
                assert!(tracks[1].as_ref().unwrap().path.ends_with("slide_0_seg_1.wav"));
            }
            other => panic!("expected segments, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_segment_keeps_later_segments_on_their_pages() {
        let dir = tempfile::tempdir().unwrap();
        let slide = Slide {
            title: "Steps".into(),
            content: vec!["first bullet".into(), "second bullet".into()],
            narration: vec![
                "Intro.".into(),
                "About the first bullet.".into(),
                "About the second bullet.".into(),
            ],
            ..Default::default()
        };
        let p = Presentation {
            slides: vec![slide],
            ..Default::default()
        };
        let state = RunState::new(RunMode::VideoProduction).with_presentation(p.clone());

        let update = stage(
            FakeVoice::new(Some("first bullet")),
            NarrationStrategy::PerSegment,
            dir.path(),
        )
        .execute(&state)
        .await
        .unwrap();
        let audio = update.audio.unwrap();

        match &audio[&0] {
            SlideAudio::Segmented(tracks) => {
                assert_eq!(tracks.len(), 3);
                assert!(tracks[1].is_none());
                assert!(tracks[2].as_ref().unwrap().path.ends_with("slide_0_seg_2.wav"));
            }
            other => panic!("expected segments, got {other:?}"),
        }

        let plan = crate::sync::build_sync_plan(&p, &audio, 3).unwrap();
        let rows: Vec<(usize, String)> = plan
            .entries()
            .iter()
            .map(|e| (e.page_index, e.audio.file_name().unwrap().to_string_lossy().into_owned()))
            .collect();
        assert_eq!(
            rows,
            vec![
                (0, "slide_0_seg_0.wav".to_string()),
                (2, "slide_0_seg_2.wav".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_slide_is_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new(RunMode::VideoProduction).with_presentation(presentation());
        let update = stage(FakeVoice::new(Some("Quiet")), NarrationStrategy::PerSlide, dir.path())
            .execute(&state)
            .await
            .unwrap();
        let audio = update.audio.unwrap();
        assert!(audio.contains_key(&0));
        assert!(!audio.contains_key(&1));
    }

    #[tokio::test]
    async fn all_failures_fail_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let state = RunState::new(RunMode::VideoProduction).with_presentation(presentation());
        let err = stage(FakeVoice::new(Some("")), NarrationStrategy::PerSlide, dir.path())
            .execute(&state)
            .await
            .unwrap_err();
        assert!(matches!(err, SlidecastError::StageFailed { stage: StageId::Narration, .. }));
    }
}
