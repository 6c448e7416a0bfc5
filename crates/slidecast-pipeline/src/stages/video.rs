//! Video stage: renders the sync plan into one narrated video.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use slidecast_types::{
    CompiledDeck, Result, RunState, SlidecastError, StageId, StateField, StateUpdate,
};

use crate::process::run_tool;
use crate::stage::Stage;
use crate::sync::{build_sync_plan, SyncEntry, SyncPlan};

#[async_trait]
pub trait VideoRenderer: Send + Sync {
    async fn render(&self, plan: &SyncPlan, deck: &CompiledDeck, output: &Path) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// FfmpegRenderer
// ---------------------------------------------------------------------------

/// Rasterises pages with `pdftoppm`, renders one clip per plan entry with
/// `ffmpeg`, then concatenates the clips.
pub struct FfmpegRenderer {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub timeout: Duration,
}

impl FfmpegRenderer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            fps: 24,
            width: 1920,
            height: 1080,
            timeout,
        }
    }

    async fn rasterize(&self, deck: &Path, page_index: usize, dir: &Path) -> Result<PathBuf> {
        let page = (page_index + 1).to_string();
        let stem = dir.join(format!("page_{page_index}"));
        let args: Vec<OsString> = vec![
            "-png".into(),
            "-singlefile".into(),
            "-f".into(),
            page.clone().into(),
            "-l".into(),
            page.into(),
            "-scale-to-x".into(),
            self.width.to_string().into(),
            "-scale-to-y".into(),
            self.height.to_string().into(),
            deck.as_os_str().to_owned(),
            stem.clone().into_os_string(),
        ];
        run_tool("pdftoppm", &args, None, self.timeout)
            .await?
            .check("pdftoppm")?;
        Ok(stem.with_extension("png"))
    }

    async fn render_clip(&self, entry: &SyncEntry, page: &Path, clip: &Path) -> Result<()> {
        let args = clip_args(entry, page, clip, self.fps, self.width);
        run_tool("ffmpeg", &args, None, self.timeout)
            .await?
            .check("ffmpeg")?;
        Ok(())
    }
}

fn secs(value: f64) -> String {
    format!("{value:.3}")
}

/// ffmpeg arguments for one clip: a still page over a slice of narration,
/// with the motion background looped on the right half when present.
pub fn clip_args(
    entry: &SyncEntry,
    page: &Path,
    clip: &Path,
    fps: u32,
    width: u32,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-loglevel".into(), "error".into()];
    args.extend(["-loop", "1", "-framerate"].map(OsString::from));
    args.push(fps.to_string().into());
    args.push("-i".into());
    args.push(page.as_os_str().to_owned());
    args.push("-ss".into());
    args.push(secs(entry.start).into());
    args.push("-t".into());
    args.push(secs(entry.duration).into());
    args.push("-i".into());
    args.push(entry.audio.as_os_str().to_owned());

    match &entry.background {
        Some(bg) => {
            args.extend(["-stream_loop", "-1", "-i"].map(OsString::from));
            args.push(bg.source.as_os_str().to_owned());
            let filter = format!(
                "[2:v]trim=start={}:duration={},setpts=PTS-STARTPTS,scale={}:-2[bg];[0:v][bg]overlay=x=W-w:y=(H-h)/2,format=yuv420p[v]",
                secs(bg.start),
                secs(entry.duration),
                width / 2
            );
            args.push("-filter_complex".into());
            args.push(filter.into());
            args.extend(["-map", "[v]", "-map", "1:a"].map(OsString::from));
        }
        None => {
            let still = ["-vf", "format=yuv420p", "-map", "0:v", "-map", "1:a"];
            args.extend(still.map(OsString::from));
        }
    }

    args.push("-r".into());
    args.push(fps.to_string().into());
    let codecs = ["-c:v", "libx264", "-preset", "veryfast", "-c:a", "aac", "-ar", "48000"];
    args.extend(codecs.map(OsString::from));
    args.push("-t".into());
    args.push(secs(entry.duration).into());
    args.push(clip.as_os_str().to_owned());
    args
}

/// Concat-demuxer list file contents.
pub fn concat_list(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|c| format!("file '{}'\n", c.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

#[async_trait]
impl VideoRenderer for FfmpegRenderer {
    async fn render(&self, plan: &SyncPlan, deck: &CompiledDeck, output: &Path) -> Result<PathBuf> {
        let work = tempfile::Builder::new().prefix("slidecast-render").tempdir()?;

        let mut pages = BTreeMap::new();
        for page in plan.pages_used() {
            let png = self.rasterize(&deck.path, page, work.path()).await?;
            pages.insert(page, png);
        }
        tracing::info!(pages = pages.len(), clips = plan.len(), "Rendering clips");

        let mut clips = Vec::with_capacity(plan.len());
        for (i, entry) in plan.entries().iter().enumerate() {
            let page = pages.get(&entry.page_index).ok_or_else(|| {
                SlidecastError::Other(format!("page {} was not rasterised", entry.page_index))
            })?;
            let clip = work.path().join(format!("clip_{i:04}.mp4"));
            self.render_clip(entry, page, &clip).await?;
            tracing::debug!(
                clip = i,
                slide = entry.slide_index,
                page = entry.page_index,
                "Clip rendered"
            );
            clips.push(clip);
        }

        let list = work.path().join("clips.txt");
        tokio::fs::write(&list, concat_list(&clips)).await?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let concat = ["-y", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"];
        let mut args: Vec<OsString> = concat.map(OsString::from).to_vec();
        args.push(list.into_os_string());
        args.extend(["-c", "copy"].map(OsString::from));
        args.push(output.as_os_str().to_owned());
        run_tool("ffmpeg", &args, None, self.timeout)
            .await?
            .check("ffmpeg")?;

        tracing::info!(path = %output.display(), seconds = plan.total_duration(), "Video written");
        Ok(output.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// VideoStage
// ---------------------------------------------------------------------------

pub struct VideoStage {
    renderer: Arc<dyn VideoRenderer>,
    output: PathBuf,
}

impl VideoStage {
    pub fn new(renderer: Arc<dyn VideoRenderer>, output: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            output: output.into(),
        }
    }
}

#[async_trait]
impl Stage for VideoStage {
    fn id(&self) -> StageId {
        StageId::Video
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Presentation, StateField::Audio, StateField::Deck]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Video]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let missing = |artifact: &str| SlidecastError::MissingArtifact {
            stage: StageId::Video,
            artifact: artifact.to_string(),
        };
        let presentation = state.presentation.as_ref().ok_or_else(|| missing("a script"))?;
        let deck = state.deck.as_ref().ok_or_else(|| missing("a compiled slide deck"))?;

        let plan = build_sync_plan(presentation, &state.audio, deck.page_count)?;
        if plan.is_empty() {
            return Err(SlidecastError::StageFailed {
                stage: StageId::Video,
                message: "no narrated pages to render".into(),
            });
        }
        if !plan.shortfalls().is_empty() {
            tracing::warn!(count = plan.shortfalls().len(), "Some pages were substituted");
        }

        let video = self.renderer.render(&plan, deck, &self.output).await?;
        Ok(StateUpdate::new().video(video))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::BackgroundSlice;
    use slidecast_types::{AudioTrack, Presentation, RunMode, Slide, SlideAudio};
    use std::sync::Mutex;

    struct Recorder {
        plans: Mutex<Vec<SyncPlan>>,
    }

    #[async_trait]
    impl VideoRenderer for Recorder {
        async fn render(
            &self,
            plan: &SyncPlan,
            _deck: &CompiledDeck,
            output: &Path,
        ) -> Result<PathBuf> {
            self.plans.lock().unwrap().push(plan.clone());
            Ok(output.to_path_buf())
        }
    }

    fn entry(background: Option<BackgroundSlice>) -> SyncEntry {
        SyncEntry {
            slide_index: 0,
            page_index: 1,
            audio: PathBuf::from("audio/slide_0.wav"),
            start: 2.5,
            end: 5.0,
            duration: 2.5,
            background,
        }
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().to_string()).collect()
    }

    #[test]
    fn still_clip_seeks_audio_slice() {
        let (page, clip) = (Path::new("p.png"), Path::new("c.mp4"));
        let args = strings(&clip_args(&entry(None), page, clip, 24, 1920));
        let joined = args.join(" ");
        assert!(joined.contains("-ss 2.500 -t 2.500 -i audio/slide_0.wav"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(!joined.contains("-filter_complex"));
        assert_eq!(args.last().unwrap(), "c.mp4");
    }

    #[test]
    fn motion_clip_overlays_looped_background() {
        let bg = BackgroundSlice {
            source: PathBuf::from("images/slide_0.mp4"),
            start: 2.5,
            end: 5.0,
            loop_length: 5.0,
        };
        let (page, clip) = (Path::new("p.png"), Path::new("c.mp4"));
        let args = strings(&clip_args(&entry(Some(bg)), page, clip, 24, 1920));
        let joined = args.join(" ");
        assert!(joined.contains("-stream_loop -1 -i images/slide_0.mp4"));
        assert!(joined.contains("trim=start=2.500:duration=2.500"));
        assert!(joined.contains("scale=960:-2"));
        assert!(joined.contains("overlay=x=W-w:y=(H-h)/2"));
    }

    #[test]
    fn concat_list_quotes_paths() {
        let list = concat_list(&[PathBuf::from("/tmp/a.mp4"), PathBuf::from("/tmp/it's.mp4")]);
        assert_eq!(list, "file '/tmp/a.mp4'\nfile '/tmp/it'\\''s.mp4'\n");
    }

    fn narrated_state() -> RunState {
        let mut slide = Slide {
            title: "One".into(),
            content: vec!["a".into()],
            ..Default::default()
        };
        slide.repair();
        let mut state = RunState::new(RunMode::VideoProduction).with_presentation(Presentation {
            slides: vec![slide],
            ..Default::default()
        });
        state.audio.insert(
            0,
            SlideAudio::Single(AudioTrack {
                path: PathBuf::from("audio/slide_0.wav"),
                duration_secs: 6.0,
            }),
        );
        state.deck = Some(CompiledDeck {
            path: PathBuf::from("build/deck.pdf"),
            page_count: 2,
        });
        state
    }

    #[tokio::test]
    async fn stage_renders_plan() {
        let recorder = Arc::new(Recorder {
            plans: Mutex::new(Vec::new()),
        });
        let stage = VideoStage::new(recorder.clone(), "out/presentation.mp4");
        let update = stage.execute(&narrated_state()).await.unwrap();

        assert_eq!(update.video, Some(PathBuf::from("out/presentation.mp4")));
        let plans = recorder.plans.lock().unwrap();
        assert_eq!(plans[0].len(), 2);
    }

    #[tokio::test]
    async fn stage_without_deck_fails() {
        let stage = VideoStage::new(
            Arc::new(Recorder {
                plans: Mutex::new(Vec::new()),
            }),
            "out/presentation.mp4",
        );
        let mut state = narrated_state();
        state.deck = None;
        let err = stage.execute(&state).await.unwrap_err();
        assert!(matches!(err, SlidecastError::MissingArtifact { stage: StageId::Video, .. }));
    }

    #[tokio::test]
    async fn stage_without_audio_fails() {
        let stage = VideoStage::new(
            Arc::new(Recorder {
                plans: Mutex::new(Vec::new()),
            }),
            "out/presentation.mp4",
        );
        let mut state = narrated_state();
        state.audio.clear();
        let err = stage.execute(&state).await.unwrap_err();
        assert!(matches!(err, SlidecastError::StageFailed { stage: StageId::Video, .. }));
    }
}
