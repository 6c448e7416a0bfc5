//! Run configuration shared by the executor and the stages.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use slidecast_types::Audience;

use crate::pool::PoolLimits;
use crate::retry::RetryPolicy;

/// How narration audio is produced for each slide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrationStrategy {
    /// One file per slide, split evenly across the slide's pages.
    #[default]
    PerSlide,
    /// One file per reveal step, played in full on its page.
    PerSegment,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub max_iterations: u32,
    /// Audience for new runs; a resumed run keeps the audience in its state.
    pub audience: Audience,
    pub narration: NarrationStrategy,
    pub retry: RetryPolicy,
    pub image_pool: PoolLimits,
    pub speech_pool: PoolLimits,
    pub compile_timeout: Duration,
    pub render_timeout: Duration,
    pub checkpoint: bool,
    pub text_model: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            max_iterations: 5,
            audience: Audience::General,
            narration: NarrationStrategy::PerSlide,
            retry: RetryPolicy::default(),
            image_pool: PoolLimits::images(),
            speech_pool: PoolLimits::speech(),
            compile_timeout: Duration::from_secs(120),
            render_timeout: Duration::from_secs(1800),
            checkpoint: true,
            text_model: "gemini-2.5-flash".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn images_dir(&self) -> PathBuf {
        self.output_dir.join("images")
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.output_dir.join("audio")
    }

    /// Directory holding LaTeX sources and compiled PDFs.
    pub fn build_dir(&self) -> PathBuf {
        self.output_dir.join("build")
    }

    pub fn video_path(&self) -> PathBuf {
        self.output_dir.join("presentation.mp4")
    }

    /// Where checkpoints go, or `None` when checkpointing is off.
    pub fn checkpoint_dir(&self) -> Option<&Path> {
        self.checkpoint.then_some(self.output_dir.as_path())
    }

    /// Every path a run may create under the output directory.
    pub fn generated_paths(&self) -> Vec<PathBuf> {
        vec![
            self.images_dir(),
            self.audio_dir(),
            self.build_dir(),
            self.video_path(),
            crate::checkpoint::checkpoint_path(&self.output_dir),
            self.output_dir.join("outline.md"),
            self.output_dir.join("script.json"),
            self.output_dir.join("state.json"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.narration, NarrationStrategy::PerSlide);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.speech_pool.max_concurrent, 1);
        assert_eq!(config.speech_pool.min_interval, Duration::from_secs(7));
        assert_eq!(config.checkpoint_dir(), Some(Path::new("output")));
    }

    #[test]
    fn paths_follow_output_dir() {
        let mut config = PipelineConfig::default().with_output_dir("/tmp/run1");
        assert_eq!(config.audio_dir(), PathBuf::from("/tmp/run1/audio"));
        assert_eq!(config.video_path(), PathBuf::from("/tmp/run1/presentation.mp4"));
        assert!(config
            .generated_paths()
            .contains(&PathBuf::from("/tmp/run1/checkpoint.json")));

        config.checkpoint = false;
        assert_eq!(config.checkpoint_dir(), None);
    }

    #[test]
    fn narration_strategy_serde() {
        let json = serde_json::to_string(&NarrationStrategy::PerSegment).unwrap();
        assert_eq!(json, "\"per_segment\"");
    }
}
