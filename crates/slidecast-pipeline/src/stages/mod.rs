//! The concrete stages and the collaborators they call out to.

pub mod compile;
pub mod images;
pub mod latex;
pub mod narration;
pub mod outline;
pub mod review;
pub mod script;
pub mod script_pdf;
pub mod video;

pub use compile::{CompileStage, DocumentCompiler, PdfLatexCompiler};
pub use images::{GeminiMediaSource, ImagesStage, MediaSource};
pub use latex::LatexStage;
pub use narration::{GeminiNarrator, NarrationStage, NarrationSynthesizer};
pub use outline::{LlmOutlineWriter, OutlineStage, OutlineWriter};
pub use review::{LlmQualityChecker, LlmScriptOptimiser, ReviewStage};
pub use script::{LlmScriptWriter, ScriptStage, ScriptWriter};
pub use script_pdf::ScriptPdfStage;
pub use video::{FfmpegRenderer, VideoRenderer, VideoStage};

use std::sync::Arc;

use slidecast_llm::{GeminiMedia, LlmClient};

use crate::config::PipelineConfig;
use crate::evaluation::{EvaluationLoop, QualityChecker, ScriptOptimiser};
use crate::events::EventEmitter;
use crate::pool::ServicePool;
use crate::stage::StageRegistry;

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// External collaborators behind each stage. Tests swap any of them for fakes.
#[derive(Clone)]
pub struct Services {
    pub outline: Arc<dyn OutlineWriter>,
    pub script: Arc<dyn ScriptWriter>,
    pub checker: Arc<dyn QualityChecker>,
    pub optimiser: Arc<dyn ScriptOptimiser>,
    pub media: Arc<dyn MediaSource>,
    pub narrator: Arc<dyn NarrationSynthesizer>,
    pub compiler: Arc<dyn DocumentCompiler>,
    pub renderer: Arc<dyn VideoRenderer>,
}

impl Services {
    /// Gemini for text, images, clips and speech; pdflatex and ffmpeg locally.
    pub fn gemini(client: Arc<LlmClient>, media: GeminiMedia, config: &PipelineConfig) -> Self {
        let model = config.text_model.as_str();
        let retry = config.retry.clone();
        Self {
            outline: Arc::new(LlmOutlineWriter::new(client.clone(), model, retry.clone())),
            script: Arc::new(LlmScriptWriter::new(client.clone(), model, retry.clone())),
            checker: Arc::new(LlmQualityChecker::new(client.clone(), model, retry.clone())),
            optimiser: Arc::new(LlmScriptOptimiser::new(client, model, retry.clone())),
            media: Arc::new(GeminiMediaSource::new(media.clone(), retry.clone())),
            narrator: Arc::new(GeminiNarrator::new(media, retry)),
            compiler: Arc::new(PdfLatexCompiler::new(config.compile_timeout)),
            renderer: Arc::new(FfmpegRenderer::new(config.render_timeout)),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Register every stage, wired to `services` and laid out under the config's
/// output directory.
pub fn default_registry(
    config: &PipelineConfig,
    services: &Services,
    events: &EventEmitter,
) -> StageRegistry {
    let evaluation = EvaluationLoop::new(services.checker.clone(), services.optimiser.clone())
        .with_max_iterations(config.max_iterations)
        .with_events(events.clone());

    let mut registry = StageRegistry::new();
    registry.register(OutlineStage::new(services.outline.clone()));
    registry.register(ScriptStage::new(services.script.clone()));
    registry.register(ReviewStage::new(evaluation));
    registry.register(ScriptPdfStage::new(services.compiler.clone(), config.build_dir()));
    registry.register(ImagesStage::new(
        services.media.clone(),
        ServicePool::new("images", config.image_pool),
        config.images_dir(),
    ));
    registry.register(LatexStage);
    registry.register(CompileStage::new(services.compiler.clone(), config.build_dir()));
    registry.register(NarrationStage::new(
        services.narrator.clone(),
        ServicePool::new("speech", config.speech_pool),
        config.narration,
        config.audio_dir(),
    ));
    registry.register(VideoStage::new(services.renderer.clone(), config.video_path()));
    registry
}
