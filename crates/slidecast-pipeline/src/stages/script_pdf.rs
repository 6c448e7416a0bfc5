//! Script review stage: renders the approved script as a narration table PDF.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use slidecast_types::{Result, RunState, SlidecastError, StageId, StateField, StateUpdate};

use crate::stage::Stage;
use crate::stages::compile::DocumentCompiler;
use crate::stages::latex::render_script_review;

pub struct ScriptPdfStage {
    compiler: Arc<dyn DocumentCompiler>,
    build_dir: PathBuf,
}

impl ScriptPdfStage {
    pub fn new(compiler: Arc<dyn DocumentCompiler>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            compiler,
            build_dir: build_dir.into(),
        }
    }
}

#[async_trait]
impl Stage for ScriptPdfStage {
    fn id(&self) -> StageId {
        StageId::ScriptPdf
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Presentation]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::ScriptPdf]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let presentation = state
            .presentation
            .as_ref()
            .ok_or_else(|| SlidecastError::MissingArtifact {
                stage: StageId::ScriptPdf,
                artifact: "a script".into(),
            })?;

        let source = render_script_review(presentation);
        let document = self
            .compiler
            .compile(&source, "script_review", &self.build_dir)
            .await?;
        tracing::info!(
            path = %document.path.display(),
            pages = document.page_count,
            "Script review PDF ready"
        );
        Ok(StateUpdate::new().script_pdf(document.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidecast_types::{CompiledDeck, Presentation, RunMode, Slide};
    use std::path::Path;
    use std::sync::Mutex;

    struct Capture {
        sources: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentCompiler for Capture {
        async fn compile(
            &self,
            source: &str,
            job_name: &str,
            out_dir: &Path,
        ) -> Result<CompiledDeck> {
            self.sources.lock().unwrap().push(source.to_string());
            Ok(CompiledDeck {
                path: out_dir.join(format!("{job_name}.pdf")),
                page_count: 1,
            })
        }
    }

    #[tokio::test]
    async fn renders_review_document() {
        let compiler = Arc::new(Capture {
            sources: Mutex::new(Vec::new()),
        });
        let stage = ScriptPdfStage::new(compiler.clone(), "out/build");
        let state = RunState::new(RunMode::ScriptOnly).with_presentation(Presentation {
            presentation_title: "Soil".into(),
            slides: vec![Slide {
                title: "Layers".into(),
                narration: vec!["Soil has layers.".into()],
                ..Default::default()
            }],
            ..Default::default()
        });

        let update = stage.execute(&state).await.unwrap();
        assert_eq!(update.script_pdf, Some(PathBuf::from("out/build/script_review.pdf")));
        let source = &compiler.sources.lock().unwrap()[0];
        assert!(source.contains("Slide 1: Layers"));
        assert!(source.contains("Soil has layers."));
    }
}
