//! Compile stage: LaTeX source into a PDF, with the page count probed.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use slidecast_types::{
    CompiledDeck, Result, RunState, SlidecastError, StageId, StateField, StateUpdate,
};

use crate::process::{run_tool, tail};
use crate::stage::Stage;

pub const ERROR_LOG: &str = "latex_error.log";

#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// Write `source` as `<out_dir>/<job_name>.tex` and compile it to PDF.
    async fn compile(&self, source: &str, job_name: &str, out_dir: &Path) -> Result<CompiledDeck>;
}

// ---------------------------------------------------------------------------
// PdfLatexCompiler
// ---------------------------------------------------------------------------

pub struct PdfLatexCompiler {
    timeout: Duration,
}

impl PdfLatexCompiler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// First `! ...` error line in pdflatex output, or the output tail.
pub fn latex_error_summary(output: &str) -> String {
    output
        .lines()
        .find(|line| line.starts_with('!') || line.contains(":error:"))
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| tail(output, 5))
}

static PAGES_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Pages:\s+(\d+)").expect("pdfinfo pages pattern is valid")
});

/// Page count from `pdfinfo` output.
pub fn parse_page_count(pdfinfo: &str) -> Option<usize> {
    PAGES_LINE.captures(pdfinfo)?.get(1)?.as_str().parse().ok()
}

pub async fn probe_page_count(pdf: &Path, timeout: Duration) -> Result<usize> {
    let output = run_tool("pdfinfo", [pdf.as_os_str()], None, timeout)
        .await?
        .check("pdfinfo")?;
    parse_page_count(&output.stdout).ok_or_else(|| SlidecastError::CommandFailed {
        tool: "pdfinfo".into(),
        exit_code: 0,
        message: format!("no page count in pdfinfo output for {}", pdf.display()),
    })
}

async fn write_error_log(dir: &Path, error: &str, source: &str) -> Option<PathBuf> {
    let path = dir.join(ERROR_LOG);
    let body = format!("{error}\n\n{}\n\n{source}", "-".repeat(60));
    match tokio::fs::write(&path, body).await {
        Ok(()) => Some(path),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not write LaTeX error log");
            None
        }
    }
}

#[async_trait]
impl DocumentCompiler for PdfLatexCompiler {
    async fn compile(&self, source: &str, job_name: &str, out_dir: &Path) -> Result<CompiledDeck> {
        tokio::fs::create_dir_all(out_dir).await?;
        let tex = out_dir.join(format!("{job_name}.tex"));
        tokio::fs::write(&tex, source).await?;

        let mut out_arg = std::ffi::OsString::from("-output-directory=");
        out_arg.push(out_dir.as_os_str());
        let args = [
            std::ffi::OsString::from("-interaction=nonstopmode"),
            "-halt-on-error".into(),
            "-file-line-error".into(),
            out_arg,
            tex.clone().into_os_string(),
        ];

        tracing::info!(tex = %tex.display(), "Compiling LaTeX");
        let output = run_tool("pdflatex", &args, None, self.timeout).await;
        let output = match output {
            Ok(o) if o.success() => o,
            Ok(o) => {
                let summary = latex_error_summary(&o.stdout);
                let log_path = write_error_log(out_dir, &o.stdout, source).await;
                return Err(SlidecastError::CompileFailed {
                    message: summary,
                    log_path,
                });
            }
            Err(e) => {
                let log_path = write_error_log(out_dir, &e.to_string(), source).await;
                return Err(SlidecastError::CompileFailed {
                    message: e.to_string(),
                    log_path,
                });
            }
        };
        tracing::debug!(stdout_len = output.stdout.len(), "pdflatex finished");

        let pdf = out_dir.join(format!("{job_name}.pdf"));
        if !tokio::fs::try_exists(&pdf).await? {
            return Err(SlidecastError::CompileFailed {
                message: format!("pdflatex reported success but {} is missing", pdf.display()),
                log_path: None,
            });
        }
        let page_count = probe_page_count(&pdf, self.timeout).await?;
        tracing::info!(pdf = %pdf.display(), page_count, "Compiled PDF");
        Ok(CompiledDeck {
            path: pdf,
            page_count,
        })
    }
}

// ---------------------------------------------------------------------------
// CompileStage
// ---------------------------------------------------------------------------

pub struct CompileStage {
    compiler: Arc<dyn DocumentCompiler>,
    build_dir: PathBuf,
}

impl CompileStage {
    pub fn new(compiler: Arc<dyn DocumentCompiler>, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            compiler,
            build_dir: build_dir.into(),
        }
    }
}

#[async_trait]
impl Stage for CompileStage {
    fn id(&self) -> StageId {
        StageId::Compile
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::LatexSource, StateField::Presentation]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::Deck]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let source = state
            .latex_source
            .as_deref()
            .ok_or_else(|| SlidecastError::MissingArtifact {
                stage: StageId::Compile,
                artifact: "LaTeX source".into(),
            })?;

        let deck = self.compiler.compile(source, "deck", &self.build_dir).await?;
        if let Some(presentation) = &state.presentation {
            let expected = presentation.total_pages();
            if expected != deck.page_count {
                tracing::warn!(
                    expected,
                    actual = deck.page_count,
                    "Compiled page count differs from script"
                );
            }
        }
        Ok(StateUpdate::new().deck(deck))
    }
}
