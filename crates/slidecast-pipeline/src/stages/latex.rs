//! LaTeX rendering: the beamer deck and the narration review document.
//!
//! Every slide becomes one frame whose bullets are revealed one at a time
//! with `\item<k+2->`, so a slide with N bullets compiles to N + 1 pages.
//! No title-page frame is emitted, which keeps page 0 on slide 0.

use std::fmt::Write;
use std::path::Path;

use async_trait::async_trait;

use slidecast_types::script::is_motion_media;
use slidecast_types::{
    Presentation, Result, RunState, Slide, SlideKind, SlideLayout, SlidecastError, StageId,
    StateField, StateUpdate,
};

use crate::stage::Stage;

/// Escape text for use in a LaTeX document.
pub fn escape_latex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str(r"\textbackslash{}"),
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            _ => out.push(c),
        }
    }
    out
}

/// Path of a still image to embed, if the slide has one.
fn still_image(slide: &Slide) -> Option<String> {
    slide
        .image_path
        .as_deref()
        .filter(|p| !is_motion_media(p))
        .map(latex_path)
}

fn latex_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Item text, braced when it would otherwise open `\item`'s optional argument.
fn item_text(text: &str) -> String {
    let escaped = escape_latex(text);
    if escaped.starts_with('[') {
        format!("{{}}{escaped}")
    } else {
        escaped
    }
}

fn bullets(content: &[String]) -> String {
    if content.is_empty() {
        return String::new();
    }
    let mut out = String::from("\\begin{itemize}\n");
    for (i, item) in content.iter().enumerate() {
        let _ = writeln!(out, "    \\item<{}-> {}", i + 2, item_text(item));
    }
    out.push_str("\\end{itemize}\n");
    out
}

fn image_block(path: &str, height: &str) -> String {
    format!(
        "        \\begin{{center}}\n            \\includegraphics[width=\\textwidth,height={height}\\textheight,keepaspectratio]{{{path}}}\n        \\end{{center}}\n"
    )
}

/// One beamer frame for `slide`.
pub fn render_slide(slide: &Slide) -> String {
    let title = escape_latex(&slide.title);
    let mut out = match slide.kind {
        SlideKind::Content => format!("\\begin{{frame}}{{{title}}}\n"),
        SlideKind::Title => format!(
            "\\begin{{frame}}\n    \\begin{{center}}\n        {{\\Huge\\bfseries {title}\\par}}\n    \\end{{center}}\n"
        ),
    };

    let image = still_image(slide);
    // Motion slides keep the right half free for the background overlay.
    let reserve_right = slide.has_motion_background();

    match slide.layout {
        SlideLayout::ImageLeft => {
            out.push_str("    \\begin{columns}\n        \\column{0.45\\textwidth}\n");
            if let Some(path) = &image {
                out.push_str(&image_block(path, "0.8"));
            }
            out.push_str("        \\column{0.55\\textwidth}\n");
            out.push_str(&bullets(&slide.content));
            out.push_str("    \\end{columns}\n");
        }
        SlideLayout::Standard if image.is_some() || reserve_right => {
            out.push_str("    \\begin{columns}\n        \\column{0.5\\textwidth}\n");
            out.push_str(&bullets(&slide.content));
            out.push_str("        \\column{0.5\\textwidth}\n");
            if let Some(path) = &image {
                out.push_str(&image_block(path, "0.7"));
            }
            out.push_str("    \\end{columns}\n");
        }
        SlideLayout::Standard => out.push_str(&bullets(&slide.content)),
    }

    out.push_str("\\end{frame}\n");
    out
}

/// The full beamer document for a presentation.
pub fn render_deck(presentation: &Presentation, date: &str) -> String {
    let mut out = String::new();
    out.push_str("\\documentclass[17pt,aspectratio=169]{beamer}\n");
    out.push_str("\\usepackage[utf8]{inputenc}\n\\usepackage{graphicx}\n\\usepackage{tikz}\n");
    out.push_str("\\usetheme{Madrid}\n");
    out.push_str("\\setbeamertemplate{navigation symbols}{}\n");
    out.push_str("\\setbeamertemplate{footline}{}\n");
    let _ = writeln!(out, "\\title{{{}}}", escape_latex(&presentation.presentation_title));
    let _ = writeln!(out, "\\date{{{}}}", escape_latex(date));
    out.push_str("\n\\begin{document}\n\n");
    for slide in &presentation.slides {
        out.push_str(&render_slide(slide));
        out.push('\n');
    }
    out.push_str("\\end{document}\n");
    out
}

/// A two-column narration / visual-cue document for human review.
pub fn render_script_review(presentation: &Presentation) -> String {
    let mut out = String::new();
    out.push_str("\\documentclass[11pt]{article}\n");
    out.push_str("\\usepackage[utf8]{inputenc}\n\\usepackage[margin=2cm]{geometry}\n\\usepackage{longtable}\n\\usepackage{array}\n");
    out.push_str("\\begin{document}\n\n");
    let _ = writeln!(
        out,
        "\\section*{{{}}}",
        escape_latex(&presentation.presentation_title)
    );

    let meta = [
        ("Module", presentation.module.clone()),
        ("Episode", presentation.episode.clone()),
        ("Duration", presentation.duration.clone()),
        ("Prerequisites", presentation.prerequisites.clone()),
        ("Keywords", presentation.meta_tags.join(", ")),
    ];
    for (label, value) in meta.iter().filter(|(_, v)| !v.trim().is_empty()) {
        let _ = writeln!(out, "\\noindent\\textbf{{{label}:}} {}\\\\", escape_latex(value));
    }
    if !presentation.learning_objectives.is_empty() {
        out.push_str("\n\\subsection*{Learning objectives}\n\\begin{itemize}\n");
        for objective in &presentation.learning_objectives {
            let _ = writeln!(out, "    \\item {}", item_text(objective));
        }
        out.push_str("\\end{itemize}\n");
    }

    for (i, slide) in presentation.slides.iter().enumerate() {
        let _ = writeln!(
            out,
            "\n\\subsection*{{Slide {}: {}}}",
            i + 1,
            escape_latex(&slide.title)
        );
        out.push_str("\\begin{longtable}{|p{0.58\\textwidth}|p{0.34\\textwidth}|}\n\\hline\n");
        out.push_str("\\textbf{Narration} & \\textbf{Visual Cue} \\\\\n\\hline\n");
        let narration = slide
            .narration
            .iter()
            .map(|line| escape_latex(line))
            .collect::<Vec<_>>()
            .join(" \\newline ");
        let _ = writeln!(out, "{} & {} \\\\", narration, escape_latex(&slide.image_prompt));
        out.push_str("\\hline\n\\end{longtable}\n");
    }

    out.push_str("\n\\end{document}\n");
    out
}

// ---------------------------------------------------------------------------
// LatexStage
// ---------------------------------------------------------------------------

pub struct LatexStage;

#[async_trait]
impl Stage for LatexStage {
    fn id(&self) -> StageId {
        StageId::Latex
    }

    fn reads(&self) -> &'static [StateField] {
        &[StateField::Presentation]
    }

    fn writes(&self) -> &'static [StateField] {
        &[StateField::LatexSource]
    }

    async fn execute(&self, state: &RunState) -> Result<StateUpdate> {
        let presentation = state
            .presentation
            .as_ref()
            .ok_or_else(|| SlidecastError::MissingArtifact {
                stage: StageId::Latex,
                artifact: "a script".into(),
            })?;
        let date = chrono::Local::now().format("%-d %B %Y").to_string();
        let source = render_deck(presentation, &date);
        tracing::debug!(
            bytes = source.len(),
            frames = presentation.slides.len(),
            "Rendered deck source"
        );
        Ok(StateUpdate::new().latex_source(source))
    }
}
