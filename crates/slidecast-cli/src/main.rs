//! CLI binary for generating and inspecting slidecast presentations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use slidecast_llm::{wav_duration, GeminiMedia, LlmClient, UsageTrackingMiddleware};
use slidecast_pipeline::{
    build_sync_plan, clear_checkpoint, default_registry, load_state_file, stage_plan,
    EventEmitter, NarrationStrategy, PipelineConfig, PipelineEvent, PipelineExecutor,
    PipelineResult, RunCheckpoint, Services,
};
use slidecast_types::{
    Audience, AudioTrack, Presentation, RunMode, RunState, SlideAudio, SlidecastError,
};

#[derive(Parser)]
#[command(name = "slidecast", version, about = "Narrated slide presentations from a topic")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one mode
    Run {
        /// outline_only, script_only, slides_only or video_production
        #[arg(short, long)]
        mode: Option<RunMode>,

        /// Subject of the presentation
        #[arg(short, long)]
        topic: Option<String>,

        /// Markdown outline to write the script from
        #[arg(long)]
        outline_file: Option<PathBuf>,

        /// Existing script JSON
        #[arg(long)]
        script: Option<PathBuf>,

        /// Saved state or checkpoint to continue from
        #[arg(long)]
        state: Option<PathBuf>,

        /// Output directory for every generated artifact
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// kids, students, professionals or general
        #[arg(short, long, default_value = "general")]
        audience: Audience,

        /// Evaluation attempts before the script is accepted as is
        #[arg(long, default_value = "5")]
        max_iterations: u32,

        /// One audio file per reveal step instead of one per slide
        #[arg(long)]
        per_segment_audio: bool,

        /// Don't write checkpoint.json after each stage
        #[arg(long)]
        no_checkpoint: bool,
    },

    /// Parse and repair a script, then report its slide and page counts
    Validate {
        /// Path to the script JSON
        script: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the audio/page plan for a script and its narration files
    Plan {
        /// Path to the script JSON
        script: PathBuf,

        /// Directory holding slide_<i>.wav or slide_<i>_seg_<k>.wav files
        #[arg(long)]
        audio_dir: PathBuf,

        /// Page count of the compiled deck
        #[arg(long)]
        pages: usize,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the stages a run would execute
    Info {
        #[arg(short, long)]
        mode: RunMode,

        #[arg(short, long)]
        topic: Option<String>,

        /// Treat the run as having an outline
        #[arg(long)]
        with_outline: bool,
    },

    /// Remove generated artifacts from the output directory
    Clean {
        #[arg(short, long, default_value = "output")]
        output: PathBuf,
    },
}

struct RunArgs {
    mode: Option<RunMode>,
    topic: Option<String>,
    outline_file: Option<PathBuf>,
    script: Option<PathBuf>,
    state: Option<PathBuf>,
    config: PipelineConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Run {
            mode,
            topic,
            outline_file,
            script,
            state,
            output,
            audience,
            max_iterations,
            per_segment_audio,
            no_checkpoint,
        } => {
            let mut config = PipelineConfig::default().with_output_dir(output);
            config.audience = audience;
            config.max_iterations = max_iterations;
            config.checkpoint = !no_checkpoint;
            if per_segment_audio {
                config.narration = NarrationStrategy::PerSegment;
            }
            cmd_run(RunArgs {
                mode,
                topic,
                outline_file,
                script,
                state,
                config,
            })
            .await?;
        }
        Commands::Validate { script, json } => {
            cmd_validate(&script, json)?;
        }
        Commands::Plan {
            script,
            audio_dir,
            pages,
            json,
        } => {
            cmd_plan(&script, &audio_dir, pages, json)?;
        }
        Commands::Info {
            mode,
            topic,
            with_outline,
        } => {
            cmd_info(mode, topic, with_outline);
        }
        Commands::Clean { output } => {
            cmd_clean(&output).await?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

enum Start {
    Fresh(RunState),
    Resume(RunCheckpoint),
}

impl Start {
    fn state(&self) -> &RunState {
        match self {
            Start::Fresh(state) => state,
            Start::Resume(checkpoint) => &checkpoint.state,
        }
    }
}

/// Build the starting point from flags. A saved state is resumed as is unless
/// `--mode` asks for a different run over it.
async fn initial_state(args: &RunArgs) -> anyhow::Result<Start> {
    if let Some(path) = &args.state {
        let mut checkpoint = load_state_file(path).await?;
        return Ok(match args.mode {
            Some(mode) => {
                checkpoint.state.mode = mode;
                Start::Fresh(checkpoint.state)
            }
            None => Start::Resume(checkpoint),
        });
    }

    let Some(mode) = args.mode else {
        anyhow::bail!("--mode is required unless --state is given");
    };
    let mut state = RunState::new(mode).with_audience(args.config.audience);
    if let Some(topic) = &args.topic {
        state = state.with_topic(topic.clone());
    }
    if let Some(path) = &args.outline_file {
        state = state.with_outline(tokio::fs::read_to_string(path).await?);
    }
    if let Some(path) = &args.script {
        let mut presentation = Presentation::load(path)?;
        presentation.repair();
        state = state.with_presentation(presentation);
    }
    Ok(Start::Fresh(state))
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let start = initial_state(&args).await?;
    let state = start.state();
    let config = &args.config;

    println!("Run: {}", state.run_id);
    println!("Mode: {}", state.mode);
    println!("Audience: {}", state.audience);
    match &start {
        Start::Resume(checkpoint) => match checkpoint.next_stage {
            Some(next) => println!("Resuming at: {next}"),
            None => println!("Saved run already finished"),
        },
        Start::Fresh(state) => println!("Stages: {}", join_stages(&stage_plan(state))),
    }
    println!("Output: {}", config.output_dir.display());

    tokio::fs::create_dir_all(&config.output_dir).await?;

    let usage = UsageTrackingMiddleware::new();
    let client = Arc::new(LlmClient::from_env()?.with_middleware(usage.clone()));
    let media = GeminiMedia::from_env()?;
    let services = Services::gemini(client, media, config);

    let events = EventEmitter::default();
    let printer = tokio::spawn(print_events(events.subscribe()));

    let mut executor = PipelineExecutor::new(default_registry(config, &services, &events))
        .with_events(events.clone());
    if let Some(dir) = config.checkpoint_dir() {
        executor = executor.with_checkpoint_dir(dir);
    }

    let outcome = match start {
        Start::Fresh(state) => executor.run(state).await,
        Start::Resume(checkpoint) => executor.resume(checkpoint).await,
    };

    drop(executor);
    drop(events);
    let _ = printer.await;

    match outcome {
        Ok(PipelineResult {
            state,
            completed_stages,
        }) => {
            write_artifacts(&state, &config.output_dir).await?;
            println!("\nRun completed at {}", chrono::Local::now().format("%H:%M:%S"));
            println!("Completed stages: {}", join_stages(&completed_stages));
            print_summary(&state);
        }
        Err(SlidecastError::RunFailed {
            stage,
            source,
            state,
        }) => {
            write_artifacts(&state, &config.output_dir).await?;
            println!("\nRun failed at stage {stage}: {source}");
            println!(
                "Partial state saved to {}",
                config.output_dir.join("state.json").display()
            );
            anyhow::bail!("stage {stage} failed: {source}");
        }
        Err(e) => return Err(e.into()),
    }

    if usage.request_count() > 0 {
        println!(
            "Text requests: {} ({} input / {} output tokens)",
            usage.request_count(),
            usage.total_input_tokens(),
            usage.total_output_tokens()
        );
    }
    Ok(())
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<PipelineEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(PipelineEvent::StageStarted { stage }) => println!("-> {stage}"),
            Ok(PipelineEvent::StageCompleted {
                stage, duration_ms, ..
            }) => println!("   {stage} done in {:.1}s", duration_ms as f64 / 1000.0),
            Ok(PipelineEvent::StageFailed { stage, error }) => {
                println!("   {stage} failed: {error}")
            }
            Ok(PipelineEvent::EvaluationAttempted {
                iteration,
                passed,
                feedback,
            }) => {
                let verdict = if passed { "passed" } else { "needs work" };
                println!("   review {iteration}: {verdict}");
                if !passed && !feedback.is_empty() {
                    println!("     {feedback}");
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "Event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Persist the state and its human-readable parts next to the other outputs.
async fn write_artifacts(state: &RunState, output: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(output).await?;
    let json = serde_json::to_string_pretty(state)?;
    tokio::fs::write(output.join("state.json"), json).await?;
    if let Some(outline) = &state.outline {
        tokio::fs::write(output.join("outline.md"), outline).await?;
    }
    if let Some(presentation) = &state.presentation {
        presentation.save(&output.join("script.json"))?;
    }
    Ok(())
}

fn print_summary(state: &RunState) {
    if let Some(presentation) = &state.presentation {
        println!(
            "Script: \"{}\" ({} slides)",
            presentation.presentation_title,
            presentation.slides.len()
        );
    }
    if state.evaluation.iteration > 0 {
        let verdict = if state.evaluation.passed { "approved" } else { "not approved" };
        println!("Review: {verdict} after {} evaluation(s)", state.evaluation.iteration);
    }
    if let Some(path) = &state.script_pdf {
        println!("Script PDF: {}", path.display());
    }
    if let Some(deck) = &state.deck {
        println!("Slides: {} ({} pages)", deck.path.display(), deck.page_count);
    }
    if !state.audio.is_empty() {
        let seconds: f64 = state.audio.values().map(SlideAudio::total_duration).sum();
        println!("Narration: {} slides, {:.1}s", state.audio.len(), seconds);
    }
    if let Some(path) = &state.video {
        println!("Video: {}", path.display());
    }
}

fn join_stages(stages: &[slidecast_types::StageId]) -> String {
    stages
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SlideReport {
    index: usize,
    title: String,
    bullets: usize,
    narration: usize,
    pages: usize,
    repaired: bool,
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    title: String,
    slides: Vec<SlideReport>,
    total_pages: usize,
    consistent: bool,
}

fn validation_report(mut presentation: Presentation) -> ValidationReport {
    let before: Vec<bool> = presentation
        .slides
        .iter()
        .map(|s| s.narration_is_consistent())
        .collect();
    let consistent = presentation.is_consistent();
    presentation.repair();

    let slides = presentation
        .slides
        .iter()
        .enumerate()
        .map(|(index, slide)| SlideReport {
            index,
            title: slide.title.clone(),
            bullets: slide.content.len(),
            narration: slide.narration.len(),
            pages: slide.reveal_pages(),
            repaired: !before[index],
        })
        .collect();

    ValidationReport {
        title: presentation.presentation_title.clone(),
        slides,
        total_pages: presentation.total_pages(),
        consistent,
    }
}

fn cmd_validate(path: &Path, json: bool) -> anyhow::Result<()> {
    let report = validation_report(Presentation::load(path)?);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Script: {}", report.title);
    println!("Slides: {}", report.slides.len());
    println!("Pages: {}", report.total_pages);
    for slide in &report.slides {
        let mark = if slide.repaired { " (narration repaired)" } else { "" };
        println!(
            "  {:>2}. {} [{} bullets, {} narration, {} pages]{}",
            slide.index, slide.title, slide.bullets, slide.narration, slide.pages, mark
        );
    }
    if report.consistent {
        println!("Script is consistent");
    } else {
        println!("Script needed repair; narration was padded or trimmed to match bullets");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Find narration for each slide: `slide_<i>.wav`, else `slide_<i>_seg_<k>.wav`
/// for each reveal step `k`, leaving a hole where a step has no file.
fn discover_audio(
    audio_dir: &Path,
    presentation: &Presentation,
) -> anyhow::Result<BTreeMap<usize, SlideAudio>> {
    let track = |path: PathBuf| -> anyhow::Result<AudioTrack> {
        let duration_secs = wav_duration(&path)?;
        Ok(AudioTrack {
            path,
            duration_secs,
        })
    };

    let mut audio = BTreeMap::new();
    for (index, slide) in presentation.slides.iter().enumerate() {
        let single = audio_dir.join(format!("slide_{index}.wav"));
        if single.is_file() {
            audio.insert(index, SlideAudio::Single(track(single)?));
            continue;
        }
        let mut segments = Vec::with_capacity(slide.reveal_pages());
        for step in 0..slide.reveal_pages() {
            let segment = audio_dir.join(format!("slide_{index}_seg_{step}.wav"));
            segments.push(if segment.is_file() {
                Some(track(segment)?)
            } else {
                None
            });
        }
        while segments.last().is_some_and(Option::is_none) {
            segments.pop();
        }
        if !segments.is_empty() {
            audio.insert(index, SlideAudio::Segmented(segments));
        }
    }
    Ok(audio)
}

fn cmd_plan(script: &Path, audio_dir: &Path, pages: usize, json: bool) -> anyhow::Result<()> {
    let mut presentation = Presentation::load(script)?;
    presentation.repair();
    let audio = discover_audio(audio_dir, &presentation)?;
    let plan = build_sync_plan(&presentation, &audio, pages)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Entries: {}", plan.len());
    println!("Duration: {:.2}s", plan.total_duration());
    for entry in plan.entries() {
        let background = match &entry.background {
            Some(bg) => format!(" bg {} @{:.2}s", bg.source.display(), bg.start),
            None => String::new(),
        };
        println!(
            "  slide {:>2} page {:>3}  {:>7.2}s +{:>6.2}s  {}{}",
            entry.slide_index,
            entry.page_index,
            entry.start,
            entry.duration,
            entry.audio.display(),
            background
        );
    }
    for shortfall in plan.shortfalls() {
        println!(
            "  warning: slide {} wanted page {}, used page {}",
            shortfall.slide_index, shortfall.requested_page, shortfall.substituted_page
        );
    }
    if !plan.skipped_slides().is_empty() {
        println!("  skipped slides (no audio): {:?}", plan.skipped_slides());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// info / clean
// ---------------------------------------------------------------------------

fn cmd_info(mode: RunMode, topic: Option<String>, with_outline: bool) {
    let mut state = RunState::new(mode);
    if let Some(topic) = topic {
        state = state.with_topic(topic);
    }
    if with_outline {
        state = state.with_outline("(outline)");
    }

    println!("Mode: {mode}");
    println!("Stages:");
    for (i, stage) in stage_plan(&state).iter().enumerate() {
        println!("  {}. {}", i + 1, stage);
    }
}

/// Remove everything a run may have written. Returns the removed paths.
async fn clean_output(output: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let config = PipelineConfig::default().with_output_dir(output);
    let mut removed = Vec::new();
    for path in config.generated_paths() {
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            continue;
        };
        if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        } else {
            tokio::fs::remove_file(&path).await?;
        }
        removed.push(path);
    }
    clear_checkpoint(output).await?;
    Ok(removed)
}

async fn cmd_clean(output: &Path) -> anyhow::Result<()> {
    let removed = clean_output(output).await?;
    if removed.is_empty() {
        println!("Nothing to clean in {}", output.display());
    }
    for path in &removed {
        println!("Removed {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use slidecast_types::Slide;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "slidecast",
            "run",
            "--mode",
            "video-production",
            "--audience",
            "kids",
            "--per-segment-audio",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                mode,
                audience,
                per_segment_audio,
                max_iterations,
                ..
            } => {
                assert_eq!(mode, Some(RunMode::VideoProduction));
                assert_eq!(audience, Audience::Kids);
                assert!(per_segment_audio);
                assert_eq!(max_iterations, 5);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn unknown_audience_is_rejected() {
        assert!(Cli::try_parse_from(["slidecast", "run", "--audience", "aliens"]).is_err());
    }

    #[test]
    fn validation_reports_repairs() {
        let presentation = Presentation {
            presentation_title: "Deck".into(),
            slides: vec![Slide {
                title: "One".into(),
                content: vec!["a".into(), "b".into()],
                narration: vec!["intro".into()],
                ..Default::default()
            }],
            ..Default::default()
        };
        let report = validation_report(presentation);
        assert!(!report.consistent);
        assert!(report.slides[0].repaired);
        assert_eq!(report.slides[0].narration, 3);
        assert_eq!(report.total_pages, 3);
    }

    #[test]
    fn discover_audio_prefers_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let wav = slidecast_llm::encode_wav(&vec![0u8; 48_000], 24_000, 1);
        std::fs::write(dir.path().join("slide_0.wav"), &wav).unwrap();
        std::fs::write(dir.path().join("slide_1_seg_0.wav"), &wav).unwrap();
        std::fs::write(dir.path().join("slide_1_seg_2.wav"), &wav).unwrap();
        let slide = |bullets: usize| Slide {
            title: "T".into(),
            content: (0..bullets).map(|i| format!("b{i}")).collect(),
            ..Default::default()
        };
        let presentation = Presentation {
            slides: vec![slide(0), slide(2), slide(1)],
            ..Default::default()
        };

        let audio = discover_audio(dir.path(), &presentation).unwrap();
        match audio.get(&0) {
            Some(SlideAudio::Single(t)) => assert!((t.duration_secs - 1.0).abs() < 1e-9),
            other => panic!("expected a single track, got {other:?}"),
        }
        // The missing middle step stays a hole so step 2 keeps its page.
        match audio.get(&1) {
            Some(SlideAudio::Segmented(t)) => {
                assert_eq!(t.len(), 3);
                assert!(t[0].is_some() && t[1].is_none() && t[2].is_some());
            }
            other => panic!("expected segments, got {other:?}"),
        }
        assert!(!audio.contains_key(&2));
    }

    #[tokio::test]
    async fn clean_removes_generated_paths_only() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path();
        std::fs::create_dir_all(out.join("images")).unwrap();
        std::fs::write(out.join("images").join("slide_0.png"), b"png").unwrap();
        std::fs::write(out.join("script.json"), b"{}").unwrap();
        std::fs::write(out.join("checkpoint.json"), b"{}").unwrap();
        std::fs::write(out.join("notes.txt"), b"keep").unwrap();

        let removed = clean_output(out).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(!out.join("images").exists());
        assert!(!out.join("script.json").exists());
        assert!(!out.join("checkpoint.json").exists());
        assert!(out.join("notes.txt").exists());
    }
}
