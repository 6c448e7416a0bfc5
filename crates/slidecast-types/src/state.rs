//! Run state threaded through the stage graph.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::script::Presentation;
use crate::SlidecastError;

// ---------------------------------------------------------------------------
// RunMode
// ---------------------------------------------------------------------------

/// What a run should produce. Selects the entry stage of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    OutlineOnly,
    #[default]
    ScriptOnly,
    SlidesOnly,
    VideoProduction,
}

impl RunMode {
    pub const ALL: [RunMode; 4] = [
        RunMode::OutlineOnly,
        RunMode::ScriptOnly,
        RunMode::SlidesOnly,
        RunMode::VideoProduction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::OutlineOnly => "outline_only",
            RunMode::ScriptOnly => "script_only",
            RunMode::SlidesOnly => "slides_only",
            RunMode::VideoProduction => "video_production",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = SlidecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        RunMode::ALL
            .into_iter()
            .find(|m| m.as_str() == normalized)
            .ok_or_else(|| {
                SlidecastError::Other(format!(
                    "unknown run mode '{s}' (expected outline_only, script_only, slides_only or video_production)"
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Audience
// ---------------------------------------------------------------------------

/// Target audience. Drives image style, narration voice and delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Kids,
    Students,
    Professionals,
    #[default]
    General,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Kids => "kids",
            Audience::Students => "students",
            Audience::Professionals => "professionals",
            Audience::General => "general",
        }
    }

    /// Prefix prepended to every image and video prompt.
    pub fn image_style(&self) -> &'static str {
        match self {
            Audience::Kids => {
                "Hand-drawn crayon sketch, colorful, playful, child-friendly illustration,"
            }
            Audience::Students => {
                "Hand-drawn pencil sketch, educational diagram, clear and informative,"
            }
            Audience::Professionals => {
                "Minimalist architectural sketch, clean lines, professional, blueprint style,"
            }
            Audience::General => "Artistic ink sketch, hand-drawn illustration, high quality,",
        }
    }

    /// Prebuilt TTS voice name.
    pub fn voice(&self) -> &'static str {
        match self {
            Audience::Kids => "Puck",
            Audience::Students => "Kore",
            Audience::Professionals => "Charon",
            Audience::General => "Kore",
        }
    }

    /// Delivery instruction prepended to the narration text.
    pub fn delivery(&self) -> &'static str {
        match self {
            Audience::Kids => {
                "Read aloud in a fun, energetic, and playful tone, like a storyteller for children."
            }
            Audience::Students => {
                "Read aloud in a clear, educational, and engaging tone, like a friendly teacher."
            }
            Audience::Professionals => {
                "Read aloud in a professional, confident, and concise tone, suitable for a business presentation."
            }
            Audience::General => "Read aloud in a warm, welcoming, and conversational tone.",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = SlidecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kids" => Ok(Audience::Kids),
            "students" => Ok(Audience::Students),
            "professionals" => Ok(Audience::Professionals),
            "general" => Ok(Audience::General),
            other => Err(SlidecastError::Other(format!(
                "unknown audience '{other}' (expected kids, students, professionals or general)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// StageId / StateField
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Outline,
    Script,
    Review,
    ScriptPdf,
    Images,
    Latex,
    Compile,
    Narration,
    Video,
}

impl StageId {
    pub const ALL: [StageId; 9] = [
        StageId::Outline,
        StageId::Script,
        StageId::Review,
        StageId::ScriptPdf,
        StageId::Images,
        StageId::Latex,
        StageId::Compile,
        StageId::Narration,
        StageId::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Outline => "outline",
            StageId::Script => "script",
            StageId::Review => "review",
            StageId::ScriptPdf => "script_pdf",
            StageId::Images => "images",
            StageId::Latex => "latex",
            StageId::Compile => "compile",
            StageId::Narration => "narration",
            StageId::Video => "video",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field of [`RunState`] a stage may read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateField {
    Topic,
    Outline,
    Presentation,
    ScriptPdf,
    LatexSource,
    Deck,
    Audio,
    Video,
    Evaluation,
}

impl StateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateField::Topic => "topic",
            StateField::Outline => "outline",
            StateField::Presentation => "presentation",
            StateField::ScriptPdf => "script_pdf",
            StateField::LatexSource => "latex_source",
            StateField::Deck => "deck",
            StateField::Audio => "audio",
            StateField::Video => "video",
            StateField::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Verdict of one quality-check attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub passed: bool,
    #[serde(default)]
    pub feedback: String,
}

impl EvaluationResult {
    pub fn pass(feedback: impl Into<String>) -> Self {
        Self {
            passed: true,
            feedback: feedback.into(),
        }
    }

    pub fn fail(feedback: impl Into<String>) -> Self {
        Self {
            passed: false,
            feedback: feedback.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationState {
    pub iteration: u32,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

// ---------------------------------------------------------------------------
// Media artifacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrack {
    pub path: PathBuf,
    pub duration_secs: f64,
}

impl AudioTrack {
    /// A track is playable when its duration is finite and positive.
    pub fn is_playable(&self) -> bool {
        self.duration_secs.is_finite() && self.duration_secs > 0.0
    }
}

/// Narration audio for one slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideAudio {
    /// One file covering every reveal page of the slide.
    Single(AudioTrack),
    /// One file per reveal step, indexed by step. `None` marks a step whose
    /// segment could not be synthesized; later steps keep their positions.
    Segmented(Vec<Option<AudioTrack>>),
}

impl SlideAudio {
    pub fn total_duration(&self) -> f64 {
        match self {
            SlideAudio::Single(track) => track.duration_secs,
            SlideAudio::Segmented(tracks) => {
                tracks.iter().flatten().map(|t| t.duration_secs).sum()
            }
        }
    }
}

/// A compiled slide document and its probed page count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledDeck {
    pub path: PathBuf,
    pub page_count: usize,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Versioned state of a single run.
///
/// Created from caller input and changed only through [`RunState::merge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: uuid::Uuid,
    pub version: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub mode: RunMode,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub outline: Option<String>,
    #[serde(default)]
    pub presentation: Option<Presentation>,
    #[serde(default)]
    pub script_pdf: Option<PathBuf>,
    #[serde(default)]
    pub latex_source: Option<String>,
    #[serde(default)]
    pub deck: Option<CompiledDeck>,
    #[serde(default)]
    pub audio: BTreeMap<usize, SlideAudio>,
    #[serde(default)]
    pub video: Option<PathBuf>,
    #[serde(default)]
    pub evaluation: EvaluationState,
}

impl RunState {
    pub fn new(mode: RunMode) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4(),
            version: 0,
            created_at: chrono::Utc::now(),
            mode,
            audience: Audience::default(),
            topic: None,
            outline: None,
            presentation: None,
            script_pdf: None,
            latex_source: None,
            deck: None,
            audio: BTreeMap::new(),
            video: None,
            evaluation: EvaluationState::default(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_outline(mut self, outline: impl Into<String>) -> Self {
        self.outline = Some(outline.into());
        self
    }

    pub fn with_presentation(mut self, presentation: Presentation) -> Self {
        self.presentation = Some(presentation);
        self
    }

    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = audience;
        self
    }

    /// True when there is a non-blank topic or outline to generate from.
    pub fn has_source_material(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.topic) || present(&self.outline)
    }

    /// Apply a stage update: each present field replaces the current value.
    ///
    /// Returns the fields that were written. The version is bumped once per
    /// merge, even for an empty update.
    pub fn merge(&mut self, update: StateUpdate) -> Vec<StateField> {
        let touched = update.touched_fields();
        let StateUpdate {
            topic,
            outline,
            presentation,
            script_pdf,
            latex_source,
            deck,
            audio,
            video,
            evaluation,
        } = update;

        if let Some(v) = topic {
            self.topic = Some(v);
        }
        if let Some(v) = outline {
            self.outline = Some(v);
        }
        if let Some(v) = presentation {
            self.presentation = Some(v);
        }
        if let Some(v) = script_pdf {
            self.script_pdf = Some(v);
        }
        if let Some(v) = latex_source {
            self.latex_source = Some(v);
        }
        if let Some(v) = deck {
            self.deck = Some(v);
        }
        if let Some(v) = audio {
            self.audio = v;
        }
        if let Some(v) = video {
            self.video = Some(v);
        }
        if let Some(v) = evaluation {
            self.evaluation = v;
        }

        self.version += 1;
        touched
    }
}

// ---------------------------------------------------------------------------
// StateUpdate
// ---------------------------------------------------------------------------

/// Partial state returned by a stage. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub topic: Option<String>,
    pub outline: Option<String>,
    pub presentation: Option<Presentation>,
    pub script_pdf: Option<PathBuf>,
    pub latex_source: Option<String>,
    pub deck: Option<CompiledDeck>,
    pub audio: Option<BTreeMap<usize, SlideAudio>>,
    pub video: Option<PathBuf>,
    pub evaluation: Option<EvaluationState>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outline(mut self, outline: impl Into<String>) -> Self {
        self.outline = Some(outline.into());
        self
    }

    pub fn presentation(mut self, presentation: Presentation) -> Self {
        self.presentation = Some(presentation);
        self
    }

    pub fn script_pdf(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_pdf = Some(path.into());
        self
    }

    pub fn latex_source(mut self, source: impl Into<String>) -> Self {
        self.latex_source = Some(source.into());
        self
    }

    pub fn deck(mut self, deck: CompiledDeck) -> Self {
        self.deck = Some(deck);
        self
    }

    pub fn audio(mut self, audio: BTreeMap<usize, SlideAudio>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn video(mut self, path: impl Into<PathBuf>) -> Self {
        self.video = Some(path.into());
        self
    }

    pub fn evaluation(mut self, evaluation: EvaluationState) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    /// Fields this update writes, in declaration order.
    pub fn touched_fields(&self) -> Vec<StateField> {
        let mut fields = Vec::new();
        if self.topic.is_some() {
            fields.push(StateField::Topic);
        }
        if self.outline.is_some() {
            fields.push(StateField::Outline);
        }
        if self.presentation.is_some() {
            fields.push(StateField::Presentation);
        }
        if self.script_pdf.is_some() {
            fields.push(StateField::ScriptPdf);
        }
        if self.latex_source.is_some() {
            fields.push(StateField::LatexSource);
        }
        if self.deck.is_some() {
            fields.push(StateField::Deck);
        }
        if self.audio.is_some() {
            fields.push(StateField::Audio);
        }
        if self.video.is_some() {
            fields.push(StateField::Video);
        }
        if self.evaluation.is_some() {
            fields.push(StateField::Evaluation);
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }
}
