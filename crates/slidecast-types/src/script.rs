//! Slide and presentation model.
//!
//! A [`Presentation`] is an ordered list of [`Slide`]s. Slide order defines both
//! compiled page order and narration order. Every slide carries one narration
//! segment per reveal step: an introduction plus one segment per bullet, so
//! `narration.len() == content.len() + 1` after [`Slide::repair`].

use std::ops::Range;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{Result, SlidecastError};

/// File extensions treated as motion (video) media rather than still images.
const MOTION_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv"];

// ---------------------------------------------------------------------------
// SlideKind / SlideLayout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideKind {
    Title,
    #[default]
    Content,
}

impl<'de> Deserialize<'de> for SlideKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        let kind = match raw.as_ref().and_then(Value::as_str).map(str::to_ascii_lowercase) {
            Some(s) if s == "title" || s == "title_slide" => SlideKind::Title,
            _ => SlideKind::Content,
        };
        Ok(kind)
    }
}

/// Page layout of a slide. Both layouts reveal one bullet per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlideLayout {
    /// Bullets on the left, media on the right.
    #[default]
    Standard,
    /// Media on the left, bullets on the right.
    ImageLeft,
}

impl<'de> Deserialize<'de> for SlideLayout {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<Value>::deserialize(deserializer)?;
        let layout = match raw.as_ref().and_then(Value::as_str) {
            Some("image_left") | Some("split_vertical") => SlideLayout::ImageLeft,
            _ => SlideLayout::Standard,
        };
        Ok(layout)
    }
}

// ---------------------------------------------------------------------------
// Lenient field deserializers
// ---------------------------------------------------------------------------

/// Accepts a list (non-string items dropped), a single string, or null.
fn string_items<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => vec![s],
        _ => Vec::new(),
    })
}

/// Accepts a string, a number, a list of strings (joined), or null.
fn loose_text<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    })
}

fn loose_bool<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

// ---------------------------------------------------------------------------
// Slide
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Slide {
    #[serde(rename = "type", default)]
    pub kind: SlideKind,
    #[serde(default, deserialize_with = "loose_text")]
    pub title: String,
    #[serde(default, deserialize_with = "string_items")]
    pub content: Vec<String>,
    #[serde(default, deserialize_with = "string_items")]
    pub narration: Vec<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub image_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_prompt: Option<String>,
    #[serde(default, deserialize_with = "loose_bool")]
    pub is_video_slide: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub layout: SlideLayout,
}

impl Slide {
    /// Number of compiled pages this slide produces: the bare slide plus one
    /// page per revealed bullet.
    pub fn reveal_pages(&self) -> usize {
        self.content.len() + 1
    }

    pub fn narration_is_consistent(&self) -> bool {
        self.narration.len() == self.reveal_pages()
    }

    /// Restore the narration invariant in place.
    ///
    /// Blank bullets are removed first, then narration is padded with
    /// `"Point k."` placeholders or truncated to `content.len() + 1`.
    pub fn repair(&mut self) {
        self.content.retain(|item| !item.trim().is_empty());

        let expected = self.reveal_pages();
        if self.narration.len() < expected {
            let missing = expected - self.narration.len();
            self.narration
                .extend((1..=missing).map(|k| format!("Point {k}.")));
        } else {
            self.narration.truncate(expected);
        }
    }

    /// True when the slide's resolved media is a video clip.
    pub fn has_motion_background(&self) -> bool {
        self.is_video_slide
            && self
                .image_path
                .as_deref()
                .is_some_and(is_motion_media)
    }

    /// Narration segments with markdown emphasis and heading markers removed.
    pub fn spoken_segments(&self) -> Vec<String> {
        self.narration
            .iter()
            .map(|segment| strip_markdown(segment))
            .collect()
    }

    /// All narration for the slide as one utterance, falling back to the title
    /// when the slide has nothing to say.
    pub fn spoken_text(&self) -> String {
        let joined = self
            .spoken_segments()
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            let title = strip_markdown(&self.title);
            if title.trim().is_empty() {
                "Slide".to_string()
            } else {
                title.trim().to_string()
            }
        } else {
            joined
        }
    }
}

/// Returns `true` if `path` points at a video container.
pub fn is_motion_media(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MOTION_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn strip_markdown(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '_' | '#'))
        .collect()
}

// ---------------------------------------------------------------------------
// Presentation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Presentation {
    #[serde(default, deserialize_with = "loose_text")]
    pub presentation_title: String,
    #[serde(default, deserialize_with = "loose_text")]
    pub module: String,
    #[serde(default, deserialize_with = "loose_text")]
    pub episode: String,
    #[serde(default, deserialize_with = "string_items")]
    pub learning_objectives: Vec<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub duration: String,
    #[serde(default, deserialize_with = "string_items")]
    pub outline: Vec<String>,
    #[serde(default, deserialize_with = "string_items")]
    pub meta_tags: Vec<String>,
    #[serde(default, deserialize_with = "loose_text")]
    pub prerequisites: String,
    #[serde(default)]
    pub slides: Vec<Slide>,
}

impl Presentation {
    /// Parse raw generator output, tolerating a surrounding markdown code fence.
    ///
    /// Text that is not JSON at all is an error; anything that parses is
    /// normalised and repaired.
    pub fn from_generated_text(text: &str) -> Result<Self> {
        let body = strip_code_fence(text);
        let value: Value = serde_json::from_str(body)?;
        Self::from_generated(value)
    }

    /// Build a presentation from a parsed generator value and repair it.
    ///
    /// A bare array is read as the slide list. A narration given as one string
    /// becomes an introduction followed by one copy per bullet.
    pub fn from_generated(value: Value) -> Result<Self> {
        let mut value = match value {
            Value::Array(slides) => serde_json::json!({ "slides": slides }),
            Value::Object(_) => value,
            other => {
                return Err(SlidecastError::Other(format!(
                    "generated script must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        if let Some(map) = value.as_object_mut() {
            map.retain(|_, v| !v.is_null());
        }
        if let Some(slides) = value.get_mut("slides").and_then(Value::as_array_mut) {
            slides.retain(Value::is_object);
            for slide in slides.iter_mut() {
                normalize_slide(slide);
            }
        }

        let mut presentation: Presentation = serde_json::from_value(value)?;
        presentation.repair();
        Ok(presentation)
    }

    /// Read a script file from disk. The file goes through the same
    /// normalisation as generator output.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_generated_text(&data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn repair(&mut self) {
        for slide in &mut self.slides {
            slide.repair();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        self.slides.iter().all(Slide::narration_is_consistent)
    }

    /// Total number of pages the compiled deck should contain.
    pub fn total_pages(&self) -> usize {
        self.slides.iter().map(Slide::reveal_pages).sum()
    }

    /// Page range occupied by each slide, in slide order, starting at page 0.
    pub fn page_ranges(&self) -> Vec<Range<usize>> {
        let mut cursor = 0;
        self.slides
            .iter()
            .map(|slide| {
                let start = cursor;
                cursor += slide.reveal_pages();
                start..cursor
            })
            .collect()
    }
}

/// Expand a string narration against the slide's bullet count so the
/// introduction and each bullet get a segment.
fn normalize_slide(slide: &mut Value) {
    let Some(map) = slide.as_object_mut() else {
        return;
    };
    map.retain(|_, v| !v.is_null());

    let bullets = map
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .count()
        })
        .unwrap_or(0);

    if let Some(Value::String(text)) = map.get("narration") {
        let mut segments = Vec::with_capacity(bullets + 1);
        segments.push(Value::String("Introduction.".into()));
        segments.extend(std::iter::repeat(Value::String(text.clone())).take(bullets));
        map.insert("narration".into(), Value::Array(segments));
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Strip a leading ```` ```json ```` fence and its closing fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slide(content: &[&str], narration: &[&str]) -> Slide {
        Slide {
            title: "Ownership".into(),
            content: content.iter().map(|s| s.to_string()).collect(),
            narration: narration.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn string_narration_expands_per_bullet() {
        let p = Presentation::from_generated(json!({
            "slides": [{ "type": "content_slide", "title": "T", "content": ["a", "b"], "narration": "hello" }]
        }))
        .unwrap();
        assert_eq!(p.slides[0].narration, vec!["Introduction.", "hello", "hello"]);
    }

    #[test]
    fn short_narration_is_padded_from_one() {
        let mut s = slide(&["a", "b", "c"], &["intro"]);
        s.repair();
        assert_eq!(s.narration, vec!["intro", "Point 1.", "Point 2.", "Point 3."]);
    }

    #[test]
    fn long_narration_is_truncated() {
        let mut s = slide(&["a"], &["intro", "one", "two", "three"]);
        s.repair();
        assert_eq!(s.narration, vec!["intro", "one"]);
    }

    #[test]
    fn empty_content_and_empty_narration() {
        let mut s = slide(&[], &[]);
        s.repair();
        assert_eq!(s.narration, vec!["Point 1."]);
        assert_eq!(s.reveal_pages(), 1);
    }

    #[test]
    fn blank_bullets_removed_before_counting() {
        let mut s = slide(&["a", "  ", "", "b"], &["i", "x", "y"]);
        s.repair();
        assert_eq!(s.content, vec!["a", "b"]);
        assert!(s.narration_is_consistent());
    }

    #[test]
    fn non_string_items_are_dropped() {
        let p = Presentation::from_generated(json!({
            "slides": [{ "content": ["a", 3, null, "b"], "narration": ["i", 7, "x"] }]
        }))
        .unwrap();
        let s = &p.slides[0];
        assert_eq!(s.content, vec!["a", "b"]);
        assert_eq!(s.narration, vec!["i", "x", "Point 1."]);
    }

    #[test]
    fn missing_fields_default() {
        let p = Presentation::from_generated(json!({ "slides": [{}] })).unwrap();
        assert_eq!(p.presentation_title, "");
        assert_eq!(p.slides[0].kind, SlideKind::Content);
        assert_eq!(p.slides[0].layout, SlideLayout::Standard);
        assert_eq!(p.slides[0].narration.len(), 1);
    }

    #[test]
    fn generator_spellings_for_kind() {
        let p = Presentation::from_generated(json!({
            "slides": [{ "type": "title_slide" }, { "type": "content_slide" }, { "type": "title" }]
        }))
        .unwrap();
        let kinds: Vec<_> = p.slides.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SlideKind::Title, SlideKind::Content, SlideKind::Title]);
    }

    #[test]
    fn numeric_module_and_list_prerequisites_accepted() {
        let p = Presentation::from_generated(json!({
            "module": 3,
            "episode": "2",
            "prerequisites": ["Rust basics", "Cargo"],
            "slides": []
        }))
        .unwrap();
        assert_eq!(p.module, "3");
        assert_eq!(p.prerequisites, "Rust basics, Cargo");
        assert!(p.is_empty());
    }

    #[test]
    fn null_slides_treated_as_empty() {
        let p = Presentation::from_generated(json!({ "presentation_title": null, "slides": null }))
            .unwrap();
        assert!(p.is_empty());
    }

    #[test]
    fn bare_array_is_read_as_slides() {
        let p = Presentation::from_generated(json!([{ "title": "Only" }])).unwrap();
        assert_eq!(p.slides.len(), 1);
        assert_eq!(p.slides[0].title, "Only");
    }

    #[test]
    fn non_json_text_is_an_error() {
        let err = Presentation::from_generated_text("Sorry, I cannot help with that.").unwrap_err();
        assert!(matches!(err, SlidecastError::Json(_)));
    }

    #[test]
    fn scalar_json_is_an_error() {
        let err = Presentation::from_generated(json!("just text")).unwrap_err();
        assert!(err.to_string().contains("a string"));
    }

    #[test]
    fn fenced_output_is_parsed() {
        let text = "```json\n{\"presentation_title\": \"Async\", \"slides\": []}\n```";
        let p = Presentation::from_generated_text(text).unwrap();
        assert_eq!(p.presentation_title, "Async");
    }

    #[test]
    fn strip_code_fence_passthrough() {
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
    }

    #[test]
    fn page_ranges_follow_slide_order() {
        let p = Presentation {
            slides: vec![slide(&["a", "b"], &[]), slide(&[], &[]), slide(&["a"], &[])],
            ..Default::default()
        };
        assert_eq!(p.page_ranges(), vec![0..3, 3..4, 4..6]);
        assert_eq!(p.total_pages(), 6);
    }

    #[test]
    fn spoken_text_strips_markdown_and_falls_back_to_title() {
        let s = slide(&["a"], &["**Hello** there", "# point_one"]);
        assert_eq!(s.spoken_text(), "Hello there pointone");

        let silent = slide(&[], &["  "]);
        assert_eq!(silent.spoken_text(), "Ownership");
    }

    #[test]
    fn motion_background_requires_video_media() {
        let mut s = slide(&[], &[]);
        s.is_video_slide = true;
        s.image_path = Some(PathBuf::from("media/slide_0.png"));
        assert!(!s.has_motion_background());
        s.image_path = Some(PathBuf::from("media/slide_0.MP4"));
        assert!(s.has_motion_background());
        s.is_video_slide = false;
        assert!(!s.has_motion_background());
    }

    #[test]
    fn save_and_load_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.json");
        let p = Presentation {
            presentation_title: "Traits".into(),
            slides: vec![slide(&["a"], &["i", "x"])],
            ..Default::default()
        };
        p.save(&path).unwrap();
        assert_eq!(Presentation::load(&path).unwrap(), p);
    }
}
