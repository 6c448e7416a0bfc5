//! Audio/page synchronization.
//!
//! Maps per-slide narration audio onto the pages of the compiled deck. Each
//! slide occupies `content.len() + 1` consecutive pages (one per reveal
//! step), starting at page 0 in slide order. The result is an immutable,
//! ordered [`SyncPlan`] of clip entries the renderer turns into video.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use slidecast_types::{AudioTrack, Presentation, Result, SlideAudio, SlidecastError, StageId};

/// A window into a looping motion background, in slide-timeline seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundSlice {
    pub source: PathBuf,
    pub start: f64,
    pub end: f64,
    /// Length of the slide the background loops under.
    pub loop_length: f64,
}

/// One page shown for one stretch of audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncEntry {
    pub slide_index: usize,
    pub page_index: usize,
    pub audio: PathBuf,
    /// Offsets into `audio`, in seconds.
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub background: Option<BackgroundSlice>,
}

/// A page the deck did not have; the last page was shown instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageShortfall {
    pub slide_index: usize,
    pub requested_page: usize,
    pub substituted_page: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncPlan {
    entries: Vec<SyncEntry>,
    shortfalls: Vec<PageShortfall>,
    skipped_slides: Vec<usize>,
}

impl SyncPlan {
    pub fn entries(&self) -> &[SyncEntry] {
        &self.entries
    }

    pub fn shortfalls(&self) -> &[PageShortfall] {
        &self.shortfalls
    }

    /// Slides with missing or unplayable audio.
    pub fn skipped_slides(&self) -> &[usize] {
        &self.skipped_slides
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.entries.iter().map(|e| e.duration).sum()
    }

    /// Distinct page indices the plan shows, ascending.
    pub fn pages_used(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.entries.iter().map(|e| e.page_index).collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

struct PlanBuilder {
    last_page: usize,
    plan: SyncPlan,
}

impl PlanBuilder {
    /// Clamp a page index into the deck, recording any shortfall.
    fn resolve_page(&mut self, slide_index: usize, requested: usize) -> usize {
        if requested <= self.last_page {
            return requested;
        }
        tracing::warn!(
            slide = slide_index,
            requested_page = requested,
            last_page = self.last_page,
            "Deck has fewer pages than the script, reusing last page"
        );
        self.plan.shortfalls.push(PageShortfall {
            slide_index,
            requested_page: requested,
            substituted_page: self.last_page,
        });
        self.last_page
    }

    fn push(
        &mut self,
        slide_index: usize,
        page: usize,
        track: &AudioTrack,
        start: f64,
        end: f64,
        background: Option<(&PathBuf, f64, f64, f64)>,
    ) {
        let duration = end - start;
        if !(duration.is_finite() && duration > 0.0) {
            return;
        }
        let page_index = self.resolve_page(slide_index, page);
        self.plan.entries.push(SyncEntry {
            slide_index,
            page_index,
            audio: track.path.clone(),
            start,
            end,
            duration,
            background: background.map(|(source, start, end, loop_length)| BackgroundSlice {
                source: source.clone(),
                start,
                end,
                loop_length,
            }),
        });
    }
}

/// Build the clip plan for a presentation, its narration audio, and a deck of
/// `page_count` pages.
///
/// Slides whose audio is missing, zero-length or non-finite contribute no
/// entries but still consume their pages.
pub fn build_sync_plan(
    presentation: &Presentation,
    audio: &BTreeMap<usize, SlideAudio>,
    page_count: usize,
) -> Result<SyncPlan> {
    if page_count == 0 {
        return Err(SlidecastError::MissingArtifact {
            stage: StageId::Video,
            artifact: "a compiled deck with at least one page".into(),
        });
    }

    let expected = presentation.total_pages();
    if expected != page_count {
        tracing::warn!(expected, page_count, "Deck page count differs from script");
    }

    let mut builder = PlanBuilder {
        last_page: page_count - 1,
        plan: SyncPlan::default(),
    };
    let slides = presentation.slides.iter().enumerate();
    for ((slide_index, slide), range) in slides.zip(presentation.page_ranges()) {
        let pages = range.len();
        let cursor = range.start;
        let background = slide
            .has_motion_background()
            .then_some(slide.image_path.as_ref())
            .flatten();
        let before = builder.plan.entries.len();

        match audio.get(&slide_index) {
            None => {
                tracing::debug!(slide = slide_index, "No narration audio for slide");
            }
            Some(SlideAudio::Single(track)) => {
                if track.is_playable() {
                    let total = track.duration_secs;
                    let step = total / pages as f64;
                    for k in 0..pages {
                        let start = k as f64 * step;
                        let end = (k + 1) as f64 * step;
                        let bg = background.map(|p| (p, start, end, total));
                        builder.push(slide_index, cursor + k, track, start, end, bg);
                    }
                } else {
                    tracing::warn!(
                        slide = slide_index,
                        duration = track.duration_secs,
                        "Unplayable narration audio"
                    );
                }
            }
            Some(SlideAudio::Segmented(tracks)) => {
                let playable: Vec<&AudioTrack> =
                    tracks.iter().flatten().filter(|t| t.is_playable()).collect();
                let total: f64 = playable.iter().map(|t| t.duration_secs).sum();
                if playable.len() < pages {
                    tracing::warn!(
                        slide = slide_index,
                        files = playable.len(),
                        pages,
                        "Fewer narration segments than pages, those pages stay unshown"
                    );
                }
                let mut elapsed = 0.0;
                for (step, track) in tracks.iter().enumerate() {
                    let Some(track) = track.as_ref().filter(|t| t.is_playable()) else {
                        continue;
                    };
                    let offset = step.min(pages - 1);
                    let slide_start = elapsed;
                    elapsed += track.duration_secs;
                    let bg = background.map(|p| (p, slide_start, elapsed, total));
                    let end = track.duration_secs;
                    builder.push(slide_index, cursor + offset, track, 0.0, end, bg);
                }
            }
        }

        if builder.plan.entries.len() == before {
            builder.plan.skipped_slides.push(slide_index);
        }
    }

    Ok(builder.plan)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
