//! Stage routing: entry selection by run mode and the static successor edges.
//!
//! The graph is acyclic. The only loop in a run (evaluate, optimise,
//! re-evaluate) is contained inside the review stage.

use slidecast_types::{RunMode, RunState, StageId};

/// Select the first stage of a run from its mode and inputs.
pub fn entry_stage(state: &RunState) -> StageId {
    match state.mode {
        RunMode::OutlineOnly => StageId::Outline,
        RunMode::ScriptOnly if state.has_source_material() => StageId::Script,
        RunMode::ScriptOnly => StageId::Review,
        RunMode::SlidesOnly => StageId::Images,
        RunMode::VideoProduction => StageId::Narration,
    }
}

/// The stage that follows `stage`, or `None` when the run ends there.
pub fn successor(stage: StageId) -> Option<StageId> {
    match stage {
        StageId::Script => Some(StageId::Review),
        StageId::Review => Some(StageId::ScriptPdf),
        StageId::Images => Some(StageId::Latex),
        StageId::Latex => Some(StageId::Compile),
        StageId::Narration => Some(StageId::Video),
        StageId::Outline | StageId::ScriptPdf | StageId::Compile | StageId::Video => None,
    }
}

/// Every stage a run over `state` would execute, in order.
pub fn stage_plan(state: &RunState) -> Vec<StageId> {
    stages_from(entry_stage(state))
}

/// The chain of stages starting at `start` and following successor edges.
pub fn stages_from(start: StageId) -> Vec<StageId> {
    let mut plan = vec![start];
    let mut current = start;
    while let Some(next) = successor(current) {
        plan.push(next);
        current = next;
    }
    plan
}
