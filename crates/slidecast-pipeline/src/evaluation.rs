//! Bounded evaluate/optimise loop run inside the review stage.
//!
//! The loop is an explicit state machine over [`LoopPhase`]. Every evaluation
//! attempt advances the iteration counter, and the loop always terminates:
//! either the script passes or the iteration budget runs out and the script
//! proceeds as is.

use std::sync::Arc;

use async_trait::async_trait;

use slidecast_types::{EvaluationResult, EvaluationState, Presentation, Result};

use crate::events::{EventEmitter, PipelineEvent};

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait QualityChecker: Send + Sync {
    async fn check(&self, presentation: &Presentation) -> Result<EvaluationResult>;
}

#[async_trait]
pub trait ScriptOptimiser: Send + Sync {
    async fn optimise(&self, presentation: &Presentation, feedback: &str) -> Result<Presentation>;
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Evaluating,
    Optimising,
    Proceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    Proceed,
    Optimise,
}

/// Decide what follows an evaluation.
///
/// A failing script proceeds anyway once `iteration` reaches `max_iterations`.
pub fn decide(evaluation: &EvaluationState, max_iterations: u32) -> LoopDecision {
    if evaluation.passed || evaluation.iteration >= max_iterations {
        LoopDecision::Proceed
    } else {
        LoopDecision::Optimise
    }
}

/// Outcome of a full loop.
#[derive(Debug, Clone)]
pub struct LoopReport {
    pub presentation: Presentation,
    pub evaluation: EvaluationState,
    pub history: Vec<EvaluationResult>,
    pub optimisations: u32,
}

impl LoopReport {
    pub fn evaluations(&self) -> usize {
        self.history.len()
    }
}

pub struct EvaluationLoop {
    checker: Arc<dyn QualityChecker>,
    optimiser: Arc<dyn ScriptOptimiser>,
    max_iterations: u32,
    events: Option<EventEmitter>,
}

impl EvaluationLoop {
    pub fn new(checker: Arc<dyn QualityChecker>, optimiser: Arc<dyn ScriptOptimiser>) -> Self {
        Self {
            checker,
            optimiser,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            events: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Run the loop to completion. Never fails: checker and optimiser errors
    /// are absorbed and logged.
    pub async fn run(&self, presentation: Presentation, initial: &EvaluationState) -> LoopReport {
        let mut presentation = presentation;
        let mut evaluation = initial.clone();
        let mut history = Vec::new();
        let mut optimisations = 0;
        let mut phase = LoopPhase::Evaluating;

        loop {
            match phase {
                LoopPhase::Evaluating => {
                    let result = self.evaluate(&presentation).await;
                    evaluation = EvaluationState {
                        iteration: evaluation.iteration + 1,
                        passed: result.passed,
                        feedback: Some(result.feedback.clone()),
                    };
                    tracing::info!(
                        iteration = evaluation.iteration,
                        passed = evaluation.passed,
                        "Script evaluated"
                    );
                    self.emit(PipelineEvent::EvaluationAttempted {
                        iteration: evaluation.iteration,
                        passed: result.passed,
                        feedback: result.feedback.clone(),
                    });
                    history.push(result);

                    phase = match decide(&evaluation, self.max_iterations) {
                        LoopDecision::Proceed => LoopPhase::Proceeded,
                        LoopDecision::Optimise => LoopPhase::Optimising,
                    };
                    if phase == LoopPhase::Proceeded && !evaluation.passed {
                        tracing::warn!(
                            iteration = evaluation.iteration,
                            max_iterations = self.max_iterations,
                            "Iteration budget spent, proceeding with unapproved script"
                        );
                    }
                }
                LoopPhase::Optimising => {
                    self.emit(PipelineEvent::OptimisationRequested {
                        iteration: evaluation.iteration,
                    });
                    let feedback = evaluation.feedback.clone().unwrap_or_default();
                    match self.optimiser.optimise(&presentation, &feedback).await {
                        Ok(mut revised) => {
                            revised.repair();
                            presentation = revised;
                        }
                        Err(e) => {
                            tracing::warn!(
                                iteration = evaluation.iteration,
                                error = %e,
                                "Optimisation failed, re-evaluating current script"
                            );
                        }
                    }
                    optimisations += 1;
                    phase = LoopPhase::Evaluating;
                }
                LoopPhase::Proceeded => break,
            }
        }

        LoopReport {
            presentation,
            evaluation,
            history,
            optimisations,
        }
    }

    /// One quality check. Empty scripts and checker failures count as passes.
    async fn evaluate(&self, presentation: &Presentation) -> EvaluationResult {
        if presentation.is_empty() {
            return EvaluationResult::pass("No slides to evaluate; skipping quality check.");
        }
        match self.checker.check(presentation).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Quality check failed, letting script proceed");
                EvaluationResult::pass(format!(
                    "Quality check unavailable ({e}); script accepted as is."
                ))
            }
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use slidecast_types::{Slide, SlidecastError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn one_slide() -> Presentation {
        Presentation {
            presentation_title: "Tides".into(),
            slides: vec![Slide {
                title: "Moon".into(),
                content: vec!["Gravity pulls water".into()],
                narration: vec!["Welcome.".into(), "The moon pulls.".into()],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    struct Scripted {
        verdicts: Vec<bool>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(verdicts: Vec<bool>) -> Self {
            Self {
                verdicts,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QualityChecker for Scripted {
        async fn check(&self, _p: &Presentation) -> Result<EvaluationResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let passed = self.verdicts.get(n).copied().unwrap_or(false);
            Ok(EvaluationResult {
                passed,
                feedback: format!("verdict {n}"),
            })
        }
    }

    struct Raising;

    #[async_trait]
    impl QualityChecker for Raising {
        async fn check(&self, _p: &Presentation) -> Result<EvaluationResult> {
            Err(SlidecastError::Other("model returned prose".into()))
        }
    }

    /// Adds a bullet without narration so the loop must re-repair.
    struct AddBullet {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ScriptOptimiser for AddBullet {
        async fn optimise(&self, p: &Presentation, _feedback: &str) -> Result<Presentation> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut revised = p.clone();
            revised.slides[0].content.push("New point".into());
            Ok(revised)
        }
    }

    struct FailingOptimiser;

    #[async_trait]
    impl ScriptOptimiser for FailingOptimiser {
        async fn optimise(&self, _p: &Presentation, _feedback: &str) -> Result<Presentation> {
            Err(SlidecastError::RateLimited {
                provider: "google".into(),
                retry_after_ms: 0,
            })
        }
    }

    // Test 1: decision table
    #[test]
    fn decide_table() {
        let passed = EvaluationState { iteration: 1, passed: true, feedback: None };
        assert_eq!(decide(&passed, 5), LoopDecision::Proceed);

        let failing = EvaluationState { iteration: 4, passed: false, feedback: None };
        assert_eq!(decide(&failing, 5), LoopDecision::Optimise);

        let exhausted = EvaluationState { iteration: 5, passed: false, feedback: None };
        assert_eq!(decide(&exhausted, 5), LoopDecision::Proceed);
    }

    // Test 2: a passing script proceeds after one evaluation, no optimisation
    #[tokio::test]
    async fn passing_script_proceeds() {
        let lp = EvaluationLoop::new(
            Arc::new(Scripted::new(vec![true])),
            Arc::new(AddBullet { calls: AtomicUsize::new(0) }),
        );
        let report = lp.run(one_slide(), &EvaluationState::default()).await;
        assert!(report.evaluation.passed);
        assert_eq!(report.evaluation.iteration, 1);
        assert_eq!(report.evaluations(), 1);
        assert_eq!(report.optimisations, 0);
    }

    // Test 3: always-failing checker stops at exactly max_iterations
    #[tokio::test]
    async fn always_failing_stops_at_budget() {
        let optimiser = Arc::new(AddBullet { calls: AtomicUsize::new(0) });
        let lp = EvaluationLoop::new(Arc::new(Scripted::new(vec![])), optimiser.clone());
        let report = lp.run(one_slide(), &EvaluationState::default()).await;

        assert!(!report.evaluation.passed);
        assert_eq!(report.evaluation.iteration, 5);
        assert_eq!(report.evaluations(), 5);
        assert_eq!(report.optimisations, 4);
        assert_eq!(optimiser.calls.load(Ordering::SeqCst), 4);
    }

    // Test 4: a raising checker passes after one attempt
    #[tokio::test]
    async fn raising_checker_fails_open() {
        let lp = EvaluationLoop::new(
            Arc::new(Raising),
            Arc::new(AddBullet { calls: AtomicUsize::new(0) }),
        );
        let report = lp.run(one_slide(), &EvaluationState::default()).await;
        assert!(report.evaluation.passed);
        assert_eq!(report.evaluation.iteration, 1);
        assert!(report.evaluation.feedback.unwrap().contains("model returned prose"));
    }

    // Test 5: an empty script short-circuits but still advances the iteration
    #[tokio::test]
    async fn empty_script_passes() {
        let checker = Arc::new(Scripted::new(vec![false]));
        let lp = EvaluationLoop::new(
            checker.clone(),
            Arc::new(AddBullet { calls: AtomicUsize::new(0) }),
        );
        let start = EvaluationState { iteration: 2, passed: false, feedback: None };
        let report = lp.run(Presentation::default(), &start).await;
        assert!(report.evaluation.passed);
        assert_eq!(report.evaluation.iteration, 3);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 0);
    }

    // Test 6: optimised scripts are repaired before re-evaluation
    #[tokio::test]
    async fn optimised_script_is_repaired() {
        let lp = EvaluationLoop::new(
            Arc::new(Scripted::new(vec![false, true])),
            Arc::new(AddBullet { calls: AtomicUsize::new(0) }),
        );
        let report = lp.run(one_slide(), &EvaluationState::default()).await;
        assert!(report.evaluation.passed);
        assert_eq!(report.evaluation.iteration, 2);
        let slide = &report.presentation.slides[0];
        assert_eq!(slide.content.len(), 2);
        assert_eq!(slide.narration.len(), 3);
        assert_eq!(slide.narration[2], "Point 1.");
    }

    // Test 7: optimiser failure keeps the current script and re-evaluates
    #[tokio::test]
    async fn optimiser_failure_keeps_script() {
        let checker = Arc::new(Scripted::new(vec![false, false, true]));
        let lp = EvaluationLoop::new(checker, Arc::new(FailingOptimiser)).with_max_iterations(3);
        let original = one_slide();
        let report = lp.run(original.clone(), &EvaluationState::default()).await;
        assert_eq!(report.presentation, original);
        assert_eq!(report.evaluation.iteration, 3);
        assert!(report.evaluation.passed);
        assert_eq!(report.optimisations, 2);
    }

    // Test 8: events are published per attempt and per optimisation
    #[tokio::test]
    async fn loop_emits_events() {
        let events = EventEmitter::new(32);
        let mut rx = events.subscribe();
        let lp = EvaluationLoop::new(
            Arc::new(Scripted::new(vec![false, true])),
            Arc::new(AddBullet { calls: AtomicUsize::new(0) }),
        )
        .with_events(events);
        lp.run(one_slide(), &EvaluationState::default()).await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::EvaluationAttempted {
                iteration: 1,
                passed: false,
                ..
            }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::OptimisationRequested { iteration: 1 }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            PipelineEvent::EvaluationAttempted {
                iteration: 2,
                passed: true,
                ..
            }
        ));
    }
}
