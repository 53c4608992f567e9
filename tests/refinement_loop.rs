//! Loop-level properties of the refinement engine, driven by mock services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use prose_refinery::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn long_text(words: usize, seed: &str) -> String {
    (0..words)
        .map(|i| format!("{seed}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Critic that replays scripted raw responses; the last one repeats.
struct ScriptedCritic {
    responses: Vec<String>,
    calls: AtomicUsize,
}

impl ScriptedCritic {
    fn scores(scores: &[f64]) -> Self {
        Self {
            responses: scores
                .iter()
                .map(|s| format!(r#"{{"score": {s}, "issues": ["needs work"]}}"#))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CriticService for ScriptedCritic {
    async fn evaluate(&self, _request: CriticRequest<'_>) -> Result<String> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.responses[idx.min(self.responses.len() - 1)].clone())
    }
}

/// Fixer that replays scripted rewrites and records what it was asked.
struct ScriptedFixer {
    outputs: Vec<String>,
    calls: AtomicUsize,
    seen_instructions: Mutex<Vec<String>>,
    seen_priors: Mutex<Vec<String>>,
}

impl ScriptedFixer {
    fn new(outputs: Vec<String>) -> Self {
        Self {
            outputs,
            calls: AtomicUsize::new(0),
            seen_instructions: Mutex::new(Vec::new()),
            seen_priors: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FixerService for ScriptedFixer {
    async fn rewrite(&self, request: FixRequest<'_>) -> Result<String> {
        self.seen_instructions
            .lock()
            .unwrap()
            .push(request.instructions.to_string());
        self.seen_priors
            .lock()
            .unwrap()
            .push(request.prior_text.to_string());
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outputs[idx.min(self.outputs.len() - 1)].clone())
    }
}

struct FailingFixer;

#[async_trait]
impl FixerService for FailingFixer {
    async fn rewrite(&self, _request: FixRequest<'_>) -> Result<String> {
        Err(RefineError::ServiceUnavailable {
            message: "fixer offline".into(),
        })
    }
}

#[tokio::test]
async fn converges_immediately_when_target_met() {
    init_tracing();
    let critic = Arc::new(ScriptedCritic::scores(&[9.5]));
    let fixer = Arc::new(ScriptedFixer::new(vec![]));
    let engine = RefinementEngine::builder(critic.clone(), fixer.clone()).build();

    let draft = long_text(120, "alpha");
    let outcome = engine
        .refine(RefinementRequest::new(&draft, "rubric", "profile").with_target_score(9.0))
        .await;

    assert!(outcome.converged());
    assert_eq!(outcome.status, RefinementStatus::Converged);
    assert_eq!(outcome.text, draft);
    assert_eq!(outcome.score, 9.5);
    assert_eq!(outcome.history.len(), 1);
    assert_eq!(critic.call_count(), 1);
    assert_eq!(fixer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn terminates_within_iteration_budget() {
    init_tracing();
    let critic = Arc::new(ScriptedCritic::scores(&[5.0]));
    let fixer = Arc::new(ScriptedFixer::new(vec![
        long_text(120, "beta"),
        long_text(130, "gamma"),
        long_text(140, "delta"),
        long_text(150, "epsilon"),
    ]));
    let engine = RefinementEngine::builder(critic.clone(), fixer).build();

    let outcome = engine
        .refine(
            RefinementRequest::new(long_text(120, "alpha"), "rubric", "profile")
                .with_max_iterations(4),
        )
        .await;

    assert_eq!(outcome.status, RefinementStatus::Exhausted);
    // One scoring pass per iteration plus the final pass on the best text.
    assert_eq!(critic.call_count(), 5);
    assert_eq!(outcome.history.len(), 5);
}

#[tokio::test]
async fn best_seen_text_is_returned_on_exhaustion() {
    init_tracing();
    let v2 = long_text(125, "revised");
    let v3 = long_text(125, "further");
    // Original scores 6.0, v2 scores 8.0, v3 regresses to 7.0; the final
    // pass re-scores v2.
    let critic = Arc::new(ScriptedCritic::scores(&[6.0, 8.0, 7.0, 8.0]));
    let fixer = Arc::new(ScriptedFixer::new(vec![v2.clone(), v3.clone()]));
    let engine = RefinementEngine::builder(critic, fixer).build();

    let outcome = engine
        .refine(
            RefinementRequest::new(long_text(120, "alpha"), "rubric", "profile")
                .with_max_iterations(3),
        )
        .await;

    assert_eq!(outcome.status, RefinementStatus::Exhausted);
    assert_eq!(outcome.text, v2);
    assert_eq!(outcome.score, 8.0);

    // The running best across the history never decreases.
    let mut best = f64::NEG_INFINITY;
    for record in &outcome.history {
        let previous_best = best;
        best = best.max(record.score);
        assert!(best >= previous_best);
    }
}

#[tokio::test]
async fn shrunken_rewrite_is_rejected_and_text_preserved() {
    init_tracing();
    let critic = Arc::new(ScriptedCritic::scores(&[5.0]));
    // Far below 70% of the draft length.
    let fixer = Arc::new(ScriptedFixer::new(vec![long_text(10, "stub")]));
    let engine = RefinementEngine::builder(critic, fixer.clone()).build();

    let draft = long_text(200, "alpha");
    let outcome = engine
        .refine(RefinementRequest::new(&draft, "rubric", "profile").with_max_iterations(2))
        .await;

    // Every iteration rejected the candidate, so the fixer kept seeing the
    // original draft and the run returned it unchanged.
    let priors = fixer.seen_priors.lock().unwrap();
    assert_eq!(priors.len(), 2);
    assert!(priors.iter().all(|prior| prior == &draft));
    assert_eq!(outcome.text, draft);
    assert!(outcome
        .history
        .iter()
        .take(2)
        .all(|record| record.action == EditAction::Rejected));
}

#[tokio::test]
async fn fixer_failure_skips_the_iteration_edit() {
    init_tracing();
    let critic = Arc::new(ScriptedCritic::scores(&[5.0]));
    let engine = RefinementEngine::builder(critic.clone(), Arc::new(FailingFixer)).build();

    let draft = long_text(150, "alpha");
    let outcome = engine
        .refine(RefinementRequest::new(&draft, "rubric", "profile").with_max_iterations(3))
        .await;

    assert_eq!(outcome.status, RefinementStatus::Exhausted);
    assert_eq!(outcome.text, draft);
    assert_eq!(critic.call_count(), 4);
    assert!(outcome
        .history
        .iter()
        .take(3)
        .all(|record| record.action == EditAction::Skipped));
}

#[tokio::test]
async fn plateau_escalates_to_hard_mode_instructions() {
    init_tracing();
    // Improvement of 0.1 at iteration 2 is below the 0.5 delta threshold.
    let critic = Arc::new(ScriptedCritic::scores(&[6.0, 6.1]));
    let fixer = Arc::new(ScriptedFixer::new(vec![
        long_text(125, "second"),
        long_text(130, "third"),
    ]));
    let engine = RefinementEngine::builder(critic, fixer.clone()).build();

    let outcome = engine
        .refine(
            RefinementRequest::new(long_text(120, "alpha"), "rubric", "profile")
                .with_max_iterations(2),
        )
        .await;

    assert_eq!(outcome.history[0].edit_mode, EditMode::Soft);
    assert_eq!(outcome.history[1].edit_mode, EditMode::Hard);

    let instructions = fixer.seen_instructions.lock().unwrap();
    assert!(instructions[0].contains("Revise the text"));
    assert!(instructions[1].contains("Rewrite the text from scratch"));
}

#[tokio::test]
async fn stalled_text_escalates_to_hard_mode() {
    init_tracing();
    let draft = long_text(150, "alpha");
    // The fixer echoes the draft back, so consecutive candidates are
    // identical (similarity 1.0 > 0.95) even though the score is healthy.
    let critic = Arc::new(ScriptedCritic::scores(&[7.2, 8.0]));
    let fixer = Arc::new(ScriptedFixer::new(vec![draft.clone()]));
    let engine = RefinementEngine::builder(critic, fixer).build();

    let outcome = engine
        .refine(
            RefinementRequest::new(&draft, "rubric", "profile")
                .with_target_score(9.5)
                .with_max_iterations(2),
        )
        .await;

    assert_eq!(outcome.history[0].edit_mode, EditMode::Soft);
    assert_eq!(outcome.history[1].edit_mode, EditMode::Hard);
}

#[tokio::test]
async fn refine_text_uses_defaults() {
    init_tracing();
    let critic = Arc::new(ScriptedCritic::scores(&[10.0]));
    let fixer = Arc::new(ScriptedFixer::new(vec![]));
    let engine = RefinementEngine::builder(critic, fixer).build();

    let outcome = engine
        .refine_text(long_text(50, "alpha"), "rubric", "forecast")
        .await;

    assert!(outcome.converged());
    assert_eq!(outcome.score, 10.0);
}
