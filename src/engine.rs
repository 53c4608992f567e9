//! The iteration state machine.
//!
//! One refinement run is strictly sequential: score the current draft,
//! decide whether it converged, pick an edit strategy, produce the next
//! candidate, repeat. The engine always returns the best text it has seen,
//! not merely the last one, because edits can regress quality.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn, Span};
use uuid::Uuid;

use crate::patching;
use crate::report::{
    EditAction, EditMode, IterationRecord, RefinementOutcome, RefinementRequest, RefinementStatus,
    ScoreReport,
};
use crate::scoring::{HeuristicRegistry, Scorer};
use crate::services::{CriticService, FixRequest, FixerService};
use crate::similarity::jaccard;

/// Convergence-policy thresholds.
///
/// All values are empirical tuning constants carried as configuration, not
/// inlined magic numbers.
#[derive(Debug, Clone)]
pub struct RefinementConfig {
    /// Minimum per-iteration score improvement before soft edits count as
    /// plateaued.
    pub min_score_delta: f64,
    /// Iteration from which the plateau rule applies.
    pub plateau_after: usize,
    /// Jaccard similarity above which consecutive candidates count as
    /// unchanged.
    pub stall_similarity: f64,
    /// Score below which a run counts as stuck once `stuck_after` is reached.
    pub stuck_floor: f64,
    /// Iteration from which the stuck rule applies.
    pub stuck_after: usize,
    /// A candidate shorter than this fraction of the current text is
    /// rejected as a regression.
    pub shrink_ratio: f64,
    /// Bound on each fixer call. Rewrites get more time than scoring calls.
    pub rewrite_timeout: Duration,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            min_score_delta: 0.5,
            plateau_after: 2,
            stall_similarity: 0.95,
            stuck_floor: 7.0,
            stuck_after: 3,
            shrink_ratio: 0.7,
            rewrite_timeout: Duration::from_secs(120),
        }
    }
}

impl RefinementConfig {
    /// Pick the edit strategy for the iteration that just scored `score`.
    ///
    /// Starts soft (targeted patches); switches to hard (full regeneration)
    /// when improvement plateaus, the text stops changing, or the score is
    /// stuck below the acceptable floor.
    pub fn select_mode(
        &self,
        iteration: usize,
        score: f64,
        score_delta: Option<f64>,
        similarity: Option<f64>,
    ) -> EditMode {
        if iteration >= self.plateau_after {
            let delta = score_delta.unwrap_or(0.0);
            if delta < self.min_score_delta {
                debug!(iteration, delta, "Switching to hard mode: improvement plateaued");
                return EditMode::Hard;
            }
        }

        if let Some(similarity) = similarity {
            if similarity > self.stall_similarity {
                debug!(iteration, similarity, "Switching to hard mode: text is not changing");
                return EditMode::Hard;
            }
        }

        if iteration >= self.stuck_after && score < self.stuck_floor {
            debug!(iteration, score, "Switching to hard mode: stuck below floor");
            return EditMode::Hard;
        }

        EditMode::Soft
    }
}

/// Wording of the fixer instructions. A tunable template, not a contract.
///
/// Placeholders: `{rubric}`, `{issues}`, `{suggestions}`, `{target}`.
#[derive(Debug, Clone)]
pub struct InstructionTemplates {
    pub soft: String,
    pub hard: String,
}

impl Default for InstructionTemplates {
    fn default() -> Self {
        Self {
            soft: "Revise the text so it reaches a score of {target}/10 against the \
                   requirements below.\n\nREQUIREMENTS:\n{rubric}\n\nPROBLEMS FOUND BY THE \
                   REVIEWER:\n{issues}\n\nSUGGESTED IMPROVEMENTS:\n{suggestions}\n\nDo not \
                   shorten the text: only improve and extend it. Return only the revised \
                   text, with no commentary."
                .to_string(),
            hard: "Rewrite the text from scratch so it satisfies every requirement below \
                   and reaches {target}/10. Targeted edits have stalled; produce a complete \
                   fresh rendition that resolves all of the accumulated feedback.\n\n\
                   REQUIREMENTS:\n{rubric}\n\nACCUMULATED PROBLEMS:\n{issues}\n\n\
                   SUGGESTED IMPROVEMENTS:\n{suggestions}\n\nDo not shorten the text \
                   relative to the draft. Return only the rewritten text, with no \
                   commentary."
                .to_string(),
        }
    }
}

impl InstructionTemplates {
    fn render(
        &self,
        mode: EditMode,
        rubric: &str,
        issues: &[String],
        suggestions: &[String],
        target: f64,
    ) -> String {
        let template = match mode {
            EditMode::Soft => &self.soft,
            EditMode::Hard => &self.hard,
        };
        template
            .replace("{rubric}", rubric)
            .replace("{issues}", &bullet_list(issues, "No problems reported"))
            .replace(
                "{suggestions}",
                &bullet_list(suggestions, "No suggestions provided"),
            )
            .replace("{target}", &format!("{target:.1}"))
    }
}

fn bullet_list(entries: &[String], empty_note: &str) -> String {
    if entries.is_empty() {
        return empty_note.to_string();
    }
    entries
        .iter()
        .map(|entry| format!("- {entry}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Mutable per-run state, owned by one `refine()` call and discarded at the
/// end. Never shared across concurrent runs.
struct RefinementState {
    current_text: String,
    best_text: String,
    best_score: f64,
    previous_text: Option<String>,
    previous_score: Option<f64>,
    edit_mode: EditMode,
    history: Vec<IterationRecord>,
    cumulative_issues: Vec<String>,
    cumulative_suggestions: Vec<String>,
}

impl RefinementState {
    fn new(text: String) -> Self {
        Self {
            best_text: text.clone(),
            current_text: text,
            best_score: f64::NEG_INFINITY,
            previous_text: None,
            previous_score: None,
            edit_mode: EditMode::Soft,
            history: Vec::new(),
            cumulative_issues: Vec::new(),
            cumulative_suggestions: Vec::new(),
        }
    }

    fn absorb_feedback(&mut self, report: &ScoreReport) {
        for issue in &report.issues {
            if !self.cumulative_issues.contains(issue) {
                self.cumulative_issues.push(issue.clone());
            }
        }
        for suggestion in &report.suggestions {
            if !self.cumulative_suggestions.contains(suggestion) {
                self.cumulative_suggestions.push(suggestion.clone());
            }
        }
    }

    fn record(&mut self, iteration: usize, score: f64, issue_count: usize, action: EditAction) {
        self.history.push(IterationRecord {
            iteration,
            score,
            issue_count,
            edit_mode: self.edit_mode,
            action,
            text_len: self.current_text.len(),
            recorded_at: Utc::now(),
        });
    }
}

/// The closed-loop refinement engine.
///
/// Built from a critic and a fixer service; everything else (thresholds,
/// heuristics, instruction wording) is configuration with conservative
/// defaults.
#[derive(Clone)]
pub struct RefinementEngine {
    scorer: Scorer,
    fixer: Arc<dyn FixerService>,
    config: RefinementConfig,
    templates: InstructionTemplates,
}

/// Builder for [`RefinementEngine`].
pub struct RefinementEngineBuilder {
    critic: Arc<dyn CriticService>,
    fixer: Arc<dyn FixerService>,
    config: RefinementConfig,
    templates: InstructionTemplates,
    heuristics: HeuristicRegistry,
    passing_threshold: f64,
    score_timeout: Duration,
}

impl RefinementEngineBuilder {
    pub fn new(critic: Arc<dyn CriticService>, fixer: Arc<dyn FixerService>) -> Self {
        Self {
            critic,
            fixer,
            config: RefinementConfig::default(),
            templates: InstructionTemplates::default(),
            heuristics: HeuristicRegistry::default(),
            passing_threshold: 7.0,
            score_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_config(mut self, config: RefinementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_templates(mut self, templates: InstructionTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_heuristics(mut self, heuristics: HeuristicRegistry) -> Self {
        self.heuristics = heuristics;
        self
    }

    /// Score at which heuristic fallback results are capped (see `Scorer`).
    pub fn with_passing_threshold(mut self, threshold: f64) -> Self {
        self.passing_threshold = threshold;
        self
    }

    /// Bound on each critic call. Scoring gets a shorter budget than
    /// rewriting.
    pub fn with_score_timeout(mut self, score_timeout: Duration) -> Self {
        self.score_timeout = score_timeout;
        self
    }

    pub fn build(self) -> RefinementEngine {
        let scorer = Scorer::new(self.critic)
            .with_heuristics(self.heuristics)
            .with_passing_threshold(self.passing_threshold)
            .with_timeout(self.score_timeout);
        RefinementEngine {
            scorer,
            fixer: self.fixer,
            config: self.config,
            templates: self.templates,
        }
    }
}

impl RefinementEngine {
    pub fn builder(
        critic: Arc<dyn CriticService>,
        fixer: Arc<dyn FixerService>,
    ) -> RefinementEngineBuilder {
        RefinementEngineBuilder::new(critic, fixer)
    }

    /// Refine with default target score and iteration budget.
    pub async fn refine_text(
        &self,
        text: impl Into<String>,
        rubric_prompt: impl Into<String>,
        content_type: impl Into<String>,
    ) -> RefinementOutcome {
        self.refine(RefinementRequest::new(text, rubric_prompt, content_type))
            .await
    }

    /// Run the refinement loop to a terminal state.
    ///
    /// Never fails: service problems degrade per-iteration (heuristic
    /// scoring, skipped edits) and exhaustion is a defined terminal state
    /// returning the best text seen with its true score.
    #[instrument(skip_all, fields(content_type = %request.content_type, run_id = tracing::field::Empty))]
    pub async fn refine(&self, request: RefinementRequest) -> RefinementOutcome {
        let run_id = Uuid::new_v4();
        Span::current().record("run_id", tracing::field::display(run_id));
        let started_at = Utc::now();
        let max_iterations = request.max_iterations.max(1);
        let mut state = RefinementState::new(request.text.clone());

        info!(
            target_score = request.target_score,
            max_iterations, "Starting refinement run"
        );

        for iteration in 1..=max_iterations {
            let report = self
                .scorer
                .score(
                    &state.current_text,
                    &request.rubric_prompt,
                    &request.content_type,
                )
                .await;
            let score = report.overall_score;
            info!(
                iteration,
                score,
                issues = report.issues.len(),
                patches = report.section_patches.len(),
                "Scored candidate"
            );

            if score > state.best_score {
                state.best_score = score;
                state.best_text = state.current_text.clone();
                debug!(iteration, score, "New best candidate");
            }
            state.absorb_feedback(&report);

            if score >= request.target_score {
                state.record(iteration, score, report.issues.len(), EditAction::Converged);
                info!(iteration, score, "Target reached");
                return self.finish(
                    run_id,
                    state.current_text.clone(),
                    score,
                    RefinementStatus::Converged,
                    state,
                    started_at,
                );
            }

            let similarity = state
                .previous_text
                .as_ref()
                .map(|previous| jaccard(previous, &state.current_text));
            let score_delta = state.previous_score.map(|previous| score - previous);
            let mode = self
                .config
                .select_mode(iteration, score, score_delta, similarity);
            if mode == EditMode::Hard && state.edit_mode == EditMode::Soft {
                info!(iteration, "Escalating from soft to hard edit mode");
            }
            state.edit_mode = mode;
            state.previous_text = Some(state.current_text.clone());
            state.previous_score = Some(score);

            let (next_text, action) = self
                .produce_candidate(&state, &report, &request, mode)
                .await;
            state.record(iteration, score, report.issues.len(), action);
            state.current_text = next_text;
        }

        // Exhausted: one final scoring pass on the best-seen text so the
        // caller gets its true score.
        let final_report = self
            .scorer
            .score(
                &state.best_text,
                &request.rubric_prompt,
                &request.content_type,
            )
            .await;
        let final_score = final_report.overall_score;
        if final_score > state.best_score {
            state.best_score = final_score;
        }
        state.history.push(IterationRecord {
            iteration: max_iterations + 1,
            score: final_score,
            issue_count: final_report.issues.len(),
            edit_mode: state.edit_mode,
            action: EditAction::Skipped,
            text_len: state.best_text.len(),
            recorded_at: Utc::now(),
        });
        warn!(
            max_iterations,
            best_score = state.best_score,
            "Iteration budget exhausted, returning best-seen text"
        );

        let best_text = state.best_text.clone();
        let best_score = state.best_score;
        self.finish(
            run_id,
            best_text,
            best_score,
            RefinementStatus::Exhausted,
            state,
            started_at,
        )
    }

    fn finish(
        &self,
        run_id: Uuid,
        text: String,
        score: f64,
        status: RefinementStatus,
        state: RefinementState,
        started_at: chrono::DateTime<Utc>,
    ) -> RefinementOutcome {
        RefinementOutcome {
            run_id,
            text,
            score,
            status,
            history: state.history,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Produce the next candidate text and the disposition to record.
    async fn produce_candidate(
        &self,
        state: &RefinementState,
        report: &ScoreReport,
        request: &RefinementRequest,
        mode: EditMode,
    ) -> (String, EditAction) {
        let current = &state.current_text;

        // Soft edits start from the locally patched draft; hard mode asks for
        // a regeneration of the current draft from the cumulative feedback.
        let (prior, instructions) = match mode {
            EditMode::Soft => (
                patching::apply(current, report),
                self.templates.render(
                    mode,
                    &request.rubric_prompt,
                    &report.issues,
                    &report.suggestions,
                    request.target_score,
                ),
            ),
            EditMode::Hard => (
                current.clone(),
                self.templates.render(
                    mode,
                    &request.rubric_prompt,
                    &state.cumulative_issues,
                    &state.cumulative_suggestions,
                    request.target_score,
                ),
            ),
        };

        let fix_request = FixRequest {
            instructions: &instructions,
            prior_text: &prior,
            target_score: request.target_score,
        };

        let rewritten = match timeout(self.config.rewrite_timeout, self.fixer.rewrite(fix_request))
            .await
        {
            Ok(Ok(candidate)) => Some(candidate.trim().to_string()),
            Ok(Err(err)) => {
                warn!(error = %err, "Fixer call failed, skipping this iteration's rewrite");
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.rewrite_timeout.as_secs(),
                    "Fixer call timed out, skipping this iteration's rewrite"
                );
                None
            }
        };

        match rewritten {
            Some(candidate) if candidate.is_empty() => {
                warn!("Fixer returned an empty rewrite");
                self.local_fallback(current, prior)
            }
            Some(candidate) => {
                let current_len = current.chars().count();
                let candidate_len = candidate.chars().count();
                if (candidate_len as f64) < current_len as f64 * self.config.shrink_ratio {
                    // Regression: the rewrite lost material content. Keep the
                    // exact pre-iteration text and move on.
                    warn!(
                        current_len,
                        candidate_len, "Rejecting candidate: material content loss"
                    );
                    (current.clone(), EditAction::Rejected)
                } else {
                    (candidate, EditAction::Rewritten)
                }
            }
            None => self.local_fallback(current, prior),
        }
    }

    /// With no usable rewrite, fall back to whatever the local patches did.
    fn local_fallback(&self, current: &str, prior: String) -> (String, EditAction) {
        if prior != current {
            (prior, EditAction::Patched)
        } else {
            (prior, EditAction::Skipped)
        }
    }
}
