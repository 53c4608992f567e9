//! Rubric-grounded scoring with a deterministic fallback.
//!
//! `Scorer` sends one bounded critic call per draft and parses whatever
//! comes back. When the critic is unreachable the local heuristic takes
//! over; its score is capped below the passing threshold so the orchestrator
//! treats the iteration as "needs another pass" instead of silently
//! succeeding on an unscored draft.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::parser;
use crate::report::ScoreReport;
use crate::services::{CriticRequest, CriticService};

/// Deterministic scoring rules for one content type.
///
/// The rubric prompt stays opaque; everything the fallback checks comes from
/// this profile.
#[derive(Debug, Clone)]
pub struct HeuristicProfile {
    /// Minimum acceptable word count.
    pub min_words: usize,
    /// Exact strings that must each occur in the text (section headings,
    /// required labels).
    pub required_markers: Vec<String>,
    /// Stylistic markers counted for variety (icons, formatting glyphs).
    pub style_markers: Vec<String>,
    /// Minimum number of distinct style markers that must appear.
    pub min_style_markers: usize,
}

impl Default for HeuristicProfile {
    fn default() -> Self {
        Self {
            min_words: 800,
            required_markers: Vec::new(),
            style_markers: Vec::new(),
            min_style_markers: 0,
        }
    }
}

/// Per-content-type heuristic profiles with a generic fallback.
#[derive(Debug, Clone, Default)]
pub struct HeuristicRegistry {
    profiles: HashMap<String, HeuristicProfile>,
    default_profile: HeuristicProfile,
}

impl HeuristicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, content_type: impl Into<String>, profile: HeuristicProfile) -> Self {
        self.profiles.insert(content_type.into(), profile);
        self
    }

    pub fn with_default_profile(mut self, profile: HeuristicProfile) -> Self {
        self.default_profile = profile;
        self
    }

    pub fn profile_for(&self, content_type: &str) -> &HeuristicProfile {
        self.profiles
            .get(content_type)
            .unwrap_or(&self.default_profile)
    }
}

/// Calls the critic service and falls back to the heuristic scorer.
#[derive(Clone)]
pub struct Scorer {
    critic: Arc<dyn CriticService>,
    heuristics: HeuristicRegistry,
    passing_threshold: f64,
    score_timeout: Duration,
}

impl Scorer {
    pub fn new(critic: Arc<dyn CriticService>) -> Self {
        Self {
            critic,
            heuristics: HeuristicRegistry::default(),
            passing_threshold: 7.0,
            score_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_heuristics(mut self, heuristics: HeuristicRegistry) -> Self {
        self.heuristics = heuristics;
        self
    }

    /// Score at which a draft counts as acceptable; the heuristic fallback
    /// always stays below it.
    pub fn with_passing_threshold(mut self, threshold: f64) -> Self {
        self.passing_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, score_timeout: Duration) -> Self {
        self.score_timeout = score_timeout;
        self
    }

    /// Evaluate `text` against the rubric. Never fails: transport problems
    /// degrade to the heuristic path for this call only.
    #[instrument(skip_all, fields(content_type = %content_type, text_len = text.len()))]
    pub async fn score(&self, text: &str, rubric_prompt: &str, content_type: &str) -> ScoreReport {
        let request = CriticRequest {
            rubric_prompt,
            candidate_text: text,
            content_type,
        };

        match timeout(self.score_timeout, self.critic.evaluate(request)).await {
            Ok(Ok(raw)) => {
                let report = parser::parse(&raw);
                debug!(score = report.overall_score, "Critic scored the draft");
                report
            }
            Ok(Err(err)) => {
                warn!(error = %err, "Critic call failed, using heuristic scorer");
                self.heuristic_score(text, content_type)
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.score_timeout.as_secs(),
                    "Critic call timed out, using heuristic scorer"
                );
                self.heuristic_score(text, content_type)
            }
        }
    }

    /// Deterministic local scoring, capped below the passing threshold.
    pub fn heuristic_score(&self, text: &str, content_type: &str) -> ScoreReport {
        let profile = self.heuristics.profile_for(content_type);
        let cap = self.passing_threshold - 0.5;
        let mut score = cap;
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        let words = text.split_whitespace().count();
        if words < profile.min_words {
            score -= 2.0;
            issues.push(format!(
                "Insufficient length: {} words, minimum {}",
                words, profile.min_words
            ));
            suggestions.push(format!(
                "Expand the text to at least {} words",
                profile.min_words
            ));
        }

        let missing: Vec<&str> = profile
            .required_markers
            .iter()
            .filter(|marker| !text.contains(marker.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            score -= 1.5;
            issues.push(format!("Missing required sections: {}", missing.join(", ")));
            suggestions.push("Add every required section with its exact heading".to_string());
        }

        let variety = profile
            .style_markers
            .iter()
            .filter(|marker| text.contains(marker.as_str()))
            .count();
        if variety < profile.min_style_markers {
            score -= 1.0;
            issues.push(format!(
                "Insufficient stylistic variety: {} of {} expected markers present",
                variety, profile.min_style_markers
            ));
            suggestions.push("Vary the visual markers used across sections".to_string());
        }

        let score = score.max(1.0).min(cap);
        debug!(score, words, content_type, "Heuristic fallback produced a score");

        ScoreReport {
            overall_score: score,
            issues,
            suggestions,
            ..ScoreReport::default()
        }
    }
}

/// Assemble the critic instruction: the rubric, the candidate, and a single
/// structured-object contract described by the report schema. Service
/// bindings use this to phrase the evaluation request for any text-in,
/// text-out critic.
pub fn build_critic_prompt(rubric_prompt: &str, text: &str, content_type: &str) -> String {
    format!(
        "You are a strict editorial reviewer. Evaluate the candidate text against the rubric \
         and respond with exactly one JSON object matching this schema. No prose, no code fences.\n\n\
         SCHEMA:\n{schema}\n\n\
         RUBRIC ({content_type}):\n{rubric_prompt}\n\n\
         CANDIDATE TEXT:\n{text}\n\n\
         Score the text from 0 to 10 overall, fill `dimensions` with sub-scores where \
         applicable, list concrete issues and remediation suggestions, and include \
         section_patches or inline_fixes wherever a targeted edit would resolve a problem."
    , schema = report_schema_text())
}

fn report_schema_text() -> &'static str {
    static SCHEMA: OnceLock<String> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        let schema = schemars::schema_for!(ScoreReport);
        serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefineError;
    use crate::services::CriticRequest;
    use async_trait::async_trait;

    struct FailingCritic;

    #[async_trait]
    impl CriticService for FailingCritic {
        async fn evaluate(&self, _request: CriticRequest<'_>) -> crate::error::Result<String> {
            Err(RefineError::ServiceUnavailable {
                message: "connection refused".into(),
            })
        }
    }

    struct EchoCritic(String);

    #[async_trait]
    impl CriticService for EchoCritic {
        async fn evaluate(&self, _request: CriticRequest<'_>) -> crate::error::Result<String> {
            Ok(self.0.clone())
        }
    }

    fn short_draft() -> String {
        std::iter::repeat("word").take(200).collect::<Vec<_>>().join(" ")
    }

    fn demanding_registry() -> HeuristicRegistry {
        HeuristicRegistry::new().with_profile(
            "profile",
            HeuristicProfile {
                min_words: 1500,
                required_markers: vec![
                    "OVERVIEW".into(),
                    "STRENGTHS".into(),
                    "RISKS".into(),
                    "RECOMMENDATIONS".into(),
                ],
                style_markers: vec!["⭐".into(), "🎯".into(), "💡".into()],
                min_style_markers: 2,
            },
        )
    }

    #[tokio::test]
    async fn unreachable_critic_falls_back_to_heuristic() {
        let scorer =
            Scorer::new(Arc::new(FailingCritic)).with_heuristics(demanding_registry());
        let report = scorer.score(&short_draft(), "rubric", "profile").await;

        assert!(report.overall_score < 7.0);
        assert!(report
            .issues
            .iter()
            .any(|issue| issue.contains("Insufficient length")));
    }

    #[tokio::test]
    async fn critic_response_is_parsed() {
        let scorer = Scorer::new(Arc::new(EchoCritic(
            r#"{"score": 8.25, "issues": ["pacing drags"]}"#.into(),
        )));
        let report = scorer.score("some draft", "rubric", "forecast").await;
        assert_eq!(report.overall_score, 8.25);
        assert_eq!(report.issues, vec!["pacing drags"]);
    }

    #[test]
    fn heuristic_is_capped_below_passing_threshold() {
        let scorer = Scorer::new(Arc::new(FailingCritic));
        // Long enough to trigger no penalty at all.
        let text = std::iter::repeat("word")
            .take(2000)
            .collect::<Vec<_>>()
            .join(" ");
        let report = scorer.heuristic_score(&text, "anything");
        assert!(report.overall_score <= 6.5);
        assert!(report.overall_score >= 1.0);
    }

    #[test]
    fn heuristic_penalizes_missing_markers_and_variety() {
        let scorer =
            Scorer::new(Arc::new(FailingCritic)).with_heuristics(demanding_registry());
        let report = scorer.heuristic_score(&short_draft(), "profile");
        // Length, markers, and variety all missed: 6.5 - 2.0 - 1.5 - 1.0.
        assert!((report.overall_score - 2.0).abs() < 1e-9);
        assert_eq!(report.issues.len(), 3);
        assert_eq!(report.suggestions.len(), 3);
    }

    #[test]
    fn unknown_content_type_uses_default_profile() {
        let scorer = Scorer::new(Arc::new(FailingCritic)).with_heuristics(demanding_registry());
        let text = std::iter::repeat("word")
            .take(900)
            .collect::<Vec<_>>()
            .join(" ");
        let report = scorer.heuristic_score(&text, "unmapped-type");
        // The default profile asks for 800 words and nothing else.
        assert!(report.issues.is_empty());
    }

    #[test]
    fn critic_prompt_embeds_rubric_and_schema() {
        let prompt = build_critic_prompt("RUBRIC BODY", "CANDIDATE BODY", "profile");
        assert!(prompt.contains("RUBRIC BODY"));
        assert!(prompt.contains("CANDIDATE BODY"));
        assert!(prompt.contains("\"score\""));
    }
}
