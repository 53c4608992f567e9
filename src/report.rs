use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Immutable input for one refinement run.
#[derive(Debug, Clone)]
pub struct RefinementRequest {
    /// The current draft to refine.
    pub text: String,
    /// The generation instructions the text must satisfy, treated as opaque
    /// configuration.
    pub rubric_prompt: String,
    /// Tag selecting which rubric variant and heuristic profile apply
    /// (e.g. "profile", "forecast", "compatibility").
    pub content_type: String,
    /// Score at which the loop converges (0-10 scale).
    pub target_score: f64,
    /// Maximum number of scoring iterations before exhaustion.
    pub max_iterations: usize,
}

impl RefinementRequest {
    pub fn new(
        text: impl Into<String>,
        rubric_prompt: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            rubric_prompt: rubric_prompt.into(),
            content_type: content_type.into(),
            target_score: 10.0,
            max_iterations: 7,
        }
    }

    pub fn with_target_score(mut self, target: f64) -> Self {
        self.target_score = target.clamp(0.0, 10.0);
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations.max(1);
        self
    }
}

/// Severity of a blocking issue reported by the critic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[schemars(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Major => "MAJOR",
            Self::Minor => "MINOR",
        }
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Unknown severities degrade to MINOR rather than failing the whole report.
impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Self::Critical,
            "MAJOR" => Self::Major,
            _ => Self::Minor,
        })
    }
}

/// A problem the critic considers disqualifying on its own.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BlockingIssue {
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Minor
}

/// How a section patch modifies its target section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, JsonSchema)]
#[schemars(rename_all = "lowercase")]
pub enum PatchAction {
    /// Create the section if absent; overwrite it if present.
    Insert,
    /// Overwrite the section body, creating the section if absent.
    Replace,
    /// Concatenate after the existing body, creating the section if absent.
    #[default]
    Append,
}

impl PatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Replace => "replace",
            Self::Append => "append",
        }
    }
}

impl fmt::Display for PatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PatchAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// The critic occasionally emits unexpected casing or a novel action word;
// anything unrecognized degrades to append, the least destructive action.
impl<'de> Deserialize<'de> for PatchAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.trim().to_ascii_lowercase().as_str() {
            "insert" => Self::Insert,
            "replace" => Self::Replace,
            _ => Self::Append,
        })
    }
}

/// A declarative edit to one section of the text, addressed by its exact
/// heading line.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SectionPatch {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub action: PatchAction,
    #[serde(default)]
    pub content: String,
}

/// A literal find/replace pair applied to the full text.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InlineFix {
    #[serde(default)]
    pub find: String,
    #[serde(default)]
    pub replace: String,
}

/// Normalized output of one critic call.
///
/// Invariant: `overall_score` is always present and within `[0, 10]`; every
/// collection defaults to empty, never null, so downstream code does not
/// null-check.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScoreReport {
    #[serde(rename = "score")]
    pub overall_score: f64,
    /// Named sub-dimension scores (e.g. structure/content/language/formatting).
    #[serde(default, rename = "dimensions")]
    pub dimension_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub blocking_issues: Vec<BlockingIssue>,
    #[serde(default)]
    pub section_patches: Vec<SectionPatch>,
    #[serde(default)]
    pub inline_fixes: Vec<InlineFix>,
}

impl Default for ScoreReport {
    fn default() -> Self {
        Self {
            overall_score: 0.0,
            dimension_scores: BTreeMap::new(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            blocking_issues: Vec::new(),
            section_patches: Vec::new(),
            inline_fixes: Vec::new(),
        }
    }
}

impl ScoreReport {
    /// True when the report carries no section patches and no inline fixes.
    pub fn has_no_patches(&self) -> bool {
        self.section_patches.is_empty() && self.inline_fixes.is_empty()
    }

    /// Critical blocking issues, if any.
    pub fn critical_issues(&self) -> impl Iterator<Item = &BlockingIssue> {
        self.blocking_issues
            .iter()
            .filter(|issue| issue.severity == Severity::Critical)
    }
}

/// Edit strategy for one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    /// Targeted patch application plus a constrained rewrite.
    Soft,
    /// Full regeneration from the accumulated feedback.
    Hard,
}

impl fmt::Display for EditMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Soft => f.write_str("soft"),
            Self::Hard => f.write_str("hard"),
        }
    }
}

/// What happened to the candidate produced in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EditAction {
    /// The fixer's rewrite was adopted.
    Rewritten,
    /// Only local patches were applied (fixer unavailable or silent).
    Patched,
    /// The candidate shrank below the rejection threshold and was discarded.
    Rejected,
    /// No edit was produced; the text enters the next iteration unchanged.
    Skipped,
    /// The target score was reached; no edit attempted.
    Converged,
}

/// One entry of the per-run telemetry history.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub score: f64,
    pub issue_count: usize,
    pub edit_mode: EditMode,
    pub action: EditAction,
    pub text_len: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Terminal state of a refinement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefinementStatus {
    /// The target score was reached.
    Converged,
    /// The iteration budget ran out; the best-seen text is returned.
    Exhausted,
}

/// Final result of a refinement run, including per-iteration telemetry.
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub run_id: Uuid,
    pub text: String,
    pub score: f64,
    pub status: RefinementStatus,
    pub history: Vec<IterationRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RefinementOutcome {
    pub fn converged(&self) -> bool {
        self.status == RefinementStatus::Converged
    }
}
