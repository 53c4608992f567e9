//! Hardened parsing of critic responses.
//!
//! The critic's reply is free text that is supposed to contain a single JSON
//! object but may be wrapped in prose or code fences, or carry minor syntax
//! corruption (comma decimals, stray newlines, runaway string values). The
//! parser extracts the most plausible block, repairs it once, and degrades to
//! a neutral default report rather than ever raising on malformed output.

use std::sync::OnceLock;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::RefineError;
use crate::report::ScoreReport;

/// Wire keys lifted into [`ScoreReport::dimension_scores`].
const DIMENSION_KEYS: [&str; 4] = ["structure", "content", "language", "formatting"];

/// Issue text attached when the critic payload cannot be parsed at all.
pub const PARSE_FAILURE_ISSUE: &str = "Critic response could not be parsed as a score report";

/// Parse a raw critic reply into a normalized [`ScoreReport`].
///
/// Guaranteed to return a report satisfying the type's invariants: the
/// overall score is present and within `[0, 10]` and every collection is
/// non-null. Malformed input yields a synthesized neutral report.
pub fn parse(raw: &str) -> ScoreReport {
    let clean = raw.replace('\r', " ").replace('\t', " ");
    let candidate = extract_block(&clean);

    let value = match serde_json::from_str::<Value>(&candidate) {
        Ok(value) => {
            debug!("Parsed critic report on first attempt");
            value
        }
        Err(first_error) => {
            warn!(error = %first_error, "First parse attempt failed, repairing payload");
            let repaired = repair(&candidate);
            match serde_json::from_str::<Value>(&repaired) {
                Ok(value) => {
                    debug!("Parsed critic report after repair");
                    value
                }
                Err(second_error) => {
                    warn!(
                        error = %second_error,
                        payload = %RefineError::truncate_for_display(raw, 800),
                        "Critic payload unrecoverable, synthesizing default report"
                    );
                    return fallback_report();
                }
            }
        }
    };

    let normalized = normalize(value);
    validate_permissive(&normalized);

    match serde_json::from_value::<ScoreReport>(normalized) {
        Ok(mut report) => {
            report.overall_score = report.overall_score.clamp(0.0, 10.0);
            for score in report.dimension_scores.values_mut() {
                *score = score.clamp(0.0, 10.0);
            }
            report
        }
        Err(err) => {
            warn!(error = %err, "Normalized critic payload failed deserialization");
            fallback_report()
        }
    }
}

fn fallback_report() -> ScoreReport {
    ScoreReport {
        overall_score: 5.0,
        issues: vec![PARSE_FAILURE_ISSUE.to_string()],
        ..ScoreReport::default()
    }
}

/// Extract the first balanced `{...}` block by depth counting; fall back to
/// the widest brace-delimited span after stripping code fences.
fn extract_block(text: &str) -> String {
    let text = text.trim();

    if let Some(start) = text.find('{') {
        let mut depth = 0i32;
        for (offset, ch) in text[start..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return text[start..start + offset + ch.len_utf8()].to_string();
                    }
                }
                _ => {}
            }
        }
    }

    let unfenced = strip_code_fences(text);
    if let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) {
        if start < end {
            return unfenced[start..=end].to_string();
        }
    }

    text.to_string()
}

fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// One bounded repair pass: flatten newlines, fix comma decimals, collapse
/// doubled commas, and truncate a runaway quoted score value at its first
/// embedded comma.
fn repair(candidate: &str) -> String {
    let mut repaired: Vec<char> = candidate.replace('\n', " ").chars().collect();

    // 9,2 -> 9.2
    for idx in 1..repaired.len().saturating_sub(1) {
        if repaired[idx] == ','
            && repaired[idx - 1].is_ascii_digit()
            && repaired[idx + 1].is_ascii_digit()
        {
            repaired[idx] = '.';
        }
    }

    let repaired: String = repaired.into_iter().collect::<String>().replace(",,", ",");
    truncate_runaway_score(&repaired)
}

/// The critic sometimes emits `"score": "9.0, \"structure\": 8.0 ..."` with
/// the rest of the object swallowed into the score string. Cut the quoted
/// value at its first comma so the number survives.
fn truncate_runaway_score(text: &str) -> String {
    let Some(key_idx) = text.find("\"score\"") else {
        return text.to_string();
    };
    let after_key = &text[key_idx + "\"score\"".len()..];
    let Some(colon_offset) = after_key.find(':') else {
        return text.to_string();
    };
    let value_part = after_key[colon_offset + 1..].trim_start();
    if !value_part.starts_with('"') {
        return text.to_string();
    }

    let value_start = text.len() - value_part.len() + 1;
    let Some(close_offset) = text[value_start..].find('"') else {
        return text.to_string();
    };
    let value = &text[value_start..value_start + close_offset];
    match value.find(',') {
        Some(comma) => {
            let kept = value[..comma].trim();
            format!(
                "{}{}{}",
                &text[..value_start],
                kept,
                &text[value_start + close_offset..]
            )
        }
        None => text.to_string(),
    }
}

/// Coerce declared numeric fields, lift flat dimension keys into the
/// `dimensions` object, and prune entries serde could choke on.
fn normalize(value: Value) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            warn!(kind = %json_kind(&other), "Critic payload was not an object");
            Map::new()
        }
    };

    match map.remove("score").as_ref().and_then(to_float) {
        Some(score) => {
            map.insert("score".into(), json!(score));
        }
        None => {
            // Missing or garbage score: neutral midpoint, per the report
            // invariant that the overall score is always present.
            map.insert("score".into(), json!(5.0));
        }
    }

    let mut dimensions = map
        .remove("dimensions")
        .and_then(|v| match v {
            Value::Object(dims) => Some(dims),
            _ => None,
        })
        .unwrap_or_default();
    for key in DIMENSION_KEYS {
        if let Some(raw) = map.remove(key) {
            if let Some(score) = to_float(&raw) {
                dimensions.insert(key.to_string(), json!(score));
            }
        }
    }
    let dimensions: Map<String, Value> = dimensions
        .into_iter()
        .filter_map(|(k, v)| to_float(&v).map(|f| (k, json!(f))))
        .collect();
    map.insert("dimensions".into(), Value::Object(dimensions));

    for key in ["issues", "suggestions"] {
        let entries = string_entries(map.remove(key));
        map.insert(key.into(), Value::Array(entries));
    }
    for key in ["blocking_issues", "section_patches", "inline_fixes"] {
        let entries = object_entries(map.remove(key));
        map.insert(key.into(), Value::Array(entries));
    }

    Value::Object(map)
}

fn string_entries(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(entries)) => entries
            .into_iter()
            .filter(|entry| entry.is_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn object_entries(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(entries)) => entries
            .into_iter()
            .filter(|entry| entry.is_object())
            .collect(),
        _ => Vec::new(),
    }
}

/// Accept numbers or numeric strings (quotes, whitespace, comma decimals,
/// runaway tails after the first comma).
fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cand = s.trim().trim_matches(['"', '\'']);
            cand.replace(',', ".")
                .parse::<f64>()
                .ok()
                .or_else(|| cand.split(',').next()?.trim().parse::<f64>().ok())
        }
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Permissive schema check: `score` required, unknown keys allowed. Failures
/// are logged, never fatal.
fn validate_permissive(value: &Value) {
    static VALIDATOR: OnceLock<Option<jsonschema::Validator>> = OnceLock::new();
    let validator = VALIDATOR.get_or_init(|| {
        let schema = json!({
            "type": "object",
            "properties": {
                "score": { "type": ["number", "string"] },
                "dimensions": {
                    "type": "object",
                    "additionalProperties": { "type": ["number", "string"] }
                },
                "issues": { "type": "array", "items": { "type": "string" } },
                "suggestions": { "type": "array", "items": { "type": "string" } },
                "blocking_issues": { "type": "array" },
                "section_patches": { "type": "array" },
                "inline_fixes": { "type": "array" }
            },
            "required": ["score"],
            "additionalProperties": true
        });
        jsonschema::validator_for(&schema).ok()
    });

    if let Some(validator) = validator {
        let errors: Vec<String> = validator
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect();
        if !errors.is_empty() {
            warn!(errors = %errors.join("; "), "Critic report does not match the permissive schema");
        }
    }
}
