// evalctl-collab/src/evaluator.rs
// ============================================================================
// Module: Field-Based Evaluator
// Description: Built-in metric computation comparing predictions against a
//              golden dataset field by field.
// Purpose: Give the engine a zero-config Evaluator that needs no external
//          scoring service.
// Dependencies: evalctl-core, jsonpath_lib, serde_json
// ============================================================================

//! ## Overview
//! `dataset` and `predictions` are both expected to be newline-delimited
//! JSON with one record per line, in matching row order. `config` is a JSON
//! object of the shape `{"fields": ["$.label"]}` naming the fields compared
//! for exact equality; the returned metrics summary reports per-field and
//! overall accuracy.

use evalctl_core::{EngineError, Evaluator};
use serde::Deserialize;
use serde_json::{json, Value};

/// Top-level shape of the evaluator `config` JSON value.
#[derive(Debug, Clone, Deserialize)]
struct EvalConfig {
    /// `JSONPath` expressions compared between dataset and predictions.
    #[serde(default)]
    fields: Vec<String>,
}

/// Compares predictions against a golden dataset field by field and reports
/// per-field accuracy.
///
/// No network or filesystem access; the caller reads both blobs through an
/// [`evalctl_core::interfaces::ObjectStore`] first.
#[derive(Debug, Default)]
pub struct FieldMatchEvaluator;

impl FieldMatchEvaluator {
    /// Builds an evaluator. Stateless; provided for symmetry with
    /// collaborators that do carry configuration.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for FieldMatchEvaluator {
    fn evaluate(&self, dataset: &[u8], predictions: &[u8], config: &Value) -> Result<Value, EngineError> {
        let config: EvalConfig = serde_json::from_value(config.clone())
            .map_err(|err| EngineError::Permanent(format!("invalid evaluator config: {err}")))?;
        let golden = parse_records(dataset)?;
        let scored = parse_records(predictions)?;
        if golden.len() != scored.len() {
            return Err(EngineError::Permanent(format!(
                "dataset has {} rows but predictions has {} rows",
                golden.len(),
                scored.len()
            )));
        }

        let mut per_field = serde_json::Map::new();
        let mut total_matches = 0u64;
        let total_comparisons = u64::try_from(golden.len() * config.fields.len().max(1)).unwrap_or(u64::MAX);
        for field in &config.fields {
            let mut matches = 0u64;
            for (expected, actual) in golden.iter().zip(scored.iter()) {
                if field_value(expected, field) == field_value(actual, field) {
                    matches += 1;
                }
            }
            total_matches += matches;
            let accuracy = if golden.is_empty() {
                0.0
            } else {
                f64::from(u32::try_from(matches).unwrap_or(u32::MAX))
                    / f64::from(u32::try_from(golden.len()).unwrap_or(u32::MAX))
            };
            per_field.insert(field.clone(), json!({ "matches": matches, "accuracy": accuracy }));
        }
        let overall_accuracy = if total_comparisons == 0 {
            0.0
        } else {
            f64::from(u32::try_from(total_matches).unwrap_or(u32::MAX))
                / f64::from(u32::try_from(total_comparisons).unwrap_or(u32::MAX))
        };
        Ok(json!({
            "row_count": golden.len(),
            "overall_accuracy": overall_accuracy,
            "fields": per_field,
        }))
    }
}

/// Parses newline-delimited JSON bytes into one `Value` per non-empty line.
fn parse_records(bytes: &[u8]) -> Result<Vec<Value>, EngineError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| EngineError::Permanent(format!("record set is not valid utf-8: {err}")))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|err| EngineError::Permanent(format!("row is not valid json: {err}")))
        })
        .collect()
}

/// Extracts the first value matching a `JSONPath` expression from a record.
fn field_value(record: &Value, path: &str) -> Option<Value> {
    jsonpath_lib::select(record, path).ok()?.first().map(|value| (*value).clone())
}

#[cfg(test)]
mod tests {
    use evalctl_core::{EngineError, Evaluator};
    use serde_json::json;

    use super::FieldMatchEvaluator;

    #[test]
    fn identical_labels_score_perfect_accuracy() -> Result<(), EngineError> {
        let evaluator = FieldMatchEvaluator::new();
        let dataset = b"{\"label\": \"cat\"}\n{\"label\": \"dog\"}\n";
        let predictions = b"{\"label\": \"cat\"}\n{\"label\": \"dog\"}\n";
        let config = json!({"fields": ["$.label"]});
        let summary = evaluator.evaluate(dataset, predictions, &config)?;
        assert!((summary["overall_accuracy"].as_f64().unwrap_or(0.0) - 1.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn mismatched_labels_lower_accuracy() -> Result<(), EngineError> {
        let evaluator = FieldMatchEvaluator::new();
        let dataset = b"{\"label\": \"cat\"}\n{\"label\": \"dog\"}\n";
        let predictions = b"{\"label\": \"cat\"}\n{\"label\": \"cat\"}\n";
        let config = json!({"fields": ["$.label"]});
        let summary = evaluator.evaluate(dataset, predictions, &config)?;
        assert!((summary["overall_accuracy"].as_f64().unwrap_or(1.0) - 0.5).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn row_count_mismatch_is_a_permanent_error() {
        let evaluator = FieldMatchEvaluator::new();
        let dataset = b"{\"label\": \"cat\"}\n";
        let predictions = b"{\"label\": \"cat\"}\n{\"label\": \"dog\"}\n";
        let config = json!({"fields": ["$.label"]});
        let result = evaluator.evaluate(dataset, predictions, &config);
        assert!(matches!(result, Err(EngineError::Permanent(_))));
    }
}
