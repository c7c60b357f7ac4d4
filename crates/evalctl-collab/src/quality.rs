// evalctl-collab/src/quality.rs
// ============================================================================
// Module: Field-Rule Quality Checker
// Description: Built-in dataset quality checker driven by a JSON field config.
// Purpose: Give the engine a zero-config QualityChecker that needs no
//          external service, usable for the config-validation task as well
//          as per-model dataset checks.
// Dependencies: evalctl-core, jsonpath_lib, serde_json
// ============================================================================

//! ## Overview
//! `dataset` is expected to be newline-delimited JSON, one record per line.
//! `field_config` is a JSON object of the shape
//! `{"fields": [{"path": "$.score", "required": true, "min": 0.0, "max": 1.0}]}`.
//! Every record is checked against every field rule; missing required
//! fields and out-of-range numeric values become [`QualityIssue`]s.

use evalctl_core::{EngineError, QualityChecker, QualityIssue, Severity};
use serde::Deserialize;
use serde_json::Value;

/// One field-level rule evaluated against every record in a dataset.
#[derive(Debug, Clone, Deserialize)]
struct FieldRule {
    /// `JSONPath` expression locating the field within a record.
    path: String,
    /// Whether the field must be present.
    #[serde(default)]
    required: bool,
    /// Inclusive lower bound for numeric fields.
    #[serde(default)]
    min: Option<f64>,
    /// Inclusive upper bound for numeric fields.
    #[serde(default)]
    max: Option<f64>,
}

/// Top-level shape of the `field_config` JSON value.
#[derive(Debug, Clone, Deserialize)]
struct FieldConfig {
    /// Rules applied to every record.
    #[serde(default)]
    fields: Vec<FieldRule>,
}

/// Checks newline-delimited JSON records against a declarative field config.
///
/// No network or filesystem access; the caller is responsible for reading
/// the dataset bytes through an [`evalctl_core::interfaces::ObjectStore`]
/// first.
#[derive(Debug, Default)]
pub struct FieldRuleQualityChecker;

impl FieldRuleQualityChecker {
    /// Builds a checker. Stateless; provided for symmetry with collaborators
    /// that do carry configuration.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl QualityChecker for FieldRuleQualityChecker {
    fn check(&self, dataset: &[u8], field_config: &Value) -> Result<Vec<QualityIssue>, EngineError> {
        let config: FieldConfig = serde_json::from_value(field_config.clone())
            .map_err(|err| EngineError::Permanent(format!("invalid field config: {err}")))?;
        let text = std::str::from_utf8(dataset)
            .map_err(|err| EngineError::Permanent(format!("dataset is not valid utf-8: {err}")))?;

        let mut issues = Vec::new();
        for (row_index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: Value = match serde_json::from_str(line) {
                Ok(value) => value,
                Err(err) => {
                    issues.push(malformed_row(row_index, &err.to_string()));
                    continue;
                }
            };
            for rule in &config.fields {
                issues.extend(check_rule(row_index, rule, &record));
            }
        }
        Ok(issues)
    }
}

/// Builds the issue recorded when a dataset line fails to parse as JSON.
fn malformed_row(row_index: usize, message: &str) -> QualityIssue {
    QualityIssue {
        row_number: Some(u64::try_from(row_index).unwrap_or(u64::MAX)),
        field_name: String::new(),
        value: None,
        issue_type: "malformed_row".to_owned(),
        message: format!("row is not valid json: {message}"),
        severity: Severity::Error,
        suggestion: Some("ensure every line is a single json object".to_owned()),
    }
}

/// Evaluates one field rule against one parsed record.
fn check_rule(row_index: usize, rule: &FieldRule, record: &Value) -> Vec<QualityIssue> {
    let found = jsonpath_lib::select(record, &rule.path).unwrap_or_default();
    let Some(value) = found.first().copied() else {
        if rule.required {
            return vec![QualityIssue {
                row_number: Some(u64::try_from(row_index).unwrap_or(u64::MAX)),
                field_name: rule.path.clone(),
                value: None,
                issue_type: "missing_value".to_owned(),
                message: format!("required field {} is missing", rule.path),
                severity: Severity::Error,
                suggestion: None,
            }];
        }
        return Vec::new();
    };
    let Some(number) = value.as_f64() else {
        return Vec::new();
    };
    let mut issues = Vec::new();
    if rule.min.is_some_and(|min| number < min) || rule.max.is_some_and(|max| number > max) {
        issues.push(QualityIssue {
            row_number: Some(u64::try_from(row_index).unwrap_or(u64::MAX)),
            field_name: rule.path.clone(),
            value: Some(number.to_string()),
            issue_type: "out_of_range".to_owned(),
            message: format!("value {number} is outside the configured range for {}", rule.path),
            severity: Severity::Error,
            suggestion: None,
        });
    }
    issues
}

#[cfg(test)]
mod tests {
    use evalctl_core::{EngineError, QualityChecker};
    use serde_json::json;

    use super::FieldRuleQualityChecker;

    #[test]
    fn missing_required_field_is_flagged() -> Result<(), EngineError> {
        let checker = FieldRuleQualityChecker::new();
        let dataset = b"{\"other\": 1}\n";
        let config = json!({"fields": [{"path": "$.score", "required": true}]});
        let issues = checker.check(dataset, &config)?;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "missing_value");
        Ok(())
    }

    #[test]
    fn in_range_value_raises_no_issue() -> Result<(), EngineError> {
        let checker = FieldRuleQualityChecker::new();
        let dataset = b"{\"score\": 0.5}\n";
        let config = json!({"fields": [{"path": "$.score", "min": 0.0, "max": 1.0}]});
        let issues = checker.check(dataset, &config)?;
        assert!(issues.is_empty());
        Ok(())
    }

    #[test]
    fn out_of_range_value_is_flagged() -> Result<(), EngineError> {
        let checker = FieldRuleQualityChecker::new();
        let dataset = b"{\"score\": 5.0}\n";
        let config = json!({"fields": [{"path": "$.score", "min": 0.0, "max": 1.0}]});
        let issues = checker.check(dataset, &config)?;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "out_of_range");
        Ok(())
    }
}
