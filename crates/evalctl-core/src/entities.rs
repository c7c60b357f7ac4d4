// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! Aggregate and value-object definitions.
//!
//! These types carry no persistence logic; `evalctl-store` maps them to
//! and from rows. Free-form fields use `serde_json::Value` so the engine
//! never needs to know the shape of caller-supplied metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::ids::{ModelId, UseCaseId};
use crate::transitions::{ModelEvaluationState, UseCaseState};

/// A team's submission for evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UseCase {
    /// Opaque identifier.
    pub id: UseCaseId,
    /// Human-readable name given at submission time.
    pub name: String,
    /// Contact address for the submitting team.
    pub team_email: String,
    /// Current lifecycle state.
    pub state: UseCaseState,
    /// Storage key of the uploaded configuration file, once received.
    pub config_file_key: Option<String>,
    /// Storage key of a use-case-level dataset, if this use case does not
    /// scope datasets per model.
    pub dataset_file_key: Option<String>,
    /// Quality issues found against the use case as a whole.
    pub quality_issues: Vec<QualityIssue>,
    /// Opaque evaluation result summaries keyed by model name.
    pub evaluation_results: BTreeMap<String, Value>,
    /// Caller-supplied free-form metadata.
    pub metadata: BTreeMap<String, Value>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Timestamp of the most recent mutation.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One candidate model registered against a use case.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelEvaluation {
    /// Opaque identifier.
    pub id: ModelId,
    /// The use case this evaluation belongs to.
    pub use_case_id: UseCaseId,
    /// Name of the model under evaluation.
    pub model_name: String,
    /// Version or checkpoint identifier of the model.
    pub version: String,
    /// Current lifecycle state.
    pub current_state: ModelEvaluationState,
    /// Storage key of this model's dataset, once uploaded.
    pub dataset_file_key: Option<String>,
    /// Storage key of this model's predictions, once uploaded.
    pub predictions_file_key: Option<String>,
    /// Quality issues found against this model's dataset.
    pub quality_issues: Vec<QualityIssue>,
    /// Caller-supplied free-form metadata.
    pub metadata: BTreeMap<String, Value>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Timestamp of the most recent mutation.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// How serious a [`QualityIssue`] is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Informational only; does not block evaluation.
    Info,
    /// Worth surfacing to the team, does not block evaluation.
    Warning,
    /// Blocks evaluation until fixed and resubmitted.
    Error,
}

impl Severity {
    /// Whether an issue of this severity blocks evaluation from
    /// proceeding.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Error)
    }
}

/// One finding from the quality-check collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QualityIssue {
    /// Row the issue was found on, if the dataset is tabular.
    pub row_number: Option<u64>,
    /// Field or column name the issue pertains to.
    pub field_name: String,
    /// The offending value, rendered as text.
    pub value: Option<String>,
    /// Short machine-readable category, e.g. `"missing_value"`.
    pub issue_type: String,
    /// Human-readable description.
    pub message: String,
    /// How serious the issue is.
    pub severity: Severity,
    /// An optional suggested fix.
    pub suggestion: Option<String>,
}

/// True when any issue in the slice blocks evaluation from proceeding.
#[must_use]
pub fn has_blocking_issue(issues: &[QualityIssue]) -> bool {
    issues.iter().any(|issue| issue.severity.is_blocking())
}

/// An audit entry distinct from a state transition, capturing events like
/// rejected uploads that never touched the state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityLog {
    /// The use case this activity pertains to.
    pub use_case_id: UseCaseId,
    /// Short machine-readable category.
    pub activity_type: String,
    /// Human-readable description.
    pub description: String,
    /// Caller-supplied free-form metadata.
    pub metadata: BTreeMap<String, Value>,
    /// When the activity occurred.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::{has_blocking_issue, QualityIssue, Severity};

    fn issue(severity: Severity) -> QualityIssue {
        QualityIssue {
            row_number: Some(1),
            field_name: "score".to_owned(),
            value: None,
            issue_type: "out_of_range".to_owned(),
            message: "value out of range".to_owned(),
            severity,
            suggestion: None,
        }
    }

    #[test]
    fn only_error_severity_blocks() {
        assert!(!has_blocking_issue(&[issue(Severity::Warning), issue(Severity::Info)]));
        assert!(has_blocking_issue(&[issue(Severity::Warning), issue(Severity::Error)]));
    }
}
