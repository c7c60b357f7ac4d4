// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! The two closed state enumerations and their immutable transition
//! tables.
//!
//! Each enum mirrors the lifecycle of the original prototype's
//! `state_machine.py`, with one addition: an explicit `CANCELLED` edge
//! reachable from every non-terminal state, which the prototype only
//! handled ad hoc outside its transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle of a use case, from template issuance through archival.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UseCaseState {
    /// The template for the use case is being generated.
    TemplateGeneration,
    /// The template has been sent to the submitting team.
    TemplateSent,
    /// Waiting on the team to upload a configuration file.
    AwaitingConfig,
    /// A configuration file has been received but not yet validated.
    ConfigReceived,
    /// The configuration validator is running.
    ConfigValidationRunning,
    /// The configuration failed validation.
    ConfigInvalid,
    /// A quality check is running over at least one model's dataset.
    QualityCheckRunning,
    /// At least one model's dataset failed its quality check.
    QualityCheckFailed,
    /// Waiting on the team to fix and resubmit data.
    AwaitingDataFix,
    /// All registered models passed their quality check.
    QualityCheckPassed,
    /// Evaluation has been queued for the registered models.
    EvaluationQueued,
    /// Evaluation is actively running.
    EvaluationRunning,
    /// Evaluation completed for all registered models.
    EvaluationCompleted,
    /// Evaluation failed and will not be retried automatically.
    EvaluationFailed,
    /// The use case has been archived by an operator.
    Archived,
    /// The use case was cancelled before reaching a natural terminus.
    Cancelled,
}

/// The lifecycle of a single model evaluation within a use case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModelEvaluationState {
    /// The model has been registered against a use case.
    Registered,
    /// Waiting for its quality check to be scheduled.
    QualityCheckPending,
    /// The quality check is running.
    QualityCheckRunning,
    /// The quality check passed with no blocking issues.
    QualityCheckPassed,
    /// The quality check found blocking issues.
    QualityCheckFailed,
    /// Waiting on the team to fix and resubmit its dataset.
    AwaitingDataFix,
    /// Evaluation has been queued.
    EvaluationQueued,
    /// Evaluation is actively running.
    EvaluationRunning,
    /// Evaluation completed successfully.
    EvaluationCompleted,
    /// Evaluation failed and will not be retried automatically.
    EvaluationFailed,
    /// The model evaluation has been archived.
    Archived,
    /// The model evaluation was cancelled.
    Cancelled,
}

impl fmt::Display for UseCaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for ModelEvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const USE_CASE_EDGES: &[(UseCaseState, UseCaseState)] = {
    use UseCaseState::{
        Archived, AwaitingConfig, AwaitingDataFix, ConfigInvalid, ConfigReceived,
        ConfigValidationRunning, EvaluationCompleted, EvaluationFailed, EvaluationQueued,
        EvaluationRunning, QualityCheckFailed, QualityCheckPassed, QualityCheckRunning,
        TemplateGeneration, TemplateSent,
    };
    &[
        (TemplateGeneration, TemplateSent),
        (TemplateSent, AwaitingConfig),
        (AwaitingConfig, ConfigReceived),
        (ConfigReceived, ConfigValidationRunning),
        (ConfigValidationRunning, ConfigInvalid),
        (ConfigValidationRunning, QualityCheckRunning),
        (ConfigInvalid, AwaitingConfig),
        (QualityCheckRunning, QualityCheckPassed),
        (QualityCheckRunning, QualityCheckFailed),
        (QualityCheckFailed, AwaitingDataFix),
        (AwaitingDataFix, ConfigReceived),
        (QualityCheckPassed, EvaluationQueued),
        (EvaluationQueued, EvaluationRunning),
        (EvaluationRunning, EvaluationCompleted),
        (EvaluationRunning, EvaluationFailed),
        (EvaluationFailed, EvaluationQueued),
        (EvaluationCompleted, Archived),
    ]
};

const MODEL_EDGES: &[(ModelEvaluationState, ModelEvaluationState)] = {
    use ModelEvaluationState::{
        Archived, AwaitingDataFix, EvaluationCompleted, EvaluationFailed, EvaluationQueued,
        EvaluationRunning, QualityCheckFailed, QualityCheckPassed, QualityCheckPending,
        QualityCheckRunning, Registered,
    };
    &[
        (Registered, QualityCheckPending),
        (QualityCheckPending, QualityCheckRunning),
        (QualityCheckRunning, QualityCheckPassed),
        (QualityCheckRunning, QualityCheckFailed),
        (QualityCheckFailed, AwaitingDataFix),
        (AwaitingDataFix, QualityCheckPending),
        (QualityCheckPassed, EvaluationQueued),
        (EvaluationQueued, EvaluationRunning),
        (EvaluationRunning, EvaluationCompleted),
        (EvaluationRunning, EvaluationFailed),
        (EvaluationFailed, EvaluationQueued),
        (EvaluationCompleted, Archived),
    ]
};

impl UseCaseState {
    /// Whether no further automatic or operator-driven progress is
    /// expected from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Archived | Self::Cancelled)
    }

    /// Whether the use case is stalled waiting on an external fix.
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        matches!(self, Self::AwaitingDataFix | Self::ConfigInvalid)
    }

    /// Whether `to` is reachable from `self` via a declared edge, or via
    /// the universal cancellation edge.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        if matches!(to, Self::Cancelled) {
            return !self.is_terminal();
        }
        USE_CASE_EDGES.iter().any(|&(from, dst)| from == self && dst == to)
    }

    /// All states reachable from `self` in one step.
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<Self> {
        let mut out: Vec<Self> = USE_CASE_EDGES
            .iter()
            .filter(|&&(from, _)| from == self)
            .map(|&(_, to)| to)
            .collect();
        if !self.is_terminal() {
            out.push(Self::Cancelled);
        }
        out
    }
}

impl ModelEvaluationState {
    /// Whether no further automatic or operator-driven progress is
    /// expected from this state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Archived | Self::Cancelled)
    }

    /// Whether the model evaluation is stalled waiting on an external fix.
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        matches!(self, Self::AwaitingDataFix)
    }

    /// Whether evaluation may begin from this state.
    #[must_use]
    pub const fn can_start_evaluation(self) -> bool {
        matches!(self, Self::QualityCheckPassed)
    }

    /// Whether `to` is reachable from `self` via a declared edge, or via
    /// the universal cancellation edge.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        if matches!(to, Self::Cancelled) {
            return !self.is_terminal();
        }
        MODEL_EDGES.iter().any(|&(from, dst)| from == self && dst == to)
    }

    /// All states reachable from `self` in one step.
    #[must_use]
    pub fn allowed_transitions(self) -> Vec<Self> {
        let mut out: Vec<Self> = MODEL_EDGES
            .iter()
            .filter(|&&(from, _)| from == self)
            .map(|&(_, to)| to)
            .collect();
        if !self.is_terminal() {
            out.push(Self::Cancelled);
        }
        out
    }
}

/// Common shape shared by every closed state enumeration the engine
/// drives through a [`crate::state::StateMachine`].
pub trait TransitionTable: Copy + Eq + fmt::Debug + fmt::Display {
    /// Whether no further progress is expected from this state.
    fn is_terminal(self) -> bool;

    /// Whether `to` is reachable from `self` in one step.
    fn can_transition_to(self, to: Self) -> bool;

    /// All states reachable from `self` in one step.
    fn allowed_transitions(self) -> Vec<Self>;
}

impl TransitionTable for UseCaseState {
    fn is_terminal(self) -> bool {
        Self::is_terminal(self)
    }

    fn can_transition_to(self, to: Self) -> bool {
        Self::can_transition_to(self, to)
    }

    fn allowed_transitions(self) -> Vec<Self> {
        Self::allowed_transitions(self)
    }
}

impl TransitionTable for ModelEvaluationState {
    fn is_terminal(self) -> bool {
        Self::is_terminal(self)
    }

    fn can_transition_to(self, to: Self) -> bool {
        Self::can_transition_to(self, to)
    }

    fn allowed_transitions(self) -> Vec<Self> {
        Self::allowed_transitions(self)
    }
}

#[cfg(test)]
mod tests {
    use super::{ModelEvaluationState, UseCaseState};

    #[test]
    fn template_generation_cannot_skip_to_evaluation() {
        assert!(!UseCaseState::TemplateGeneration.can_transition_to(UseCaseState::EvaluationQueued));
    }

    #[test]
    fn every_nonterminal_use_case_state_can_cancel() {
        let states = [
            UseCaseState::TemplateGeneration,
            UseCaseState::AwaitingConfig,
            UseCaseState::QualityCheckRunning,
            UseCaseState::EvaluationRunning,
        ];
        for state in states {
            assert!(state.can_transition_to(UseCaseState::Cancelled));
        }
        assert!(!UseCaseState::Archived.can_transition_to(UseCaseState::Cancelled));
        assert!(!UseCaseState::Cancelled.can_transition_to(UseCaseState::Cancelled));
    }

    #[test]
    fn model_evaluation_retries_after_failure() {
        assert!(ModelEvaluationState::EvaluationFailed
            .can_transition_to(ModelEvaluationState::EvaluationQueued));
        assert!(ModelEvaluationState::QualityCheckPassed.can_start_evaluation());
        assert!(!ModelEvaluationState::Registered.can_start_evaluation());
    }

    #[test]
    fn allowed_transitions_include_cancellation_when_nonterminal() {
        let allowed = UseCaseState::AwaitingConfig.allowed_transitions();
        assert!(allowed.contains(&UseCaseState::ConfigReceived));
        assert!(allowed.contains(&UseCaseState::Cancelled));
    }
}
