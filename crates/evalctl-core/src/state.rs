// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! A generic, append-only state machine over a closed
//! [`crate::transitions::TransitionTable`].
//!
//! One `StateMachine<S>` instance is reconstructed per aggregate, per
//! repository read, from its persisted current state plus full history.
//! It never talks to storage itself; see `evalctl-store` for that side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::EngineError;
use crate::transitions::TransitionTable;

/// One entry in an aggregate's append-only transition history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry<S> {
    /// The state entered by this entry. The very first entry's `to`
    /// equals the aggregate's initial state.
    pub to: S,
    /// When the transition was recorded.
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    /// Who or what caused the transition (`"system"` for automatic
    /// steps).
    pub triggered_by: String,
    /// A short human-readable reason, if one was supplied.
    pub reason: Option<String>,
    /// Whether this entry bypassed the transition table via `force`.
    pub forced: bool,
}

/// A reconstructed, in-memory state machine for one aggregate.
///
/// `S` is one of [`crate::UseCaseState`] or
/// [`crate::ModelEvaluationState`]. The machine owns the full history it
/// was loaded with; callers mutate it via [`Self::transition_to`] and hand
/// it back to the repository for persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateMachine<S> {
    current: S,
    history: Vec<HistoryEntry<S>>,
}

impl<S: TransitionTable> StateMachine<S> {
    /// Builds a fresh machine with a single history entry recording the
    /// initial state.
    #[must_use]
    pub fn new(initial: S, at: OffsetDateTime) -> Self {
        Self {
            current: initial,
            history: vec![HistoryEntry {
                to: initial,
                at,
                triggered_by: "system".to_owned(),
                reason: None,
                forced: false,
            }],
        }
    }

    /// Reconstructs a machine from a persisted current state and its full
    /// ordered history, as loaded by a repository.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Corruption`] if the history is empty or its
    /// last entry does not match `current`.
    pub fn from_parts(current: S, history: Vec<HistoryEntry<S>>) -> Result<Self, EngineError> {
        let Some(tail) = history.last() else {
            return Err(EngineError::Corruption(
                "aggregate has no history entries".to_owned(),
            ));
        };
        if tail.to != current {
            return Err(EngineError::Corruption(format!(
                "history tail {:?} does not match current state {:?}",
                tail.to, current
            )));
        }
        Ok(Self { current, history })
    }

    /// The aggregate's current state.
    #[must_use]
    pub const fn current(&self) -> &S {
        &self.current
    }

    /// The full ordered history, oldest first.
    #[must_use]
    pub fn history(&self) -> &[HistoryEntry<S>] {
        &self.history
    }

    /// Whether the aggregate has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool
    where
        S: Copy,
    {
        self.current.is_terminal()
    }

    /// States reachable from the current state in one step.
    #[must_use]
    pub fn allowed_transitions(&self) -> Vec<S>
    where
        S: Copy,
    {
        self.current.allowed_transitions()
    }

    /// Attempts to move to `to`.
    ///
    /// Returns `Ok(true)` if the transition was applied and a history
    /// entry appended, `Ok(false)` if `to` is a no-op because the
    /// aggregate is already there. Returns
    /// [`EngineError::InvalidTransition`] if the edge is not in the table
    /// and `force` is false.
    pub fn transition_to(
        &mut self,
        to: S,
        triggered_by: impl Into<String>,
        reason: Option<String>,
        at: OffsetDateTime,
        force: bool,
    ) -> Result<bool, EngineError>
    where
        S: Copy + std::fmt::Display,
    {
        if self.current == to {
            return Ok(false);
        }
        if !force && !self.current.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: self.current.to_string(),
                to: to.to_string(),
            });
        }
        self.history.push(HistoryEntry {
            to,
            at,
            triggered_by: triggered_by.into(),
            reason,
            forced: force && !self.current.can_transition_to(to),
        });
        self.current = to;
        Ok(true)
    }

    /// Total wall-clock time spent so far in the current state, measured
    /// from the most recent entry to `now`.
    #[must_use]
    pub fn current_state_duration(&self, now: OffsetDateTime) -> time::Duration
    where
        S: Copy,
    {
        self.history
            .last()
            .map_or(time::Duration::ZERO, |entry| now - entry.at)
    }

    /// Cumulative time spent in `state` across the full history, summing
    /// every interval where the aggregate held that state.
    #[must_use]
    pub fn duration_in(&self, state: S, now: OffsetDateTime) -> time::Duration
    where
        S: Copy + PartialEq,
    {
        let mut total = time::Duration::ZERO;
        for window in self.history.windows(2) {
            let [start, end] = window else { continue };
            if start.to == state {
                total += end.at - start.at;
            }
        }
        if let Some(last) = self.history.last() {
            if last.to == state {
                total += now - last.at;
            }
        }
        total
    }

    /// Discards the most recent `n` history entries and restores
    /// `current` to the new tail. An operator/debug affordance; it does
    /// not validate that the resulting sequence would have been reachable
    /// through the transition table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if `n` would empty the history.
    pub fn rollback(&mut self, n: usize) -> Result<(), EngineError>
    where
        S: Copy,
    {
        if n == 0 {
            return Ok(());
        }
        if n >= self.history.len() {
            return Err(EngineError::Validation(format!(
                "cannot roll back {n} entries from a history of {}",
                self.history.len()
            )));
        }
        self.history.truncate(self.history.len() - n);
        // `from_parts` already guarantees a non-empty tail at this point.
        self.current = self.history[self.history.len() - 1].to;
        Ok(())
    }

    /// Counts how many history entries landed in each state.
    #[must_use]
    pub fn state_counts(&self) -> BTreeMap<String, usize>
    where
        S: Copy + std::fmt::Display,
    {
        let mut counts = BTreeMap::new();
        for entry in &self.history {
            *counts.entry(entry.to.to_string()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::StateMachine;
    use crate::transitions::UseCaseState;

    fn now() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH
    }

    #[test]
    fn fresh_machine_has_one_history_entry() {
        let sm = StateMachine::new(UseCaseState::TemplateGeneration, now());
        assert_eq!(sm.history().len(), 1);
        assert_eq!(*sm.current(), UseCaseState::TemplateGeneration);
    }

    #[test]
    fn illegal_transition_is_rejected_without_mutation() {
        let mut sm = StateMachine::new(UseCaseState::TemplateGeneration, now());
        let err = sm
            .transition_to(UseCaseState::EvaluationQueued, "system", None, now(), false)
            .unwrap_err();
        assert!(matches!(err, crate::EngineError::InvalidTransition { .. }));
        assert_eq!(sm.history().len(), 1);
    }

    #[test]
    fn legal_transition_appends_history() {
        let mut sm = StateMachine::new(UseCaseState::TemplateGeneration, now());
        let applied = sm
            .transition_to(UseCaseState::TemplateSent, "system", None, now(), false)
            .unwrap();
        assert!(applied);
        assert_eq!(sm.history().len(), 2);
        assert_eq!(*sm.current(), UseCaseState::TemplateSent);
    }

    #[test]
    fn from_parts_rejects_mismatched_tail() {
        let sm = StateMachine::new(UseCaseState::TemplateGeneration, now());
        let err =
            StateMachine::from_parts(UseCaseState::AwaitingConfig, sm.history().to_vec())
                .unwrap_err();
        assert!(matches!(err, crate::EngineError::Corruption(_)));
    }

    #[test]
    fn rollback_restores_prior_state() {
        let mut sm = StateMachine::new(UseCaseState::TemplateGeneration, now());
        sm.transition_to(UseCaseState::TemplateSent, "system", None, now(), false)
            .unwrap();
        sm.rollback(1).unwrap();
        assert_eq!(*sm.current(), UseCaseState::TemplateGeneration);
        assert_eq!(sm.history().len(), 1);
    }
}
