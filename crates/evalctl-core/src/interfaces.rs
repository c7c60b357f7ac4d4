// Copyright (c) 2026 Michael Campbell. All rights reserved.
//! Narrow collaborator traits.
//!
//! These are the only seams through which the engine reaches outside
//! itself: dataset quality checking, metric evaluation, blob storage, and
//! notification delivery. Task handlers in `evalctl-tasks` are generic
//! over these traits; production binaries wire in real implementations,
//! tests wire in fakes.

use serde_json::Value;

use crate::entities::QualityIssue;
use crate::error::EngineError;

/// Runs dataset-level quality checks against a configured field schema.
///
/// Implemented by the data-quality rule library; out of scope for this
/// repository beyond this interface.
pub trait QualityChecker: Send + Sync {
    /// Checks `dataset` against `field_config` and returns every issue
    /// found, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Permanent`] if the dataset cannot be parsed
    /// at all, [`EngineError::Transient`] for retryable failures (for
    /// example an unavailable sidecar process).
    fn check(&self, dataset: &[u8], field_config: &Value) -> Result<Vec<QualityIssue>, EngineError>;
}

/// Computes evaluation metrics for one model's predictions against a
/// golden dataset.
///
/// Implemented by the field-based evaluator; out of scope for this
/// repository beyond this interface.
pub trait Evaluator: Send + Sync {
    /// Evaluates `predictions` against `dataset` using `config` and
    /// returns an opaque metrics summary.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Permanent`] if the predictions cannot be
    /// scored at all, [`EngineError::Transient`] for retryable failures.
    fn evaluate(&self, dataset: &[u8], predictions: &[u8], config: &Value) -> Result<Value, EngineError>;
}

/// Durable blob storage for configs, datasets, predictions, and reports.
pub trait ObjectStore: Send + Sync {
    /// Writes `bytes` under `key`, overwriting any prior contents.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), EngineError>;

    /// Reads the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if `key` does not exist,
    /// [`EngineError::Transient`] on a retryable storage failure.
    fn get(&self, key: &str) -> Result<Vec<u8>, EngineError>;

    /// Lists every key stored under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn list(&self, prefix: &str) -> Result<Vec<String>, EngineError>;

    /// Deletes the object stored under `key`. A no-op if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable storage failure.
    fn delete(&self, key: &str) -> Result<(), EngineError>;
}

/// One outbound notification, already rendered for delivery.
#[derive(Clone, Debug)]
pub struct Notification {
    /// Destination address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Delivers notifications to a team, e.g. over email.
pub trait Notifier: Send + Sync {
    /// Sends `notification`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] on a retryable delivery failure,
    /// [`EngineError::Permanent`] if the destination is structurally
    /// invalid.
    fn send(&self, notification: &Notification) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::{Notification, Notifier};
    use crate::error::EngineError;

    struct RecordingNotifier {
        sent: std::sync::Mutex<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, notification: &Notification) -> Result<(), EngineError> {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(notification.clone());
            Ok(())
        }
    }

    #[test]
    fn fake_notifier_records_sent_messages() -> Result<(), EngineError> {
        let notifier = RecordingNotifier {
            sent: std::sync::Mutex::new(Vec::new()),
        };
        notifier.send(&Notification {
            to: "team@example.com".to_owned(),
            subject: "quality check failed".to_owned(),
            body: "see attached issues".to_owned(),
        })?;
        assert_eq!(
            notifier
                .sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .len(),
            1
        );
        Ok(())
    }
}
