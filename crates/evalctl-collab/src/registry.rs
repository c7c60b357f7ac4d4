// evalctl-collab/src/registry.rs
// ============================================================================
// Module: Collaborator Bundle
// Description: Bundles one instance of each narrow collaborator trait the
//              engine depends on, for a single wiring point at startup.
// Purpose: Give callers (the worker pool, the CLI) one struct to construct
//          and pass around instead of four independent trait objects.
// Dependencies: evalctl-core
// ============================================================================

//! ## Overview
//! Unlike an evidence-provider registry that dispatches by a string key
//! among many implementations of one trait, the engine's collaborators are
//! four distinct trait families with exactly one active implementation
//! each. [`Collaborators`] just holds one boxed trait object per family;
//! [`Collaborators::with_builtins`] wires in the in-repository
//! implementations, and [`Collaborators::new`] lets callers (tests, future
//! integrations) substitute any of the four.

use std::path::Path;

use evalctl_core::{EngineError, Evaluator, Notifier, ObjectStore, QualityChecker};

use crate::evaluator::FieldMatchEvaluator;
use crate::notifier::LoggingNotifier;
use crate::object_store::FilesystemObjectStore;
use crate::quality::FieldRuleQualityChecker;

/// One instance of each collaborator trait the engine's task handlers are
/// generic over.
pub struct Collaborators {
    /// Dataset quality checker.
    quality_checker: Box<dyn QualityChecker>,
    /// Metrics evaluator.
    evaluator: Box<dyn Evaluator>,
    /// Blob storage for configs, datasets, predictions, and reports.
    object_store: Box<dyn ObjectStore>,
    /// Notification delivery.
    notifier: Box<dyn Notifier>,
}

impl Collaborators {
    /// Builds a bundle from four caller-supplied implementations.
    #[must_use]
    pub fn new(
        quality_checker: Box<dyn QualityChecker>,
        evaluator: Box<dyn Evaluator>,
        object_store: Box<dyn ObjectStore>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self { quality_checker, evaluator, object_store, notifier }
    }

    /// Builds a bundle from the in-repository implementations: the
    /// field-rule quality checker, the field-match evaluator, a
    /// filesystem-backed object store rooted at `blob_root`, and the
    /// logging notifier.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transient`] if `blob_root` cannot be created.
    pub fn with_builtins(blob_root: impl AsRef<Path>) -> Result<Self, EngineError> {
        Ok(Self::new(
            Box::new(FieldRuleQualityChecker::new()),
            Box::new(FieldMatchEvaluator::new()),
            Box::new(FilesystemObjectStore::new(blob_root.as_ref())?),
            Box::new(LoggingNotifier::new()),
        ))
    }

    /// Returns the dataset quality checker.
    #[must_use]
    pub fn quality_checker(&self) -> &dyn QualityChecker {
        self.quality_checker.as_ref()
    }

    /// Returns the metrics evaluator.
    #[must_use]
    pub fn evaluator(&self) -> &dyn Evaluator {
        self.evaluator.as_ref()
    }

    /// Returns the blob store.
    #[must_use]
    pub fn object_store(&self) -> &dyn ObjectStore {
        self.object_store.as_ref()
    }

    /// Returns the notifier.
    #[must_use]
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use evalctl_core::EngineError;
    use tempfile::TempDir;

    use super::Collaborators;

    #[test]
    fn with_builtins_wires_a_usable_object_store() -> Result<(), EngineError> {
        let dir = TempDir::new().map_err(|err| EngineError::Transient(err.to_string()))?;
        let bundle = Collaborators::with_builtins(dir.path())?;
        bundle.object_store().put("key", b"value")?;
        assert_eq!(bundle.object_store().get("key")?, b"value");
        Ok(())
    }
}
