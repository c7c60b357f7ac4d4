// evalctl-collab/src/notifier.rs
// ============================================================================
// Module: Logging Notifier
// Description: Built-in Notifier that records deliveries as structured log
//              events instead of sending them anywhere.
// Purpose: Give the engine a zero-config Notifier so task handlers and
//          tests never need a real email/messaging integration wired in.
// Dependencies: evalctl-core, tracing
// ============================================================================

use evalctl_core::{EngineError, Notification, Notifier};

/// Delivers notifications by emitting a `tracing::info!` event; nothing is
/// sent externally.
///
/// Intended as the default collaborator for local runs and for any
/// deployment where a real delivery channel has not been wired in yet.
#[derive(Debug, Default)]
pub struct LoggingNotifier;

impl LoggingNotifier {
    /// Builds a notifier. Stateless; provided for symmetry with
    /// collaborators that do carry configuration.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for LoggingNotifier {
    fn send(&self, notification: &Notification) -> Result<(), EngineError> {
        tracing::info!(
            to = %notification.to,
            subject = %notification.subject,
            "notification delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use evalctl_core::{EngineError, Notification, Notifier};

    use super::LoggingNotifier;

    #[test]
    fn send_never_fails() -> Result<(), EngineError> {
        let notifier = LoggingNotifier::new();
        notifier.send(&Notification {
            to: "team@example.com".to_owned(),
            subject: "quality check failed".to_owned(),
            body: "see attached issues".to_owned(),
        })
    }
}
