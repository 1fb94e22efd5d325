//! Failure classification and the recovery action table.
//!
//! Every failure that escapes a workflow cycle maps to exactly one class,
//! and each class to exactly one corrective action. Escalation is strictly
//! ordered: a backend restart is only attempted after a reconnect has failed
//! for the same incident, unless the failure itself says the backend is dead.

use crate::backend::INSTRUMENTATION_DOWN;
use crate::errors::ControlError;
use std::time::Duration;

/// What a raw failure means for the controller.
#[derive(Debug)]
pub enum FailureClass {
    /// Safe to retry the same cycle logic next tick.
    Transient(ControlError),
    /// The session is unusable but the backend should still be up.
    SessionLost(ControlError),
    /// The backend process itself is gone; reconnecting is pointless.
    BackendCrashed(ControlError),
    /// Recovery itself failed; surface to the operator.
    Fatal(ControlError),
}

impl FailureClass {
    pub fn error(&self) -> &ControlError {
        match self {
            FailureClass::Transient(e)
            | FailureClass::SessionLost(e)
            | FailureClass::BackendCrashed(e)
            | FailureClass::Fatal(e) => e,
        }
    }
}

/// Pure classification of a raw failure.
pub fn classify(err: ControlError) -> FailureClass {
    let message = err.to_string();
    if message.contains(INSTRUMENTATION_DOWN) || message.contains("socket hang up") {
        return FailureClass::BackendCrashed(err);
    }
    match err {
        ControlError::BackendGone(_) => FailureClass::BackendCrashed(err),
        ControlError::Transport(_) | ControlError::ConnectError(_) => {
            FailureClass::SessionLost(err)
        }
        other => FailureClass::Transient(other),
    }
}

/// Corrective action chosen for a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Wait, then run the next cycle as usual.
    RetryAfter(Duration),
    /// Reconnect the session, then wait before the next cycle.
    ReconnectThen(Duration),
    /// Restart the backend process, then wait before the next cycle.
    RestartBackendThen(Duration),
    /// Stop the driver and surface the error.
    Abort,
}

/// The action/backoff table of the controller.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    short_delay: Duration,
    medium_delay: Duration,
}

impl RecoveryPolicy {
    pub fn new(short_delay: Duration, medium_delay: Duration) -> Self {
        Self {
            short_delay,
            medium_delay,
        }
    }

    pub fn plan(&self, class: &FailureClass) -> RecoveryAction {
        match class {
            FailureClass::Transient(_) => RecoveryAction::RetryAfter(self.short_delay),
            FailureClass::SessionLost(_) => RecoveryAction::ReconnectThen(self.short_delay),
            FailureClass::BackendCrashed(_) => {
                RecoveryAction::RestartBackendThen(self.medium_delay)
            }
            FailureClass::Fatal(_) => RecoveryAction::Abort,
        }
    }

    pub fn medium_delay(&self) -> Duration {
        self.medium_delay
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(90))
    }
}
