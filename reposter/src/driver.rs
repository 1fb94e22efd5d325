//! The outermost loop: run one cycle, apply recovery on failure, idle,
//! repeat. Owns orderly shutdown.

use crate::errors::ControlError;
use crate::recovery::{classify, FailureClass, RecoveryAction, RecoveryPolicy};
use crate::session::SessionManager;
use crate::workflow::{CycleOutcome, Workflow};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Drives workflow cycles forever, consulting the recovery policy on every
/// failure. A single logical worker: no two cycles ever overlap.
pub struct CycleDriver {
    sessions: SessionManager,
    workflow: Workflow,
    policy: RecoveryPolicy,
    check_interval: Duration,
    shutdown: CancellationToken,
}

impl CycleDriver {
    pub fn new(
        sessions: SessionManager,
        workflow: Workflow,
        policy: RecoveryPolicy,
        check_interval: Duration,
    ) -> Self {
        Self {
            sessions,
            workflow,
            policy,
            check_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token an operator-facing surface cancels to request a graceful stop.
    /// The current cycle drains; the idle wait is interrupted immediately.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until fatal failure or external interrupt. Session teardown and
    /// backend process termination happen unconditionally on exit.
    pub async fn run(&mut self) -> Result<(), ControlError> {
        let result = self.run_loop().await;
        self.sessions.shutdown().await;
        if let Err(e) = &result {
            error!(error = %e, "cycle driver aborted");
        } else {
            info!("cycle driver stopped");
        }
        result
    }

    async fn run_loop(&mut self) -> Result<(), ControlError> {
        self.sessions.start().await?;
        let session = self
            .sessions
            .session_id()
            .cloned()
            .ok_or_else(|| ControlError::Internal("connected without a session".to_string()))?;
        self.workflow.wait_logged_in(&session).await?;

        info!(interval = ?self.check_interval, "starting monitoring loop");
        while !self.shutdown.is_cancelled() {
            // Cheap liveness gate before committing to a full cycle.
            match self.sessions.health_check().await {
                Ok(true) => {}
                Ok(false) => {
                    warn!("session reports unhealthy, reconnecting");
                    if let Err(e) = self.sessions.reconnect().await {
                        self.recover(e).await?;
                        continue;
                    }
                }
                Err(e) => {
                    self.recover(e).await?;
                    continue;
                }
            }
            let Some(session) = self.sessions.session_id().cloned() else {
                self.recover(ControlError::Transport("no live session".to_string()))
                    .await?;
                continue;
            };

            match self.workflow.run_cycle(&session).await {
                Ok(CycleOutcome::Completed) => info!("cycle completed"),
                Ok(CycleOutcome::Skipped(reason)) => info!(?reason, "cycle skipped"),
                Err(e) => {
                    self.recover(e).await?;
                    continue;
                }
            }
            self.idle(self.check_interval).await;
        }
        Ok(())
    }

    /// Classify a raw failure and execute the corrective action. Escalation
    /// is strictly ordered: reconnect before backend restart unless the
    /// failure already names the backend as dead. Returns `Err` only when
    /// recovery itself failed, which aborts the loop.
    pub async fn recover(&mut self, err: ControlError) -> Result<(), ControlError> {
        let class = classify(err);
        warn!(class = ?class, "cycle failed, applying recovery");
        match self.policy.plan(&class) {
            RecoveryAction::RetryAfter(delay) => {
                self.idle(delay).await;
                Ok(())
            }
            RecoveryAction::ReconnectThen(delay) => {
                if let Err(reconnect_err) = self.sessions.reconnect().await {
                    warn!(error = %reconnect_err, "reconnect failed, escalating to backend restart");
                    if let Err(restart_err) = self.sessions.restart_backend().await {
                        return Err(fatal(restart_err));
                    }
                    self.idle(self.policy.medium_delay()).await;
                    return Ok(());
                }
                self.idle(delay).await;
                Ok(())
            }
            RecoveryAction::RestartBackendThen(delay) => {
                if let Err(restart_err) = self.sessions.restart_backend().await {
                    return Err(fatal(restart_err));
                }
                self.idle(delay).await;
                Ok(())
            }
            RecoveryAction::Abort => Err(fatal(into_error(class))),
        }
    }

    /// Interruptible wait: returns early the moment shutdown is requested.
    async fn idle(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }
}

fn into_error(class: FailureClass) -> ControlError {
    match class {
        FailureClass::Transient(e)
        | FailureClass::SessionLost(e)
        | FailureClass::BackendCrashed(e)
        | FailureClass::Fatal(e) => e,
    }
}

fn fatal(err: ControlError) -> ControlError {
    ControlError::Internal(format!("recovery failed: {err}"))
}
