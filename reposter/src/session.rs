//! Ownership of the one live backend session and, when this instance
//! launched it, the backend process itself.

use crate::backend::{SessionId, UiBackend};
use crate::config::DeviceCaps;
use crate::errors::ControlError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Healthy,
    Degraded,
}

/// One live binding to the remote backend and one remote target process.
/// Created on successful connect, discarded on any reconnect or shutdown.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub created_at: Instant,
    pub last_healthy: Instant,
}

/// Launches and owns the backend server process.
///
/// Ownership is not exclusive: if a backend was already running externally,
/// stopping it is best-effort via the configured kill pattern.
pub struct BackendLauncher {
    command: Vec<String>,
    kill_pattern: Option<String>,
    ready_timeout: Duration,
    child: Option<Child>,
}

impl BackendLauncher {
    pub fn new(
        command: Vec<String>,
        kill_pattern: Option<String>,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            command,
            kill_pattern,
            ready_timeout,
            child: None,
        }
    }

    /// Best-effort removal of a stale backend already bound to the port.
    async fn stop_stale(&self) {
        if let Some(pattern) = &self.kill_pattern {
            debug!(pattern, "killing stale backend processes");
            let _ = Command::new("pkill")
                .arg("-f")
                .arg(pattern)
                .status()
                .await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    #[instrument(skip(self))]
    pub async fn launch(&mut self) -> Result<(), ControlError> {
        self.stop().await;
        self.stop_stale().await;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| ControlError::Internal("empty backend launch command".to_string()))?;
        info!(%program, "launching backend process");
        let child = Command::new(program)
            .args(args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ControlError::ConnectError(format!("failed to launch backend: {e}")))?;
        self.child = Some(child);
        Ok(())
    }

    /// Terminate the owned backend process, waiting for death with a bounded
    /// grace period before escalating to a forced kill.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!("stopping backend process");
        let _ = child.start_kill();
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(_) => debug!("backend process exited"),
            Err(_) => {
                warn!("backend did not exit within grace period, forcing kill");
                let _ = child.kill().await;
            }
        }
    }

    /// Whether this launcher still owns a (possibly running) child.
    pub fn owns_process(&self) -> bool {
        self.child.is_some()
    }

    /// Poll the control endpoint until it accepts connections or the ready
    /// deadline passes.
    pub async fn wait_ready(&self, backend: &dyn UiBackend) -> Result<(), ControlError> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if backend.status().await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ControlError::ConnectError(format!(
                    "backend did not become ready within {:?}",
                    self.ready_timeout
                )));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

/// Lifecycle owner of the remote-control session.
///
/// `Disconnected → Connecting → Healthy → Degraded → Disconnected`; the
/// workflow and recovery layers reach the transport only through the four
/// operations here and never hold the session directly.
pub struct SessionManager {
    backend: Arc<dyn UiBackend>,
    caps: DeviceCaps,
    launcher: Option<BackendLauncher>,
    session: Option<Session>,
    state: SessionState,
}

impl SessionManager {
    pub fn new(
        backend: Arc<dyn UiBackend>,
        caps: DeviceCaps,
        launcher: Option<BackendLauncher>,
    ) -> Self {
        Self {
            backend,
            caps,
            launcher,
            session: None,
            state: SessionState::Disconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the live session, if any. At most one exists at a time.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.id)
    }

    /// Establish a new session against a confirmed-running backend and bring
    /// the target application to the foreground.
    #[instrument(skip(self))]
    pub async fn connect(&mut self) -> Result<(), ControlError> {
        self.discard_session().await;
        self.state = SessionState::Connecting;

        if !self.backend.status().await? {
            self.state = SessionState::Disconnected;
            return Err(ControlError::ConnectError(
                "backend control endpoint is not ready".to_string(),
            ));
        }

        let id = match self.backend.create_session(&self.caps).await {
            Ok(id) => id,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };
        // The target may have been backgrounded since the last run.
        if let Err(e) = self.backend.activate_app(&id, &self.caps.app_package).await {
            warn!(error = %e, "could not force-activate target application");
        }

        let now = Instant::now();
        self.session = Some(Session {
            id,
            created_at: now,
            last_healthy: now,
        });
        self.state = SessionState::Healthy;
        info!("session established");
        Ok(())
    }

    /// Lightweight liveness probe. `Ok(false)` means "not healthy" without
    /// an error; a transport failure marks the session degraded and is
    /// returned for classification.
    pub async fn health_check(&mut self) -> Result<bool, ControlError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };
        match self.backend.current_activity(&session.id).await {
            Ok(activity) => {
                session.last_healthy = Instant::now();
                let healthy = !activity.is_empty();
                if !healthy {
                    self.state = SessionState::Degraded;
                }
                Ok(healthy)
            }
            Err(e) => {
                self.state = SessionState::Degraded;
                Err(e)
            }
        }
    }

    /// Tear down the current session (ignoring close errors) and connect
    /// again. Safe to call from `Healthy` or `Degraded`.
    #[instrument(skip(self))]
    pub async fn reconnect(&mut self) -> Result<(), ControlError> {
        info!("reconnecting session");
        self.discard_session().await;
        self.connect().await
    }

    /// The most expensive recovery path: kill and relaunch the backend
    /// process, wait for it to accept connections, then connect. Reserved
    /// for failures a reconnect cannot fix.
    #[instrument(skip(self))]
    pub async fn restart_backend(&mut self) -> Result<(), ControlError> {
        warn!("restarting backend");
        self.discard_session().await;
        self.state = SessionState::Disconnected;

        match self.launcher.as_mut() {
            Some(launcher) => {
                launcher.launch().await?;
                launcher.wait_ready(self.backend.as_ref()).await?;
            }
            None => {
                // Externally managed backend: we cannot relaunch it, only
                // wait for its supervisor to bring it back.
                let deadline = Instant::now() + Duration::from_secs(60);
                while !self.backend.status().await? {
                    if Instant::now() >= deadline {
                        return Err(ControlError::ConnectError(
                            "externally managed backend did not come back".to_string(),
                        ));
                    }
                    tokio::time::sleep(READY_POLL_INTERVAL).await;
                }
            }
        }
        self.connect().await
    }

    /// Launch the backend if this instance manages it, then connect.
    pub async fn start(&mut self) -> Result<(), ControlError> {
        if let Some(launcher) = self.launcher.as_mut() {
            launcher.launch().await?;
            launcher.wait_ready(self.backend.as_ref()).await?;
        }
        self.connect().await
    }

    /// Close the session and terminate any backend process this instance
    /// launched. Always succeeds; runs on every shutdown path.
    pub async fn shutdown(&mut self) {
        self.discard_session().await;
        if let Some(launcher) = self.launcher.as_mut() {
            launcher.stop().await;
        }
        self.state = SessionState::Disconnected;
        info!("session manager shut down");
    }

    async fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!(age = ?session.created_at.elapsed(), "discarding session");
            if let Err(e) = self.backend.delete_session(&session.id).await {
                debug!(error = %e, "ignoring session close failure");
            }
        }
    }
}
