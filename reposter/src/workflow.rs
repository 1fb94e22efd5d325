//! The per-cycle business sequence: navigate → locate → extract → dedup →
//! acquire → republish → cleanup. One invocation is one attempted cycle.

use crate::backend::{SessionId, UiBackend};
use crate::config::Config;
use crate::element::Element;
use crate::errors::ControlError;
use crate::ledger::DedupLedger;
use crate::locator::Locator;
use crate::selector::{LocatorSpec, Selector};
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Why a cycle ended without completing the full sequence. Skips are clean
/// outcomes, not failures; nothing escalates to recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NavigationFailed,
    NoContent,
    AlreadyProcessed,
    /// The content affords no acquisition (e.g. sharing is disabled).
    NoAcquireAction,
}

/// Result of one workflow invocation, consumed by the cycle driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Skipped(SkipReason),
}

/// A discovered piece of content: the located element plus the identifier
/// derived from its share link. Lives for one cycle only.
#[derive(Debug)]
pub struct ContentCandidate {
    pub element: Element,
    pub id: String,
}

/// Named locator chains for every logical element the workflow touches.
/// These strings are the volatile, app-specific part of the system; the
/// chains below match the monitored messaging UI as of this writing and are
/// plain configuration, not controller logic.
#[derive(Debug, Clone)]
pub struct UiMap {
    pub home_markers: LocatorSpec,
    pub inbox_button: LocatorSpec,
    pub conversation: LocatorSpec,
    pub message_media: LocatorSpec,
    pub share_button: LocatorSpec,
    pub copy_link_button: LocatorSpec,
    pub download_button: LocatorSpec,
    pub create_button: LocatorSpec,
    pub media_tile: LocatorSpec,
    pub next_button: LocatorSpec,
    pub share_post_button: LocatorSpec,
}

impl UiMap {
    /// Default chains for the target app, scoped to the conversation with
    /// `username`. Most-stable strategies first.
    pub fn for_conversation(username: &str) -> Self {
        Self {
            home_markers: LocatorSpec::parse(
                "home marker",
                &[
                    "//android.widget.FrameLayout[@content-desc='Home']",
                    "id:com.instagram.android:id/tab_bar",
                ],
            ),
            inbox_button: LocatorSpec::parse(
                "inbox button",
                &[
                    "//android.widget.ImageView[@content-desc='Message']",
                    "//android.widget.Button[@content-desc='Direct']",
                    "id:com.instagram.android:id/direct_tab",
                ],
            ),
            conversation: LocatorSpec::new(
                "conversation entry",
                vec![
                    Selector::XPath(format!(
                        "//android.widget.TextView[contains(@text, '{username}')]"
                    )),
                    Selector::XPath(format!(
                        "//android.view.View[contains(@content-desc, '{username}')]"
                    )),
                ],
            ),
            message_media: LocatorSpec::parse(
                "message media",
                &[
                    "id:com.instagram.android:id/message_content",
                    "//android.widget.FrameLayout[@resource-id='com.instagram.android:id/message_content']",
                ],
            ),
            share_button: LocatorSpec::parse(
                "share button",
                &["//android.widget.ImageView[@content-desc='Share']"],
            ),
            copy_link_button: LocatorSpec::parse(
                "copy link button",
                &["//android.widget.ImageView[@content-desc='Copy link']"],
            ),
            download_button: LocatorSpec::parse("download button", &["text:Download"]),
            create_button: LocatorSpec::parse(
                "create button",
                &["id:com.instagram.android:id/action_bar_buttons_container_left"],
            ),
            media_tile: LocatorSpec::parse(
                "media tile",
                &["automator:new UiSelector().className(\"android.view.ViewGroup\").instance(2)"],
            ),
            next_button: LocatorSpec::parse(
                "next button",
                &[
                    "id:com.instagram.android:id/next_button_textview",
                    "desc:Next",
                    "id:com.instagram.android:id/next_button_layout",
                ],
            ),
            share_post_button: LocatorSpec::parse("share post button", &["desc:Share"]),
        }
    }
}

/// Timing and policy knobs the workflow needs, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub app_package: String,
    pub strategy_timeout: Duration,
    pub home_attempts: u32,
    pub min_media_height: i64,
    pub wait_short: Duration,
    pub wait_medium: Duration,
    pub wait_long: Duration,
    pub login_grace: Duration,
    pub media_dir: Option<PathBuf>,
}

impl From<&Config> for WorkflowConfig {
    fn from(config: &Config) -> Self {
        Self {
            app_package: config.device.app_package.clone(),
            strategy_timeout: config.strategy_timeout(),
            home_attempts: config.home_attempts,
            min_media_height: config.min_media_height,
            wait_short: config.wait_short(),
            wait_medium: config.wait_medium(),
            wait_long: config.wait_long(),
            login_grace: Duration::from_secs(config.login_grace_secs),
            media_dir: config.media_dir.clone(),
        }
    }
}

fn derive_identifier(pattern: &Regex, reference: &str) -> Option<String> {
    pattern
        .captures(reference)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// The workflow state machine. Holds the dedup ledger; reaches the remote
/// session only through the locator resolver and the backend operations.
pub struct Workflow {
    backend: Arc<dyn UiBackend>,
    ui: UiMap,
    ledger: DedupLedger,
    cfg: WorkflowConfig,
    id_pattern: Regex,
}

impl Workflow {
    pub fn new(
        backend: Arc<dyn UiBackend>,
        ui: UiMap,
        ledger: DedupLedger,
        cfg: WorkflowConfig,
    ) -> Self {
        // Identifier is the path segment after /reel/ or /reels/ in the
        // copied share link.
        let id_pattern = Regex::new(r"/reels?/([A-Za-z0-9_-]+)").expect("static pattern");
        Self {
            backend,
            ui,
            ledger,
            cfg,
            id_pattern,
        }
    }

    fn locator(&self, session: &SessionId, spec: &LocatorSpec) -> Locator {
        Locator::new(
            self.backend.clone(),
            session.clone(),
            spec.clone(),
            self.cfg.strategy_timeout,
        )
    }

    /// One attempted cycle. Skips end the cycle cleanly; anything else
    /// unwinds to the driver for classification.
    #[instrument(skip(self, session))]
    pub async fn run_cycle(&mut self, session: &SessionId) -> Result<CycleOutcome, ControlError> {
        self.navigate_home(session).await?;

        if !self.navigate_inbox(session).await? {
            return Ok(CycleOutcome::Skipped(SkipReason::NavigationFailed));
        }

        let Some(element) = self.locate_candidate(session).await? else {
            debug!("no new content in conversation");
            return Ok(CycleOutcome::Skipped(SkipReason::NoContent));
        };

        let Some(candidate) = self.extract_identifier(session, element).await? else {
            warn!("candidate yielded no usable identifier");
            return Ok(CycleOutcome::Skipped(SkipReason::NoContent));
        };
        info!(id = %candidate.id, "discovered content candidate");

        if self.ledger.seen(&candidate.id) {
            debug!(id = %candidate.id, "already attempted, skipping");
            return Ok(CycleOutcome::Skipped(SkipReason::AlreadyProcessed));
        }
        // Recorded before acquisition: at-most-once-attempt. A permanently
        // broken item must never produce an infinite retry loop.
        self.ledger.record(&candidate.id)?;

        if !self.acquire(session).await? {
            info!(id = %candidate.id, "content affords no acquisition");
            return Ok(CycleOutcome::Skipped(SkipReason::NoAcquireAction));
        }

        self.navigate_home(session).await?;
        self.republish(session).await;
        self.cleanup();

        info!(id = %candidate.id, "cycle completed");
        Ok(CycleOutcome::Completed)
    }

    /// Step 1: return to the known baseline screen. Back-navigates up to the
    /// configured bound, then force-reactivates the target application
    /// instead of looping forever.
    pub async fn navigate_home(&self, session: &SessionId) -> Result<(), ControlError> {
        for _ in 0..self.cfg.home_attempts {
            match self.locator(session, &self.ui.home_markers).resolve().await {
                Ok(_) => return Ok(()),
                Err(ControlError::ElementNotFound(_)) | Err(ControlError::Timeout(_)) => {
                    self.backend.press_back(session).await?;
                    tokio::time::sleep(self.cfg.wait_short).await;
                }
                Err(e) => return Err(e),
            }
        }
        warn!(
            attempts = self.cfg.home_attempts,
            "home screen unreachable by back-navigation, reactivating app"
        );
        self.backend
            .activate_app(session, &self.cfg.app_package)
            .await?;
        tokio::time::sleep(self.cfg.wait_medium).await;
        Ok(())
    }

    /// Post-connect probe: the target must show its home screen before the
    /// loop starts. Grants a bounded grace period for a manual login.
    pub async fn wait_logged_in(&self, session: &SessionId) -> Result<(), ControlError> {
        match self.locator(session, &self.ui.home_markers).resolve().await {
            Ok(_) => return Ok(()),
            Err(ControlError::ElementNotFound(_)) => {
                warn!(
                    grace = ?self.cfg.login_grace,
                    "target does not look logged in, waiting for manual login"
                );
                tokio::time::sleep(self.cfg.login_grace).await;
            }
            Err(e) => return Err(e),
        }
        self.locator(session, &self.ui.home_markers)
            .resolve()
            .await
            .map(|_| ())
            .map_err(|_| {
                ControlError::ConnectError(
                    "target application is not logged in after grace period".to_string(),
                )
            })
    }

    /// Step 2: reach the content listing (inbox, then the monitored
    /// conversation). A locator miss here is a navigation skip, not a fault.
    async fn navigate_inbox(&self, session: &SessionId) -> Result<bool, ControlError> {
        for spec in [&self.ui.inbox_button, &self.ui.conversation] {
            match self.locator(session, spec).click().await {
                Ok(()) => tokio::time::sleep(self.cfg.wait_short).await,
                Err(ControlError::ElementNotFound(e)) => {
                    debug!(target_element = %spec.name, miss = %e, "navigation miss");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        tokio::time::sleep(self.cfg.wait_medium).await;
        Ok(true)
    }

    /// Step 3: find media entries in the conversation and pick exactly one.
    /// Media rows are taller than text rows; the newest entry renders last.
    async fn locate_candidate(
        &self,
        session: &SessionId,
    ) -> Result<Option<Element>, ControlError> {
        // Pull older entries into view first; a failed scroll is irrelevant.
        if let Err(e) = self
            .backend
            .swipe(session, (500, 1000), (500, 500), 500)
            .await
        {
            debug!(error = %e, "scroll-to-load failed");
        }
        tokio::time::sleep(self.cfg.wait_short).await;

        let entries = match self
            .locator(session, &self.ui.message_media)
            .resolve_all()
            .await
        {
            Ok(entries) => entries,
            Err(ControlError::ElementNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut media = Vec::new();
        for entry in entries {
            match entry.rect().await {
                Ok(rect) if rect.height >= self.cfg.min_media_height => media.push(entry),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "skipping unmeasurable entry"),
            }
        }
        debug!(count = media.len(), "media entries after height filter");
        Ok(media.pop())
    }

    /// Step 4: open the candidate, copy its share link and derive the
    /// identifier. Extraction failure falls back to the raw reference string
    /// rather than aborting the cycle; a blank reference yields no candidate
    /// at all, since an empty identifier cannot be deduplicated meaningfully.
    async fn extract_identifier(
        &self,
        session: &SessionId,
        element: Element,
    ) -> Result<Option<ContentCandidate>, ControlError> {
        element.click().await?;
        tokio::time::sleep(self.cfg.wait_short).await;
        self.locator(session, &self.ui.share_button).click().await?;
        tokio::time::sleep(self.cfg.wait_short).await;
        self.locator(session, &self.ui.copy_link_button)
            .click()
            .await?;
        tokio::time::sleep(self.cfg.wait_short).await;

        let reference = self.backend.clipboard_text(session).await?;
        let id = match derive_identifier(&self.id_pattern, &reference) {
            Some(id) => id,
            None => {
                let raw = reference.trim();
                if raw.is_empty() {
                    return Ok(None);
                }
                warn!(%reference, "no identifier in reference, using raw string");
                raw.to_string()
            }
        };
        Ok(Some(ContentCandidate { element, id }))
    }

    /// Step 7: save the content locally. A missing download affordance means
    /// the item cannot be acquired at all, which is a skip.
    async fn acquire(&self, session: &SessionId) -> Result<bool, ControlError> {
        match self
            .locator(session, &self.ui.download_button)
            .click()
            .await
        {
            Ok(()) => {
                tokio::time::sleep(self.cfg.wait_medium).await;
                Ok(true)
            }
            Err(ControlError::ElementNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Step 8: create a new post from the saved media. Failures are logged
    /// and swallowed (the item is already recorded as attempted); the cycle
    /// returns to baseline regardless of outcome.
    async fn republish(&self, session: &SessionId) {
        if let Err(e) = self.try_republish(session).await {
            warn!(error = %e, "republish failed, item stays recorded");
        }
        if let Err(e) = self.navigate_home(session).await {
            warn!(error = %e, "could not return to baseline after republish");
        }
    }

    async fn try_republish(&self, session: &SessionId) -> Result<(), ControlError> {
        self.locator(session, &self.ui.create_button).click().await?;
        tokio::time::sleep(self.cfg.wait_medium).await;
        self.locator(session, &self.ui.media_tile).click().await?;
        tokio::time::sleep(self.cfg.wait_medium).await;
        self.locator(session, &self.ui.next_button).click().await?;
        tokio::time::sleep(self.cfg.wait_long).await;
        self.locator(session, &self.ui.next_button).click().await?;
        tokio::time::sleep(self.cfg.wait_medium).await;
        self.locator(session, &self.ui.share_post_button)
            .click()
            .await?;
        tokio::time::sleep(self.cfg.wait_long).await;
        Ok(())
    }

    /// Step 9: sweep locally cached media so storage does not grow
    /// unbounded. Never propagates.
    fn cleanup(&self) {
        let Some(dir) = &self.cfg.media_dir else {
            return;
        };
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "media dir not readable");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!(file = %path.display(), "removed cached media"),
                    Err(e) => debug!(file = %path.display(), error = %e, "cleanup failed"),
                }
            }
        }
    }
}
