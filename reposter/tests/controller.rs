//! End-to-end controller scenarios against a scripted in-memory backend.

use async_trait::async_trait;
use reposter::{
    ControlError, CycleDriver, CycleOutcome, DedupLedger, DeviceCaps, ElementRef, Locator,
    LocatorSpec, Rect, RecoveryPolicy, Selector, SessionId, SessionManager, SessionState,
    SkipReason, UiBackend, UiMap, Workflow, WorkflowConfig,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    /// selector value -> element ids currently "on screen"
    elements: HashMap<String, Vec<String>>,
    /// element id -> bounds (defaults to a tall media rect)
    rects: HashMap<String, Rect>,
    /// selector value -> injected transport failure message
    fail_find: HashMap<String, String>,
    clipboard: String,
    fail_activity: bool,
    calls: Vec<String>,
    find_counts: HashMap<String, usize>,
    /// next N session-creation attempts fail with a connect error
    fail_next_creates: usize,
    create_attempts: usize,
    sessions_created: usize,
    sessions_deleted: usize,
    activations: usize,
    back_presses: usize,
}

#[derive(Default)]
struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    fn put_elements(&self, selector_value: &str, ids: &[&str]) {
        self.state.lock().unwrap().elements.insert(
            selector_value.to_string(),
            ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    fn put_rect(&self, element_id: &str, height: i64) {
        self.state.lock().unwrap().rects.insert(
            element_id.to_string(),
            Rect {
                x: 0,
                y: 0,
                width: 1080,
                height,
            },
        );
    }

    fn fail_find_with_transport(&self, selector_value: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_find
            .insert(selector_value.to_string(), message.to_string());
    }

    fn set_clipboard(&self, text: &str) {
        self.state.lock().unwrap().clipboard = text.to_string();
    }

    fn set_fail_activity(&self, fail: bool) {
        self.state.lock().unwrap().fail_activity = fail;
    }

    fn find_count(&self, selector_value: &str) -> usize {
        *self
            .state
            .lock()
            .unwrap()
            .find_counts
            .get(selector_value)
            .unwrap_or(&0)
    }

    fn clicked(&self, element_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .calls
            .contains(&format!("click:{element_id}"))
    }

    fn fail_next_creates(&self, count: usize) {
        self.state.lock().unwrap().fail_next_creates = count;
    }

    fn create_attempts(&self) -> usize {
        self.state.lock().unwrap().create_attempts
    }

    fn sessions_created(&self) -> usize {
        self.state.lock().unwrap().sessions_created
    }

    fn sessions_deleted(&self) -> usize {
        self.state.lock().unwrap().sessions_deleted
    }

    fn activations(&self) -> usize {
        self.state.lock().unwrap().activations
    }

    fn back_presses(&self) -> usize {
        self.state.lock().unwrap().back_presses
    }
}

#[async_trait]
impl UiBackend for MockBackend {
    async fn status(&self) -> Result<bool, ControlError> {
        Ok(true)
    }

    async fn create_session(&self, _caps: &DeviceCaps) -> Result<SessionId, ControlError> {
        let mut state = self.state.lock().unwrap();
        state.create_attempts += 1;
        if state.fail_next_creates > 0 {
            state.fail_next_creates -= 1;
            return Err(ControlError::ConnectError(
                "session not created: device unavailable".to_string(),
            ));
        }
        state.sessions_created += 1;
        Ok(format!("session-{}", state.sessions_created))
    }

    async fn delete_session(&self, _session: &SessionId) -> Result<(), ControlError> {
        self.state.lock().unwrap().sessions_deleted += 1;
        Ok(())
    }

    async fn find_elements(
        &self,
        _session: &SessionId,
        selector: &Selector,
    ) -> Result<Vec<ElementRef>, ControlError> {
        let mut state = self.state.lock().unwrap();
        let value = selector.value().to_string();
        *state.find_counts.entry(value.clone()).or_insert(0) += 1;
        state.calls.push(format!("find:{value}"));
        if let Some(message) = state.fail_find.get(&value) {
            return Err(ControlError::Transport(message.clone()));
        }
        Ok(state
            .elements
            .get(&value)
            .map(|ids| ids.iter().map(|id| ElementRef(id.clone())).collect())
            .unwrap_or_default())
    }

    async fn click(&self, _session: &SessionId, element: &ElementRef) -> Result<(), ControlError> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(format!("click:{}", element.0));
        Ok(())
    }

    async fn element_rect(
        &self,
        _session: &SessionId,
        element: &ElementRef,
    ) -> Result<Rect, ControlError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rects
            .get(&element.0)
            .copied()
            .unwrap_or(Rect {
                x: 0,
                y: 0,
                width: 1080,
                height: 800,
            }))
    }

    async fn press_back(&self, _session: &SessionId) -> Result<(), ControlError> {
        self.state.lock().unwrap().back_presses += 1;
        Ok(())
    }

    async fn swipe(
        &self,
        _session: &SessionId,
        _from: (i64, i64),
        _to: (i64, i64),
        _duration_ms: u64,
    ) -> Result<(), ControlError> {
        Ok(())
    }

    async fn clipboard_text(&self, _session: &SessionId) -> Result<String, ControlError> {
        Ok(self.state.lock().unwrap().clipboard.clone())
    }

    async fn activate_app(
        &self,
        _session: &SessionId,
        _package: &str,
    ) -> Result<(), ControlError> {
        let mut state = self.state.lock().unwrap();
        state.activations += 1;
        state.calls.push("activate_app".to_string());
        Ok(())
    }

    async fn current_activity(&self, _session: &SessionId) -> Result<String, ControlError> {
        let state = self.state.lock().unwrap();
        if state.fail_activity {
            return Err(ControlError::Transport(
                "connection reset by peer".to_string(),
            ));
        }
        Ok("MainActivity".to_string())
    }
}

fn test_workflow_config() -> WorkflowConfig {
    WorkflowConfig {
        app_package: "com.example.app".to_string(),
        strategy_timeout: Duration::from_secs(2),
        home_attempts: 3,
        min_media_height: 500,
        wait_short: Duration::ZERO,
        wait_medium: Duration::ZERO,
        wait_long: Duration::ZERO,
        login_grace: Duration::ZERO,
        media_dir: None,
    }
}

fn ledger_at(dir: &tempfile::TempDir) -> (DedupLedger, PathBuf) {
    let path = dir.path().join("ledger.txt");
    (DedupLedger::open(&path).unwrap(), path)
}

/// Populate every screen of a full happy-path cycle.
fn script_full_cycle(backend: &MockBackend, ui: &UiMap) {
    backend.put_elements(ui.home_markers.candidates[0].value(), &["el-home"]);
    backend.put_elements(ui.inbox_button.candidates[0].value(), &["el-inbox"]);
    backend.put_elements(ui.conversation.candidates[0].value(), &["el-convo"]);
    backend.put_elements(ui.message_media.candidates[0].value(), &["el-media-1"]);
    backend.put_rect("el-media-1", 900);
    backend.put_elements(ui.share_button.candidates[0].value(), &["el-share"]);
    backend.put_elements(ui.copy_link_button.candidates[0].value(), &["el-copy"]);
    backend.put_elements(ui.download_button.candidates[0].value(), &["el-download"]);
    backend.put_elements(ui.create_button.candidates[0].value(), &["el-create"]);
    backend.put_elements(ui.media_tile.candidates[0].value(), &["el-tile"]);
    backend.put_elements(ui.next_button.candidates[0].value(), &["el-next"]);
    backend.put_elements(ui.share_post_button.candidates[0].value(), &["el-post"]);
    backend.set_clipboard("https://www.instagram.com/reel/abc123/?igsh=MWptNA==");
}

#[tokio::test]
async fn locator_tries_strategies_in_declared_order() {
    let backend = Arc::new(MockBackend::default());
    backend.put_elements("B", &["b-1"]);
    let spec = LocatorSpec::new(
        "thing",
        vec![Selector::Id("A".to_string()), Selector::Id("B".to_string())],
    );
    let locator = Locator::new(
        backend.clone(),
        "s".to_string(),
        spec,
        Duration::from_secs(2),
    );

    let element = locator.resolve().await.unwrap();
    assert_eq!(element.id(), "b-1");
    // A failed once and was not retried; B short-circuited the rest.
    assert_eq!(backend.find_count("A"), 1);
    assert_eq!(backend.find_count("B"), 1);
}

#[tokio::test]
async fn locator_exhaustion_names_every_strategy() {
    let backend = Arc::new(MockBackend::default());
    let spec = LocatorSpec::new(
        "missing thing",
        vec![Selector::Id("A".to_string()), Selector::Id("B".to_string())],
    );
    let locator = Locator::new(
        backend.clone(),
        "s".to_string(),
        spec,
        Duration::from_secs(2),
    );

    let err = locator.resolve().await.unwrap_err();
    match err {
        ControlError::ElementNotFound(message) => {
            assert!(message.contains("missing thing"));
            assert!(message.contains("id:\"A\""));
            assert!(message.contains("id:\"B\""));
        }
        other => panic!("expected ElementNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn list_disambiguation_picks_the_newest_entry() {
    let backend = Arc::new(MockBackend::default());
    backend.put_elements("media", &["m-1", "m-2", "m-3"]);
    let spec = LocatorSpec::new("media", vec![Selector::Id("media".to_string())]);
    let locator = Locator::new(
        backend.clone(),
        "s".to_string(),
        spec,
        Duration::from_secs(2),
    );

    // Content lists render newest-last.
    let element = locator.resolve_newest().await.unwrap();
    assert_eq!(element.id(), "m-3");
}

#[tokio::test]
async fn completed_cycle_records_acquires_and_republishes() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");
    script_full_cycle(&backend, &ui);

    let dir = tempfile::tempdir().unwrap();
    let (ledger, ledger_path) = ledger_at(&dir);
    let mut workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());

    let outcome = workflow.run_cycle(&"s".to_string()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Completed);

    // Durable across a fresh ledger instance over the same storage.
    let reopened = DedupLedger::open(&ledger_path).unwrap();
    assert!(reopened.seen("abc123"));

    assert!(backend.clicked("el-media-1"));
    assert!(backend.clicked("el-download"));
    assert!(backend.clicked("el-post"));
}

#[tokio::test]
async fn already_processed_candidate_skips_without_interactions() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");
    script_full_cycle(&backend, &ui);

    let dir = tempfile::tempdir().unwrap();
    let (mut ledger, _path) = ledger_at(&dir);
    ledger.record("abc123").unwrap();
    let mut workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());

    let outcome = workflow.run_cycle(&"s".to_string()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::AlreadyProcessed));

    // No acquire or republish interaction happened for the known item.
    assert!(!backend.clicked("el-download"));
    assert!(!backend.clicked("el-create"));
    assert!(!backend.clicked("el-post"));
}

#[tokio::test]
async fn missing_acquire_affordance_skips_but_stays_recorded() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");
    script_full_cycle(&backend, &ui);
    // Sharing disabled: no download affordance anywhere.
    backend.put_elements(ui.download_button.candidates[0].value(), &[]);

    let dir = tempfile::tempdir().unwrap();
    let (ledger, ledger_path) = ledger_at(&dir);
    let mut workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());

    let outcome = workflow.run_cycle(&"s".to_string()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::NoAcquireAction));

    // At-most-once-attempt: the item is never retried.
    let reopened = DedupLedger::open(&ledger_path).unwrap();
    assert!(reopened.seen("abc123"));
    assert!(!backend.clicked("el-create"));
}

#[tokio::test]
async fn home_bound_exceeded_forces_one_reactivation() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");
    // No home marker and no inbox: the cycle ends in a navigation skip.

    let dir = tempfile::tempdir().unwrap();
    let (ledger, _path) = ledger_at(&dir);
    let mut workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());

    let outcome = workflow.run_cycle(&"s".to_string()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::NavigationFailed));

    assert_eq!(backend.back_presses(), 3);
    assert_eq!(backend.activations(), 1);
}

#[tokio::test]
async fn raw_transport_failure_propagates_out_of_the_cycle() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");
    script_full_cycle(&backend, &ui);
    backend.fail_find_with_transport(
        ui.share_button.candidates[0].value(),
        "connection reset by peer",
    );

    let dir = tempfile::tempdir().unwrap();
    let (ledger, _path) = ledger_at(&dir);
    let mut workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());

    let err = workflow.run_cycle(&"s".to_string()).await.unwrap_err();
    assert!(matches!(err, ControlError::Transport(_)));
}

#[tokio::test]
async fn health_transport_error_reconnects_exactly_once() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");
    script_full_cycle(&backend, &ui);

    let mut sessions = SessionManager::new(backend.clone(), DeviceCaps::default(), None);
    sessions.connect().await.unwrap();
    assert_eq!(sessions.state(), SessionState::Healthy);
    assert_eq!(backend.sessions_created(), 1);

    backend.set_fail_activity(true);
    let err = sessions.health_check().await.unwrap_err();
    assert_eq!(sessions.state(), SessionState::Degraded);
    backend.set_fail_activity(false);

    let dir = tempfile::tempdir().unwrap();
    let (ledger, _path) = ledger_at(&dir);
    let workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());
    let mut driver = CycleDriver::new(
        sessions,
        workflow,
        RecoveryPolicy::new(Duration::ZERO, Duration::ZERO),
        Duration::ZERO,
    );

    driver.recover(err).await.unwrap();
    // Old session torn down once, exactly one fresh connect.
    assert_eq!(backend.sessions_deleted(), 1);
    assert_eq!(backend.sessions_created(), 2);
}

#[tokio::test]
async fn blank_reference_yields_no_candidate_and_records_nothing() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");
    script_full_cycle(&backend, &ui);
    // Copy-link produced nothing useful; there is no identifier to dedup on.
    backend.set_clipboard("   ");

    let dir = tempfile::tempdir().unwrap();
    let (ledger, ledger_path) = ledger_at(&dir);
    let mut workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());

    let outcome = workflow.run_cycle(&"s".to_string()).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::NoContent));

    let reopened = DedupLedger::open(&ledger_path).unwrap();
    assert!(reopened.is_empty());
    assert!(!backend.clicked("el-download"));
}

#[tokio::test]
async fn republish_failure_is_swallowed_and_baseline_restored() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");
    script_full_cycle(&backend, &ui);
    // The final share-post affordance vanished mid-flow.
    backend.put_elements(ui.share_post_button.candidates[0].value(), &[]);
    let home_marker = ui.home_markers.candidates[0].value().to_string();

    let dir = tempfile::tempdir().unwrap();
    let (ledger, ledger_path) = ledger_at(&dir);
    let mut workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());

    let outcome = workflow.run_cycle(&"s".to_string()).await.unwrap();
    // The item stays recorded and the cycle still completes.
    assert_eq!(outcome, CycleOutcome::Completed);
    let reopened = DedupLedger::open(&ledger_path).unwrap();
    assert!(reopened.seen("abc123"));

    assert!(backend.clicked("el-next"));
    assert!(!backend.clicked("el-post"));
    // Baseline probes: cycle start, after acquire, and again after the
    // failed republish.
    assert_eq!(backend.find_count(&home_marker), 3);
}

#[tokio::test]
async fn failed_reconnect_escalates_to_backend_restart() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");

    let mut sessions = SessionManager::new(backend.clone(), DeviceCaps::default(), None);
    sessions.connect().await.unwrap();
    // The next session-creation attempt (the reconnect) fails; the one
    // after (post-restart connect) succeeds.
    backend.fail_next_creates(1);

    let dir = tempfile::tempdir().unwrap();
    let (ledger, _path) = ledger_at(&dir);
    let workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());
    let mut driver = CycleDriver::new(
        sessions,
        workflow,
        RecoveryPolicy::new(Duration::ZERO, Duration::ZERO),
        Duration::ZERO,
    );

    driver
        .recover(ControlError::Transport("connection reset by peer".to_string()))
        .await
        .unwrap();

    // Initial connect, failed reconnect, successful post-restart connect.
    assert_eq!(backend.create_attempts(), 3);
    assert_eq!(backend.sessions_created(), 2);
    assert_eq!(backend.sessions_deleted(), 1);
}

#[tokio::test]
async fn failed_backend_restart_is_fatal() {
    let backend = Arc::new(MockBackend::default());
    let ui = UiMap::for_conversation("creator");

    let mut sessions = SessionManager::new(backend.clone(), DeviceCaps::default(), None);
    sessions.connect().await.unwrap();
    // Every further session-creation attempt fails: reconnect and the
    // escalated restart both come up empty.
    backend.fail_next_creates(10);

    let dir = tempfile::tempdir().unwrap();
    let (ledger, _path) = ledger_at(&dir);
    let workflow = Workflow::new(backend.clone(), ui, ledger, test_workflow_config());
    let mut driver = CycleDriver::new(
        sessions,
        workflow,
        RecoveryPolicy::new(Duration::ZERO, Duration::ZERO),
        Duration::ZERO,
    );

    let err = driver
        .recover(ControlError::Transport("connection reset by peer".to_string()))
        .await
        .unwrap_err();
    match err {
        ControlError::Internal(message) => assert!(message.contains("recovery failed")),
        other => panic!("expected fatal recovery error, got {other:?}"),
    }
}

#[tokio::test]
async fn session_manager_keeps_at_most_one_live_session() {
    let backend = Arc::new(MockBackend::default());
    let mut sessions = SessionManager::new(backend.clone(), DeviceCaps::default(), None);

    sessions.connect().await.unwrap();
    let first = sessions.session_id().cloned().unwrap();
    sessions.reconnect().await.unwrap();
    let second = sessions.session_id().cloned().unwrap();

    assert_ne!(first, second);
    assert_eq!(backend.sessions_created(), 2);
    assert_eq!(backend.sessions_deleted(), 1);

    sessions.shutdown().await;
    assert_eq!(sessions.state(), SessionState::Disconnected);
    assert!(sessions.session_id().is_none());
    assert_eq!(backend.sessions_deleted(), 2);
}
