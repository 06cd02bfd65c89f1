//! End-to-end controller scenarios over in-memory and file-backed storage.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use offkit_cache::AssetStore;
use offkit_common::{OffKitError, Result};
use offkit_queue::{QueuedSubmission, SubmissionQueue};
use offkit_worker::{
    Controller, EventOutcome, FetchOutcome, FetchRequest, FetchResponse, FetchSource,
    MessageReply, Network, Notification, NotificationSink, PageMessage, PushPayload, ResponseKind,
    SubmissionEndpoint, SubmitOutcome, SyncTrigger, WorkerConfig, WorkerEvent,
};
use serde_json::json;

// ==================== Test doubles ====================

/// Scripted network with per-URL bodies, a fetch counter, and an
/// offline switch.
struct MemoryNetwork {
    routes: Mutex<HashMap<String, Vec<u8>>>,
    fetches: AtomicUsize,
    online: AtomicBool,
}

impl MemoryNetwork {
    fn new(routes: &[(&str, &[u8])]) -> Self {
        let routes = routes
            .iter()
            .map(|(url, body)| (url.to_string(), body.to_vec()))
            .collect();
        Self {
            routes: Mutex::new(routes),
            fetches: AtomicUsize::new(0),
            online: AtomicBool::new(true),
        }
    }

    fn add_route(&self, url: &str, body: &[u8]) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_vec());
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(OffKitError::network("offline"));
        }
        match self.routes.lock().unwrap().get(&request.url) {
            Some(body) => Ok(FetchResponse {
                status: 200,
                headers: HashMap::new(),
                body: body.clone(),
                kind: ResponseKind::Basic,
            }),
            None => Err(OffKitError::network(format!("no route: {}", request.url))),
        }
    }
}

/// Endpoint that records delivery order and can be toggled to fail, with an
/// optional delay so flush passes have a real suspension point.
struct ScriptedEndpoint {
    failing: AtomicBool,
    delay_ms: u64,
    delivered: Mutex<Vec<String>>,
}

impl ScriptedEndpoint {
    fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            delay_ms: 0,
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        let endpoint = Self::new();
        endpoint.failing.store(true, Ordering::SeqCst);
        endpoint
    }

    fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn delivered_ids(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionEndpoint for ScriptedEndpoint {
    async fn deliver(&self, submission: &QueuedSubmission) -> Result<()> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(OffKitError::network("endpoint unavailable"));
        }
        self.delivered.lock().unwrap().push(submission.id.clone());
        Ok(())
    }
}

/// Sink that records displayed notifications.
struct RecordingSink {
    shown: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            shown: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn show(&self, notification: &Notification) -> Result<()> {
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ==================== Helpers ====================

const SHELL: &[u8] = b"<html>shell</html>";

fn job_board_config(version: &str) -> WorkerConfig {
    WorkerConfig {
        cache_name: "job-board".to_string(),
        version: version.to_string(),
        origin: "https://jobs.example".to_string(),
        offline_shell: "/".to_string(),
        manifest: vec![
            "/".to_string(),
            "/index.html".to_string(),
            "/style.css".to_string(),
        ],
        refresh_url: Some("/api/jobs".to_string()),
        default_click_target: "/?action=search".to_string(),
    }
}

fn job_board_network() -> MemoryNetwork {
    MemoryNetwork::new(&[
        ("/", SHELL),
        ("/index.html", b"<html>index</html>"),
        ("/style.css", b"body{}"),
        ("/api/jobs", b"[]"),
    ])
}

struct Harness {
    controller: Controller,
    network: Arc<MemoryNetwork>,
    endpoint: Arc<ScriptedEndpoint>,
    sink: Arc<RecordingSink>,
}

fn harness_with(
    config: WorkerConfig,
    store: AssetStore,
    queue: SubmissionQueue,
    network: MemoryNetwork,
    endpoint: ScriptedEndpoint,
) -> Harness {
    let network = Arc::new(network);
    let endpoint = Arc::new(endpoint);
    let sink = Arc::new(RecordingSink::new());
    let controller = Controller::new(
        config,
        store,
        queue,
        network.clone(),
        endpoint.clone(),
        sink.clone(),
    )
    .unwrap();
    Harness {
        controller,
        network,
        endpoint,
        sink,
    }
}

fn memory_harness(version: &str) -> Harness {
    harness_with(
        job_board_config(version),
        AssetStore::open_in_memory().unwrap(),
        SubmissionQueue::open_in_memory().unwrap(),
        job_board_network(),
        ScriptedEndpoint::new(),
    )
}

async fn install_and_activate(harness: &Harness) {
    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Install)
        .await
        .unwrap();
    assert!(matches!(outcome, EventOutcome::Installed { .. }));
    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Activate)
        .await
        .unwrap();
    assert!(matches!(outcome, EventOutcome::Activated { .. }));
}

fn response_of(outcome: EventOutcome) -> (FetchResponse, FetchSource) {
    match outcome {
        EventOutcome::Fetch(FetchOutcome::Response { response, source }) => (response, source),
        other => panic!("expected a fetch response, got {:?}", other),
    }
}

// ==================== Cache lifecycle & interception ====================

#[tokio::test]
async fn install_then_serve_from_cache_without_network() {
    let harness = memory_harness("1.0.0");
    install_and_activate(&harness).await;

    let after_install = harness.network.fetch_count();
    assert_eq!(after_install, 3);

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Fetch(FetchRequest::get("/style.css")))
        .await
        .unwrap();
    let (response, source) = response_of(outcome);

    assert_eq!(source, FetchSource::Cache);
    assert_eq!(response.body, b"body{}");
    // Cache-first: no network activity for a hit.
    assert_eq!(harness.network.fetch_count(), after_install);
}

#[tokio::test]
async fn cache_miss_fills_then_serves_from_cache() {
    let harness = memory_harness("1.0.0");
    harness.network.add_route("/app.js", b"console.log(1)");
    install_and_activate(&harness).await;

    let (response, source) = response_of(
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::get("/app.js")))
            .await
            .unwrap(),
    );
    assert_eq!(source, FetchSource::Network);
    assert_eq!(response.body, b"console.log(1)");

    let before = harness.network.fetch_count();
    let (response, source) = response_of(
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::get("/app.js")))
            .await
            .unwrap(),
    );
    assert_eq!(source, FetchSource::Cache);
    assert_eq!(response.body, b"console.log(1)");
    assert_eq!(harness.network.fetch_count(), before);
}

#[tokio::test]
async fn cross_origin_and_non_get_pass_through() {
    let harness = memory_harness("1.0.0");
    install_and_activate(&harness).await;
    let before = harness.network.fetch_count();

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Fetch(FetchRequest::get(
            "https://cdn.example/font.css",
        )))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Fetch(FetchOutcome::PassThrough)
    ));

    // Protocol-relative URLs resolve to a foreign host and stay untouched.
    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Fetch(FetchRequest::get(
            "//cdn.example/lib.js",
        )))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Fetch(FetchOutcome::PassThrough)
    ));

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Fetch(FetchRequest::with_method(
            "/api/jobs",
            "POST",
        )))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::Fetch(FetchOutcome::PassThrough)
    ));

    // Pass-through never touches the injected network.
    assert_eq!(harness.network.fetch_count(), before);
}

#[tokio::test]
async fn failed_navigation_serves_offline_shell() {
    let harness = memory_harness("1.0.0");
    install_and_activate(&harness).await;
    harness.network.set_online(false);

    let (response, source) = response_of(
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::navigation("/jobs/42")))
            .await
            .unwrap(),
    );
    assert_eq!(source, FetchSource::OfflineShell);
    assert_eq!(response.body, SHELL);
}

#[tokio::test]
async fn offline_shell_with_fragment_matches_stored_key() {
    // Fragments are stripped from cache keys, so a shell path carrying one
    // must still resolve to the stored entry.
    let mut config = job_board_config("1.0.0");
    config.offline_shell = "/#home".to_string();
    let harness = harness_with(
        config,
        AssetStore::open_in_memory().unwrap(),
        SubmissionQueue::open_in_memory().unwrap(),
        job_board_network(),
        ScriptedEndpoint::new(),
    );
    install_and_activate(&harness).await;
    harness.network.set_online(false);

    let (response, source) = response_of(
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::navigation("/jobs/42")))
            .await
            .unwrap(),
    );
    assert_eq!(source, FetchSource::OfflineShell);
    assert_eq!(response.body, SHELL);
}

#[tokio::test]
async fn failed_sub_resource_propagates_error() {
    let harness = memory_harness("1.0.0");
    install_and_activate(&harness).await;
    harness.network.set_online(false);

    let result = harness
        .controller
        .handle_event(WorkerEvent::Fetch(FetchRequest::get("/uncached.css")))
        .await;
    assert!(matches!(result, Err(OffKitError::Network(_))));
}

#[tokio::test]
async fn activation_is_idempotent() {
    let harness = memory_harness("1.0.0");
    install_and_activate(&harness).await;

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Activate)
        .await
        .unwrap();
    match outcome {
        EventOutcome::Activated {
            generation, purged, ..
        } => {
            assert_eq!(generation, "job-board-v1.0.0");
            assert_eq!(purged, 0);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // The asset set is still exactly the manifest.
    let (_, source) = response_of(
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::get("/index.html")))
            .await
            .unwrap(),
    );
    assert_eq!(source, FetchSource::Cache);
}

#[tokio::test]
async fn activation_claims_registered_sessions() {
    let harness = memory_harness("1.0.0");
    harness.controller.register_client("https://jobs.example/");
    assert_eq!(harness.controller.controlled_clients(), 0);

    install_and_activate(&harness).await;
    assert_eq!(harness.controller.controlled_clients(), 1);
}

#[tokio::test]
async fn failed_install_keeps_previous_generation() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("assets.db");

    {
        let harness = harness_with(
            job_board_config("1.0.0"),
            AssetStore::open(&store_path).unwrap(),
            SubmissionQueue::open_in_memory().unwrap(),
            job_board_network(),
            ScriptedEndpoint::new(),
        );
        install_and_activate(&harness).await;
    }

    // v2 manifest references an asset the network cannot produce.
    let mut config = job_board_config("2.0.0");
    config.manifest.push("/missing.js".to_string());
    let harness = harness_with(
        config,
        AssetStore::open(&store_path).unwrap(),
        SubmissionQueue::open_in_memory().unwrap(),
        job_board_network(),
        ScriptedEndpoint::new(),
    );

    let result = harness.controller.handle_event(WorkerEvent::Install).await;
    assert!(matches!(result, Err(OffKitError::Cache(_))));
    drop(harness);

    // All-or-nothing: no v2 rows were committed; v1 is intact.
    let store = AssetStore::open(&store_path).unwrap();
    assert_eq!(store.generations().unwrap(), vec!["job-board-v1.0.0"]);
    assert_eq!(store.asset_count("job-board-v1.0.0").unwrap(), 3);
}

#[tokio::test]
async fn upgrade_purges_old_generation() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("assets.db");

    {
        let harness = harness_with(
            job_board_config("1.0.0"),
            AssetStore::open(&store_path).unwrap(),
            SubmissionQueue::open_in_memory().unwrap(),
            job_board_network(),
            ScriptedEndpoint::new(),
        );
        install_and_activate(&harness).await;
        // An opportunistic fill that only exists under v1.
        harness.network.add_route("/legacy.js", b"old");
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::get("/legacy.js")))
            .await
            .unwrap();
    }

    let network = job_board_network();
    network.add_route("/app.js", b"console.log(2)");
    let harness = harness_with(
        job_board_config("2.0.0"),
        AssetStore::open(&store_path).unwrap(),
        SubmissionQueue::open_in_memory().unwrap(),
        network,
        ScriptedEndpoint::new(),
    );
    install_and_activate(&harness).await;

    // New asset is served fresh from the network, then cached.
    let (response, source) = response_of(
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::get("/app.js")))
            .await
            .unwrap(),
    );
    assert_eq!(source, FetchSource::Network);
    assert_eq!(response.body, b"console.log(2)");
    drop(harness);

    // No residual storage from v1 after activation.
    let store = AssetStore::open(&store_path).unwrap();
    assert_eq!(store.generations().unwrap(), vec!["job-board-v2.0.0"]);
    assert!(!store
        .contains("job-board-v2.0.0", "/legacy.js", "GET")
        .unwrap());
    assert!(store.contains("job-board-v2.0.0", "/app.js", "GET").unwrap());
}

// ==================== Submission queue & sync ====================

#[tokio::test]
async fn failed_submission_queues_and_later_syncs() {
    let harness = harness_with(
        job_board_config("1.0.0"),
        AssetStore::open_in_memory().unwrap(),
        SubmissionQueue::open_in_memory().unwrap(),
        job_board_network(),
        ScriptedEndpoint::failing(),
    );

    let submission = QueuedSubmission::with_id("job-123", "job", json!({"title": "Welder"}));
    let outcome = harness.controller.submit(submission).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued(_)));
    assert_eq!(harness.controller.queue_len().unwrap(), 1);

    // Endpoint still failing: item stays queued, attempt recorded.
    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Sync(SyncTrigger::Reconnect))
        .await
        .unwrap();
    match outcome {
        EventOutcome::Sync(report) => {
            assert_eq!(report.delivered, 0);
            assert_eq!(report.failed, 1);
            assert_eq!(report.remaining, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // Endpoint recovers: the next trigger drains the queue.
    harness.endpoint.set_failing(false);
    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Sync(SyncTrigger::Reconnect))
        .await
        .unwrap();
    match outcome {
        EventOutcome::Sync(report) => {
            assert_eq!(report.delivered, 1);
            assert_eq!(report.remaining, 0);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(harness.endpoint.delivered_ids(), vec!["job-123"]);
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("queue.db");

    {
        let harness = harness_with(
            job_board_config("1.0.0"),
            AssetStore::open_in_memory().unwrap(),
            SubmissionQueue::open(&queue_path).unwrap(),
            job_board_network(),
            ScriptedEndpoint::failing(),
        );
        harness
            .controller
            .enqueue(&QueuedSubmission::with_id(
                "job-123",
                "job",
                json!({"title": "Welder"}),
            ))
            .unwrap();
        harness
            .controller
            .handle_event(WorkerEvent::Sync(SyncTrigger::Requested))
            .await
            .unwrap();
    }

    // Attempt count was persisted along with the item.
    {
        let queue = SubmissionQueue::open(&queue_path).unwrap();
        let item = queue.get("job-123").unwrap().unwrap();
        assert_eq!(item.attempts, 1);
    }

    // Simulated cold start: new controller over the same queue database.
    let harness = harness_with(
        job_board_config("1.0.0"),
        AssetStore::open_in_memory().unwrap(),
        SubmissionQueue::open(&queue_path).unwrap(),
        job_board_network(),
        ScriptedEndpoint::new(),
    );
    assert_eq!(harness.controller.queue_len().unwrap(), 1);

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Sync(SyncTrigger::Reconnect))
        .await
        .unwrap();
    match outcome {
        EventOutcome::Sync(report) => assert_eq!(report.delivered, 1),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(harness.endpoint.delivered_ids(), vec!["job-123"]);
}

#[tokio::test]
async fn flush_delivers_in_fifo_order() {
    let harness = memory_harness("1.0.0");

    let mut first = QueuedSubmission::with_id("job-a", "job", json!({}));
    first.created_at = 1_000;
    let mut second = QueuedSubmission::with_id("job-b", "job", json!({}));
    second.created_at = 2_000;
    harness.controller.enqueue(&first).unwrap();
    harness.controller.enqueue(&second).unwrap();

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Sync(SyncTrigger::Requested))
        .await
        .unwrap();
    match outcome {
        EventOutcome::Sync(report) => assert_eq!(report.delivered, 2),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(harness.endpoint.delivered_ids(), vec!["job-a", "job-b"]);
}

#[tokio::test]
async fn concurrent_trigger_coalesces_into_followup_pass() {
    let harness = harness_with(
        job_board_config("1.0.0"),
        AssetStore::open_in_memory().unwrap(),
        SubmissionQueue::open_in_memory().unwrap(),
        job_board_network(),
        ScriptedEndpoint::new().with_delay(5),
    );
    harness
        .controller
        .enqueue(&QueuedSubmission::with_id("job-a", "job", json!({})))
        .unwrap();

    let (first, second) = tokio::join!(
        harness
            .controller
            .handle_event(WorkerEvent::Sync(SyncTrigger::Requested)),
        harness
            .controller
            .handle_event(WorkerEvent::Sync(SyncTrigger::Requested)),
    );

    let first = match first.unwrap() {
        EventOutcome::Sync(report) => report,
        other => panic!("unexpected outcome: {:?}", other),
    };
    let second = match second.unwrap() {
        EventOutcome::Sync(report) => report,
        other => panic!("unexpected outcome: {:?}", other),
    };

    // The second trigger folded into the running flush, which then ran one
    // extra pass instead of a concurrent one.
    assert!(second.coalesced);
    assert!(!first.coalesced);
    assert_eq!(first.passes, 2);
    assert_eq!(first.delivered, 1);
    assert_eq!(harness.endpoint.delivered_ids(), vec!["job-a"]);
}

#[tokio::test]
async fn periodic_sync_refreshes_data_cache() {
    let harness = memory_harness("1.0.0");
    install_and_activate(&harness).await;

    harness
        .controller
        .handle_event(WorkerEvent::Sync(SyncTrigger::Periodic))
        .await
        .unwrap();

    // The refreshed entry now serves from cache.
    let before = harness.network.fetch_count();
    let (response, source) = response_of(
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::get("/api/jobs")))
            .await
            .unwrap(),
    );
    assert_eq!(source, FetchSource::Cache);
    assert_eq!(response.body, b"[]");
    assert_eq!(harness.network.fetch_count(), before);
}

// ==================== Push & messaging ====================

#[tokio::test]
async fn push_payload_renders_notification() {
    let harness = memory_harness("1.0.0");

    let payload: PushPayload = serde_json::from_value(json!({
        "title": "New job posted",
        "body": "A welding position in your area",
        "url": "/?action=search"
    }))
    .unwrap();

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Push(payload))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        EventOutcome::NotificationShown { shown: true }
    ));

    let shown = harness.sink.shown.lock().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].title, "New job posted");
    assert_eq!(shown[0].target.as_deref(), Some("/?action=search"));
}

#[tokio::test]
async fn get_version_reports_live_generation() {
    let harness = memory_harness("1.0.0");
    install_and_activate(&harness).await;

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Message(PageMessage::GetVersion))
        .await
        .unwrap();
    match outcome {
        EventOutcome::Reply(Some(MessageReply::Version { version })) => {
            assert_eq!(version, "job-board-v1.0.0")
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn skip_waiting_promotes_pending_generation() {
    let harness = memory_harness("1.0.0");
    harness
        .controller
        .handle_event(WorkerEvent::Install)
        .await
        .unwrap();
    assert!(harness.controller.live_generation().is_none());

    harness
        .controller
        .handle_event(WorkerEvent::Message(PageMessage::SkipWaiting))
        .await
        .unwrap();
    assert_eq!(
        harness.controller.live_generation().as_deref(),
        Some("job-board-v1.0.0")
    );
}

#[tokio::test]
async fn cache_urls_adds_entries_independently() {
    let harness = memory_harness("1.0.0");
    harness.network.add_route("/extra.css", b".extra{}");
    install_and_activate(&harness).await;

    let outcome = harness
        .controller
        .handle_event(WorkerEvent::Message(PageMessage::CacheUrls {
            urls: vec!["/extra.css".to_string(), "/missing.css".to_string()],
        }))
        .await
        .unwrap();
    match outcome {
        EventOutcome::UrlsCached { added, failed } => {
            assert_eq!(added, 1);
            assert_eq!(failed, 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let before = harness.network.fetch_count();
    let (_, source) = response_of(
        harness
            .controller
            .handle_event(WorkerEvent::Fetch(FetchRequest::get("/extra.css")))
            .await
            .unwrap(),
    );
    assert_eq!(source, FetchSource::Cache);
    assert_eq!(harness.network.fetch_count(), before);
}
