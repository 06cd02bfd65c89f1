//! OffKit smoke harness.
//!
//! Drives the controller through scripted end-to-end scenarios against
//! in-memory doubles and temp-file storage: offline serving, a version
//! upgrade, queue recovery across a restart, and the notification path.
//! Prints a JSON summary and exits non-zero on any scenario failure.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::HashMap;
use offkit_cache::AssetStore;
use offkit_common::{init_logging, LogConfig, OffKitError, Result};
use offkit_queue::{QueuedSubmission, SubmissionQueue};
use offkit_worker::{
    Controller, EventOutcome, FetchOutcome, FetchRequest, FetchResponse, FetchSource,
    MessageReply, Network, Notification, NotificationAction, NotificationClick, NotificationSink,
    PageMessage, PushPayload, SubmissionEndpoint, SubmitOutcome, SyncTrigger, WorkerConfig,
    WorkerEvent,
};
use serde_json::json;
use tracing::{error, info};

/// Scripted network with an offline switch.
struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Vec<u8>>>,
    online: AtomicBool,
    fetches: AtomicUsize,
}

impl ScriptedNetwork {
    fn new(routes: &[(&str, &[u8])]) -> Self {
        let routes = routes
            .iter()
            .map(|(url, body)| (url.to_string(), body.to_vec()))
            .collect();
        Self {
            routes: Mutex::new(routes),
            online: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
        }
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(OffKitError::network("offline"));
        }
        match self.routes.lock().unwrap().get(&request.url) {
            Some(body) => Ok(FetchResponse::ok(body.clone())),
            None => Err(OffKitError::network(format!("no route: {}", request.url))),
        }
    }
}

/// Endpoint that can be toggled between failing and delivering.
struct ToggleEndpoint {
    failing: AtomicBool,
    delivered: Mutex<Vec<String>>,
}

impl ToggleEndpoint {
    fn new(failing: bool) -> Self {
        Self {
            failing: AtomicBool::new(failing),
            delivered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SubmissionEndpoint for ToggleEndpoint {
    async fn deliver(&self, submission: &QueuedSubmission) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(OffKitError::network("endpoint unavailable"));
        }
        self.delivered.lock().unwrap().push(submission.id.clone());
        Ok(())
    }
}

struct RecordingSink {
    shown: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn show(&self, notification: &Notification) -> Result<()> {
        self.shown.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

const SHELL: &[u8] = b"<html>offline shell</html>";

fn demo_config(version: &str) -> WorkerConfig {
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

fn demo_network() -> Arc<ScriptedNetwork> {
    Arc::new(ScriptedNetwork::new(&[
        ("/", SHELL),
        ("/index.html", b"<html>index</html>"),
        ("/style.css", b"body{}"),
        ("/api/jobs", b"[]"),
    ]))
}

fn expect(condition: bool, what: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(OffKitError::sync(format!("check failed: {}", what)))
    }
}

fn build(
    config: WorkerConfig,
    store: AssetStore,
    queue: SubmissionQueue,
    network: Arc<ScriptedNetwork>,
    endpoint: Arc<ToggleEndpoint>,
    sink: Arc<RecordingSink>,
) -> Result<Controller> {
    Controller::new(config, store, queue, network, endpoint, sink)
}

// ==================== Scenarios ====================

/// Install, activate, then serve cached assets and the offline shell with
/// the network down.
async fn scenario_offline_serving() -> Result<()> {
    let network = demo_network();
    let controller = build(
        demo_config("1.0.0"),
        AssetStore::open_in_memory()?,
        SubmissionQueue::open_in_memory()?,
        network.clone(),
        Arc::new(ToggleEndpoint::new(false)),
        Arc::new(RecordingSink {
            shown: Mutex::new(Vec::new()),
        }),
    )?;

    controller.handle_event(WorkerEvent::Install).await?;
    controller.handle_event(WorkerEvent::Activate).await?;
    network.set_online(false);
    let baseline = network.fetch_count();

    let outcome = controller
        .handle_event(WorkerEvent::Fetch(FetchRequest::get("/style.css")))
        .await?;
    match outcome {
        EventOutcome::Fetch(FetchOutcome::Response { response, source }) => {
            expect(source == FetchSource::Cache, "stylesheet served from cache")?;
            expect(response.body == b"body{}", "stylesheet body intact")?;
        }
        _ => return Err(OffKitError::sync("stylesheet fetch produced no response")),
    }

    let outcome = controller
        .handle_event(WorkerEvent::Fetch(FetchRequest::navigation("/jobs/42")))
        .await?;
    match outcome {
        EventOutcome::Fetch(FetchOutcome::Response { response, source }) => {
            expect(
                source == FetchSource::OfflineShell,
                "navigation fell back to shell",
            )?;
            expect(response.body == SHELL, "shell body intact")?;
        }
        _ => return Err(OffKitError::sync("navigation produced no response")),
    }

    expect(
        network.fetch_count() == baseline + 1,
        "only the failed navigation touched the network",
    )?;

    let outcome = controller
        .handle_event(WorkerEvent::Message(PageMessage::GetVersion))
        .await?;
    match outcome {
        EventOutcome::Reply(Some(MessageReply::Version { version })) => {
            expect(version == "job-board-v1.0.0", "version reply")?;
        }
        _ => return Err(OffKitError::sync("missing version reply")),
    }
    Ok(())
}

/// Upgrade from v1 to v2 over the same store file; the old generation is
/// purged at activation.
async fn scenario_upgrade() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store_path = dir.path().join("assets.db");

    {
        let controller = build(
            demo_config("1.0.0"),
            AssetStore::open(&store_path)?,
            SubmissionQueue::open_in_memory()?,
            demo_network(),
            Arc::new(ToggleEndpoint::new(false)),
            Arc::new(RecordingSink {
                shown: Mutex::new(Vec::new()),
            }),
        )?;
        controller.handle_event(WorkerEvent::Install).await?;
        controller.handle_event(WorkerEvent::Activate).await?;
    }

    let controller = build(
        demo_config("2.0.0"),
        AssetStore::open(&store_path)?,
        SubmissionQueue::open_in_memory()?,
        demo_network(),
        Arc::new(ToggleEndpoint::new(false)),
        Arc::new(RecordingSink {
            shown: Mutex::new(Vec::new()),
        }),
    )?;
    controller.handle_event(WorkerEvent::Install).await?;
    controller.handle_event(WorkerEvent::Activate).await?;
    expect(
        controller.live_generation().as_deref() == Some("job-board-v2.0.0"),
        "v2 live after activation",
    )?;
    drop(controller);

    let store = AssetStore::open(&store_path)?;
    expect(
        store.generations()? == vec!["job-board-v2.0.0".to_string()],
        "v1 purged from storage",
    )?;
    Ok(())
}

/// A failed submission survives a restart and syncs once the endpoint
/// recovers.
async fn scenario_queue_recovery() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let queue_path = dir.path().join("queue.db");

    {
        let endpoint = Arc::new(ToggleEndpoint::new(true));
        let controller = build(
            demo_config("1.0.0"),
            AssetStore::open_in_memory()?,
            SubmissionQueue::open(&queue_path)?,
            demo_network(),
            endpoint,
            Arc::new(RecordingSink {
                shown: Mutex::new(Vec::new()),
            }),
        )?;

        let submission = QueuedSubmission::with_id("job-123", "job", json!({"title": "Welder"}));
        let outcome = controller.submit(submission).await?;
        expect(
            matches!(outcome, SubmitOutcome::Queued(_)),
            "failed delivery queued",
        )?;

        let outcome = controller
            .handle_event(WorkerEvent::Sync(SyncTrigger::Requested))
            .await?;
        match outcome {
            EventOutcome::Sync(report) => {
                expect(report.failed == 1 && report.remaining == 1, "sync kept item")?
            }
            _ => return Err(OffKitError::sync("sync produced no report")),
        }
    }

    // Cold start over the same queue database, endpoint now healthy.
    let endpoint = Arc::new(ToggleEndpoint::new(false));
    let controller = build(
        demo_config("1.0.0"),
        AssetStore::open_in_memory()?,
        SubmissionQueue::open(&queue_path)?,
        demo_network(),
        endpoint.clone(),
        Arc::new(RecordingSink {
            shown: Mutex::new(Vec::new()),
        }),
    )?;
    expect(controller.queue_len()? == 1, "queue survived restart")?;

    let outcome = controller
        .handle_event(WorkerEvent::Sync(SyncTrigger::Reconnect))
        .await?;
    match outcome {
        EventOutcome::Sync(report) => expect(
            report.delivered == 1 && report.remaining == 0,
            "queue drained",
        )?,
        _ => return Err(OffKitError::sync("sync produced no report")),
    }
    expect(
        endpoint.delivered.lock().unwrap().as_slice() == ["job-123"],
        "delivered the queued submission",
    )?;
    Ok(())
}

/// Push payload display and click routing.
async fn scenario_notifications() -> Result<()> {
    let sink = Arc::new(RecordingSink {
        shown: Mutex::new(Vec::new()),
    });
    let controller = build(
        demo_config("1.0.0"),
        AssetStore::open_in_memory()?,
        SubmissionQueue::open_in_memory()?,
        demo_network(),
        Arc::new(ToggleEndpoint::new(false)),
        sink.clone(),
    )?;

    let payload: PushPayload = serde_json::from_value(json!({
        "title": "New job posted",
        "body": "A welding position in your area",
        "url": "/jobs/42"
    }))
    .map_err(OffKitError::from)?;
    controller.handle_event(WorkerEvent::Push(payload)).await?;
    expect(sink.shown.lock().unwrap().len() == 1, "notification shown")?;

    let outcome = controller
        .handle_event(WorkerEvent::NotificationClick(NotificationClick {
            action: NotificationAction::View,
            target: Some("/jobs/42".to_string()),
        }))
        .await?;
    match outcome {
        EventOutcome::WindowOpened { url } => {
            expect(url.as_deref() == Some("/jobs/42"), "view opened the target")?
        }
        _ => return Err(OffKitError::sync("click produced no window outcome")),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging(LogConfig::default());

    let scenarios: [(&str, _); 4] = [
        ("offline_serving", scenario_offline_serving().await),
        ("upgrade", scenario_upgrade().await),
        ("queue_recovery", scenario_queue_recovery().await),
        ("notifications", scenario_notifications().await),
    ];

    let mut passed = 0;
    let mut failed = 0;
    let mut results = serde_json::Map::new();
    for (name, result) in scenarios {
        match result {
            Ok(()) => {
                info!(scenario = name, "PASS");
                passed += 1;
                results.insert(name.to_string(), json!("pass"));
            }
            Err(e) => {
                error!(scenario = name, error = %e, "FAIL");
                failed += 1;
                results.insert(name.to_string(), json!(format!("fail: {}", e)));
            }
        }
    }

    let summary = json!({
        "passed": passed,
        "failed": failed,
        "scenarios": results,
    });
    println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());

    if failed > 0 {
        std::process::exit(1);
    }
}
