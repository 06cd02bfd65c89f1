//! The offline cache & sync controller.
//!
//! Owns the asset store, the submission queue, and the page-session
//! registry as explicit state, constructed once per process. A cold start
//! reconstructs everything from durable storage: the live generation is
//! whichever stored generation matches the configured id, and pending
//! submissions are read back from the queue database.
//!
//! Handlers are single-threaded, run-to-completion: every await is a
//! suspension point, and the future returned from [`Controller::handle_event`]
//! is the host's "operation still settling" signal. The host must keep the
//! controller alive until it resolves; there is no mid-operation abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use offkit_cache::{normalize_url, AssetStore, CachedAsset};
use offkit_common::{OffKitError, Result};
use offkit_queue::{EnqueueResult, QueuedSubmission, SubmissionQueue};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::clients::ClientRegistry;
use crate::config::WorkerConfig;
use crate::event::{
    EventOutcome, FetchOutcome, MessageReply, NotificationAction, NotificationClick, PageMessage,
    PushPayload, SyncReport, SyncTrigger, WorkerEvent,
};
use crate::net::{
    FetchRequest, FetchResponse, FetchSource, Network, Notification, NotificationSink,
    RequestMode, SubmissionEndpoint,
};

/// Result of a page-facing submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Delivered immediately; nothing queued.
    Delivered,
    /// Delivery failed; the submission is queued for background sync.
    Queued(EnqueueResult),
}

/// The offline cache & sync controller.
///
/// Serves intercepted requests cache-first from the live generation,
/// installs new generations atomically, and guarantees eventual delivery of
/// queued submissions. Content served from cache can be stale until the
/// next generation installs; the controller never revalidates per request.
pub struct Controller {
    config: WorkerConfig,
    origin: Url,
    store: Mutex<AssetStore>,
    queue: Mutex<SubmissionQueue>,
    clients: Mutex<ClientRegistry>,
    network: Arc<dyn Network>,
    endpoint: Arc<dyn SubmissionEndpoint>,
    notifier: Arc<dyn NotificationSink>,
    /// Generation currently serving intercepted fetches.
    live: Mutex<Option<String>>,
    /// Generation installed but not yet promoted.
    pending: Mutex<Option<String>>,
    /// Serializes flush passes.
    flush_gate: tokio::sync::Mutex<()>,
    /// A trigger arrived while a flush was running; run one more pass.
    flush_rerun: AtomicBool,
}

impl Controller {
    /// Construct a controller over durable storage, reconstructing the live
    /// generation from the asset store.
    pub fn new(
        config: WorkerConfig,
        store: AssetStore,
        queue: SubmissionQueue,
        network: Arc<dyn Network>,
        endpoint: Arc<dyn SubmissionEndpoint>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| OffKitError::config(format!("Invalid origin {}: {}", config.origin, e)))?;

        let generation = config.generation().id();
        let live = if store.generations()?.contains(&generation) {
            info!(generation, "Resuming live generation from storage");
            Some(generation)
        } else {
            None
        };

        let pending_submissions = queue.len()?;
        if pending_submissions > 0 {
            info!(pending_submissions, "Resuming with queued submissions");
        }

        Ok(Self {
            config,
            origin,
            store: Mutex::new(store),
            queue: Mutex::new(queue),
            clients: Mutex::new(ClientRegistry::new()),
            network,
            endpoint,
            notifier,
            live: Mutex::new(live),
            pending: Mutex::new(None),
            flush_gate: tokio::sync::Mutex::new(()),
            flush_rerun: AtomicBool::new(false),
        })
    }

    /// Single dispatch entry point for every worker event.
    pub async fn handle_event(&self, event: WorkerEvent) -> Result<EventOutcome> {
        match event {
            WorkerEvent::Install => self.install().await,
            WorkerEvent::Activate => self.activate(),
            WorkerEvent::Fetch(request) => self.handle_fetch(request).await,
            WorkerEvent::Sync(trigger) => self.handle_sync(trigger).await,
            WorkerEvent::Push(payload) => self.handle_push(payload).await,
            WorkerEvent::NotificationClick(click) => self.handle_click(click),
            WorkerEvent::Message(message) => self.handle_message(message).await,
        }
    }

    /// Top-level entry that never propagates: handler errors are logged and
    /// reported as [`EventOutcome::Failed`], keeping the interception path
    /// alive for unrelated requests.
    pub async fn dispatch(&self, event: WorkerEvent) -> EventOutcome {
        match self.handle_event(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(category = e.category(), error = %e, "Event handler failed");
                EventOutcome::Failed
            }
        }
    }

    // ==================== Lifecycle ====================

    /// Fetch and stage the manifest, then commit it as one transaction.
    /// All-or-nothing: any fetch failure aborts the install and the
    /// previous generation stays authoritative.
    async fn install(&self) -> Result<EventOutcome> {
        let generation = self.config.generation().id();
        info!(generation, assets = self.config.manifest.len(), "Installing");

        let mut staged = Vec::with_capacity(self.config.manifest.len());
        for url in &self.config.manifest {
            let response = self
                .network
                .fetch(&FetchRequest::get(url))
                .await
                .map_err(|e| {
                    OffKitError::cache(format!("Install fetch failed for {}: {}", url, e))
                })?;

            if !(200..=299).contains(&response.status) {
                return Err(OffKitError::cache(format!(
                    "Install fetch for {} returned status {}",
                    url, response.status
                )));
            }

            staged.push(CachedAsset::new(
                url.clone(),
                response.status,
                response.headers,
                response.body,
            ));
        }

        self.store.lock().unwrap().install(&generation, &staged)?;
        *self.pending.lock().unwrap() = Some(generation.clone());

        // Ready to take over immediately; no waiting for open sessions.
        info!(generation, "Installed, pending activation");
        Ok(EventOutcome::Installed {
            generation,
            assets: staged.len(),
        })
    }

    /// Promote the pending generation (or re-assert the current one), purge
    /// every other stored generation, and claim open page sessions.
    /// Idempotent: re-activating the live generation purges nothing.
    fn activate(&self) -> Result<EventOutcome> {
        let target = self
            .pending
            .lock()
            .unwrap()
            .take()
            .or_else(|| self.live.lock().unwrap().clone())
            .unwrap_or_else(|| self.config.generation().id());

        *self.live.lock().unwrap() = Some(target.clone());
        let purged = self.store.lock().unwrap().purge_except(&target)?;
        let claimed = self.clients.lock().unwrap().claim();

        info!(generation = target, purged, claimed, "Activated");
        Ok(EventOutcome::Activated {
            generation: target,
            purged,
            claimed,
        })
    }

    /// Promote the pending generation without waiting for an activate
    /// event (`SKIP_WAITING` from the page).
    fn skip_waiting(&self) -> Result<()> {
        if let Some(generation) = self.pending.lock().unwrap().take() {
            info!(generation, "Skip waiting: promoting pending generation");
            *self.live.lock().unwrap() = Some(generation.clone());
            self.store.lock().unwrap().purge_except(&generation)?;
        }
        Ok(())
    }

    // ==================== Fetch interception ====================

    /// Cache-first, network-fallback, opportunistic fill.
    async fn handle_fetch(&self, request: FetchRequest) -> Result<EventOutcome> {
        // Scope filter: same-origin GET only; everything else is untouched.
        if request.method != "GET" || !self.same_origin(&request.url) {
            return Ok(EventOutcome::Fetch(FetchOutcome::PassThrough));
        }

        let url = normalize_url(&request.url);
        let live = self.live.lock().unwrap().clone();

        if let Some(generation) = &live {
            if let Some(asset) = self.store.lock().unwrap().get(generation, &url, "GET")? {
                debug!(%url, "Serving from cache");
                return Ok(EventOutcome::Fetch(FetchOutcome::Response {
                    response: FetchResponse::from_asset(&asset),
                    source: FetchSource::Cache,
                }));
            }
        }

        debug!(%url, "Cache miss, fetching from network");
        match self.network.fetch(&request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    if let Some(generation) = &live {
                        let asset = CachedAsset::new(
                            url.clone(),
                            response.status,
                            response.headers.clone(),
                            response.body.clone(),
                        );
                        // A fill failure must not fail the fetch itself.
                        if let Err(e) = self.store.lock().unwrap().put(generation, &asset) {
                            warn!(%url, error = %e, "Failed to cache response");
                        }
                    }
                }
                Ok(EventOutcome::Fetch(FetchOutcome::Response {
                    response,
                    source: FetchSource::Network,
                }))
            }
            Err(e) => {
                // Navigation requests fall back to the offline shell;
                // sub-resource failures propagate unchanged.
                if request.mode == RequestMode::Navigation {
                    if let Some(generation) = &live {
                        let shell_key = normalize_url(&self.config.offline_shell);
                        if let Some(shell) =
                            self.store.lock().unwrap().get(generation, &shell_key, "GET")?
                        {
                            warn!(%url, "Network failed, serving offline shell");
                            return Ok(EventOutcome::Fetch(FetchOutcome::Response {
                                response: FetchResponse::from_asset(&shell),
                                source: FetchSource::OfflineShell,
                            }));
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn same_origin(&self, url: &str) -> bool {
        // Resolve relative references against the configured origin first,
        // so protocol-relative URLs like `//cdn.example/lib.js` land on
        // their actual host before the comparison.
        match self.origin.join(url) {
            Ok(resolved) => {
                resolved.scheme() == self.origin.scheme()
                    && resolved.host() == self.origin.host()
                    && resolved.port_or_known_default() == self.origin.port_or_known_default()
            }
            Err(_) => false,
        }
    }

    // ==================== Submission queue & sync ====================

    /// Page-facing submission: try to deliver now, queue on failure. The
    /// caller sees success either way; queued items sync silently later.
    pub async fn submit(&self, submission: QueuedSubmission) -> Result<SubmitOutcome> {
        match self.endpoint.deliver(&submission).await {
            Ok(()) => {
                info!(id = %submission.id, "Submission delivered");
                Ok(SubmitOutcome::Delivered)
            }
            Err(e) => {
                warn!(id = %submission.id, error = %e, "Delivery failed, queueing for sync");
                let result = self.queue.lock().unwrap().enqueue(&submission)?;
                Ok(SubmitOutcome::Queued(result))
            }
        }
    }

    /// Queue a submission directly (detected-offline path).
    pub fn enqueue(&self, submission: &QueuedSubmission) -> Result<EnqueueResult> {
        self.queue.lock().unwrap().enqueue(submission)
    }

    /// Number of submissions awaiting delivery.
    pub fn queue_len(&self) -> Result<usize> {
        self.queue.lock().unwrap().len()
    }

    async fn handle_sync(&self, trigger: SyncTrigger) -> Result<EventOutcome> {
        debug!(?trigger, "Sync trigger");
        if trigger == SyncTrigger::Periodic {
            self.refresh().await;
        }
        let report = self.flush().await?;
        Ok(EventOutcome::Sync(report))
    }

    /// Run flush passes until no coalesced trigger is outstanding. Only one
    /// flush runs at a time; a trigger arriving mid-flush requests exactly
    /// one follow-up pass instead of running concurrently.
    async fn flush(&self) -> Result<SyncReport> {
        let _gate = match self.flush_gate.try_lock() {
            Ok(gate) => gate,
            Err(_) => {
                self.flush_rerun.store(true, Ordering::SeqCst);
                debug!("Flush in progress, coalescing trigger");
                return Ok(SyncReport {
                    coalesced: true,
                    ..Default::default()
                });
            }
        };

        let mut report = SyncReport::default();
        loop {
            report.passes += 1;
            let items = self.queue.lock().unwrap().pending()?;
            debug!(items = items.len(), pass = report.passes, "Flush pass");

            // Items are independent: one failure never blocks the rest.
            for item in items {
                match self.endpoint.deliver(&item).await {
                    Ok(()) => {
                        self.queue.lock().unwrap().remove(&item.id)?;
                        report.delivered += 1;
                        info!(id = %item.id, "Synced queued submission");
                    }
                    Err(e) => {
                        let attempts = self.queue.lock().unwrap().record_attempt(&item.id)?;
                        report.failed += 1;
                        warn!(id = %item.id, attempts, error = %e, "Sync failed, keeping queued");
                    }
                }
            }

            if !self.flush_rerun.swap(false, Ordering::SeqCst) {
                break;
            }
        }

        report.remaining = self.queue.lock().unwrap().len()?;
        Ok(report)
    }

    /// Re-fetch the configured data URL and replace its cache entry under
    /// the live generation. Failures are logged, never fatal.
    async fn refresh(&self) {
        let Some(url) = self.config.refresh_url.clone() else {
            return;
        };
        let Some(generation) = self.live.lock().unwrap().clone() else {
            return;
        };

        match self.network.fetch(&FetchRequest::get(&url)).await {
            Ok(response) if response.is_cacheable() => {
                let asset =
                    CachedAsset::new(url.clone(), response.status, response.headers, response.body);
                match self.store.lock().unwrap().put(&generation, &asset) {
                    Ok(()) => info!(%url, "Refreshed cached data"),
                    Err(e) => warn!(%url, error = %e, "Failed to store refreshed data"),
                }
            }
            Ok(response) => {
                debug!(%url, status = response.status, "Refresh response not cacheable")
            }
            Err(e) => warn!(%url, error = %e, "Failed to refresh data"),
        }
    }

    // ==================== Notifications ====================

    /// Display a push payload. Display failure is logged, never fatal.
    async fn handle_push(&self, payload: PushPayload) -> Result<EventOutcome> {
        let notification = Notification {
            title: payload.title,
            body: payload.body,
            target: payload.url,
        };

        match self.notifier.show(&notification).await {
            Ok(()) => Ok(EventOutcome::NotificationShown { shown: true }),
            Err(e) => {
                warn!(error = %e, "Failed to display notification");
                Ok(EventOutcome::NotificationShown { shown: false })
            }
        }
    }

    /// Route a notification click back into the hosting page.
    fn handle_click(&self, click: NotificationClick) -> Result<EventOutcome> {
        let target = match click.action {
            NotificationAction::Close => None,
            NotificationAction::View => Some(
                click
                    .target
                    .unwrap_or_else(|| self.config.default_click_target.clone()),
            ),
            NotificationAction::Default => Some(self.config.offline_shell.clone()),
        };

        if let Some(url) = &target {
            let client = self.clients.lock().unwrap().open_window(url.clone());
            debug!(client = %client.id, %url, "Opened window from notification");
        }
        Ok(EventOutcome::WindowOpened { url: target })
    }

    // ==================== Page messaging ====================

    async fn handle_message(&self, message: PageMessage) -> Result<EventOutcome> {
        match message {
            PageMessage::SkipWaiting => {
                self.skip_waiting()?;
                Ok(EventOutcome::Reply(None))
            }
            PageMessage::GetVersion => {
                let version = self
                    .live
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| self.config.generation().id());
                Ok(EventOutcome::Reply(Some(MessageReply::Version { version })))
            }
            PageMessage::CacheUrls { urls } => self.cache_urls(urls).await,
        }
    }

    /// Add URLs to the live generation on demand. Unlike install this is
    /// not all-or-nothing: each URL fails or caches independently.
    async fn cache_urls(&self, urls: Vec<String>) -> Result<EventOutcome> {
        let generation = self
            .live
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| self.config.generation().id());

        let mut added = 0;
        let mut failed = 0;
        for url in urls {
            match self.network.fetch(&FetchRequest::get(&url)).await {
                Ok(response) if (200..=299).contains(&response.status) => {
                    let asset =
                        CachedAsset::new(url.clone(), response.status, response.headers, response.body);
                    match self.store.lock().unwrap().put(&generation, &asset) {
                        Ok(()) => added += 1,
                        Err(e) => {
                            warn!(%url, error = %e, "Failed to cache requested URL");
                            failed += 1;
                        }
                    }
                }
                Ok(response) => {
                    warn!(%url, status = response.status, "Requested URL not cacheable");
                    failed += 1;
                }
                Err(e) => {
                    warn!(%url, error = %e, "Failed to fetch requested URL");
                    failed += 1;
                }
            }
        }

        Ok(EventOutcome::UrlsCached { added, failed })
    }

    // ==================== Introspection ====================

    /// The generation currently serving fetches, if any.
    pub fn live_generation(&self) -> Option<String> {
        self.live.lock().unwrap().clone()
    }

    /// Register an uncontrolled page session. Returns its client id.
    pub fn register_client(&self, url: impl Into<String>) -> String {
        self.clients.lock().unwrap().add(url)
    }

    /// Number of page sessions controlled by the live generation.
    pub fn controlled_clients(&self) -> usize {
        self.clients.lock().unwrap().controlled_count()
    }
}
