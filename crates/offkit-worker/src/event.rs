//! Worker events and their outcomes.
//!
//! Every lifecycle and network signal the host can deliver is one variant
//! of [`WorkerEvent`], routed through a single controller entry point. This
//! replaces the listener-per-event style of a browser worker with a design
//! that lets tests inject synthetic events and assert on the resulting
//! cache and queue state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::net::{FetchRequest, FetchResponse, FetchSource};

/// A signal that the submission queue should attempt a flush now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncTrigger {
    /// Connectivity returned.
    Reconnect,
    /// Periodic scheduler tick. Also refreshes the configured data URL.
    Periodic,
    /// Explicit request from the hosting page.
    Requested,
}

/// A push-originated payload. Extra fields are carried opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    /// Notification title.
    pub title: String,

    /// Notification body.
    pub body: String,

    /// Navigation target for the `view` action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Remaining payload fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Action chosen on a displayed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
    /// Open the app at the notification's target.
    View,
    /// Dismiss.
    Close,
    /// Clicked the notification body itself.
    Default,
}

/// A click on a displayed notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClick {
    /// Chosen action.
    pub action: NotificationAction,
    /// Target carried by the notification, if any.
    pub target: Option<String>,
}

/// Messages from the hosting page. Wire format is the tagged JSON the page
/// posts, e.g. `{"type": "CACHE_URLS", "urls": ["/extra.css"]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    /// Promote the pending generation immediately.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,

    /// Ask for the live generation id.
    #[serde(rename = "GET_VERSION")]
    GetVersion,

    /// Add URLs to the live generation on demand.
    #[serde(rename = "CACHE_URLS")]
    CacheUrls { urls: Vec<String> },
}

/// Reply to a page message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageReply {
    /// Live generation id.
    Version { version: String },
}

/// Every signal the controller reacts to.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Install the configured manifest under the configured generation.
    Install,
    /// Promote the pending generation, purge stale ones, claim sessions.
    Activate,
    /// An intercepted network request.
    Fetch(FetchRequest),
    /// Attempt a queue flush.
    Sync(SyncTrigger),
    /// A push payload arrived.
    Push(PushPayload),
    /// A displayed notification was clicked.
    NotificationClick(NotificationClick),
    /// A message from the hosting page.
    Message(PageMessage),
}

/// How an intercepted fetch was resolved.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The controller produced a response.
    Response {
        /// The response served to the page.
        response: FetchResponse,
        /// Where it came from.
        source: FetchSource,
    },
    /// Out of scope (cross-origin or non-GET); the host performs its own
    /// fetch, untouched.
    PassThrough,
}

/// Result of one flush invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Submissions confirmed delivered and removed.
    pub delivered: usize,
    /// Delivery attempts that failed (items kept queued).
    pub failed: usize,
    /// Submissions still queued after the flush.
    pub remaining: usize,
    /// Passes run, counting coalesced re-runs.
    pub passes: u32,
    /// True if a flush was already running and this trigger was folded into
    /// its follow-up pass.
    pub coalesced: bool,
}

/// Outcome of handling one event.
#[derive(Debug)]
pub enum EventOutcome {
    /// Install completed; the generation is pending activation.
    Installed {
        /// Installed generation id.
        generation: String,
        /// Number of assets cached.
        assets: usize,
    },
    /// Activation completed.
    Activated {
        /// Live generation id.
        generation: String,
        /// Stale asset rows purged.
        purged: usize,
        /// Page sessions newly claimed.
        claimed: usize,
    },
    /// Fetch resolved.
    Fetch(FetchOutcome),
    /// Flush finished (or was coalesced).
    Sync(SyncReport),
    /// Push handled; whether the notification was displayed.
    NotificationShown {
        /// False when the sink failed (logged, never fatal).
        shown: bool,
    },
    /// Notification click routed; the window target opened, if any.
    WindowOpened {
        /// Opened URL, or `None` for a dismissal.
        url: Option<String>,
    },
    /// On-demand cache additions completed.
    UrlsCached {
        /// URLs cached.
        added: usize,
        /// URLs that failed (logged and skipped).
        failed: usize,
    },
    /// Page message handled, with an optional reply.
    Reply(Option<MessageReply>),
    /// The handler failed; the error was logged at the dispatch boundary.
    Failed,
}
