//! # OffKit Worker
//!
//! Offline cache & sync controller for progressive web apps.
//!
//! ## Features
//!
//! - **Lifecycle**: atomic install of a versioned asset manifest, activation
//!   with stale-generation purge and session claiming
//! - **Interception**: cache-first, network-fallback, opportunistic fill for
//!   same-origin GET requests, with an offline shell for failed navigations
//! - **Background sync**: durable FIFO submission queue, serialized flush
//!   passes with trigger coalescing
//! - **Notifications**: push payload relay and click routing
//! - **Messaging**: `SKIP_WAITING`, `GET_VERSION`, `CACHE_URLS`
//!
//! ## Architecture
//!
//! ```text
//! WorkerEvent (Install | Activate | Fetch | Sync | Push | NotificationClick | Message)
//!     │
//!     └── Controller::handle_event
//!             ├── AssetStore   (offkit-cache, sqlite)
//!             ├── SubmissionQueue (offkit-queue, sqlite)
//!             ├── ClientRegistry
//!             └── injected: Network, SubmissionEndpoint, NotificationSink
//! ```

pub mod clients;
pub mod config;
pub mod controller;
pub mod event;
pub mod net;

pub use clients::{ClientRegistry, PageClient};
pub use config::WorkerConfig;
pub use controller::{Controller, SubmitOutcome};
pub use event::{
    EventOutcome, FetchOutcome, MessageReply, NotificationAction, NotificationClick, PageMessage,
    PushPayload, SyncReport, SyncTrigger, WorkerEvent,
};
pub use net::{
    FetchRequest, FetchResponse, FetchSource, Network, Notification, NotificationSink,
    RequestMode, ResponseKind, SubmissionEndpoint,
};
