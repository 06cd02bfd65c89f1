//! Request/response types and the injected collaborator traits.
//!
//! The controller never owns a real HTTP client or notification surface;
//! the host injects them behind these traits, which keeps the backend and
//! the rendering layer out of scope and makes the controller testable with
//! in-memory doubles.

use async_trait::async_trait;
use hashbrown::HashMap;
use offkit_cache::CachedAsset;
use offkit_common::Result;
use offkit_queue::QueuedSubmission;

/// How a request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    /// A page navigation (document request).
    Navigation,
    /// A sub-resource request (stylesheet, script, data).
    SubResource,
}

/// An intercepted network request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL (same-origin path or absolute URL).
    pub url: String,

    /// Request method (uppercase).
    pub method: String,

    /// Request mode.
    pub mode: RequestMode,

    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    /// Create a GET sub-resource request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            mode: RequestMode::SubResource,
            headers: HashMap::new(),
        }
    }

    /// Create a GET navigation request.
    pub fn navigation(url: impl Into<String>) -> Self {
        Self {
            mode: RequestMode::Navigation,
            ..Self::get(url)
        }
    }

    /// Create a request with an explicit method.
    pub fn with_method(url: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            ..Self::get(url)
        }
    }
}

/// Response type, mirroring how the response was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Same-origin response; body and headers fully visible.
    Basic,
    /// Cross-origin response obtained with CORS.
    Cors,
    /// Cross-origin response without CORS; contents opaque.
    Opaque,
}

/// A network response snapshot.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Response kind.
    pub kind: ResponseKind,
}

impl FetchResponse {
    /// Create a 200 same-origin response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    /// Whether this response is eligible for opportunistic caching: a
    /// successful, same-origin response.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && self.kind == ResponseKind::Basic
    }

    /// Rebuild a response from a cached snapshot.
    pub fn from_asset(asset: &CachedAsset) -> Self {
        Self {
            status: asset.status,
            headers: asset.headers.clone(),
            body: asset.body.clone(),
            kind: ResponseKind::Basic,
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// Served from the live generation without touching the network.
    Cache,
    /// Fetched from the network (and possibly cached).
    Network,
    /// Network failed; the cached offline shell was substituted.
    OfflineShell,
}

/// A user-visible notification rendered from a push payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Navigation target attached to the `view` action, if any.
    pub target: Option<String>,
}

/// Network access for asset fetches.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform a network fetch.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// Remote endpoint accepting queued submissions.
#[async_trait]
pub trait SubmissionEndpoint: Send + Sync {
    /// Deliver one submission. `Ok` confirms delivery and removes the item
    /// from the queue; `Err` keeps it queued for the next trigger.
    async fn deliver(&self, submission: &QueuedSubmission) -> Result<()>;
}

/// Host surface that displays notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Display a notification with `view` and `close` actions.
    async fn show(&self, notification: &Notification) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_constructors() {
        let get = FetchRequest::get("/style.css");
        assert_eq!(get.method, "GET");
        assert_eq!(get.mode, RequestMode::SubResource);

        let nav = FetchRequest::navigation("/");
        assert_eq!(nav.mode, RequestMode::Navigation);

        let post = FetchRequest::with_method("/api/jobs", "post");
        assert_eq!(post.method, "POST");
    }

    #[test]
    fn test_cacheable() {
        assert!(FetchResponse::ok(b"body".to_vec()).is_cacheable());

        let not_found = FetchResponse {
            status: 404,
            ..FetchResponse::ok(Vec::new())
        };
        assert!(!not_found.is_cacheable());

        let opaque = FetchResponse {
            kind: ResponseKind::Opaque,
            ..FetchResponse::ok(Vec::new())
        };
        assert!(!opaque.is_cacheable());
    }

    #[test]
    fn test_from_asset_round_trip() {
        let asset = CachedAsset::new("/style.css", 200, HashMap::new(), b"css".to_vec());
        let response = FetchResponse::from_asset(&asset);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"css");
        assert_eq!(response.kind, ResponseKind::Basic);
    }
}
