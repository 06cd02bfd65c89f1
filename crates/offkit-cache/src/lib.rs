//! # OffKit Cache
//!
//! Versioned static-asset cache for the OffKit offline controller.
//!
//! A *generation* is a named, versioned snapshot of the cached asset set
//! (e.g. `job-board-v1.0.0`). Exactly one generation is live at a time;
//! activating a new one purges every stored generation with a differing id.
//!
//! ```text
//! AssetStore (sqlite)
//!     └── generation id
//!             └── (url, method) → CachedAsset (status, headers, body)
//! ```
//!
//! The store is cache-first by design: an asset written under a generation
//! is served as-is until that generation is replaced. Staleness is bounded
//! only by the next install, never by per-request revalidation.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

pub mod store;

pub use store::AssetStore;

/// Identifier for one versioned set of cached assets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheGeneration {
    /// Application cache name (e.g. `job-board`).
    pub name: String,
    /// Deployed version (e.g. `1.0.0`).
    pub version: String,
}

impl CacheGeneration {
    /// Create a new generation.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Render the storage id, e.g. `job-board-v1.0.0`.
    pub fn id(&self) -> String {
        format!("{}-v{}", self.name, self.version)
    }
}

impl std::fmt::Display for CacheGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// A cached request/response snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAsset {
    /// Normalized request URL.
    pub url: String,

    /// Request method (uppercase).
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: i64,
}

impl CachedAsset {
    /// Create a GET asset snapshot, stamped now.
    pub fn new(
        url: impl Into<String>,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url: normalize_url(&url.into()),
            method: "GET".to_string(),
            status,
            headers,
            body,
            cached_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Normalize a request URL into a cache key: the fragment never reaches the
/// server, so it is stripped.
pub fn normalize_url(url: &str) -> String {
    match url.split_once('#') {
        Some((before, _)) => before.to_string(),
        None => url.to_string(),
    }
}
