//! Controller configuration.

use offkit_cache::CacheGeneration;
use serde::{Deserialize, Serialize};

/// Configuration for the offline controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Cache name prefix (e.g. `job-board`).
    pub cache_name: String,

    /// Deployed asset version (e.g. `1.0.0`). Together with `cache_name`
    /// this identifies the cache generation.
    pub version: String,

    /// Origin of the hosting page (scheme + host + port). Requests outside
    /// this origin are never intercepted.
    pub origin: String,

    /// Path of the offline shell served when a navigation fetch fails.
    pub offline_shell: String,

    /// Ordered static asset manifest fetched at install time. Entries may
    /// be same-origin paths or absolute third-party URLs.
    pub manifest: Vec<String>,

    /// Data URL re-fetched on periodic sync triggers, if any.
    pub refresh_url: Option<String>,

    /// Navigation target for the `view` notification action when the push
    /// payload does not carry one.
    pub default_click_target: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: "offkit".to_string(),
            version: "1.0.0".to_string(),
            origin: "https://app.example".to_string(),
            offline_shell: "/".to_string(),
            manifest: Vec::new(),
            refresh_url: None,
            default_click_target: "/".to_string(),
        }
    }
}

impl WorkerConfig {
    /// The cache generation this configuration describes.
    pub fn generation(&self) -> CacheGeneration {
        CacheGeneration::new(&self.cache_name, &self.version)
    }
}
