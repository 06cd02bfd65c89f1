//! # OffKit Common
//!
//! Shared error types and logging configuration for the OffKit offline
//! cache & sync controller.

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for OffKit.
#[derive(Error, Debug)]
pub enum OffKitError {
    /// Asset cache lifecycle errors (install, activate, lookup).
    #[error("Cache error: {0}")]
    Cache(String),

    /// Durable storage errors (sqlite).
    #[error("Store error: {0}")]
    Store(String),

    /// Submission queue errors.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Network fetch or delivery errors.
    #[error("Network error: {0}")]
    Network(String),

    /// Queue flush errors.
    #[error("Sync error: {0}")]
    Sync(String),

    /// Notification display or routing errors.
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parse errors.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// JSON encode/decode errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OffKitError {
    /// Create a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a queue error.
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Create a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a sync error.
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    /// Create a notification error.
    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error is retryable (a later attempt may succeed).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OffKitError::Network(_) | OffKitError::Sync(_) | OffKitError::Io(_)
        )
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            OffKitError::Cache(_) => "cache",
            OffKitError::Store(_) => "store",
            OffKitError::Queue(_) => "queue",
            OffKitError::Network(_) => "network",
            OffKitError::Sync(_) => "sync",
            OffKitError::Notification(_) => "notification",
            OffKitError::Config(_) => "config",
            OffKitError::NotFound(_) => "not_found",
            OffKitError::InvalidArgument(_) => "invalid_argument",
            OffKitError::Io(_) => "io",
            OffKitError::Url(_) => "url",
            OffKitError::Json(_) => "json",
        }
    }
}

/// Result type alias for OffKit operations.
pub type Result<T> = std::result::Result<T, OffKitError>;

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| OffKitError::NotFound(resource.into()))
    }
}
