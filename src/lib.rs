//! PageProbe: on-demand single page analysis with live updates
//!
//! This crate fetches one web page per crawl, extracts structural metadata,
//! probes every link found on it, records the result durably and pushes a
//! state-change event to the browser sessions of the user who asked for it.

pub mod analyzer;
pub mod config;
pub mod crawler;
pub mod notify;
pub mod orchestrator;
pub mod server;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for PageProbe operations
#[derive(Debug, Error)]
pub enum PageProbeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("HTTP error: {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL {url_id} not found for user {user_id}")]
    UrlNotFound { url_id: i64, user_id: String },

    #[error("Crawl {0} is no longer active")]
    CrawlNotActive(i64),

    #[error("Notification relay error: {0}")]
    Relay(String),

    #[error("Crawl attempt panicked: {0}")]
    Panicked(String),
}

impl PageProbeError {
    /// Returns true if an attempt that failed with this error may be retried
    ///
    /// A crawl that left the active states, unknown URLs and configuration
    /// problems are final; every network and persistence failure is eligible
    /// for another attempt under the orchestrator's retry policy.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::CrawlNotActive(_) | Self::UrlNotFound { .. } | Self::Config(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid bind address: {0}")]
    InvalidBind(String),
}

/// Result type alias for PageProbe operations
pub type Result<T> = std::result::Result<T, PageProbeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use analyzer::{analyze_document, LinkAnalysis, PageMetadata};
pub use config::Config;
pub use crawler::{CrawlJob, CrawlService, CrawlTask};
pub use notify::{Broadcaster, Notification, NotificationKind, Notifier};
pub use orchestrator::Orchestrator;
pub use state::CrawlStatus;
