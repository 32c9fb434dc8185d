//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::storage::{
    CrawlJob, CrawlRecord, CrawlResult, DiscoveredLink, DiscoveredLinkRecord, UrlRecord,
};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Crawl not found: {0}")]
    CrawlNotFound(i64),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every status-changing method is conditional on the row's current status
/// and returns whether a row was changed, so terminal states are never
/// overwritten and a concurrent stop always wins.
pub trait Storage {
    // ===== URL Lookup =====

    /// Registers a URL for a user, returning its id (existing id if already registered)
    fn insert_url(&mut self, user_id: &str, normalized_url: &str, domain: &str)
        -> StorageResult<i64>;

    /// Gets a URL if it exists and is owned by the user
    fn get_url_for_user(&self, url_id: i64, user_id: &str) -> StorageResult<Option<UrlRecord>>;

    // ===== Crawl Creation & Lookup =====

    /// Counts crawls in `queued` or `running` for a URL
    fn count_active_crawls(&self, url_id: i64) -> StorageResult<u64>;

    /// Creates a queued crawl for a URL
    ///
    /// Returns `None` when another crawl is already active for the URL.
    fn queue_crawl(&mut self, url_id: i64, workflow_id: &str) -> StorageResult<Option<i64>>;

    /// Gets a crawl by ID
    fn get_crawl(&self, crawl_id: i64) -> StorageResult<CrawlRecord>;

    /// Gets a crawl by its workflow correlation id
    fn get_crawl_by_workflow_id(&self, workflow_id: &str) -> StorageResult<Option<CrawlRecord>>;

    /// Gets the most recently queued crawl for a URL
    fn get_latest_crawl_for_url(&self, url_id: i64) -> StorageResult<Option<CrawlRecord>>;

    /// Lists crawls in `queued` or `running` for a URL
    fn list_active_crawls(&self, url_id: i64) -> StorageResult<Vec<CrawlRecord>>;

    /// Builds the execution input for a crawl (joins the owning URL)
    fn get_crawl_job(&self, crawl_id: i64) -> StorageResult<CrawlJob>;

    // ===== Status Transitions =====

    /// `queued -> running`, stamps `started_at` and counts the attempt
    fn set_crawl_running(&mut self, crawl_id: i64) -> StorageResult<bool>;

    /// `running -> queued` after a failed attempt that will be retried
    ///
    /// The failure is kept as `last_attempt_error`; `error_message` stays
    /// empty until the crawl actually ends in `error`.
    fn requeue_crawl(&mut self, crawl_id: i64, error_message: &str) -> StorageResult<bool>;

    /// `queued|running -> error`
    fn set_crawl_error(&mut self, crawl_id: i64, error_message: &str) -> StorageResult<bool>;

    /// `queued|running -> stopped`
    fn set_crawl_stopped(&mut self, crawl_id: i64) -> StorageResult<bool>;

    /// `running -> done` with the extracted metadata and discovered links
    ///
    /// Links and the status change commit together. A link the database
    /// rejects is skipped; when the crawl is no longer running nothing is
    /// written and `false` is returned.
    fn complete_crawl(
        &mut self,
        crawl_id: i64,
        result: &CrawlResult,
        links: &[DiscoveredLink],
    ) -> StorageResult<bool>;

    // ===== Discovered Links =====

    /// Lists the discovered links of a crawl in insertion order
    fn list_discovered_links(&self, crawl_id: i64) -> StorageResult<Vec<DiscoveredLinkRecord>>;

    // ===== Worker Hand-off =====

    /// Claims a crawl for a worker; false if another worker already owns it
    fn claim_crawl(&mut self, crawl_id: i64, worker_id: &str) -> StorageResult<bool>;

    /// Claims up to `limit` unclaimed queued crawls, oldest first
    fn claim_due_crawls(&mut self, worker_id: &str, limit: usize) -> StorageResult<Vec<CrawlJob>>;

    /// Returns an active crawl to the unclaimed queue so any worker can resume it
    fn release_crawl(&mut self, crawl_id: i64) -> StorageResult<bool>;

    /// Marks abandoned crawls as `error`
    ///
    /// Covers crawls `running` since before `cutoff` and claimed crawls
    /// still `queued` since before `cutoff`.
    fn fail_stale_running(&mut self, cutoff: &str, error_message: &str) -> StorageResult<u64>;
}
