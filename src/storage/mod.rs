//! Storage module for persisting crawl data
//!
//! This module handles all database operations, including:
//! - SQLite database initialization and schema management
//! - Crawl records and their status transitions
//! - Discovered link persistence
//! - The durable hand-off of queued crawls to workers
//!
//! The server and worker processes open the same database file; SQLite's WAL
//! mode and a busy timeout let both write safely.

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::CrawlStatus;
use crate::PageProbeError;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Storage handle shared between tasks of one process
pub type SharedStorage = Arc<Mutex<SqliteStorage>>;

/// Opens (or creates) the database and wraps it for sharing
pub fn open_storage(path: &Path) -> Result<SharedStorage, PageProbeError> {
    Ok(shared(SqliteStorage::new(path)?))
}

/// Wraps an opened storage for sharing
pub fn shared(storage: SqliteStorage) -> SharedStorage {
    Arc::new(Mutex::new(storage))
}

/// Locks the shared storage
///
/// A panic while the lock was held leaves the connection itself intact, so a
/// poisoned lock is recovered rather than propagated.
pub fn lock(storage: &SharedStorage) -> MutexGuard<'_, SqliteStorage> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current time in the format used by every timestamp column
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A URL registered by a user
#[derive(Debug, Clone, Serialize)]
pub struct UrlRecord {
    pub id: i64,
    pub user_id: String,
    pub normalized_url: String,
    pub domain: String,
}

/// Represents a crawl in the database
#[derive(Debug, Clone, Serialize)]
pub struct CrawlRecord {
    pub id: i64,
    pub url_id: i64,
    pub status: CrawlStatus,
    pub queued_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub html_version: Option<String>,
    pub page_title: Option<String>,
    /// Heading counts for h1..h6, present once the crawl is done
    pub heading_counts: Option<[u32; 6]>,
    pub internal_links_count: Option<u32>,
    pub external_links_count: Option<u32>,
    pub inaccessible_links_count: Option<u32>,
    pub has_login_form: bool,
    /// Failure reason, set only while the crawl is in `error`
    pub error_message: Option<String>,
    /// Failure of the most recent attempt that was retried
    pub last_attempt_error: Option<String>,
    pub workflow_id: String,
    pub attempts: u32,
}

/// Aggregate metadata written when a crawl completes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlResult {
    pub html_version: String,
    pub page_title: String,
    pub heading_counts: [u32; 6],
    pub internal_links_count: u32,
    pub external_links_count: u32,
    pub inaccessible_links_count: u32,
    pub has_login_form: bool,
}

/// A link to persist for a crawl
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredLink {
    pub href: String,
    pub absolute_url: String,
    pub is_internal: bool,
    /// `None` when the probe could not determine reachability
    pub status_code: Option<u16>,
    pub anchor_text: String,
}

/// A persisted discovered link
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredLinkRecord {
    pub id: i64,
    pub crawl_id: i64,
    pub href: String,
    pub absolute_url: String,
    pub is_internal: bool,
    pub status_code: Option<u16>,
    pub anchor_text: Option<String>,
}

/// Everything an attempt needs to execute one crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlJob {
    pub crawl_id: i64,
    pub workflow_id: String,
    pub user_id: String,
    pub url_id: i64,
    pub url: String,
}
