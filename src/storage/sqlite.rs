//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::CrawlStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{
    timestamp_now, CrawlJob, CrawlRecord, CrawlResult, DiscoveredLink, DiscoveredLinkRecord,
    UrlRecord,
};
use crate::PageProbeError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const CRAWL_COLUMNS: &str = "id, url_id, status, queued_at, started_at, finished_at, html_version,
     page_title, h1_count, h2_count, h3_count, h4_count, h5_count, h6_count,
     internal_links_count, external_links_count, inaccessible_links_count,
     has_login_form, error_message, workflow_id, attempts, last_attempt_error";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(PageProbeError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, PageProbeError> {
        let conn = Connection::open(path)?;

        // Server and worker processes share this file
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for tests and single-process runs)
    pub fn new_in_memory() -> Result<Self, PageProbeError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn crawl_from_row(row: &Row<'_>) -> rusqlite::Result<CrawlRecord> {
    let status_str: String = row.get(2)?;
    let headings: [Option<u32>; 6] = [
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
    ];
    let heading_counts = if headings.iter().all(Option::is_some) {
        Some(headings.map(|count| count.unwrap_or(0)))
    } else {
        None
    };

    Ok(CrawlRecord {
        id: row.get(0)?,
        url_id: row.get(1)?,
        status: CrawlStatus::from_db_string(&status_str).unwrap_or(CrawlStatus::Error),
        queued_at: row.get(3)?,
        started_at: row.get(4)?,
        finished_at: row.get(5)?,
        html_version: row.get(6)?,
        page_title: row.get(7)?,
        heading_counts,
        internal_links_count: row.get(14)?,
        external_links_count: row.get(15)?,
        inaccessible_links_count: row.get(16)?,
        has_login_form: row.get::<_, i64>(17)? != 0,
        error_message: row.get(18)?,
        workflow_id: row.get(19)?,
        attempts: row.get(20)?,
        last_attempt_error: row.get(21)?,
    })
}

fn load_job(conn: &Connection, crawl_id: i64) -> StorageResult<CrawlJob> {
    conn.query_row(
        "SELECT c.id, c.workflow_id, u.user_id, u.id, u.normalized_url
         FROM crawls c JOIN urls u ON u.id = c.url_id
         WHERE c.id = ?1",
        params![crawl_id],
        |row| {
            Ok(CrawlJob {
                crawl_id: row.get(0)?,
                workflow_id: row.get(1)?,
                user_id: row.get(2)?,
                url_id: row.get(3)?,
                url: row.get(4)?,
            })
        },
    )
    .optional()?
    .ok_or(StorageError::CrawlNotFound(crawl_id))
}

impl Storage for SqliteStorage {
    // ===== URL Lookup =====

    fn insert_url(
        &mut self,
        user_id: &str,
        normalized_url: &str,
        domain: &str,
    ) -> StorageResult<i64> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM urls WHERE user_id = ?1 AND normalized_url = ?2",
                params![user_id, normalized_url],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO urls (user_id, normalized_url, domain, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, normalized_url, domain, timestamp_now()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_url_for_user(&self, url_id: i64, user_id: &str) -> StorageResult<Option<UrlRecord>> {
        let url = self
            .conn
            .query_row(
                "SELECT id, user_id, normalized_url, domain FROM urls WHERE id = ?1 AND user_id = ?2",
                params![url_id, user_id],
                |row| {
                    Ok(UrlRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        normalized_url: row.get(2)?,
                        domain: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(url)
    }

    // ===== Crawl Creation & Lookup =====

    fn count_active_crawls(&self, url_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM crawls WHERE url_id = ?1 AND status IN ('queued', 'running')",
            params![url_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn queue_crawl(&mut self, url_id: i64, workflow_id: &str) -> StorageResult<Option<i64>> {
        // The partial unique index turns a concurrent second submission into a no-op
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO crawls (url_id, status, queued_at, workflow_id) VALUES (?1, ?2, ?3, ?4)",
            params![
                url_id,
                CrawlStatus::Queued.to_db_string(),
                timestamp_now(),
                workflow_id
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }
        Ok(Some(self.conn.last_insert_rowid()))
    }

    fn get_crawl(&self, crawl_id: i64) -> StorageResult<CrawlRecord> {
        self.conn
            .query_row(
                &format!("SELECT {CRAWL_COLUMNS} FROM crawls WHERE id = ?1"),
                params![crawl_id],
                crawl_from_row,
            )
            .optional()?
            .ok_or(StorageError::CrawlNotFound(crawl_id))
    }

    fn get_crawl_by_workflow_id(&self, workflow_id: &str) -> StorageResult<Option<CrawlRecord>> {
        let crawl = self
            .conn
            .query_row(
                &format!("SELECT {CRAWL_COLUMNS} FROM crawls WHERE workflow_id = ?1"),
                params![workflow_id],
                crawl_from_row,
            )
            .optional()?;
        Ok(crawl)
    }

    fn get_latest_crawl_for_url(&self, url_id: i64) -> StorageResult<Option<CrawlRecord>> {
        let crawl = self
            .conn
            .query_row(
                &format!(
                    "SELECT {CRAWL_COLUMNS} FROM crawls WHERE url_id = ?1 ORDER BY id DESC LIMIT 1"
                ),
                params![url_id],
                crawl_from_row,
            )
            .optional()?;
        Ok(crawl)
    }

    fn list_active_crawls(&self, url_id: i64) -> StorageResult<Vec<CrawlRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CRAWL_COLUMNS} FROM crawls
             WHERE url_id = ?1 AND status IN ('queued', 'running') ORDER BY id"
        ))?;

        let crawls = stmt
            .query_map(params![url_id], crawl_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(crawls)
    }

    fn get_crawl_job(&self, crawl_id: i64) -> StorageResult<CrawlJob> {
        load_job(&self.conn, crawl_id)
    }

    // ===== Status Transitions =====

    fn set_crawl_running(&mut self, crawl_id: i64) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE crawls SET status = 'running', started_at = ?1, attempts = attempts + 1,
             error_message = NULL
             WHERE id = ?2 AND status = 'queued'",
            params![timestamp_now(), crawl_id],
        )?;
        Ok(changed > 0)
    }

    fn requeue_crawl(&mut self, crawl_id: i64, error_message: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE crawls SET status = 'queued', last_attempt_error = ?1, error_message = NULL
             WHERE id = ?2 AND status = 'running'",
            params![error_message, crawl_id],
        )?;
        Ok(changed > 0)
    }

    fn set_crawl_error(&mut self, crawl_id: i64, error_message: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE crawls SET status = 'error', error_message = ?1, finished_at = ?2
             WHERE id = ?3 AND status IN ('queued', 'running')",
            params![error_message, timestamp_now(), crawl_id],
        )?;
        Ok(changed > 0)
    }

    fn set_crawl_stopped(&mut self, crawl_id: i64) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE crawls SET status = 'stopped', finished_at = ?1, error_message = NULL
             WHERE id = ?2 AND status IN ('queued', 'running')",
            params![timestamp_now(), crawl_id],
        )?;
        Ok(changed > 0)
    }

    fn complete_crawl(
        &mut self,
        crawl_id: i64,
        result: &CrawlResult,
        links: &[DiscoveredLink],
    ) -> StorageResult<bool> {
        let mut tx = self.conn.transaction()?;

        let mut saved = 0usize;
        for link in links {
            // A rejected link rolls back to its savepoint and is skipped
            let sp = tx.savepoint()?;
            let inserted = sp.execute(
                "INSERT INTO discovered_links (crawl_id, href, absolute_url, is_internal, status_code, anchor_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    crawl_id,
                    link.href,
                    link.absolute_url,
                    link.is_internal as i64,
                    link.status_code,
                    (!link.anchor_text.is_empty()).then_some(link.anchor_text.as_str()),
                ],
            );
            match inserted {
                Ok(_) => {
                    sp.commit()?;
                    saved += 1;
                }
                Err(e) => tracing::warn!(
                    crawl_id,
                    href = %link.href,
                    error = %e,
                    "Failed to save discovered link"
                ),
            }
        }

        let [h1, h2, h3, h4, h5, h6] = result.heading_counts;
        let changed = tx.execute(
            "UPDATE crawls SET status = 'done', finished_at = ?1, html_version = ?2, page_title = ?3,
             h1_count = ?4, h2_count = ?5, h3_count = ?6, h4_count = ?7, h5_count = ?8, h6_count = ?9,
             internal_links_count = ?10, external_links_count = ?11, inaccessible_links_count = ?12,
             has_login_form = ?13, error_message = NULL
             WHERE id = ?14 AND status = 'running'",
            params![
                timestamp_now(),
                result.html_version,
                (!result.page_title.is_empty()).then_some(result.page_title.as_str()),
                h1,
                h2,
                h3,
                h4,
                h5,
                h6,
                result.internal_links_count,
                result.external_links_count,
                result.inaccessible_links_count,
                result.has_login_form as i64,
                crawl_id
            ],
        )?;

        // Links of a crawl that is no longer running are not kept
        if changed == 0 {
            tx.rollback()?;
            return Ok(false);
        }

        tx.commit()?;
        tracing::debug!(crawl_id, saved, "Discovered links saved");
        Ok(true)
    }

    // ===== Discovered Links =====

    fn list_discovered_links(&self, crawl_id: i64) -> StorageResult<Vec<DiscoveredLinkRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, crawl_id, href, absolute_url, is_internal, status_code, anchor_text
             FROM discovered_links WHERE crawl_id = ?1 ORDER BY id",
        )?;

        let links = stmt
            .query_map(params![crawl_id], |row| {
                Ok(DiscoveredLinkRecord {
                    id: row.get(0)?,
                    crawl_id: row.get(1)?,
                    href: row.get(2)?,
                    absolute_url: row.get(3)?,
                    is_internal: row.get::<_, i64>(4)? != 0,
                    status_code: row.get(5)?,
                    anchor_text: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(links)
    }

    // ===== Worker Hand-off =====

    fn claim_crawl(&mut self, crawl_id: i64, worker_id: &str) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE crawls SET claimed_by = ?1
             WHERE id = ?2 AND claimed_by IS NULL AND status IN ('queued', 'running')",
            params![worker_id, crawl_id],
        )?;
        Ok(changed > 0)
    }

    fn claim_due_crawls(&mut self, worker_id: &str, limit: usize) -> StorageResult<Vec<CrawlJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let tx = self.conn.transaction()?;
        let candidates: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM crawls WHERE status = 'queued' AND claimed_by IS NULL
                 ORDER BY id LIMIT ?1",
            )?;
            let ids = stmt
                .query_map(params![limit as i64], |row| row.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        let mut jobs = Vec::with_capacity(candidates.len());
        for crawl_id in candidates {
            let claimed = tx.execute(
                "UPDATE crawls SET claimed_by = ?1 WHERE id = ?2 AND claimed_by IS NULL",
                params![worker_id, crawl_id],
            )?;
            if claimed > 0 {
                jobs.push(load_job(&tx, crawl_id)?);
            }
        }
        tx.commit()?;

        Ok(jobs)
    }

    fn release_crawl(&mut self, crawl_id: i64) -> StorageResult<bool> {
        let changed = self.conn.execute(
            "UPDATE crawls SET status = 'queued', claimed_by = NULL, error_message = NULL
             WHERE id = ?1 AND status IN ('queued', 'running')",
            params![crawl_id],
        )?;
        Ok(changed > 0)
    }

    fn fail_stale_running(&mut self, cutoff: &str, error_message: &str) -> StorageResult<u64> {
        let changed = self.conn.execute(
            "UPDATE crawls SET status = 'error', error_message = ?1, finished_at = ?2
             WHERE (status = 'running' AND started_at < ?3)
                OR (status = 'queued' AND claimed_by IS NOT NULL AND queued_at < ?3)",
            params![error_message, timestamp_now(), cutoff],
        )?;
        Ok(changed as u64)
    }
}
