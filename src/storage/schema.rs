//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the PageProbe database.
//! The `urls` table belongs to the URL bookkeeping collaborator; it is created
//! here so ownership lookups have something to join against.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- URLs registered by users
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    normalized_url TEXT NOT NULL,
    domain TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, normalized_url)
);

CREATE INDEX IF NOT EXISTS idx_urls_user ON urls(user_id);

-- One row per crawl attempt chain
CREATE TABLE IF NOT EXISTS crawls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    status TEXT NOT NULL,
    queued_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    html_version TEXT,
    page_title TEXT,
    h1_count INTEGER,
    h2_count INTEGER,
    h3_count INTEGER,
    h4_count INTEGER,
    h5_count INTEGER,
    h6_count INTEGER,
    internal_links_count INTEGER,
    external_links_count INTEGER,
    inaccessible_links_count INTEGER,
    has_login_form INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    last_attempt_error TEXT,
    workflow_id TEXT NOT NULL UNIQUE,
    attempts INTEGER NOT NULL DEFAULT 0,
    claimed_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_crawls_url ON crawls(url_id);
CREATE INDEX IF NOT EXISTS idx_crawls_status ON crawls(status);

-- At most one queued/running crawl per URL
CREATE UNIQUE INDEX IF NOT EXISTS idx_crawls_one_active
    ON crawls(url_id) WHERE status IN ('queued', 'running');

-- Anchors found on a crawled page
CREATE TABLE IF NOT EXISTS discovered_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id INTEGER NOT NULL REFERENCES crawls(id),
    href TEXT NOT NULL,
    absolute_url TEXT NOT NULL,
    is_internal INTEGER NOT NULL,
    status_code INTEGER,
    anchor_text TEXT
);

CREATE INDEX IF NOT EXISTS idx_discovered_links_crawl ON discovered_links(crawl_id);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        assert!(initialize_schema(&conn).is_ok());
    }

    #[test]
    fn test_tables_exist_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        for table in ["urls", "crawls", "discovered_links"] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_second_active_crawl_violates_index() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO urls (user_id, normalized_url, domain, created_at) VALUES ('u', 'https://a.test/', 'a.test', 'now')",
            [],
        )
        .unwrap();

        let insert = "INSERT INTO crawls (url_id, status, queued_at, workflow_id) VALUES (1, ?1, 'now', ?2)";
        conn.execute(insert, ["queued", "wf-1"]).unwrap();
        assert!(conn.execute(insert, ["running", "wf-2"]).is_err());
        assert!(conn.execute(insert, ["done", "wf-3"]).is_ok());
    }
}
