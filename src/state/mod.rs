//! State module for the crawl lifecycle
//!
//! `CrawlStatus` is the state machine every Crawl record moves through:
//!
//! ```text
//! queued --(attempt starts)--> running --(success)--> done
//! running --(failure, retry allowed)--> queued
//! running --(failure)--> error
//! queued | running --(explicit stop)--> stopped
//! ```
//!
//! `done`, `error` and `stopped` are terminal.

mod crawl_status;

pub use crawl_status::CrawlStatus;
