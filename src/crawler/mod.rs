//! Crawler module for fetching and analyzing a single page
//!
//! This module contains the crawl execution logic, including:
//! - HTTP fetching of the crawled page
//! - Link reachability probing
//! - The crawl attempt and its completion guarantee
//! - Heartbeats reported to the orchestrator
//! - Submission and stop operations

mod fetcher;
mod heartbeat;
mod prober;
mod service;
mod task;

pub use fetcher::{build_page_client, fetch_page, FetchedPage};
pub use heartbeat::{Beat, Heartbeat};
pub use prober::HttpProber;
pub use service::{new_workflow_id, CrawlService, SubmitOutcome, WorkflowEngine};
pub use task::{AttemptInfo, CrawlTask, PageAnalysis, INCOMPLETE_MESSAGE};

pub use crate::storage::CrawlJob;
