//! Submission and stop operations exposed to the HTTP layer

use crate::notify::Notifier;
use crate::storage::{lock, CrawlJob, SharedStorage, Storage};
use crate::PageProbeError;
use std::sync::Arc;
use uuid::Uuid;

/// Executes submitted crawls
///
/// `start` hands over a queued crawl. `cancel` signals the execution with
/// the given workflow id and returns false if this engine is not running it.
pub trait WorkflowEngine: Send + Sync {
    fn start(&self, job: CrawlJob) -> Result<(), PageProbeError>;
    fn cancel(&self, workflow_id: &str) -> bool;
}

/// Generates a workflow correlation id: `crawl_<url_id>_<uuid>`
pub fn new_workflow_id(url_id: i64) -> String {
    format!("crawl_{}_{}", url_id, Uuid::new_v4())
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new crawl was queued and handed to the engine
    Submitted { crawl_id: i64, workflow_id: String },
    /// A crawl for this URL is already queued or running
    AlreadyActive,
}

/// Entry point for starting and stopping crawls on behalf of users
#[derive(Clone)]
pub struct CrawlService {
    storage: SharedStorage,
    engine: Arc<dyn WorkflowEngine>,
    notifier: Arc<dyn Notifier>,
}

impl CrawlService {
    pub fn new(
        storage: SharedStorage,
        engine: Arc<dyn WorkflowEngine>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            storage,
            engine,
            notifier,
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Queues a crawl for a URL the user owns
    ///
    /// Submitting while a crawl is active is a successful no-op.
    ///
    /// # Errors
    ///
    /// * `UrlNotFound` - the URL does not exist or belongs to another user
    /// * storage errors, or the engine refusing the job
    pub fn submit_crawl(&self, user_id: &str, url_id: i64) -> Result<SubmitOutcome, PageProbeError> {
        let job = {
            let mut storage = lock(&self.storage);

            let url = storage
                .get_url_for_user(url_id, user_id)?
                .ok_or_else(|| PageProbeError::UrlNotFound {
                    url_id,
                    user_id: user_id.to_string(),
                })?;

            if storage.count_active_crawls(url_id)? > 0 {
                tracing::debug!(url_id, "Crawl already active, ignoring submission");
                return Ok(SubmitOutcome::AlreadyActive);
            }

            let workflow_id = new_workflow_id(url_id);
            let Some(crawl_id) = storage.queue_crawl(url_id, &workflow_id)? else {
                return Ok(SubmitOutcome::AlreadyActive);
            };

            CrawlJob {
                crawl_id,
                workflow_id,
                user_id: user_id.to_string(),
                url_id,
                url: url.normalized_url,
            }
        };

        if let Err(e) = self.engine.start(job.clone()) {
            tracing::error!(crawl_id = job.crawl_id, error = %e, "Failed to start crawl workflow");
            let message = format!("failed to start workflow: {}", e);
            if let Err(store_err) = lock(&self.storage).set_crawl_error(job.crawl_id, &message) {
                tracing::error!(crawl_id = job.crawl_id, error = %store_err, "Failed to record start failure");
            }
            return Err(e);
        }

        tracing::info!(
            crawl_id = job.crawl_id,
            workflow_id = %job.workflow_id,
            user_id,
            url_id,
            "Crawl submitted"
        );

        Ok(SubmitOutcome::Submitted {
            crawl_id: job.crawl_id,
            workflow_id: job.workflow_id,
        })
    }

    /// Stops every active crawl of a URL the user owns
    ///
    /// Each crawl is marked `stopped` before its execution is cancelled.
    /// Crawls that already reached a terminal state are left untouched.
    /// Returns the number of crawls stopped.
    pub async fn stop_crawl(&self, user_id: &str, url_id: i64) -> Result<usize, PageProbeError> {
        let stopped: Vec<String> = {
            let mut storage = lock(&self.storage);

            if storage.get_url_for_user(url_id, user_id)?.is_none() {
                return Err(PageProbeError::UrlNotFound {
                    url_id,
                    user_id: user_id.to_string(),
                });
            }

            let mut stopped = Vec::new();
            for crawl in storage.list_active_crawls(url_id)? {
                if storage.set_crawl_stopped(crawl.id)? {
                    stopped.push(crawl.workflow_id);
                }
            }
            stopped
        };

        for workflow_id in &stopped {
            let signalled = self.engine.cancel(workflow_id);
            tracing::info!(workflow_id = %workflow_id, signalled, "Crawl stopped");
        }

        if !stopped.is_empty() {
            self.notifier.notify_crawl_update(user_id, url_id).await;
        }

        Ok(stopped.len())
    }
}
