//! Engine for a server process that runs no crawls itself

use crate::crawler::{CrawlJob, WorkflowEngine};
use crate::PageProbeError;

/// Leaves submitted crawls in the queue for a separate worker process
///
/// The queued row is the hand-off: a worker claims it by polling. Stops are
/// observed by the worker's supervisors through the stored status, so
/// there is nothing to signal from here.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueHandoff;

impl WorkflowEngine for QueueHandoff {
    fn start(&self, job: CrawlJob) -> Result<(), PageProbeError> {
        tracing::debug!(
            crawl_id = job.crawl_id,
            workflow_id = %job.workflow_id,
            "Crawl queued for a worker"
        );
        Ok(())
    }

    fn cancel(&self, workflow_id: &str) -> bool {
        tracing::debug!(workflow_id, "Stop will be observed by the owning worker");
        false
    }
}
