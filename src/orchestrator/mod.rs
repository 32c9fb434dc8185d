//! In-process durable task engine for crawls
//!
//! The queued crawl row is the durable record of a submission. An
//! orchestrator claims queued crawls, either directly when a crawl is
//! submitted in the same process or by polling the database, and runs one
//! supervisor task per claimed crawl. A supervisor provides:
//! - A grace delay before the first attempt
//! - Bounded retries with exponential backoff
//! - Per-attempt and overall timeouts
//! - Heartbeat-based detection of hung attempts
//! - Cancellation by workflow id, and by observing `stopped` in storage
//!
//! Attempts across all supervisors are capped by a semaphore.

mod handoff;
mod supervisor;

pub use handoff::QueueHandoff;

use crate::config::{Config, OrchestratorConfig};
use crate::crawler::{CrawlJob, CrawlTask, WorkflowEngine, INCOMPLETE_MESSAGE};
use crate::storage::{lock, timestamp_now, SharedStorage, Storage};
use crate::PageProbeError;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// State shared by the orchestrator handle and its supervisors
pub(crate) struct Inner {
    worker_id: String,
    storage: SharedStorage,
    task: Arc<CrawlTask>,
    policy: OrchestratorConfig,
    concurrency: usize,
    permits: Arc<Semaphore>,
    cancellations: Mutex<HashMap<String, CancellationToken>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Inner {
    fn deregister(&self, workflow_id: &str) {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(workflow_id);
    }
}

/// Runs crawls with retry, timeout, liveness and cancellation
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Creates an orchestrator using the configured policy and concurrency
    pub fn new(config: &Config, storage: SharedStorage, task: CrawlTask) -> Self {
        Self::with_policy(
            config.orchestrator.clone(),
            config.worker.concurrency as usize,
            storage,
            task,
        )
    }

    /// Creates an orchestrator with an explicit policy
    pub fn with_policy(
        policy: OrchestratorConfig,
        concurrency: usize,
        storage: SharedStorage,
        task: CrawlTask,
    ) -> Self {
        let concurrency = concurrency.max(1);
        let worker_id = format!("worker-{}", Uuid::new_v4());
        tracing::debug!(worker_id = %worker_id, concurrency, "Orchestrator created");

        Self {
            inner: Arc::new(Inner {
                worker_id,
                storage,
                task: Arc::new(task),
                policy,
                concurrency,
                permits: Arc::new(Semaphore::new(concurrency)),
                cancellations: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.inner.worker_id
    }

    /// Number of crawls currently supervised
    pub fn active_count(&self) -> usize {
        self.inner
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Fails crawls abandoned by a previous worker
    ///
    /// Anything running, or claimed but never started, for longer than the
    /// overall timeout cannot still be owned by a live supervisor.
    pub fn recover(&self) -> Result<u64, PageProbeError> {
        let overall_secs = i64::try_from(self.inner.policy.overall_timeout_secs).unwrap_or(i64::MAX);
        let cutoff = chrono::Duration::try_seconds(overall_secs)
            .and_then(|overall| Utc::now().checked_sub_signed(overall))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let recovered = lock(&self.inner.storage).fail_stale_running(&cutoff, INCOMPLETE_MESSAGE)?;
        if recovered > 0 {
            tracing::warn!(recovered, "Marked abandoned crawls as failed");
        }
        Ok(recovered)
    }

    /// Polls storage for queued crawls until shutdown
    ///
    /// Claims only as many crawls as there are free supervisor slots, so
    /// other workers sharing the database get the rest.
    pub async fn run_worker(&self, poll_interval: Duration) -> Result<(), PageProbeError> {
        tracing::info!(
            worker_id = %self.inner.worker_id,
            concurrency = self.inner.concurrency,
            started_at = %timestamp_now(),
            "Worker polling for queued crawls"
        );

        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let free = self.inner.concurrency.saturating_sub(self.active_count());
            if free == 0 {
                continue;
            }

            let claimed = lock(&self.inner.storage).claim_due_crawls(&self.inner.worker_id, free);
            match claimed {
                Ok(jobs) => {
                    for job in jobs {
                        tracing::info!(crawl_id = job.crawl_id, workflow_id = %job.workflow_id, "Claimed queued crawl");
                        self.launch(job);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Failed to claim queued crawls"),
            }
        }

        tracing::info!(worker_id = %self.inner.worker_id, "Worker stopped polling");
        Ok(())
    }

    /// Starts supervising a crawl this orchestrator has claimed
    fn launch(&self, job: CrawlJob) {
        let token = self.inner.shutdown.child_token();
        self.inner
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.workflow_id.clone(), token.clone());

        let inner = Arc::clone(&self.inner);
        self.inner
            .tracker
            .spawn(supervisor::supervise(inner, job, token));
    }

    /// Stops polling and cancels every supervised crawl
    ///
    /// Interrupted crawls are released back to the queue.
    pub fn shutdown(&self) {
        tracing::info!(active = self.active_count(), "Orchestrator shutting down");
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
    }

    /// Waits until every supervisor has finished
    pub async fn wait(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl WorkflowEngine for Orchestrator {
    fn start(&self, job: CrawlJob) -> Result<(), PageProbeError> {
        if self.inner.shutdown.is_cancelled() {
            // Left queued and unclaimed for the next worker
            tracing::info!(crawl_id = job.crawl_id, "Orchestrator shutting down, leaving crawl queued");
            return Ok(());
        }

        if !lock(&self.inner.storage).claim_crawl(job.crawl_id, &self.inner.worker_id)? {
            tracing::debug!(crawl_id = job.crawl_id, "Crawl already claimed by another worker");
            return Ok(());
        }

        self.launch(job);
        Ok(())
    }

    fn cancel(&self, workflow_id: &str) -> bool {
        let token = self
            .inner
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned();

        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
