//! Supervision of one crawl execution across its attempts

use crate::crawler::{AttemptInfo, CrawlJob, Heartbeat, INCOMPLETE_MESSAGE};
use crate::orchestrator::Inner;
use crate::storage::{lock, Storage};
use crate::PageProbeError;
use std::any::Any;
use std::sync::Arc;
use tokio::time::{interval_at, sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// How a single attempt ended, as seen by its supervisor
#[derive(Debug)]
enum AttemptOutcome {
    Completed,
    Failed { message: String, retryable: bool },
    /// The crawl left the active states (stopped or finished elsewhere)
    NotActive,
    Cancelled,
    AttemptTimedOut,
    HeartbeatTimedOut,
    DeadlineExceeded,
}

/// Runs the retry loop for `job` until it succeeds, fails for good, is
/// cancelled, or exceeds the overall timeout
pub(crate) async fn supervise(inner: Arc<Inner>, job: CrawlJob, token: CancellationToken) {
    let policy = &inner.policy;
    let deadline = Instant::now() + policy.overall_timeout();
    let mut last_error: Option<String> = None;

    tracing::debug!(
        crawl_id = job.crawl_id,
        workflow_id = %job.workflow_id,
        "Supervising crawl"
    );

    let started = tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(policy.start_delay()) => true,
    };

    if started {
        for attempt in 1..=policy.max_attempts {
            if !crawl_is_active(&inner, job.crawl_id) {
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&inner.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = token.cancelled() => break,
                _ = sleep_until(deadline) => {
                    last_error = Some("crawl timed out waiting for a worker slot".to_string());
                    break;
                }
            };

            let info = AttemptInfo {
                attempt,
                max_attempts: policy.max_attempts,
            };
            let outcome = run_attempt(&inner, &job, info, &token, deadline).await;
            drop(permit);

            tracing::debug!(crawl_id = job.crawl_id, attempt, outcome = ?outcome, "Attempt finished");

            match outcome {
                AttemptOutcome::Completed
                | AttemptOutcome::NotActive
                | AttemptOutcome::Cancelled => break,
                AttemptOutcome::DeadlineExceeded => {
                    last_error = Some("crawl exceeded its overall timeout".to_string());
                    break;
                }
                AttemptOutcome::Failed { message, retryable } => {
                    last_error = Some(message);
                    if !retryable {
                        break;
                    }
                }
                AttemptOutcome::AttemptTimedOut => {
                    last_error = Some("crawl attempt timed out".to_string());
                }
                AttemptOutcome::HeartbeatTimedOut => {
                    last_error = Some("crawl attempt stopped sending heartbeats".to_string());
                }
            }

            if attempt == policy.max_attempts {
                break;
            }

            let backoff = policy.backoff_after(attempt);
            tracing::info!(
                crawl_id = job.crawl_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying crawl after backoff"
            );
            let proceed = tokio::select! {
                _ = token.cancelled() => false,
                _ = sleep_until(deadline) => {
                    last_error = Some("crawl exceeded its overall timeout".to_string());
                    false
                }
                _ = sleep(backoff) => true,
            };
            if !proceed {
                break;
            }
        }
    }

    finalize(&inner, &job, &token, last_error).await;
}

/// Executes one attempt under the attempt timeout, heartbeat liveness and
/// cancellation
async fn run_attempt(
    inner: &Arc<Inner>,
    job: &CrawlJob,
    info: AttemptInfo,
    token: &CancellationToken,
    overall_deadline: Instant,
) -> AttemptOutcome {
    let policy = &inner.policy;
    let heartbeat = Heartbeat::new(policy.heartbeat_interval());
    let mut beats = heartbeat.subscribe();

    let task = Arc::clone(&inner.task);
    let attempt_job = job.clone();
    let mut handle = tokio::spawn(async move { task.run(&attempt_job, info, &heartbeat).await });

    let attempt_deadline = (Instant::now() + policy.attempt_timeout()).min(overall_deadline);
    let liveness = sleep(policy.heartbeat_timeout());
    tokio::pin!(liveness);
    let poll_every = policy.cancel_poll_interval();
    let mut stop_poll = interval_at(Instant::now() + poll_every, poll_every);
    let mut beats_open = true;

    let outcome = loop {
        tokio::select! {
            joined = &mut handle => {
                return match joined {
                    Ok(Ok(_)) => AttemptOutcome::Completed,
                    Ok(Err(PageProbeError::CrawlNotActive(_))) => AttemptOutcome::NotActive,
                    Ok(Err(e)) => AttemptOutcome::Failed {
                        message: e.to_string(),
                        retryable: e.is_retryable(),
                    },
                    Err(join_error) if join_error.is_panic() => {
                        let message = panic_message(join_error.into_panic());
                        tracing::error!(crawl_id = job.crawl_id, panic = %message, "Crawl attempt panicked");
                        AttemptOutcome::Failed {
                            message: PageProbeError::Panicked(message).to_string(),
                            retryable: true,
                        }
                    }
                    Err(_) => AttemptOutcome::Cancelled,
                };
            }
            _ = token.cancelled() => break AttemptOutcome::Cancelled,
            _ = sleep_until(attempt_deadline) => {
                break if attempt_deadline >= overall_deadline {
                    AttemptOutcome::DeadlineExceeded
                } else {
                    AttemptOutcome::AttemptTimedOut
                };
            }
            changed = beats.changed(), if beats_open => {
                if changed.is_ok() {
                    liveness.as_mut().reset(Instant::now() + policy.heartbeat_timeout());
                } else {
                    beats_open = false;
                }
            }
            _ = &mut liveness => break AttemptOutcome::HeartbeatTimedOut,
            _ = stop_poll.tick() => {
                if !crawl_is_active(inner, job.crawl_id) {
                    tracing::info!(crawl_id = job.crawl_id, "Crawl stopped elsewhere, cancelling attempt");
                    break AttemptOutcome::NotActive;
                }
            }
        }
    };

    // Dropping the attempt future lets its completion guard record the outcome
    handle.abort();
    let _ = handle.await;

    if matches!(
        outcome,
        AttemptOutcome::AttemptTimedOut | AttemptOutcome::HeartbeatTimedOut
    ) {
        tracing::warn!(
            crawl_id = job.crawl_id,
            attempt = info.attempt,
            outcome = ?outcome,
            "Crawl attempt aborted"
        );
    }

    outcome
}

/// Leaves the crawl in a state consistent with how supervision ended
async fn finalize(
    inner: &Arc<Inner>,
    job: &CrawlJob,
    token: &CancellationToken,
    last_error: Option<String>,
) {
    inner.deregister(&job.workflow_id);

    if !crawl_is_active(inner, job.crawl_id) {
        return;
    }

    // Shutting down: hand the crawl back to the queue for the next worker
    if inner.shutdown.is_cancelled() && token.is_cancelled() {
        match lock(&inner.storage).release_crawl(job.crawl_id) {
            Ok(true) => tracing::info!(crawl_id = job.crawl_id, "Crawl released for another worker"),
            Ok(false) => {}
            Err(e) => tracing::error!(crawl_id = job.crawl_id, error = %e, "Failed to release crawl"),
        }
        return;
    }

    let message = last_error.unwrap_or_else(|| INCOMPLETE_MESSAGE.to_string());
    let marked = lock(&inner.storage).set_crawl_error(job.crawl_id, &message);
    match marked {
        Ok(true) => {
            tracing::error!(crawl_id = job.crawl_id, error = %message, "Crawl failed");
            inner
                .task
                .notifier()
                .notify_crawl_update(&job.user_id, job.url_id)
                .await;
        }
        Ok(false) => {}
        Err(e) => tracing::error!(crawl_id = job.crawl_id, error = %e, "Failed to mark crawl failed"),
    }
}

fn crawl_is_active(inner: &Inner, crawl_id: i64) -> bool {
    match lock(&inner.storage).get_crawl(crawl_id) {
        Ok(crawl) => crawl.status.is_active(),
        Err(e) => {
            tracing::warn!(crawl_id, error = %e, "Failed to read crawl status");
            false
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
