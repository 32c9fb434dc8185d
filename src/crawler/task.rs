//! A single crawl attempt
//!
//! The attempt marks the crawl running, fetches and analyzes the page,
//! persists links and metadata, and marks the crawl done. Whatever happens,
//! the crawl does not stay `running` once the attempt ends: a completion
//! guard records a failure when the normal path did not, including on panic
//! and when the attempt future is dropped by its supervisor.

use crate::analyzer::{analyze_document, classify_links, discover_anchors, LinkAnalysis, LinkDetail, LinkProber, PageMetadata};
use crate::config::{Config, FetcherConfig};
use crate::crawler::fetcher::{build_page_client, fetch_page};
use crate::crawler::heartbeat::Heartbeat;
use crate::crawler::prober::HttpProber;
use crate::notify::Notifier;
use crate::storage::{lock, CrawlJob, CrawlResult, DiscoveredLink, SharedStorage, Storage};
use crate::PageProbeError;
use reqwest::Client;
use scraper::Html;
use std::sync::Arc;
use url::Url;

/// Message recorded when an attempt ends without reaching a terminal write
pub const INCOMPLETE_MESSAGE: &str = "crawl did not complete";

/// Position of an attempt within the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptInfo {
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
}

impl AttemptInfo {
    /// An attempt that will not be retried
    pub fn single() -> Self {
        Self {
            attempt: 1,
            max_attempts: 1,
        }
    }

    pub fn is_final(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Page metadata and classified links of one fetched page
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub metadata: PageMetadata,
    pub links: LinkAnalysis,
}

impl PageAnalysis {
    fn to_result(&self) -> CrawlResult {
        CrawlResult {
            html_version: self.metadata.html_version.to_string(),
            page_title: self.metadata.title.clone(),
            heading_counts: self.metadata.heading_counts,
            internal_links_count: self.links.counts.internal,
            external_links_count: self.links.counts.external,
            inaccessible_links_count: self.links.counts.inaccessible,
            has_login_form: self.metadata.has_login_form,
        }
    }
}

fn to_discovered_link(link: &LinkDetail) -> DiscoveredLink {
    DiscoveredLink {
        href: link.href.clone(),
        absolute_url: link.absolute_url.clone(),
        is_internal: link.is_internal,
        status_code: link.status_code,
        anchor_text: link.anchor_text.clone(),
    }
}

/// Executes crawl attempts
pub struct CrawlTask {
    storage: SharedStorage,
    notifier: Arc<dyn Notifier>,
    page_client: Client,
    prober: Arc<dyn LinkProber>,
    fetcher: FetcherConfig,
}

impl CrawlTask {
    /// Builds a task with HTTP clients derived from the configuration
    pub fn new(
        config: &Config,
        storage: SharedStorage,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, PageProbeError> {
        let page_client = build_page_client(&config.user_agent, &config.fetcher)?;
        let prober = HttpProber::new(&config.user_agent, &config.fetcher)?;
        Ok(Self::with_parts(
            storage,
            notifier,
            page_client,
            Arc::new(prober),
            config.fetcher.clone(),
        ))
    }

    /// Builds a task from explicit parts
    pub fn with_parts(
        storage: SharedStorage,
        notifier: Arc<dyn Notifier>,
        page_client: Client,
        prober: Arc<dyn LinkProber>,
        fetcher: FetcherConfig,
    ) -> Self {
        Self {
            storage,
            notifier,
            page_client,
            prober,
            fetcher,
        }
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Runs one attempt for `job`
    ///
    /// On failure the crawl is returned to `queued` when another attempt may
    /// follow, and marked `error` otherwise. Either way a notification is
    /// sent before returning.
    ///
    /// # Errors
    ///
    /// * `CrawlNotActive` - the crawl was not queued, or was stopped while running
    /// * any fetch or persistence error that ended the attempt
    pub async fn run(
        &self,
        job: &CrawlJob,
        attempt: AttemptInfo,
        heartbeat: &Heartbeat,
    ) -> Result<CrawlResult, PageProbeError> {
        let started = lock(&self.storage).set_crawl_running(job.crawl_id)?;
        if !started {
            tracing::info!(
                crawl_id = job.crawl_id,
                "Crawl is no longer queued, skipping attempt"
            );
            return Err(PageProbeError::CrawlNotActive(job.crawl_id));
        }

        let mut guard = CompletionGuard {
            storage: Arc::clone(&self.storage),
            notifier: Arc::clone(&self.notifier),
            crawl_id: job.crawl_id,
            user_id: job.user_id.clone(),
            url_id: job.url_id,
            retry_allowed: !attempt.is_final(),
            armed: true,
        };

        tracing::info!(
            crawl_id = job.crawl_id,
            workflow_id = %job.workflow_id,
            url = %job.url,
            attempt = attempt.attempt,
            "Crawl started"
        );
        self.notifier
            .notify_crawl_update(&job.user_id, job.url_id)
            .await;

        let outcome = {
            let _ticker = heartbeat.start_ticker();
            match self.execute(job, heartbeat).await {
                Ok(analysis) => {
                    heartbeat.beat("Saving results");
                    self.persist(job, &analysis)
                }
                Err(e) => Err(e),
            }
        };

        let result = match outcome {
            Ok(result) => {
                tracing::info!(
                    crawl_id = job.crawl_id,
                    internal = result.internal_links_count,
                    external = result.external_links_count,
                    inaccessible = result.inaccessible_links_count,
                    "Crawl completed"
                );
                Ok(result)
            }
            Err(PageProbeError::CrawlNotActive(id)) => {
                // A stop already recorded the terminal state and notified
                guard.disarm();
                tracing::info!(crawl_id = id, "Crawl was stopped during the attempt");
                return Err(PageProbeError::CrawlNotActive(id));
            }
            Err(e) => {
                self.record_failure(job, &e, attempt);
                Err(e)
            }
        };

        guard.disarm();
        self.notifier
            .notify_crawl_update(&job.user_id, job.url_id)
            .await;
        result
    }

    /// Fetches, parses and analyzes the page
    async fn execute(
        &self,
        job: &CrawlJob,
        heartbeat: &Heartbeat,
    ) -> Result<PageAnalysis, PageProbeError> {
        let url = Url::parse(&job.url)?;
        let page = fetch_page(&self.page_client, &url).await?;
        heartbeat.beat("HTTP response received");
        tracing::debug!(
            crawl_id = job.crawl_id,
            final_url = %page.final_url,
            bytes = page.body.len(),
            "Page fetched"
        );

        // The parsed tree is not Send and must be gone before the probes run
        let (metadata, anchors) = {
            heartbeat.beat("Parsing HTML");
            let document = Html::parse_document(&page.body);
            heartbeat.beat("Extracting metadata");
            (
                analyze_document(&document),
                discover_anchors(&document, &page.final_url),
            )
        };

        let every = self.fetcher.heartbeat_every_links.max(1);
        let links = classify_links(
            anchors,
            &page.final_url,
            self.prober.as_ref(),
            self.fetcher.probe_concurrency,
            |done, total| {
                if done % every == 0 || done == total {
                    heartbeat.beat(format!("Processed {}/{} links", done, total));
                }
            },
        )
        .await;

        Ok(PageAnalysis { metadata, links })
    }

    /// Writes links and metadata and marks the crawl done
    fn persist(
        &self,
        job: &CrawlJob,
        analysis: &PageAnalysis,
    ) -> Result<CrawlResult, PageProbeError> {
        let links: Vec<DiscoveredLink> = analysis
            .links
            .links
            .iter()
            .map(to_discovered_link)
            .collect();
        let result = analysis.to_result();

        if !lock(&self.storage).complete_crawl(job.crawl_id, &result, &links)? {
            return Err(PageProbeError::CrawlNotActive(job.crawl_id));
        }
        Ok(result)
    }

    fn record_failure(&self, job: &CrawlJob, error: &PageProbeError, attempt: AttemptInfo) {
        let message = error.to_string();
        let retry = error.is_retryable() && !attempt.is_final();
        let mut storage = lock(&self.storage);

        let written = if retry {
            storage.requeue_crawl(job.crawl_id, &message)
        } else {
            storage.set_crawl_error(job.crawl_id, &message)
        };

        match written {
            Ok(true) if retry => tracing::warn!(
                crawl_id = job.crawl_id,
                attempt = attempt.attempt,
                error = %message,
                "Crawl attempt failed, will retry"
            ),
            Ok(true) => tracing::error!(crawl_id = job.crawl_id, error = %message, "Crawl failed"),
            Ok(false) => tracing::debug!(
                crawl_id = job.crawl_id,
                "Crawl already left the running state, failure not recorded"
            ),
            Err(e) => tracing::error!(
                crawl_id = job.crawl_id,
                error = %e,
                "Failed to record crawl failure"
            ),
        }
    }
}

/// Records a failure for an attempt that ended without a terminal write
struct CompletionGuard {
    storage: SharedStorage,
    notifier: Arc<dyn Notifier>,
    crawl_id: i64,
    user_id: String,
    url_id: i64,
    retry_allowed: bool,
    armed: bool,
}

impl CompletionGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let message = if std::thread::panicking() {
            "crawl attempt panicked"
        } else {
            INCOMPLETE_MESSAGE
        };

        let written = {
            let mut storage = lock(&self.storage);
            if self.retry_allowed {
                storage.requeue_crawl(self.crawl_id, message)
            } else {
                storage.set_crawl_error(self.crawl_id, message)
            }
        };

        match written {
            Ok(true) => {
                tracing::warn!(crawl_id = self.crawl_id, reason = message, "Crawl attempt ended early");
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let notifier = Arc::clone(&self.notifier);
                    let user_id = self.user_id.clone();
                    let url_id = self.url_id;
                    runtime.spawn(async move {
                        notifier.notify_crawl_update(&user_id, url_id).await;
                    });
                }
            }
            Ok(false) => {}
            Err(e) => tracing::error!(
                crawl_id = self.crawl_id,
                error = %e,
                "Failed to record incomplete crawl"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Broadcaster, NotificationKind};
    use crate::state::CrawlStatus;
    use crate::storage::{shared, SqliteStorage};
    use async_trait::async_trait;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Every link answers 200
    struct AlwaysOk;

    #[async_trait]
    impl LinkProber for AlwaysOk {
        async fn probe(&self, _url: &Url) -> Option<u16> {
            Some(200)
        }
    }

    /// Never answers, so the attempt hangs in link probing
    struct Hang;

    #[async_trait]
    impl LinkProber for Hang {
        async fn probe(&self, _url: &Url) -> Option<u16> {
            futures::future::pending::<()>().await;
            None
        }
    }

    struct Fixture {
        storage: SharedStorage,
        broadcaster: Arc<Broadcaster>,
        job: CrawlJob,
    }

    fn fixture(url: &str) -> Fixture {
        let storage = shared(SqliteStorage::new_in_memory().unwrap());
        let job = {
            let mut db = lock(&storage);
            let url_id = db.insert_url("user-1", url, "127.0.0.1").unwrap();
            let crawl_id = db.queue_crawl(url_id, "crawl_1_test").unwrap().unwrap();
            db.get_crawl_job(crawl_id).unwrap()
        };
        Fixture {
            storage,
            broadcaster: Arc::new(Broadcaster::with_settings(10, Duration::from_secs(30))),
            job,
        }
    }

    fn task(fixture: &Fixture, prober: Arc<dyn LinkProber>) -> CrawlTask {
        let fetcher = FetcherConfig::default();
        let client = Client::builder()
            .timeout(fetcher.page_timeout())
            .build()
            .unwrap();
        CrawlTask::with_parts(
            Arc::clone(&fixture.storage),
            fixture.broadcaster.clone(),
            client,
            prober,
            fetcher,
        )
    }

    #[tokio::test]
    async fn test_successful_attempt_persists_and_notifies_twice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<!DOCTYPE html><title>Home</title><h1>Hi</h1><a href="/a">A</a><a href="mailto:x@y.z">M</a>"#,
            ))
            .mount(&server)
            .await;

        let fixture = fixture(&format!("{}/", server.uri()));
        let mut subscription = fixture.broadcaster.subscribe("user-1");
        subscription.next().await;

        let task = task(&fixture, Arc::new(AlwaysOk));
        let heartbeat = Heartbeat::new(Duration::from_secs(10));
        let result = task
            .run(&fixture.job, AttemptInfo::single(), &heartbeat)
            .await
            .unwrap();

        assert_eq!(result.page_title, "Home");
        assert_eq!(result.internal_links_count, 1);

        let crawl = lock(&fixture.storage).get_crawl(fixture.job.crawl_id).unwrap();
        assert_eq!(crawl.status, CrawlStatus::Done);
        assert_eq!(crawl.html_version.as_deref(), Some("HTML5"));
        let links = lock(&fixture.storage)
            .list_discovered_links(fixture.job.crawl_id)
            .unwrap();
        assert_eq!(links.len(), 1);

        for _ in 0..2 {
            let update = subscription.next().await.unwrap();
            assert_eq!(update.kind, NotificationKind::CrawlUpdate);
            assert_eq!(update.url_id, Some(fixture.job.url_id));
        }
        assert!(heartbeat.subscribe().borrow().sequence >= 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_error_on_final_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fixture = fixture(&format!("{}/", server.uri()));
        let task = task(&fixture, Arc::new(AlwaysOk));
        let heartbeat = Heartbeat::new(Duration::from_secs(10));

        let err = task
            .run(&fixture.job, AttemptInfo::single(), &heartbeat)
            .await
            .unwrap_err();
        assert!(matches!(err, PageProbeError::HttpStatus { status: 503, .. }));

        let crawl = lock(&fixture.storage).get_crawl(fixture.job.crawl_id).unwrap();
        assert_eq!(crawl.status, CrawlStatus::Error);
        assert!(crawl.error_message.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_fetch_failure_requeues_before_final_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let fixture = fixture(&format!("{}/", server.uri()));
        let task = task(&fixture, Arc::new(AlwaysOk));
        let heartbeat = Heartbeat::new(Duration::from_secs(10));
        let first = AttemptInfo {
            attempt: 1,
            max_attempts: 3,
        };

        assert!(task.run(&fixture.job, first, &heartbeat).await.is_err());
        let crawl = lock(&fixture.storage).get_crawl(fixture.job.crawl_id).unwrap();
        assert_eq!(crawl.status, CrawlStatus::Queued);
        assert!(crawl.error_message.is_none());
        assert!(crawl.last_attempt_error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_stopped_crawl_is_not_started() {
        let fixture = fixture("http://127.0.0.1:9/");
        lock(&fixture.storage)
            .set_crawl_stopped(fixture.job.crawl_id)
            .unwrap();

        let task = task(&fixture, Arc::new(AlwaysOk));
        let heartbeat = Heartbeat::new(Duration::from_secs(10));
        let err = task
            .run(&fixture.job, AttemptInfo::single(), &heartbeat)
            .await
            .unwrap_err();

        assert!(matches!(err, PageProbeError::CrawlNotActive(_)));
        let crawl = lock(&fixture.storage).get_crawl(fixture.job.crawl_id).unwrap();
        assert_eq!(crawl.status, CrawlStatus::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_attempt_is_marked_error_by_guard() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<a href="/slow">slow</a>"#),
            )
            .mount(&server)
            .await;

        let fixture = fixture(&format!("{}/", server.uri()));
        let task = Arc::new(task(&fixture, Arc::new(Hang)));
        let job = fixture.job.clone();

        let handle = tokio::spawn(async move {
            let heartbeat = Heartbeat::new(Duration::from_secs(10));
            task.run(&job, AttemptInfo::single(), &heartbeat).await
        });

        // Wait until the attempt is running, then abort it mid-probe
        for _ in 0..100 {
            let status = lock(&fixture.storage)
                .get_crawl(fixture.job.crawl_id)
                .unwrap()
                .status;
            if status == CrawlStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        let crawl = lock(&fixture.storage).get_crawl(fixture.job.crawl_id).unwrap();
        assert_eq!(crawl.status, CrawlStatus::Error);
        assert_eq!(crawl.error_message.as_deref(), Some(INCOMPLETE_MESSAGE));
    }
}
