//! Integration tests for crawls
//!
//! These tests use wiremock to serve the crawled page and its links, and run
//! the orchestrator, storage and HTTP surface together.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use pageprobe::config::{load_config, parse_config, Config};
use pageprobe::crawler::{CrawlService, CrawlTask, WorkflowEngine};
use pageprobe::notify::{Broadcaster, HttpRelay, Notification, NotificationKind, Subscription};
use pageprobe::orchestrator::{Orchestrator, QueueHandoff};
use pageprobe::server::{create_router, AppState, USER_ID_HEADER};
use pageprobe::state::CrawlStatus;
use pageprobe::storage::{lock, open_storage, SharedStorage, Storage};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER: &str = "user-1";

/// Builds a configuration with fast retry and liveness settings
fn test_config(db_path: &Path, relay_url: &str) -> Config {
    let content = format!(
        r#"
[worker]
concurrency = 2
poll-interval-ms = 100

[orchestrator]
start-delay-ms = 0
attempt-timeout-secs = 10
overall-timeout-secs = 30
heartbeat-timeout-secs = 5
heartbeat-interval-secs = 1
max-attempts = 2
initial-backoff-ms = 10
max-backoff-secs = 1
cancel-poll-interval-ms = 100

[fetcher]
page-timeout-secs = 30
probe-timeout-secs = 5

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[notifier]
relay-url = "{relay_url}"

[storage]
database-path = "{db}"
"#,
        relay_url = relay_url,
        db = db_path.display()
    );
    parse_config(&content).unwrap()
}

fn register_url(storage: &SharedStorage, url: &str) -> i64 {
    lock(storage).insert_url(USER, url, "127.0.0.1").unwrap()
}

async fn wait_for_status(storage: &SharedStorage, url_id: i64, wanted: CrawlStatus) {
    for _ in 0..200 {
        let latest = lock(storage).get_latest_crawl_for_url(url_id).unwrap();
        if latest.map(|crawl| crawl.status) == Some(wanted) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("crawl for url {} never reached {}", url_id, wanted);
}

async fn next_update(subscription: &mut Subscription) -> Notification {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let notification = subscription.next().await.unwrap();
            if notification.kind == NotificationKind::CrawlUpdate {
                return notification;
            }
        }
    })
    .await
    .expect("no crawl update arrived")
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(USER_ID_HEADER, USER)
        .body(Body::empty())
        .unwrap()
}

/// A server process with an embedded worker
struct EmbeddedApp {
    router: axum::Router,
    storage: SharedStorage,
    broadcaster: Arc<Broadcaster>,
    orchestrator: Orchestrator,
    _dir: TempDir,
}

fn embedded_app() -> EmbeddedApp {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir.path().join("pageprobe.db"), "http://127.0.0.1:1/unused");
    let storage = open_storage(Path::new(&config.storage.database_path)).unwrap();
    let broadcaster = Arc::new(Broadcaster::new(&config.notifier));

    let task = CrawlTask::new(&config, Arc::clone(&storage), broadcaster.clone()).unwrap();
    let orchestrator = Orchestrator::new(&config, Arc::clone(&storage), task);
    let engine: Arc<dyn WorkflowEngine> = Arc::new(orchestrator.clone());
    let service = CrawlService::new(Arc::clone(&storage), engine, broadcaster.clone());
    let router = create_router(AppState::new(service, Arc::clone(&broadcaster)));

    EmbeddedApp {
        router,
        storage,
        broadcaster,
        orchestrator,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_full_crawl_records_metadata_and_links() {
    let site = MockServer::start().await;
    let elsewhere = MockServer::start().await;

    let page = format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Test Page</title></head>
<body>
  <h1>Welcome</h1>
  <h2>First</h2>
  <h2>Second</h2>
  <a href="/about">About us</a>
  <a href="/missing">Broken</a>
  <a href="{}/partner">Partner</a>
  <form action="/login"><input type="text" name="user"><input type="password" name="pw"></form>
</body>
</html>"#,
        elsewhere.uri()
    );

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&site)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&site)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/partner"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&elsewhere)
        .await;

    let app = embedded_app();
    let url_id = register_url(&app.storage, &format!("{}/page", site.uri()));
    let mut subscription = app.broadcaster.subscribe(USER);

    let response = app
        .router
        .clone()
        .oneshot(post(&format!("/api/v1/crawl/start/{}", url_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_for_status(&app.storage, url_id, CrawlStatus::Done).await;

    let crawl = lock(&app.storage)
        .get_latest_crawl_for_url(url_id)
        .unwrap()
        .unwrap();
    assert_eq!(crawl.html_version.as_deref(), Some("HTML5"));
    assert_eq!(crawl.page_title.as_deref(), Some("Test Page"));
    assert_eq!(crawl.heading_counts, Some([1, 2, 0, 0, 0, 0]));
    assert_eq!(crawl.internal_links_count, Some(1));
    assert_eq!(crawl.external_links_count, Some(1));
    assert_eq!(crawl.inaccessible_links_count, Some(1));
    assert!(crawl.has_login_form);
    assert!(crawl.error_message.is_none());
    assert_eq!(crawl.attempts, 1);

    let links = lock(&app.storage).list_discovered_links(crawl.id).unwrap();
    assert_eq!(links.len(), 3);
    let missing = links.iter().find(|link| link.href == "/missing").unwrap();
    assert!(missing.is_internal);
    assert_eq!(missing.status_code, Some(404));
    let partner = links.iter().find(|link| link.href.ends_with("/partner")).unwrap();
    assert!(!partner.is_internal);
    assert_eq!(partner.anchor_text.as_deref(), Some("Partner"));

    // One update when the attempt starts and one when it finishes
    for _ in 0..2 {
        let update = next_update(&mut subscription).await;
        assert_eq!(update.url_id, Some(url_id));
        assert_eq!(update.user_id, USER);
    }

    // Stopping a finished crawl changes nothing
    let response = app
        .router
        .oneshot(post(&format!("/api/v1/crawl/stop/{}", url_id)))
        .await
        .unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["count"], 0);
    let crawl = lock(&app.storage).get_crawl(crawl.id).unwrap();
    assert_eq!(crawl.status, CrawlStatus::Done);

    app.orchestrator.shutdown();
    app.orchestrator.wait().await;
}

#[tokio::test]
async fn test_unreachable_page_ends_in_error_after_retries() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;

    let app = embedded_app();
    let url_id = register_url(&app.storage, &format!("{}/gone", site.uri()));

    let response = app
        .router
        .clone()
        .oneshot(post(&format!("/api/v1/crawl/start/{}", url_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    wait_for_status(&app.storage, url_id, CrawlStatus::Error).await;

    let crawl = lock(&app.storage)
        .get_latest_crawl_for_url(url_id)
        .unwrap()
        .unwrap();
    assert_eq!(crawl.attempts, 2);
    assert!(crawl.error_message.unwrap().contains("404"));
    assert!(crawl.internal_links_count.is_none());

    app.orchestrator.shutdown();
    app.orchestrator.wait().await;
}

#[tokio::test]
async fn test_repeated_submission_creates_one_crawl() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<p>slow</p>")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&site)
        .await;

    let app = embedded_app();
    let url_id = register_url(&app.storage, &format!("{}/slow", site.uri()));
    let start = format!("/api/v1/crawl/start/{}", url_id);

    for _ in 0..3 {
        let response = app.router.clone().oneshot(post(&start)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    assert_eq!(lock(&app.storage).count_active_crawls(url_id).unwrap(), 1);

    wait_for_status(&app.storage, url_id, CrawlStatus::Done).await;
    assert_eq!(lock(&app.storage).count_active_crawls(url_id).unwrap(), 0);

    app.orchestrator.shutdown();
    app.orchestrator.wait().await;
}

/// A server without a worker hands crawls to a worker process through the
/// database, and the worker relays its updates back over HTTP
#[tokio::test]
async fn test_separate_worker_relays_updates_to_server() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Relayed</title></head><body></body></html>"),
        )
        .mount(&site)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("shared.db");

    // Server process
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay_url = format!("http://{}/api/v1/internal/notify-crawl-update", addr);
    let config = test_config(&db_path, &relay_url);

    let server_storage = open_storage(&db_path).unwrap();
    let broadcaster = Arc::new(Broadcaster::new(&config.notifier));
    let engine: Arc<dyn WorkflowEngine> = Arc::new(QueueHandoff);
    let service = CrawlService::new(Arc::clone(&server_storage), engine, broadcaster.clone());
    let router = create_router(AppState::new(service.clone(), Arc::clone(&broadcaster)));
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
    });

    // Worker process
    let worker_storage = open_storage(&db_path).unwrap();
    let relay = HttpRelay::new(&config.notifier).unwrap();
    let task = CrawlTask::new(&config, Arc::clone(&worker_storage), Arc::new(relay)).unwrap();
    let worker = Orchestrator::new(&config, worker_storage, task);
    let poller = worker.clone();
    let polling = tokio::spawn(async move {
        poller
            .run_worker(Duration::from_millis(100))
            .await
            .unwrap()
    });

    let url_id = register_url(&server_storage, &format!("{}/page", site.uri()));
    let mut subscription = broadcaster.subscribe(USER);
    service.submit_crawl(USER, url_id).unwrap();

    wait_for_status(&server_storage, url_id, CrawlStatus::Done).await;
    let crawl = lock(&server_storage)
        .get_latest_crawl_for_url(url_id)
        .unwrap()
        .unwrap();
    assert_eq!(crawl.page_title.as_deref(), Some("Relayed"));

    let update = next_update(&mut subscription).await;
    assert_eq!(update.url_id, Some(url_id));

    worker.shutdown();
    polling.await.unwrap();
    worker.wait().await;
    server.abort();
}

#[tokio::test]
async fn test_stop_is_observed_by_separate_worker() {
    let site = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<p>slow</p>")
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&site)
        .await;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("shared.db");
    let config = test_config(&db_path, "http://127.0.0.1:1/unused");

    let server_storage = open_storage(&db_path).unwrap();
    let broadcaster = Arc::new(Broadcaster::new(&config.notifier));
    let engine: Arc<dyn WorkflowEngine> = Arc::new(QueueHandoff);
    let service = CrawlService::new(Arc::clone(&server_storage), engine, broadcaster.clone());

    let worker_storage = open_storage(&db_path).unwrap();
    let task = CrawlTask::new(&config, Arc::clone(&worker_storage), broadcaster.clone()).unwrap();
    let worker = Orchestrator::new(&config, worker_storage, task);
    let poller = worker.clone();
    let polling = tokio::spawn(async move {
        poller
            .run_worker(Duration::from_millis(100))
            .await
            .unwrap()
    });

    let url_id = register_url(&server_storage, &format!("{}/slow", site.uri()));
    service.submit_crawl(USER, url_id).unwrap();
    wait_for_status(&server_storage, url_id, CrawlStatus::Running).await;

    assert_eq!(service.stop_crawl(USER, url_id).await.unwrap(), 1);

    for _ in 0..100 {
        if worker.active_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(worker.active_count(), 0);

    let crawl = lock(&server_storage)
        .get_latest_crawl_for_url(url_id)
        .unwrap()
        .unwrap();
    assert_eq!(crawl.status, CrawlStatus::Stopped);
    assert!(crawl.finished_at.is_some());

    worker.shutdown();
    polling.await.unwrap();
    worker.wait().await;
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let expected = test_config(&dir.path().join("x.db"), "http://127.0.0.1:7070/relay");

    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[server]
embedded-worker = true

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[storage]
database-path = "{}"
"#,
        expected.storage.database_path
    )
    .unwrap();
    file.flush().unwrap();

    let config = load_config(file.path()).unwrap();
    assert!(config.server.embedded_worker);
    assert_eq!(config.storage.database_path, expected.storage.database_path);
    assert_eq!(
        config.user_agent.header_value(),
        expected.user_agent.header_value()
    );
}
