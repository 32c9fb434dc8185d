use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for PageProbe
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
}

/// HTTP server configuration (the process holding live connections)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP server binds to (host:port)
    pub bind: String,

    /// Run the orchestrator inside the server process instead of a separate worker
    #[serde(rename = "embedded-worker")]
    pub embedded_worker: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7070".to_string(),
            embedded_worker: false,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of crawl attempts executing at once
    pub concurrency: u32,

    /// How often the worker looks for queued crawls (milliseconds)
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retry, timeout and liveness policy for crawl executions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Grace delay before the first attempt is scheduled (milliseconds)
    #[serde(rename = "start-delay-ms")]
    pub start_delay_ms: u64,

    /// Upper bound for a single attempt (seconds)
    #[serde(rename = "attempt-timeout-secs")]
    pub attempt_timeout_secs: u64,

    /// Upper bound for the whole execution including retries (seconds)
    #[serde(rename = "overall-timeout-secs")]
    pub overall_timeout_secs: u64,

    /// An attempt without a heartbeat for this long is presumed hung (seconds)
    #[serde(rename = "heartbeat-timeout-secs")]
    pub heartbeat_timeout_secs: u64,

    /// Interval of the background heartbeat emitted by a running attempt (seconds)
    #[serde(rename = "heartbeat-interval-secs")]
    pub heartbeat_interval_secs: u64,

    /// Maximum number of attempts per crawl
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds)
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    /// Multiplier applied to the backoff after every failed attempt
    #[serde(rename = "backoff-coefficient")]
    pub backoff_coefficient: f64,

    /// Cap on the backoff between attempts (seconds)
    #[serde(rename = "max-backoff-secs")]
    pub max_backoff_secs: u64,

    /// How often a supervisor re-reads the stored status to observe stops (milliseconds)
    #[serde(rename = "cancel-poll-interval-ms")]
    pub cancel_poll_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: 1000,
            attempt_timeout_secs: 600,
            overall_timeout_secs: 900,
            heartbeat_timeout_secs: 30,
            heartbeat_interval_secs: 10,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            backoff_coefficient: 2.0,
            max_backoff_secs: 60,
            cancel_poll_interval_ms: 1000,
        }
    }
}

impl OrchestratorConfig {
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }

    /// Backoff to wait after the given failed attempt (1-based)
    ///
    /// Grows exponentially from `initial-backoff-ms` and is capped at
    /// `max-backoff-secs`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_backoff_ms as f64 * self.backoff_coefficient.powi(exponent);
        let cap = self.max_backoff_secs.saturating_mul(1000) as f64;
        Duration::from_millis(millis.min(cap) as u64)
    }
}

/// Page fetch and link probe configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Timeout for fetching the crawled page itself (seconds)
    #[serde(rename = "page-timeout-secs")]
    pub page_timeout_secs: u64,

    /// Timeout for each link probe (seconds)
    #[serde(rename = "probe-timeout-secs")]
    pub probe_timeout_secs: u64,

    /// Maximum redirects followed by a probe before accepting the last response
    #[serde(rename = "max-redirects")]
    pub max_redirects: usize,

    /// Number of link probes in flight at once for one crawl
    #[serde(rename = "probe-concurrency")]
    pub probe_concurrency: usize,

    /// Report link-processing progress every N links
    #[serde(rename = "heartbeat-every-links")]
    pub heartbeat_every_links: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            page_timeout_secs: 120,
            probe_timeout_secs: 10,
            max_redirects: 5,
            probe_concurrency: 8,
            heartbeat_every_links: 25,
        }
    }
}

impl FetcherConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header value
    ///
    /// Format: `Mozilla/5.0 (compatible; Name/Version; +ContactURL; ContactEmail)`.
    /// The browser-compatible prefix keeps sites that block unknown agents
    /// from reporting working links as dead.
    pub fn header_value(&self) -> String {
        format!(
            "Mozilla/5.0 (compatible; {}/{}; +{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Live-update delivery configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Internal endpoint of the server process, used by workers
    #[serde(rename = "relay-url")]
    pub relay_url: String,

    /// Timeout for one relay call (seconds)
    #[serde(rename = "relay-timeout-secs")]
    pub relay_timeout_secs: u64,

    /// Idle interval after which a connection sends itself a ping (seconds)
    #[serde(rename = "keepalive-secs")]
    pub keepalive_secs: u64,

    /// Buffered notifications per connection before deliveries are dropped
    #[serde(rename = "channel-capacity")]
    pub channel_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://127.0.0.1:7070/api/v1/internal/notify-crawl-update".to_string(),
            relay_timeout_secs: 5,
            keepalive_secs: 30,
            channel_capacity: 10,
        }
    }
}

impl NotifierConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file shared by server and workers
    #[serde(rename = "database-path")]
    pub database_path: String,
}
