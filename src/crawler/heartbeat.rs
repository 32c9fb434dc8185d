//! Liveness signal from a running crawl attempt to its supervisor

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};

/// The most recent liveness report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beat {
    /// Number of beats emitted so far
    pub sequence: u64,
    /// What the attempt was doing
    pub detail: String,
}

/// Sending side, held by the crawl attempt
#[derive(Debug, Clone)]
pub struct Heartbeat {
    sender: Arc<watch::Sender<Beat>>,
    interval: Duration,
}

impl Heartbeat {
    /// Creates a heartbeat whose background ticker fires every `interval`
    pub fn new(interval: Duration) -> Self {
        let (sender, _) = watch::channel(Beat {
            sequence: 0,
            detail: "created".to_string(),
        });
        Self {
            sender: Arc::new(sender),
            interval,
        }
    }

    /// Records a milestone
    pub fn beat(&self, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::trace!(detail = %detail, "Heartbeat");
        self.sender.send_modify(|beat| {
            beat.sequence += 1;
            beat.detail = detail;
        });
    }

    /// Returns a receiver that observes every subsequent beat
    pub fn subscribe(&self) -> watch::Receiver<Beat> {
        self.sender.subscribe()
    }

    /// Starts the interval ticker
    ///
    /// The ticker runs until the returned guard is dropped.
    pub fn start_ticker(&self) -> DropGuard {
        let token = CancellationToken::new();
        let stopped = token.clone();
        let heartbeat = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat.interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticker.tick() => heartbeat.beat("alive"),
                }
            }
        });

        token.drop_guard()
    }
}
