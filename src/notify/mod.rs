//! Live-update notifications
//!
//! This module delivers crawl state changes to the browser sessions of the
//! user who owns the crawl:
//! - [`Broadcaster`]: in-process registry of live connections per user
//! - [`HttpRelay`]: forwards notifications from a worker process to the
//!   server process that holds the connections
//!
//! Delivery is best effort. Clients reconcile through the crawl status poll.

mod broadcaster;
mod relay;

pub use broadcaster::{Broadcaster, Subscription};
pub use relay::{HttpRelay, RelayRequest};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of live-update event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Sent once when a stream opens
    Connection,
    /// Keepalive sent by an idle stream to itself
    Ping,
    /// A crawl of one of the user's URLs changed state
    CrawlUpdate,
}

/// A transient event pushed to a user's live connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    fn new(kind: NotificationKind, user_id: &str, url_id: Option<i64>) -> Self {
        Self {
            kind,
            user_id: user_id.to_string(),
            url_id,
            timestamp: Utc::now(),
        }
    }

    pub fn connection(user_id: &str) -> Self {
        Self::new(NotificationKind::Connection, user_id, None)
    }

    pub fn ping(user_id: &str) -> Self {
        Self::new(NotificationKind::Ping, user_id, None)
    }

    pub fn crawl_update(user_id: &str, url_id: i64) -> Self {
        Self::new(NotificationKind::CrawlUpdate, user_id, Some(url_id))
    }
}

/// Sink for crawl state-change events
///
/// Implementations never fail the caller: a notification that cannot be
/// delivered is logged and dropped.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_crawl_update(&self, user_id: &str, url_id: i64);
}
