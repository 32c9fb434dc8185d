//! Per-user connection registry with non-blocking fan-out

use crate::config::NotifierConfig;
use crate::notify::{Notification, Notifier};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};

type Connections = HashMap<String, HashMap<u64, mpsc::Sender<Notification>>>;

/// Registry of live notification channels, keyed by user
///
/// Registration and removal take the write lock. Publishing copies the
/// user's senders under the read lock and sends after releasing it, so a
/// slow consumer never blocks the registry.
pub struct Broadcaster {
    connections: RwLock<Connections>,
    next_connection_id: AtomicU64,
    capacity: usize,
    keepalive: Duration,
    closed: AtomicBool,
}

impl Broadcaster {
    /// Creates a broadcaster from the notifier configuration
    pub fn new(config: &NotifierConfig) -> Self {
        Self::with_settings(config.channel_capacity, config.keepalive())
    }

    /// Creates a broadcaster with explicit buffer size and keepalive
    pub fn with_settings(capacity: usize, keepalive: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            keepalive,
            closed: AtomicBool::new(false),
        }
    }

    /// Registers a new connection for `user_id`
    ///
    /// The returned subscription yields a `connection` event first. Dropping
    /// it unregisters the connection.
    pub fn subscribe(self: &Arc<Self>, user_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        // The buffer is empty, so this cannot be full
        let _ = sender.try_send(Notification::connection(user_id));

        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(user_id, "Broadcaster closed, stream will end after greeting");
        } else {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            connections
                .entry(user_id.to_string())
                .or_default()
                .insert(id, sender);
            tracing::debug!(user_id, connection_id = id, "Live connection registered");
        }

        Subscription {
            broadcaster: Arc::clone(self),
            user_id: user_id.to_string(),
            id,
            receiver,
            keepalive: self.keepalive,
        }
    }

    /// Removes one connection, and the user entry if it was the last one
    ///
    /// Returns true if the connection was registered.
    pub fn unsubscribe(&self, user_id: &str, connection_id: u64) -> bool {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(user_connections) = connections.get_mut(user_id) else {
            return false;
        };
        let removed = user_connections.remove(&connection_id).is_some();
        if user_connections.is_empty() {
            connections.remove(user_id);
        }

        if removed {
            tracing::debug!(user_id, connection_id, "Live connection removed");
        }
        removed
    }

    /// Delivers a notification to every live connection of `user_id`
    ///
    /// Never blocks. A connection whose buffer is full misses this event;
    /// the other connections are unaffected. Returns the number of
    /// connections that accepted it.
    pub fn publish(&self, user_id: &str, notification: Notification) -> usize {
        let senders: Vec<(u64, mpsc::Sender<Notification>)> = {
            let connections = self
                .connections
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            match connections.get(user_id) {
                Some(user_connections) => user_connections
                    .iter()
                    .map(|(id, sender)| (*id, sender.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (connection_id, sender) in senders {
            match sender.try_send(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(user_id, connection_id, "Connection buffer full, dropping notification");
                }
                Err(TrySendError::Closed(_)) => {
                    self.unsubscribe(user_id, connection_id);
                }
            }
        }

        delivered
    }

    /// Number of live connections for a user
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Number of users with at least one live connection
    pub fn user_count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Closes every connection and refuses new registrations
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let users = connections.len();
        connections.clear();
        tracing::info!(users, "Broadcaster shut down");
    }
}

#[async_trait]
impl Notifier for Broadcaster {
    async fn notify_crawl_update(&self, user_id: &str, url_id: i64) {
        let delivered = self.publish(user_id, Notification::crawl_update(user_id, url_id));
        tracing::debug!(user_id, url_id, delivered, "Published crawl update");
    }
}

/// One live connection's end of the channel
pub struct Subscription {
    broadcaster: Arc<Broadcaster>,
    user_id: String,
    id: u64,
    receiver: mpsc::Receiver<Notification>,
    keepalive: Duration,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Waits for the next event
    ///
    /// Yields a `ping` when nothing arrives within the keepalive interval.
    /// Returns `None` once the connection has been closed by the broadcaster.
    pub async fn next(&mut self) -> Option<Notification> {
        tokio::select! {
            notification = self.receiver.recv() => notification,
            _ = tokio::time::sleep(self.keepalive) => Some(Notification::ping(&self.user_id)),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(&self.user_id, self.id);
    }
}
