//! Cross-process notification relay
//!
//! A worker process has no access to the server's live connections, so it
//! forwards each crawl update to the server's internal endpoint. There is
//! no retry: a lost update is picked up by the client's next poll.

use crate::config::NotifierConfig;
use crate::notify::Notifier;
use crate::PageProbeError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Body of the internal notify endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRequest {
    pub user_id: String,
    pub url_id: i64,
}

/// Notifier that posts crawl updates to the server process
#[derive(Debug, Clone)]
pub struct HttpRelay {
    client: Client,
    endpoint: String,
}

impl HttpRelay {
    /// Builds a relay for the configured endpoint and timeout
    pub fn new(config: &NotifierConfig) -> Result<Self, PageProbeError> {
        let client = Client::builder().timeout(config.relay_timeout()).build()?;
        Ok(Self {
            client,
            endpoint: config.relay_url.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends one update and reports the outcome
    pub async fn send(&self, user_id: &str, url_id: i64) -> Result<(), PageProbeError> {
        let body = RelayRequest {
            user_id: user_id.to_string(),
            url_id,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PageProbeError::Relay(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PageProbeError::Relay(format!(
                "{} returned {}",
                self.endpoint, status
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpRelay {
    async fn notify_crawl_update(&self, user_id: &str, url_id: i64) {
        if let Err(e) = self.send(user_id, url_id).await {
            tracing::warn!(user_id, url_id, error = %e, "Failed to relay crawl update");
        }
    }
}
