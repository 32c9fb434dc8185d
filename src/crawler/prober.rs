//! Link reachability prober
//!
//! Each discovered link gets a HEAD request, and a GET if the HEAD fails at
//! the transport level. Redirects are followed up to a cap, after which the
//! last response is accepted as the answer. Failures become `None`, never
//! errors: dead links are an expected outcome.

use crate::analyzer::LinkProber;
use crate::config::{FetcherConfig, UserAgentConfig};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client, Method};
use std::time::Duration;
use url::Url;

/// Prober backed by a dedicated HTTP client
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    /// Builds the probe client
    ///
    /// The client has its own short timeout, independent of the page fetch.
    pub fn new(user_agent: &UserAgentConfig, fetcher: &FetcherConfig) -> Result<Self, reqwest::Error> {
        let max_redirects = fetcher.max_redirects;
        let client = Client::builder()
            .user_agent(user_agent.header_value())
            .timeout(fetcher.probe_timeout())
            .connect_timeout(Duration::from_secs(5).min(fetcher.probe_timeout()))
            .redirect(Policy::custom(move |attempt| {
                // Stopping hands back the redirect response instead of an error
                if attempt.previous().len() >= max_redirects {
                    attempt.stop()
                } else {
                    attempt.follow()
                }
            }))
            .build()?;

        Ok(Self { client })
    }

    async fn request(&self, method: Method, url: &Url) -> Result<u16, reqwest::Error> {
        let response = self.client.request(method, url.clone()).send().await?;
        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl LinkProber for HttpProber {
    async fn probe(&self, url: &Url) -> Option<u16> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return None;
        }

        match self.request(Method::HEAD, url).await {
            Ok(status) => Some(status),
            Err(head_error) => {
                tracing::debug!(url = %url, error = %head_error, "HEAD probe failed, retrying with GET");
                match self.request(Method::GET, url).await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "Link unreachable");
                        None
                    }
                }
            }
        }
    }
}
