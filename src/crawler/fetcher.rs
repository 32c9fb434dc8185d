//! HTTP fetcher for the crawled page
//!
//! This module handles the single page request made by each crawl attempt:
//! - Building the HTTP client with the crawler's user agent
//! - GET with a bounded timeout
//! - Error classification into crate errors

use crate::config::{FetcherConfig, UserAgentConfig};
use crate::PageProbeError;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status_code: u16,
    /// Page body content
    pub body: String,
}

/// Builds the HTTP client used for page fetches
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `fetcher` - Timeouts for the page request
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use pageprobe::config::{FetcherConfig, UserAgentConfig};
/// use pageprobe::crawler::build_page_client;
///
/// let user_agent = UserAgentConfig {
///     crawler_name: "PageProbe".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_page_client(&user_agent, &FetcherConfig::default()).unwrap();
/// ```
pub fn build_page_client(
    user_agent: &UserAgentConfig,
    fetcher: &FetcherConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(fetcher.page_timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches the page body
///
/// # Errors
///
/// | Condition | Error |
/// |-----------|-------|
/// | Request timeout | `Timeout` |
/// | Transport failure | `Http` |
/// | Non-2xx status | `HttpStatus` |
/// | Body read failure | `Http` |
pub async fn fetch_page(client: &Client, url: &Url) -> Result<FetchedPage, PageProbeError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| classify_error(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(PageProbeError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let final_url = response.url().clone();
    let body = response.text().await.map_err(|e| classify_error(url, e))?;

    Ok(FetchedPage {
        final_url,
        status_code: status.as_u16(),
        body,
    })
}

fn classify_error(url: &Url, error: reqwest::Error) -> PageProbeError {
    if error.is_timeout() {
        PageProbeError::Timeout {
            url: url.to_string(),
        }
    } else {
        PageProbeError::Http {
            url: url.to_string(),
            source: error,
        }
    }
}
