//! Link discovery and reachability classification
//!
//! Discovery is synchronous and works on the parsed tree; classification is
//! asynchronous because every anchor is probed over the network. The two are
//! split so the parsed document never lives across an await point.

use crate::analyzer::text::{sanitize_text, MAX_ANCHOR_TEXT_LEN};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

/// Prefixes of hrefs that do not address a network resource
const SKIPPED_SCHEMES: [&str; 3] = ["javascript:", "mailto:", "tel:"];

/// Anything that can report the HTTP status of a URL
#[async_trait]
pub trait LinkProber: Send + Sync {
    /// Returns the observed status code, or `None` when reachability could
    /// not be determined
    async fn probe(&self, url: &Url) -> Option<u16>;
}

/// Category assigned to each probed link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkCategory {
    Internal,
    External,
    Inaccessible,
}

/// An anchor found in the document, not yet probed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorCandidate {
    /// The href exactly as written in the markup
    pub href: String,
    pub absolute_url: Url,
    pub anchor_text: String,
}

/// A probed and classified link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkDetail {
    pub href: String,
    pub absolute_url: String,
    /// Same host and port as the crawled page, regardless of reachability
    pub is_internal: bool,
    pub anchor_text: String,
    pub status_code: Option<u16>,
    pub category: LinkCategory,
}

/// Number of links in each category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkCounts {
    pub internal: u32,
    pub external: u32,
    pub inaccessible: u32,
}

impl LinkCounts {
    fn record(&mut self, category: LinkCategory) {
        match category {
            LinkCategory::Internal => self.internal += 1,
            LinkCategory::External => self.external += 1,
            LinkCategory::Inaccessible => self.inaccessible += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.internal + self.external + self.inaccessible
    }
}

/// Classified links of one page, in document order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkAnalysis {
    pub counts: LinkCounts,
    pub links: Vec<LinkDetail>,
}

/// Collects every network-addressable anchor in document order
///
/// Anchors with an empty href, a bare fragment, or a `javascript:`,
/// `mailto:` or `tel:` href are skipped. Hrefs that cannot be resolved
/// against `page_url` are skipped as well.
pub fn discover_anchors(document: &Html, page_url: &Url) -> Vec<AnchorCandidate> {
    let Ok(selector) = Selector::parse("a") else {
        return Vec::new();
    };

    let mut anchors = Vec::new();
    for element in document.select(&selector) {
        let Some(raw_href) = element.value().attr("href") else {
            continue;
        };
        let href = raw_href.trim();
        if is_skipped_href(href) {
            continue;
        }

        let absolute_url = match page_url.join(href) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(href, error = %e, "Skipping unresolvable href");
                continue;
            }
        };

        let text: String = element.text().collect();
        anchors.push(AnchorCandidate {
            href: raw_href.to_string(),
            absolute_url,
            anchor_text: sanitize_text(&text, MAX_ANCHOR_TEXT_LEN),
        });
    }

    anchors
}

fn is_skipped_href(href: &str) -> bool {
    if href.is_empty() || href.starts_with('#') {
        return true;
    }

    let lower = href.to_ascii_lowercase();
    SKIPPED_SCHEMES
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Returns true if both URLs share host and effective port
pub fn is_same_host(page_url: &Url, link: &Url) -> bool {
    page_url.host_str().map(str::to_ascii_lowercase)
        == link.host_str().map(str::to_ascii_lowercase)
        && page_url.port_or_known_default() == link.port_or_known_default()
}

/// Assigns a category from the probe outcome and host equality
pub fn categorize(status_code: Option<u16>, is_internal: bool) -> LinkCategory {
    match status_code {
        None => LinkCategory::Inaccessible,
        Some(status) if status >= 400 => LinkCategory::Inaccessible,
        Some(_) if is_internal => LinkCategory::Internal,
        Some(_) => LinkCategory::External,
    }
}

/// Probes every candidate and classifies it
///
/// Up to `concurrency` probes are in flight at once; results keep document
/// order. `on_progress` is called after each link with the number of links
/// processed so far and the total.
///
/// # Arguments
///
/// * `candidates` - Anchors returned by [`discover_anchors`]
/// * `page_url` - The crawled page, used for the internal/external split
/// * `prober` - Reachability prober
/// * `concurrency` - Maximum probes in flight
/// * `on_progress` - Progress callback
pub async fn classify_links<P, F>(
    candidates: Vec<AnchorCandidate>,
    page_url: &Url,
    prober: &P,
    concurrency: usize,
    mut on_progress: F,
) -> LinkAnalysis
where
    P: LinkProber + ?Sized,
    F: FnMut(usize, usize),
{
    let total = candidates.len();
    let mut analysis = LinkAnalysis {
        counts: LinkCounts::default(),
        links: Vec::with_capacity(total),
    };

    let mut probes = stream::iter(candidates.into_iter().map(|candidate| async move {
        let status_code = prober.probe(&candidate.absolute_url).await;
        (candidate, status_code)
    }))
    .buffered(concurrency.max(1));

    while let Some((candidate, status_code)) = probes.next().await {
        let is_internal = is_same_host(page_url, &candidate.absolute_url);
        let category = categorize(status_code, is_internal);
        analysis.counts.record(category);
        analysis.links.push(LinkDetail {
            href: candidate.href,
            absolute_url: candidate.absolute_url.to_string(),
            is_internal,
            anchor_text: candidate.anchor_text,
            status_code,
            category,
        });

        on_progress(analysis.links.len(), total);
    }

    analysis
}
