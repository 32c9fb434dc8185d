//! Document analysis for a single crawled page
//!
//! This module derives everything a crawl records about a page:
//! - HTML version from the DOCTYPE
//! - Page title
//! - Heading counts for levels 1 through 6
//! - Presence of a login form
//! - Links, probed for reachability and classified
//!
//! The analyzer never fails on malformed markup; missing structure degrades
//! to defaults.

mod document;
mod links;
mod text;

pub use document::{count_headings, detect_html_version, extract_title, has_login_form, HtmlVersion};
pub use links::{
    categorize, classify_links, discover_anchors, is_same_host, AnchorCandidate, LinkAnalysis,
    LinkCategory, LinkCounts, LinkDetail, LinkProber,
};
pub use text::{sanitize_text, MAX_ANCHOR_TEXT_LEN, MAX_TITLE_LEN};

use scraper::Html;
use serde::Serialize;

/// Structural metadata of a page, excluding its links
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageMetadata {
    pub html_version: HtmlVersion,
    pub title: String,
    /// Counts for h1..h6; levels that never occur are zero
    pub heading_counts: [u32; 6],
    pub has_login_form: bool,
}

/// Extracts the non-link metadata from a parsed document
///
/// # Example
///
/// ```
/// use pageprobe::analyzer::{analyze_document, HtmlVersion};
/// use scraper::Html;
///
/// let document = Html::parse_document("<!DOCTYPE html><title>Hi</title><h1>Hello</h1>");
/// let metadata = analyze_document(&document);
/// assert_eq!(metadata.html_version, HtmlVersion::Html5);
/// assert_eq!(metadata.title, "Hi");
/// assert_eq!(metadata.heading_counts[0], 1);
/// ```
pub fn analyze_document(document: &Html) -> PageMetadata {
    PageMetadata {
        html_version: detect_html_version(document),
        title: extract_title(document),
        heading_counts: count_headings(document),
        has_login_form: has_login_form(document),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Fixture Page</title></head>
<body>
  <h1>Main</h1>
  <h2>One</h2><h2>Two</h2><h2>Three</h2>
  <h3>a</h3><h3>b</h3><h3>c</h3><h3>d</h3>
  <h4>deep</h4>
  <form action="/search"><input type="text" name="q"><button>Go</button></form>
  <form action="/login" method="post">
    <input type="text" name="user">
    <input type="password" name="pass">
  </form>
</body>
</html>"#;

    #[test]
    fn test_fixture_metadata() {
        let document = Html::parse_document(FIXTURE);
        let metadata = analyze_document(&document);

        assert_eq!(metadata.html_version, HtmlVersion::Html5);
        assert_eq!(metadata.title, "Fixture Page");
        assert_eq!(metadata.heading_counts, [1, 3, 4, 1, 0, 0]);
        assert!(metadata.has_login_form);
    }

    #[test]
    fn test_empty_document_degrades_to_defaults() {
        let document = Html::parse_document("");
        let metadata = analyze_document(&document);

        assert_eq!(metadata.html_version, HtmlVersion::Html5);
        assert_eq!(metadata.title, "");
        assert_eq!(metadata.heading_counts, [0; 6]);
        assert!(!metadata.has_login_form);
    }
}
