//! Structural metadata extracted from a parsed document

use crate::analyzer::text::{sanitize_text, MAX_TITLE_LEN};
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::fmt;

/// HTML version announced by the document type declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HtmlVersion {
    #[serde(rename = "HTML5")]
    Html5,
    #[serde(rename = "XHTML")]
    Xhtml,
    #[serde(rename = "HTML 4.01")]
    Html401,
}

impl HtmlVersion {
    /// Returns the label stored on the crawl record
    pub fn as_str(&self) -> &'static str {
        match self {
            HtmlVersion::Html5 => "HTML5",
            HtmlVersion::Xhtml => "XHTML",
            HtmlVersion::Html401 => "HTML 4.01",
        }
    }
}

impl fmt::Display for HtmlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifies the document's HTML version from its DOCTYPE
///
/// Anything missing, malformed or unrecognized is reported as HTML5.
pub fn detect_html_version(document: &Html) -> HtmlVersion {
    let doctype = document
        .tree
        .root()
        .children()
        .find_map(|node| node.value().as_doctype().cloned());

    let Some(doctype) = doctype else {
        return HtmlVersion::Html5;
    };

    let name = doctype.name().to_ascii_lowercase();
    let public_id = doctype.public_id().to_ascii_lowercase();

    if name == "html" {
        if public_id.is_empty() {
            return HtmlVersion::Html5;
        }
        if public_id.contains("xhtml") {
            return HtmlVersion::Xhtml;
        }
        if public_id.contains("html 4") {
            return HtmlVersion::Html401;
        }
    }

    // Legacy and malformed declarations fall back to the modern default
    HtmlVersion::Html5
}

/// Returns the text of the first `title` element that starts with text
///
/// Elements whose first child is not a text node are skipped. The result is
/// trimmed and sanitized; an empty string means no title was found.
pub fn extract_title(document: &Html) -> String {
    let Ok(selector) = Selector::parse("title") else {
        return String::new();
    };

    document
        .select(&selector)
        .find_map(|element| {
            element
                .first_child()
                .and_then(|child| child.value().as_text())
                .map(|text| sanitize_text(text, MAX_TITLE_LEN))
        })
        .unwrap_or_default()
}

/// Counts `h1` through `h6` elements, indexed by level minus one
pub fn count_headings(document: &Html) -> [u32; 6] {
    let mut counts = [0u32; 6];
    let Ok(selector) = Selector::parse("h1, h2, h3, h4, h5, h6") else {
        return counts;
    };

    for element in document.select(&selector) {
        let level = element
            .value()
            .name()
            .strip_prefix('h')
            .and_then(|digit| digit.parse::<usize>().ok());
        if let Some(level @ 1..=6) = level {
            counts[level - 1] += 1;
        }
    }

    counts
}

/// Returns true if any `form` contains a password input at any depth
pub fn has_login_form(document: &Html) -> bool {
    let (Ok(forms), Ok(inputs)) = (Selector::parse("form"), Selector::parse("input")) else {
        return false;
    };

    document
        .select(&forms)
        .any(|form| form.select(&inputs).any(is_password_input))
}

fn is_password_input(input: ElementRef<'_>) -> bool {
    input
        .value()
        .attr("type")
        .map(|kind| kind.trim().eq_ignore_ascii_case("password"))
        .unwrap_or(false)
}
