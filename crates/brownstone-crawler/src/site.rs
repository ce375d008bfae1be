use select::document::Document;
use sha2::{Digest, Sha256};
use url::Url;

use crate::record::PageParser;

/// Per-site crawl and parse logic, the one pluggable seam of the engine.
///
/// Every operation has a default so a site only implements what it needs:
/// a site without a stop test simply browses until its frontier is
/// exhausted, and a site without a parser extracts nothing but the
/// constant fields.
pub trait SiteSpec: Send + Sync {
    /// Root of the site; traversal stays within this domain.
    fn base_url(&self) -> &str;

    /// First index page of a traversal run.
    fn seed(&self) -> String {
        self.base_url().to_string()
    }

    /// True when `page` is the last index page worth browsing.
    fn stop_test(&self, _page: &Document) -> bool {
        false
    }

    /// Detail-page links found on an index page, possibly relative.
    fn parsable_links(&self, _page: &Document) -> Vec<String> {
        Vec::new()
    }

    /// Next index pages to browse, derived from the current URL and page.
    fn browsable_links(&self, _url: &str, _page: &Document) -> Vec<String> {
        Vec::new()
    }

    /// Stable page identifier used as the archive key, derived
    /// deterministically from the URL so concurrent workers agree on it.
    fn page_id(&self, url: &str) -> String {
        default_page_id(url)
    }

    /// Field extractors for detail pages.
    fn page_parser(&self) -> PageParser {
        PageParser::new()
    }
}

/// Last non-empty path segment of the URL, or a short digest when the URL
/// has no usable path.
pub fn default_page_id(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.rev().find(|s| !s.is_empty()).map(str::to_string))
        })
        .unwrap_or_else(|| hex::encode(&Sha256::digest(url.as_bytes())[..8]))
}
