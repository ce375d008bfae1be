use std::collections::HashMap;
use std::time::Duration;

use brownstone_crawler::select::document::Document;
use brownstone_crawler::select::predicate::{Attr, Class, Name, Predicate};
use brownstone_crawler::{
    CrawlConfig, DownloadError, Fetcher, MemoryQueue, RobotsPolicy, Shutdown, SiteSpec,
    WalkOutcome, Walker, WorkQueue,
};

/// Canned transport: a map of URL to page body, with optional one-shot
/// failures.
struct FakeFetcher {
    pages: HashMap<String, String>,
    fail_once: Vec<String>,
    fetched: Vec<String>,
    rotations: u32,
}

impl FakeFetcher {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
            fail_once: Vec::new(),
            fetched: Vec::new(),
            rotations: 0,
        }
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.fetched.push(url.to_string());
        if let Some(pos) = self.fail_once.iter().position(|u| u == url) {
            self.fail_once.remove(pos);
            return Err(DownloadError::RetriesExhausted {
                url: url.to_string(),
            });
        }
        self.pages
            .get(url)
            .map(|body| body.as_bytes().to_vec())
            .ok_or_else(|| DownloadError::Status {
                status: 404,
                url: url.to_string(),
            })
    }

    fn rotate(&mut self) {
        self.rotations += 1;
    }
}

/// A paginated listing index: each page links its listings and the next
/// index page; the last page carries a stop marker.
struct ListingSite;

impl SiteSpec for ListingSite {
    fn base_url(&self) -> &str {
        "https://listings.example.com"
    }

    fn seed(&self) -> String {
        "/search?page=1".to_string()
    }

    fn stop_test(&self, page: &Document) -> bool {
        page.find(Class("last-page")).next().is_some()
    }

    fn parsable_links(&self, page: &Document) -> Vec<String> {
        page.find(Name("a").and(Attr("class", "listing")))
            .filter_map(|a| a.attr("href").map(str::to_string))
            .collect()
    }

    fn browsable_links(&self, _url: &str, page: &Document) -> Vec<String> {
        page.find(Name("a").and(Attr("class", "next")))
            .filter_map(|a| a.attr("href").map(str::to_string))
            .collect()
    }
}

fn index_page(listings: &[&str], next: Option<&str>, last: bool) -> String {
    let mut html = String::from("<html><body>");
    for listing in listings {
        html.push_str(&format!(r#"<a class="listing" href="{listing}">x</a>"#));
    }
    if let Some(next) = next {
        html.push_str(&format!(r#"<a class="next" href="{next}">next</a>"#));
    }
    if last {
        html.push_str(r#"<div class="last-page"></div>"#);
    }
    html.push_str("</body></html>");
    html
}

fn drain(queue: &MemoryQueue) -> Vec<String> {
    let mut bodies = Vec::new();
    while let Some(lease) = queue.receive(Duration::ZERO).unwrap() {
        bodies.push(lease.body.clone());
        queue.delete(&lease).unwrap();
    }
    bodies.sort();
    bodies
}

#[test]
fn traversal_stops_on_the_last_index_page() {
    let page1 = index_page(&["/listing/a"], Some("/search?page=2"), false);
    let page2 = index_page(&["/listing/b"], Some("/search?page=3"), false);
    // page 3 both satisfies the stop test and advertises a page 4
    let page3 = index_page(&["/listing/c"], Some("/search?page=4"), true);

    let mut fetcher = FakeFetcher::new(&[
        ("https://listings.example.com/search?page=1", page1.as_str()),
        ("https://listings.example.com/search?page=2", page2.as_str()),
        ("https://listings.example.com/search?page=3", page3.as_str()),
    ]);
    let queue = MemoryQueue::default();
    let robots = RobotsPolicy::allow_all();
    let shutdown = Shutdown::new();
    let conf = CrawlConfig {
        browse_delay_secs: 0.0,
        ..CrawlConfig::default()
    };

    let site = ListingSite;
    let mut walker = Walker::new(&site, &mut fetcher, &queue, &robots, &shutdown, &conf).unwrap();
    let outcome = walker.walk(None).unwrap();

    assert_eq!(outcome, WalkOutcome::Done);
    assert_eq!(
        fetcher.fetched,
        vec![
            "https://listings.example.com/search?page=1",
            "https://listings.example.com/search?page=2",
            "https://listings.example.com/search?page=3",
        ]
    );
    assert_eq!(
        drain(&queue),
        vec![
            "https://listings.example.com/listing/a",
            "https://listings.example.com/listing/b",
            "https://listings.example.com/listing/c",
        ]
    );
}

#[test]
fn traversal_exhausts_without_a_stop_marker() {
    let page1 = index_page(&["/listing/a"], Some("/search?page=2"), false);
    let page2 = index_page(&["/listing/b"], None, false);

    let mut fetcher = FakeFetcher::new(&[
        ("https://listings.example.com/search?page=1", page1.as_str()),
        ("https://listings.example.com/search?page=2", page2.as_str()),
    ]);
    let queue = MemoryQueue::default();
    let robots = RobotsPolicy::allow_all();
    let shutdown = Shutdown::new();
    let conf = CrawlConfig {
        browse_delay_secs: 0.0,
        ..CrawlConfig::default()
    };

    let site = ListingSite;
    let mut walker = Walker::new(&site, &mut fetcher, &queue, &robots, &shutdown, &conf).unwrap();
    let outcome = walker.walk(None).unwrap();

    assert_eq!(outcome, WalkOutcome::Exhausted);
    assert_eq!(drain(&queue).len(), 2);
}

#[test]
fn failed_pages_are_requeued_and_identity_rotated() {
    let page1 = index_page(&["/listing/a"], Some("/search?page=2"), false);
    let page2 = index_page(&["/listing/b"], None, true);

    let mut fetcher = FakeFetcher::new(&[
        ("https://listings.example.com/search?page=1", page1.as_str()),
        ("https://listings.example.com/search?page=2", page2.as_str()),
    ]);
    fetcher
        .fail_once
        .push("https://listings.example.com/search?page=2".to_string());

    let queue = MemoryQueue::default();
    let robots = RobotsPolicy::allow_all();
    let shutdown = Shutdown::new();
    let conf = CrawlConfig {
        browse_delay_secs: 0.0,
        ..CrawlConfig::default()
    };

    let site = ListingSite;
    let mut walker = Walker::new(&site, &mut fetcher, &queue, &robots, &shutdown, &conf).unwrap();
    let outcome = walker.walk(None).unwrap();

    // the failure rotates the identity and the page is retried, not dropped
    assert_eq!(outcome, WalkOutcome::Done);
    assert_eq!(fetcher.rotations, 1);
    assert_eq!(
        fetcher
            .fetched
            .iter()
            .filter(|u| u.ends_with("page=2"))
            .count(),
        2
    );
    assert_eq!(drain(&queue).len(), 2);
}

#[test]
fn duplicate_listings_are_enqueued_once() {
    // both index pages advertise listing/a
    let page1 = index_page(&["/listing/a"], Some("/search?page=2"), false);
    let page2 = index_page(&["/listing/a", "/listing/b"], None, true);

    let mut fetcher = FakeFetcher::new(&[
        ("https://listings.example.com/search?page=1", page1.as_str()),
        ("https://listings.example.com/search?page=2", page2.as_str()),
    ]);
    let queue = MemoryQueue::default();
    let robots = RobotsPolicy::allow_all();
    let shutdown = Shutdown::new();
    let conf = CrawlConfig {
        browse_delay_secs: 0.0,
        ..CrawlConfig::default()
    };

    let site = ListingSite;
    let mut walker = Walker::new(&site, &mut fetcher, &queue, &robots, &shutdown, &conf).unwrap();
    walker.walk(None).unwrap();

    assert_eq!(
        drain(&queue),
        vec![
            "https://listings.example.com/listing/a",
            "https://listings.example.com/listing/b",
        ]
    );
}

#[test]
fn robots_disallowed_pages_are_skipped() {
    let page1 = index_page(&["/listing/a"], Some("/private/page2"), false);

    let mut fetcher = FakeFetcher::new(&[(
        "https://listings.example.com/search?page=1",
        page1.as_str(),
    )]);
    let queue = MemoryQueue::default();
    let robots = RobotsPolicy::parse("brownstone", b"User-agent: *\nDisallow: /private/\n");
    let shutdown = Shutdown::new();
    let conf = CrawlConfig {
        browse_delay_secs: 0.0,
        ..CrawlConfig::default()
    };

    let site = ListingSite;
    let mut walker = Walker::new(&site, &mut fetcher, &queue, &robots, &shutdown, &conf).unwrap();
    let outcome = walker.walk(None).unwrap();

    assert_eq!(outcome, WalkOutcome::Exhausted);
    // the disallowed page never consumed a request
    assert_eq!(fetcher.fetched.len(), 1);
}
