use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use brownstone_crawler::select::document::Document;
use brownstone_crawler::{
    Archive, CrawlConfig, DownloadError, Fetcher, FsStore, Harvester, MemoryQueue, RobotsPolicy,
    Shutdown, SiteSpec, WorkQueue,
};
use chrono::NaiveDate;

struct FakeFetcher {
    pages: HashMap<String, String>,
    rotations: u32,
    stop_on_rotate: Option<Shutdown>,
}

impl FakeFetcher {
    fn new(pages: &[(&str, &str)]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(url, body)| (url.to_string(), body.to_string()))
                .collect(),
            rotations: 0,
            stop_on_rotate: None,
        }
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.pages
            .get(url)
            .map(|body| body.as_bytes().to_vec())
            .ok_or_else(|| DownloadError::RetriesExhausted {
                url: url.to_string(),
            })
    }

    fn rotate(&mut self) {
        self.rotations += 1;
        if let Some(shutdown) = &self.stop_on_rotate {
            shutdown.trigger();
        }
    }
}

struct ListingSite;

impl SiteSpec for ListingSite {
    fn base_url(&self) -> &str {
        "https://listings.example.com"
    }

    fn stop_test(&self, _page: &Document) -> bool {
        false
    }
}

fn test_conf() -> CrawlConfig {
    CrawlConfig {
        browse_delay_secs: 0.0,
        queue_wait_secs: 0,
        pause_base_secs: 0.0,
        pause_max_secs: 0.0,
        idle_shutdown_after: Some(1),
        ..CrawlConfig::default()
    }
}

fn harvest_archive(dir: &std::path::Path) -> Archive {
    let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    Archive::new(Arc::new(FsStore::new(dir)), "harvest", date)
}

#[test]
fn leased_pages_are_archived_then_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let archive = harvest_archive(dir.path());
    let queue = MemoryQueue::default();
    queue.send("https://listings.example.com/listing/a").unwrap();
    queue.send("https://listings.example.com/listing/b").unwrap();

    let mut fetcher = FakeFetcher::new(&[
        ("https://listings.example.com/listing/a", "<html>a</html>"),
        ("https://listings.example.com/listing/b", "<html>b</html>"),
    ]);
    let robots = RobotsPolicy::allow_all();
    let shutdown = Shutdown::new();
    let conf = test_conf();

    let site = ListingSite;
    let mut harvester = Harvester::new(
        &site, &mut fetcher, &queue, &robots, &archive, &shutdown, &conf,
    );
    let summary = harvester.run().unwrap();

    assert_eq!(summary.archived, 2);
    assert_eq!(summary.failed, 0);
    let keys = archive.list_pages().unwrap();
    assert_eq!(
        keys,
        vec!["harvest/2020/01/02/a.gz", "harvest/2020/01/02/b.gz"]
    );
    assert_eq!(archive.fetch_page(&keys[0]).unwrap(), b"<html>a</html>");
    // both messages acknowledged
    assert!(queue.receive(Duration::ZERO).unwrap().is_none());
}

#[test]
fn failed_downloads_are_nacked_and_identity_rotated() {
    let dir = tempfile::tempdir().unwrap();
    let archive = harvest_archive(dir.path());
    let queue = MemoryQueue::default();
    queue.send("https://listings.example.com/listing/gone").unwrap();

    let mut fetcher = FakeFetcher::new(&[]);
    let robots = RobotsPolicy::allow_all();
    let shutdown = Shutdown::new();
    // stop right after the nack cycle so the re-enqueued message is left
    // on the queue for inspection
    fetcher.stop_on_rotate = Some(shutdown.clone());
    let conf = test_conf();

    let site = ListingSite;
    let mut harvester = Harvester::new(
        &site, &mut fetcher, &queue, &robots, &archive, &shutdown, &conf,
    );
    let summary = harvester.run().unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(fetcher.rotations, 1);
    assert!(archive.list_pages().unwrap().is_empty());
    // the message is back on the queue for a later attempt
    let lease = queue.receive(Duration::ZERO).unwrap().unwrap();
    assert_eq!(lease.body, "https://listings.example.com/listing/gone");
}

#[test]
fn robots_disallowed_messages_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let archive = harvest_archive(dir.path());
    let queue = MemoryQueue::default();
    queue
        .send("https://listings.example.com/private/listing/a")
        .unwrap();

    let mut fetcher = FakeFetcher::new(&[]);
    let robots = RobotsPolicy::parse("brownstone", b"User-agent: *\nDisallow: /private/\n");
    let shutdown = Shutdown::new();
    let conf = test_conf();

    let site = ListingSite;
    let mut harvester = Harvester::new(
        &site, &mut fetcher, &queue, &robots, &archive, &shutdown, &conf,
    );
    let summary = harvester.run().unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.archived, 0);
    // permanently skipped, not re-enqueued
    assert!(queue.receive(Duration::ZERO).unwrap().is_none());
}

#[test]
fn redelivered_messages_overwrite_idempotently() {
    let dir = tempfile::tempdir().unwrap();
    let archive = harvest_archive(dir.path());

    // first delivery was processed up to the archive write, but the worker
    // crashed before acknowledging; the message is delivered again
    archive.store_page("a", b"<html>stale</html>").unwrap();

    let queue = MemoryQueue::default();
    queue.send("https://listings.example.com/listing/a").unwrap();

    let mut fetcher = FakeFetcher::new(&[(
        "https://listings.example.com/listing/a",
        "<html>fresh</html>",
    )]);
    let robots = RobotsPolicy::allow_all();
    let shutdown = Shutdown::new();
    let conf = test_conf();

    let site = ListingSite;
    let mut harvester = Harvester::new(
        &site, &mut fetcher, &queue, &robots, &archive, &shutdown, &conf,
    );
    harvester.run().unwrap();

    let keys = archive.list_pages().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(archive.fetch_page(&keys[0]).unwrap(), b"<html>fresh</html>");
}
