use std::collections::VecDeque;

use select::document::Document;
use url::Url;

use crate::config::CrawlConfig;
use crate::dedup::Explored;
use crate::error::{ConfigError, QueueError};
use crate::queue::WorkQueue;
use crate::robots::RobotsPolicy;
use crate::session::Fetcher;
use crate::shutdown::Shutdown;
use crate::site::SiteSpec;
use crate::util::{absolutize, cut_url, DelayJitter};

/// How a traversal run ended. `Done` and `Exhausted` are both valid,
/// non-error terminations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// The site's stop predicate was satisfied.
    Done,
    /// The frontier drained without the stop predicate ever firing.
    Exhausted,
    /// Cooperative shutdown fired mid-run.
    Interrupted,
}

/// Single-threaded frontier traversal of a site's index pages.
///
/// Index pages are explored one pagination chain at a time (newly found
/// index links are taken before older ones, while failed pages go to the
/// other end of the frontier); detail-page links found along the way are
/// deduplicated and pushed onto the distributed harvest queue.
pub struct Walker<'a> {
    site: &'a dyn SiteSpec,
    fetcher: &'a mut dyn Fetcher,
    queue: &'a dyn WorkQueue,
    robots: &'a RobotsPolicy,
    shutdown: &'a Shutdown,
    delay: DelayJitter,
    base: Url,
    explored: Explored,
    frontier: VecDeque<String>,
}

impl<'a> Walker<'a> {
    pub fn new(
        site: &'a dyn SiteSpec,
        fetcher: &'a mut dyn Fetcher,
        queue: &'a dyn WorkQueue,
        robots: &'a RobotsPolicy,
        shutdown: &'a Shutdown,
        conf: &CrawlConfig,
    ) -> Result<Self, ConfigError> {
        let base = Url::parse(site.base_url())
            .map_err(|e| ConfigError::Invalid(format!("bad base url {}: {e}", site.base_url())))?;
        // the site's declared crawl delay wins over the configured mean
        let mean = robots
            .crawl_delay()
            .map(|d| d.as_secs_f64())
            .unwrap_or(conf.browse_delay_secs);
        Ok(Self {
            site,
            fetcher,
            queue,
            robots,
            shutdown,
            delay: DelayJitter::new(mean),
            base,
            explored: Explored::new(),
            frontier: VecDeque::new(),
        })
    }

    /// Runs one traversal from `initial` (or the site's seed). Individual
    /// page failures requeue and continue; only a queue failure is fatal.
    pub fn walk(&mut self, initial: Option<&str>) -> Result<WalkOutcome, QueueError> {
        let seed = initial.map(str::to_string).unwrap_or_else(|| self.site.seed());
        let seed = absolutize(&self.base, &seed).unwrap_or(seed);
        log::info!("start browsing from {}", cut_url(&seed));

        self.frontier.push_front(seed.clone());
        self.explored.add(&seed);

        while let Some(current) = self.frontier.pop_back() {
            if self.shutdown.is_triggered() {
                log::info!("shutdown requested, stopping traversal");
                return Ok(WalkOutcome::Interrupted);
            }

            if !self.robots.can_fetch(&current) {
                log::info!("forbidden: {}", cut_url(&current));
                continue;
            }

            log::info!("downloading {}", cut_url(&current));
            let downloaded = self.fetcher.fetch(&current);
            self.shutdown.wait_for(self.delay.next());

            let bytes = match downloaded {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!(
                        "download failed for {}: {e}; requeueing and rotating identity",
                        cut_url(&current)
                    );
                    self.frontier.push_front(current);
                    self.fetcher.rotate();
                    continue;
                }
            };

            let page = Document::from(String::from_utf8_lossy(&bytes).as_ref());

            for link in self.site.parsable_links(&page) {
                let Some(url) = absolutize(&self.base, &link) else {
                    continue;
                };
                if self.explored.insert(&url) {
                    log::info!("found to parse: {}", cut_url(&url));
                    self.queue.send(&url)?;
                }
            }

            if self.site.stop_test(&page) {
                log::info!("reached last page to browse, stopping");
                return Ok(WalkOutcome::Done);
            }

            for link in self.site.browsable_links(&current, &page) {
                let Some(url) = absolutize(&self.base, &link) else {
                    continue;
                };
                if self.explored.insert(&url) {
                    log::info!("found to browse next: {}", cut_url(&url));
                    self.frontier.push_back(url);
                }
            }
        }

        Ok(WalkOutcome::Exhausted)
    }

    /// URLs marked explored so far (seed included).
    pub fn explored_len(&self) -> usize {
        self.explored.len()
    }
}
