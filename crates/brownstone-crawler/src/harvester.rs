use std::time::Duration;

use crate::archive::Archive;
use crate::config::CrawlConfig;
use crate::error::HarvestError;
use crate::queue::WorkQueue;
use crate::robots::RobotsPolicy;
use crate::session::Fetcher;
use crate::shutdown::Shutdown;
use crate::site::SiteSpec;
use crate::util::{cut_url, DelayJitter};

/// Pause after the `consecutive`-th empty poll: doubles from `base` per
/// consecutive miss, capped at `cap`.
pub fn pause_duration(base: Duration, cap: Duration, consecutive: u32) -> Duration {
    let factor = 2f64.powi(consecutive.min(64) as i32);
    Duration::from_secs_f64((base.as_secs_f64() * factor).min(cap.as_secs_f64()))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HarvestSummary {
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// One harvest worker: drains the distributed queue, downloads and
/// archives pages.
///
/// Any number of workers may run concurrently against the same queue;
/// correctness relies entirely on the queue's lease semantics. A message
/// is acknowledged only after the page is durably archived, so a crash in
/// between causes redelivery instead of data loss (the archive write is
/// idempotent).
pub struct Harvester<'a> {
    site: &'a dyn SiteSpec,
    fetcher: &'a mut dyn Fetcher,
    queue: &'a dyn WorkQueue,
    robots: &'a RobotsPolicy,
    archive: &'a Archive,
    shutdown: &'a Shutdown,
    delay: DelayJitter,
    queue_wait: Duration,
    pause_base: Duration,
    pause_max: Duration,
    idle_shutdown_after: Option<u32>,
    pauses: u32,
}

impl<'a> Harvester<'a> {
    pub fn new(
        site: &'a dyn SiteSpec,
        fetcher: &'a mut dyn Fetcher,
        queue: &'a dyn WorkQueue,
        robots: &'a RobotsPolicy,
        archive: &'a Archive,
        shutdown: &'a Shutdown,
        conf: &CrawlConfig,
    ) -> Self {
        let mean = robots
            .crawl_delay()
            .map(|d| d.as_secs_f64())
            .unwrap_or(conf.browse_delay_secs);
        Self {
            site,
            fetcher,
            queue,
            robots,
            archive,
            shutdown,
            delay: DelayJitter::new(mean),
            queue_wait: Duration::from_secs(conf.queue_wait_secs),
            pause_base: Duration::from_secs_f64(conf.pause_base_secs),
            pause_max: Duration::from_secs_f64(conf.pause_max_secs),
            idle_shutdown_after: conf.idle_shutdown_after,
            pauses: 0,
        }
    }

    /// Runs the lease/download/archive/ack loop until shutdown (or until
    /// the queue stays empty past the configured idle budget). Per-page
    /// failures re-enqueue and continue; queue and store failures halt.
    pub fn run(&mut self) -> Result<HarvestSummary, HarvestError> {
        log::info!("start harvesting");
        let mut summary = HarvestSummary::default();

        while !self.shutdown.is_triggered() {
            let Some(lease) = self.queue.receive(self.queue_wait)? else {
                let pause = pause_duration(self.pause_base, self.pause_max, self.pauses);
                self.pauses += 1;
                if let Some(limit) = self.idle_shutdown_after {
                    if self.pauses > limit {
                        log::info!("queue stayed empty after {limit} polls, stopping");
                        break;
                    }
                }
                log::info!("no message received, pausing {:.1}s", pause.as_secs_f64());
                if self.shutdown.wait_for(pause) {
                    break;
                }
                continue;
            };
            self.pauses = 0;

            let url = lease.body.clone();
            if !self.robots.can_fetch(&url) {
                log::info!("forbidden: {}", cut_url(&url));
                self.queue.delete(&lease)?;
                summary.skipped += 1;
                continue;
            }

            log::info!("downloading {}", cut_url(&url));
            let downloaded = self.fetcher.fetch(&url);
            self.shutdown.wait_for(self.delay.next());

            match downloaded {
                Ok(bytes) => {
                    let page_id = self.site.page_id(&url);
                    log::info!("archiving {page_id}");
                    self.archive.store_page(&page_id, &bytes)?;
                    // ack strictly after durable archival; a failed delete
                    // only means a harmless redelivery
                    if let Err(e) = self.queue.delete(&lease) {
                        log::warn!("failed to delete message for {page_id}: {e}");
                    }
                    summary.archived += 1;
                }
                Err(e) => {
                    log::warn!(
                        "download failed for {}: {e}; re-enqueueing and rotating identity",
                        cut_url(&url)
                    );
                    self.queue.delete(&lease)?;
                    self.queue.send(&url)?;
                    self.fetcher.rotate();
                    summary.failed += 1;
                }
            }
        }

        log::info!(
            "harvest finished: {} archived, {} skipped, {} failed",
            summary.archived,
            summary.skipped,
            summary.failed
        );
        Ok(summary)
    }
}
