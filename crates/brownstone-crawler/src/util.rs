use std::time::Duration;

use rand_distr::{Distribution, Normal};
use url::Url;

/// If the URL is longer than 50 characters, show the last 45.
/// Useful for logging.
pub fn cut_url(url: &str) -> String {
    let chars = url.chars().count();
    if chars > 50 {
        let tail: String = url.chars().skip(chars - 45).collect();
        format!("...{tail}")
    } else {
        url.to_string()
    }
}

/// Resolves a possibly relative link against the site base.
pub(crate) fn absolutize(base: &Url, link: &str) -> Option<String> {
    match base.join(link) {
        Ok(url) => Some(url.into()),
        Err(e) => {
            log::debug!("discarding unparsable link {link}: {e}");
            None
        }
    }
}

/// Inter-request delay sampled from a Gaussian around the configured mean,
/// so the request cadence has no fixed fingerprint.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DelayJitter {
    mean_secs: f64,
}

impl DelayJitter {
    pub(crate) fn new(mean_secs: f64) -> Self {
        Self { mean_secs }
    }

    pub(crate) fn next(&self) -> Duration {
        if self.mean_secs <= 0.0 {
            return Duration::ZERO;
        }
        let secs = Normal::new(self.mean_secs, self.mean_secs / 4.0)
            .map(|normal| normal.sample(&mut rand::rng()))
            .unwrap_or(self.mean_secs)
            .max(0.0);
        Duration::from_secs_f64(secs)
    }
}
