use std::time::Duration;

use texting_robots::Robot;

/// Robots-exclusion rules for one site, fetched once per run.
///
/// A missing or unreadable robots.txt yields an allow-all policy: absence of
/// the file is not an error.
pub struct RobotsPolicy {
    robot: Option<Robot>,
}

impl RobotsPolicy {
    /// Downloads and parses `{base_url}/robots.txt` with a plain client
    /// (robots fetches don't consume an identity request).
    pub fn fetch(base_url: &str, agent: &str) -> Self {
        let url = format!("{}/robots.txt", base_url.trim_end_matches('/'));
        let body = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .ok()
            .and_then(|client| client.get(&url).send().ok())
            .filter(|resp| resp.status().is_success())
            .and_then(|resp| resp.bytes().ok());
        match body {
            Some(bytes) => Self::parse(agent, &bytes),
            None => {
                log::warn!("could not fetch {url}, allowing all");
                Self::allow_all()
            }
        }
    }

    /// Builds a policy from raw robots.txt bytes.
    pub fn parse(agent: &str, bytes: &[u8]) -> Self {
        match Robot::new(agent, bytes) {
            Ok(robot) => Self { robot: Some(robot) },
            Err(e) => {
                log::warn!("unparsable robots.txt ({e}), allowing all");
                Self::allow_all()
            }
        }
    }

    pub fn allow_all() -> Self {
        Self { robot: None }
    }

    pub fn can_fetch(&self, url: &str) -> bool {
        self.robot.as_ref().map_or(true, |r| r.allowed(url))
    }

    /// The site's declared crawl delay, if any.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.robot
            .as_ref()
            .and_then(|r| r.delay)
            .map(|secs| Duration::from_secs_f32(secs))
    }
}
