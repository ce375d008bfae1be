use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tunables shared by the browse and harvest phases.
///
/// Defaults mirror a conservative single-identity crawl: small per-request
/// timeout, a handful of retries with exponential backoff, and an identity
/// retired after 50 requests or any permanent failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// User-agent pool; a fresh identity picks one at random.
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Extra request headers sent with every download.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-attempt download timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum download attempts per page.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff between attempts is `backoff_factor * 2^(attempt - 1)` seconds.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// HTTP status codes worth retrying.
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<u16>,

    /// Mean inter-request delay in seconds; a robots.txt crawl-delay takes
    /// precedence. The actual delay is jittered around this mean.
    #[serde(default = "default_browse_delay_secs")]
    pub browse_delay_secs: f64,

    /// Requests served by one identity before it is rotated.
    #[serde(default = "default_identity_budget")]
    pub identity_budget: u32,

    /// Long-poll wait on the work queue, in seconds.
    #[serde(default = "default_queue_wait_secs")]
    pub queue_wait_secs: u64,

    /// Base pause after an empty queue poll, in seconds. Doubles per
    /// consecutive empty poll.
    #[serde(default = "default_pause_base_secs")]
    pub pause_base_secs: f64,

    /// Cap on the empty-poll pause, in seconds.
    #[serde(default = "default_pause_max_secs")]
    pub pause_max_secs: f64,

    /// Stop a harvest run after this many consecutive empty polls.
    /// `None` keeps the worker polling until shutdown.
    #[serde(default)]
    pub idle_shutdown_after: Option<u32>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            user_agents: default_user_agents(),
            headers: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            retry_on: default_retry_on(),
            browse_delay_secs: default_browse_delay_secs(),
            identity_budget: default_identity_budget(),
            queue_wait_secs: default_queue_wait_secs(),
            pause_base_secs: default_pause_base_secs(),
            pause_max_secs: default_pause_max_secs(),
            idle_shutdown_after: None,
        }
    }
}

fn default_user_agents() -> Vec<String> {
    vec![String::from(
        "Mozilla/5.0 (X11; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/115.0",
    )]
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_factor() -> f64 {
    0.3
}

fn default_retry_on() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

fn default_browse_delay_secs() -> f64 {
    0.5
}

fn default_identity_budget() -> u32 {
    50
}

fn default_queue_wait_secs() -> u64 {
    20
}

fn default_pause_base_secs() -> f64 {
    0.3
}

fn default_pause_max_secs() -> f64 {
    60.0 * 30.0
}
