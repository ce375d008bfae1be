use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use crate::config::CrawlConfig;
use crate::error::DownloadError;
use crate::util::cut_url;

/// Downloads pages on behalf of a walker or harvest worker.
///
/// The trait seams the identity machinery away from the traversal loops so
/// scenario tests can inject a canned transport.
pub trait Fetcher {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, DownloadError>;

    /// Discards the current network identity; the next fetch acquires a
    /// fresh one. Called after any permanent download failure, on the
    /// assumption that failure may mean detection or rate limiting.
    fn rotate(&mut self);
}

/// One anonymized egress context: an HTTP client bound to a circuit, plus
/// the number of requests it has served.
pub struct Identity {
    client: Client,
    requests_used: u32,
}

/// Acquires fresh network identities.
pub trait Connector: Send {
    fn connect(&self) -> Result<Identity, DownloadError>;
}

/// Plain connector without an anonymizing proxy, for tests and trusted runs.
pub struct DirectConnector {
    pub user_agents: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl DirectConnector {
    pub fn from_config(conf: &CrawlConfig) -> Self {
        Self {
            user_agents: conf.user_agents.clone(),
            headers: conf.headers.clone(),
            timeout: Duration::from_secs(conf.timeout_secs),
        }
    }
}

impl Connector for DirectConnector {
    fn connect(&self) -> Result<Identity, DownloadError> {
        let client = Client::builder()
            .default_headers(build_headers(&self.headers, &self.user_agents)?)
            .timeout(self.timeout)
            .build()?;
        Ok(Identity {
            client,
            requests_used: 0,
        })
    }
}

/// Connector that routes through a local Tor daemon.
///
/// Each connect signals NEWNYM on the control port before building the
/// session, so the circuit (and egress IP) is fresh, then binds a client to
/// the SOCKS proxy with a newly picked User-Agent.
pub struct TorConnector {
    pub socks_addr: String,
    pub control_addr: String,
    pub password: String,
    pub user_agents: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl Connector for TorConnector {
    fn connect(&self) -> Result<Identity, DownloadError> {
        signal_newnym(&self.control_addr, &self.password)?;
        let proxy = reqwest::Proxy::all(format!("socks5h://{}", self.socks_addr))?;
        let client = Client::builder()
            .proxy(proxy)
            .default_headers(build_headers(&self.headers, &self.user_agents)?)
            .timeout(self.timeout)
            .build()?;
        Ok(Identity {
            client,
            requests_used: 0,
        })
    }
}

fn build_headers(
    headers: &BTreeMap<String, String>,
    user_agents: &[String],
) -> Result<HeaderMap, DownloadError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DownloadError::Identity(format!("bad header name {name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DownloadError::Identity(format!("bad header value: {e}")))?;
        map.insert(name, value);
    }
    if !user_agents.is_empty() {
        let ua = &user_agents[rand::rng().random_range(0..user_agents.len())];
        let ua = HeaderValue::from_str(ua)
            .map_err(|e| DownloadError::Identity(format!("bad user agent: {e}")))?;
        map.insert(USER_AGENT, ua);
    }
    Ok(map)
}

/// Authenticates to the Tor control port and requests a new circuit.
fn signal_newnym(control_addr: &str, password: &str) -> Result<(), DownloadError> {
    let identity_err = |e: std::io::Error| DownloadError::Identity(e.to_string());

    let stream = TcpStream::connect(control_addr).map_err(identity_err)?;
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .map_err(identity_err)?;
    let mut reader = BufReader::new(stream.try_clone().map_err(identity_err)?);
    let mut stream = stream;

    let mut exchange = |command: String| -> Result<(), DownloadError> {
        stream.write_all(command.as_bytes()).map_err(identity_err)?;
        let mut reply = String::new();
        reader.read_line(&mut reply).map_err(identity_err)?;
        if reply.starts_with("250") {
            Ok(())
        } else {
            Err(DownloadError::Identity(format!(
                "control port refused {:?}: {}",
                command.split_whitespace().next().unwrap_or(""),
                reply.trim_end()
            )))
        }
    };

    exchange(format!("AUTHENTICATE \"{password}\"\r\n"))?;
    exchange("SIGNAL NEWNYM\r\n".to_string())?;
    stream.write_all(b"QUIT\r\n").map_err(identity_err)?;
    Ok(())
}

/// Owns the current [`Identity`] and enforces its request budget.
///
/// `fetch` lazily rotates once the budget is spent; callers additionally
/// call [`Fetcher::rotate`] after any permanent download failure.
pub struct IdentityManager {
    connector: Box<dyn Connector>,
    identity: Option<Identity>,
    budget: u32,
    max_retries: u32,
    backoff_factor: f64,
    retry_on: Vec<u16>,
}

impl IdentityManager {
    pub fn new(connector: Box<dyn Connector>, conf: &CrawlConfig) -> Self {
        Self {
            connector,
            identity: None,
            budget: conf.identity_budget,
            max_retries: conf.max_retries,
            backoff_factor: conf.backoff_factor,
            retry_on: conf.retry_on.clone(),
        }
    }

    fn identity(&mut self) -> Result<&mut Identity, DownloadError> {
        let spent = self
            .identity
            .as_ref()
            .map_or(true, |identity| identity.requests_used >= self.budget);
        if spent {
            log::info!("acquiring a fresh network identity");
            let fresh = self.connector.connect()?;
            Ok(self.identity.insert(fresh))
        } else {
            // spent is false only when an identity is present
            Ok(self.identity.as_mut().expect("identity present"))
        }
    }

    fn download(&mut self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let max_retries = self.max_retries.max(1);
        let backoff_factor = self.backoff_factor;
        let retry_on = self.retry_on.clone();
        let identity = self.identity()?;

        for attempt in 1..=max_retries {
            identity.requests_used += 1;
            match identity.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp.bytes()?.to_vec());
                    }
                    if !retry_on.contains(&status.as_u16()) {
                        return Err(DownloadError::Status {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    log::debug!(
                        "attempt {attempt} got status {status} for {}",
                        cut_url(url)
                    );
                }
                Err(e) => {
                    log::debug!("attempt {attempt} failed for {}: {e}", cut_url(url));
                }
            }
            if attempt < max_retries {
                let backoff = backoff_factor * 2f64.powi(attempt as i32 - 1);
                thread::sleep(Duration::from_secs_f64(backoff));
            }
        }

        Err(DownloadError::RetriesExhausted {
            url: url.to_string(),
        })
    }
}

impl Fetcher for IdentityManager {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.download(url)
    }

    fn rotate(&mut self) {
        self.identity = None;
    }
}
