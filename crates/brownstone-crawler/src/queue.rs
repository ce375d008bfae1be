use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::QueueError;

/// A message leased from the queue. The lease must be deleted once the page
/// is durably archived, otherwise the message becomes visible again and is
/// redelivered (at-least-once).
#[derive(Debug)]
pub struct Lease {
    pub body: String,
    token: String,
}

impl Lease {
    fn new(body: String, token: String) -> Self {
        Self { body, token }
    }
}

/// The distributed work queue decoupling discovery from download.
///
/// At-least-once delivery, no ordering guarantee. A message is never
/// permanently removed until `delete` is called on its lease; a consumer
/// crash before deletion causes eventual redelivery.
pub trait WorkQueue: Send + Sync {
    fn send(&self, body: &str) -> Result<(), QueueError>;

    /// Long-polls up to `wait` for a message.
    fn receive(&self, wait: Duration) -> Result<Option<Lease>, QueueError>;

    /// Acknowledges a processed message. Deleting an expired or unknown
    /// lease is not an error.
    fn delete(&self, lease: &Lease) -> Result<(), QueueError>;
}

const RECLAIM_SLICE: Duration = Duration::from_millis(50);

/// In-process queue with visibility-timeout lease semantics, for tests and
/// single-process runs.
pub struct MemoryQueue {
    inner: Mutex<MemoryInner>,
    cond: Condvar,
    visibility: Duration,
}

#[derive(Default)]
struct MemoryInner {
    ready: VecDeque<String>,
    leased: HashMap<u64, LeasedMessage>,
    next_token: u64,
}

struct LeasedMessage {
    body: String,
    deadline: Instant,
}

impl MemoryQueue {
    pub fn new(visibility: Duration) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            cond: Condvar::new(),
            visibility,
        }
    }

    /// Messages currently visible (not leased).
    pub fn ready_len(&self) -> usize {
        self.inner.lock().unwrap().ready.len()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn reclaim_expired(inner: &mut MemoryInner) {
    let now = Instant::now();
    let expired: Vec<u64> = inner
        .leased
        .iter()
        .filter(|(_, msg)| msg.deadline <= now)
        .map(|(token, _)| *token)
        .collect();
    for token in expired {
        if let Some(msg) = inner.leased.remove(&token) {
            inner.ready.push_back(msg.body);
        }
    }
}

impl WorkQueue for MemoryQueue {
    fn send(&self, body: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ready.push_back(body.to_string());
        self.cond.notify_one();
        Ok(())
    }

    fn receive(&self, wait: Duration) -> Result<Option<Lease>, QueueError> {
        let deadline = Instant::now() + wait;
        let mut inner = self.inner.lock().unwrap();
        loop {
            reclaim_expired(&mut inner);
            if let Some(body) = inner.ready.pop_front() {
                let token = inner.next_token;
                inner.next_token += 1;
                inner.leased.insert(
                    token,
                    LeasedMessage {
                        body: body.clone(),
                        deadline: Instant::now() + self.visibility,
                    },
                );
                return Ok(Some(Lease::new(body, token.to_string())));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // short slices so expired leases are reclaimed during the wait
            let slice = RECLAIM_SLICE.min(deadline - now);
            let (guard, _) = self.cond.wait_timeout(inner, slice).unwrap();
            inner = guard;
        }
    }

    fn delete(&self, lease: &Lease) -> Result<(), QueueError> {
        let token: u64 = lease
            .token
            .parse()
            .map_err(|_| QueueError::Protocol(format!("bad lease token {}", lease.token)))?;
        let mut inner = self.inner.lock().unwrap();
        if inner.leased.remove(&token).is_none() {
            log::debug!("lease {token} already expired or deleted");
        }
        Ok(())
    }
}

/// Directory-backed durable queue shared by the browse and harvest
/// processes on one host.
///
/// One file per message; a lease is an atomic rename to a `.lease` file
/// carrying its expiry, so concurrent workers never claim the same message
/// and expired leases are reclaimed by any consumer. A remote queue service
/// drops in behind the [`WorkQueue`] trait without touching the callers.
pub struct FsQueue {
    dir: PathBuf,
    visibility: Duration,
    seq: AtomicU64,
}

impl FsQueue {
    pub fn open(dir: impl Into<PathBuf>, visibility: Duration) -> Result<Self, QueueError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            visibility,
            seq: AtomicU64::new(0),
        })
    }

    fn now_millis() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis()
    }

    /// Renames expired `.lease` files back to `.msg` so their messages
    /// become visible again.
    fn reclaim_expired(&self) -> Result<(), QueueError> {
        let now = Self::now_millis();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lease") {
                continue;
            }
            let Some(deadline) = lease_deadline(&path) else {
                continue;
            };
            if deadline <= now {
                let Some(msg_path) = lease_message_path(&path) else {
                    continue;
                };
                // a concurrent reclaim may win the rename; that's fine
                if fs::rename(&path, &msg_path).is_ok() {
                    log::debug!("reclaimed expired lease {}", path.display());
                }
            }
        }
        Ok(())
    }

    fn try_claim(&self) -> Result<Option<Lease>, QueueError> {
        self.reclaim_expired()?;
        let mut candidates: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("msg"))
            .collect();
        candidates.sort();

        for path in candidates {
            let deadline = Self::now_millis() + self.visibility.as_millis();
            let mut lease_path = path.clone();
            lease_path.set_extension(format!("{deadline}.lease"));
            // the rename is the claim: exactly one worker wins it
            if fs::rename(&path, &lease_path).is_err() {
                continue;
            }
            let body = fs::read_to_string(&lease_path)?;
            let token = lease_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| QueueError::Protocol("unreadable lease name".into()))?
                .to_string();
            return Ok(Some(Lease::new(body, token)));
        }
        Ok(None)
    }
}

fn lease_deadline(path: &Path) -> Option<u128> {
    // {name}.{deadline}.lease
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('.').next()?.parse().ok()
}

fn lease_message_path(path: &Path) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_str()?;
    let (name, _deadline) = stem.rsplit_once('.')?;
    Some(path.with_file_name(format!("{name}.msg")))
}

impl WorkQueue for FsQueue {
    fn send(&self, body: &str) -> Result<(), QueueError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let name = format!(
            "{:020}-{}-{:06}.msg",
            Self::now_millis(),
            process::id(),
            seq
        );
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn receive(&self, wait: Duration) -> Result<Option<Lease>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(lease) = self.try_claim()? {
                return Ok(Some(lease));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(100).min(deadline - now));
        }
    }

    fn delete(&self, lease: &Lease) -> Result<(), QueueError> {
        match fs::remove_file(self.dir.join(&lease.token)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("lease {} already expired or deleted", lease.token);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
