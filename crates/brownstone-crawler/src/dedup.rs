use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// URLs already seen during one traversal run.
///
/// Keys are fixed-size digests of the URL string; collisions are treated as
/// negligible (nothing here is adversarial). The set only grows, and it is
/// not persisted: every run restarts cold, which is a documented limitation
/// rather than a bug.
#[derive(Debug, Default)]
pub struct Explored {
    seen: HashSet<[u8; 32]>,
}

impl Explored {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(url: &str) -> [u8; 32] {
        Sha256::digest(url.as_bytes()).into()
    }

    pub fn add(&mut self, url: &str) {
        self.seen.insert(Self::key(url));
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(&Self::key(url))
    }

    /// Adds the URL and reports whether it was new.
    pub fn insert(&mut self, url: &str) -> bool {
        self.seen.insert(Self::key(url))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
