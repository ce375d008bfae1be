use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A page download that could not be completed.
///
/// Download errors are recovered locally (requeue the URL, rotate the
/// identity); they are never fatal to a run.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("retries exhausted for {url}")]
    RetriesExhausted { url: String },

    #[error("couldn't acquire a network identity: {0}")]
    Identity(String),
}

/// The distributed work queue misbehaved. Infrastructure failure, not
/// site-side blocking: surfaced to the operator instead of retried.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("queue protocol error: {0}")]
    Protocol(String),
}

/// The blob store misbehaved. Same treatment as [`QueueError`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("no blob under key {0}")]
    MissingKey(String),
}

/// Invalid or missing configuration, fatal at startup before any network
/// activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration file: {0}")]
    MissingFile(PathBuf),

    #[error("missing configuration key: {0}")]
    MissingKey(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Fatal harvest-loop failures (queue or store unreachable).
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
