use std::fs;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::StorageError;

/// Blob storage behind the archive: the system of record for harvested
/// pages. Keys are `/`-separated paths.
pub trait BlobStore: Send + Sync {
    /// Writes a blob, overwriting any previous content under the key.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Keys under the prefix, sorted. An unknown prefix is an empty list.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Filesystem-backed blob store.
///
/// Writes go through a temp file and an atomic rename, so a crash mid-write
/// never leaves a truncated blob under a valid key.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collect_keys(
        &self,
        dir: &Path,
        keys: &mut Vec<String>,
    ) -> Result<(), StorageError> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_tmp = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.starts_with("tmp-"));
            if path.is_dir() {
                self.collect_keys(&path, keys)?;
            } else if is_tmp {
                // leftover from an interrupted write, never a valid blob
            } else if let Ok(rel) = path.strip_prefix(&self.root) {
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                keys.push(key);
            }
        }
        Ok(())
    }
}

impl BlobStore for FsStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("tmp-{}", process::id()));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.root.join(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        self.collect_keys(&dir, &mut keys)?;
        keys.sort();
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        match fs::read(self.root.join(key)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::MissingKey(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Compressed, date-partitioned page archive over a [`BlobStore`].
///
/// Pages land under `{prefix}/{YYYY/MM/DD}/{page_id}.gz`; re-archiving the
/// same id overwrites, so redelivered queue messages are harmless.
pub struct Archive {
    store: Arc<dyn BlobStore>,
    prefix: String,
    date_path: String,
}

impl Archive {
    pub fn new(store: Arc<dyn BlobStore>, prefix: &str, date: NaiveDate) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            date_path: date.format("%Y/%m/%d").to_string(),
        }
    }

    /// The `YYYY/MM/DD` partition this archive reads and writes.
    pub fn date_path(&self) -> &str {
        &self.date_path
    }

    fn key(&self, page_id: &str) -> String {
        format!("{}/{}/{}.gz", self.prefix, self.date_path, page_id)
    }

    /// Compresses and stores one page.
    pub fn store_page(&self, page_id: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes)?;
        let compressed = encoder.finish()?;
        self.store.put(&self.key(page_id), &compressed)
    }

    /// Keys of every page archived on this date.
    pub fn list_pages(&self) -> Result<Vec<String>, StorageError> {
        self.store
            .list(&format!("{}/{}", self.prefix, self.date_path))
    }

    /// Reads and decompresses one archived page by key.
    pub fn fetch_page(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let compressed = self.store.get(key)?;
        let mut decoder = GzDecoder::new(&compressed[..]);
        let mut page = Vec::new();
        decoder.read_to_end(&mut page)?;
        Ok(page)
    }

    /// Page id part of an archive key (the file stem without `.gz`).
    pub fn page_id(key: &str) -> &str {
        let name = key.rsplit('/').next().unwrap_or(key);
        name.strip_suffix(".gz").unwrap_or(name)
    }
}
