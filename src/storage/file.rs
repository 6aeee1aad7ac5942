// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File-backed key/value storage.
//!
//! The whole map lives in one JSON document. Each mutation rewrites the
//! document through a temp file + atomic rename while holding an exclusive
//! lock on a sibling `.lock` file, so a crash mid-write leaves either the old
//! or the new document on disk, never a torn one.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use super::KeyValueStore;
use crate::locks::{resilient_read, resilient_write};

/// Default timeout for acquiring file locks (5 seconds)
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

const DOCUMENT_VERSION: u32 = 1;

/// On-disk document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StoreDocument {
    #[serde(default)]
    values: BTreeMap<String, String>,
    /// When the document was last saved
    last_saved: Option<DateTime<Utc>>,
    /// Version for future migrations
    #[serde(default)]
    version: u32,
}

/// Key/value storage persisted to a single JSON file.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    document: RwLock<StoreDocument>,
}

impl FileKeyValueStore {
    /// Open the store at `path`, loading existing contents if present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = Self::load(&path, LOCK_TIMEOUT)?;
        tracing::debug!(path = %path.display(), keys = document.values.len(), "opened state file");
        Ok(Self {
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the document was last flushed, if ever.
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        resilient_read(&self.document).last_saved
    }

    fn lock_path(path: &Path) -> PathBuf {
        path.with_extension("lock")
    }

    fn empty_document() -> StoreDocument {
        StoreDocument {
            version: DOCUMENT_VERSION,
            ..StoreDocument::default()
        }
    }

    /// `state.json` -> `state.json.corrupt-20250101T120000.000Z`
    fn corrupt_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        path.with_file_name(format!(
            "{}.corrupt-{}",
            name,
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        ))
    }

    fn load(path: &Path, timeout: Duration) -> Result<StoreDocument> {
        if !path.exists() {
            return Ok(Self::empty_document());
        }

        let lock_path = Self::lock_path(path);
        let lock_file = Self::open_lock_file(&lock_path)?;
        Self::acquire_shared_lock_with_timeout(&lock_file, timeout)?;

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {:?}", path))?;
        match serde_json::from_str::<StoreDocument>(&content) {
            Ok(document) => Ok(document),
            Err(e) => {
                // Keep the unreadable document for inspection and start over.
                let aside = Self::corrupt_path(path);
                fs::rename(path, &aside).with_context(|| {
                    format!("Failed to move corrupt state file aside: {:?}", path)
                })?;
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "state file is corrupt, starting empty"
                );
                Ok(Self::empty_document())
            }
        }
    }

    fn open_lock_file(lock_path: &Path) -> Result<File> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for lock file: {:?}", parent))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))
    }

    /// Acquire an exclusive lock on `lock_path`, retrying until `timeout`.
    fn acquire_exclusive_lock_with_timeout(lock_path: &Path, timeout: Duration) -> Result<File> {
        let lock_file = Self::open_lock_file(lock_path)?;
        let start = Instant::now();

        loop {
            match FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        bail!(
                            "Timed out waiting for exclusive lock on {:?} after {:?}",
                            lock_path,
                            timeout
                        );
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to acquire exclusive lock on {:?}", lock_path));
                }
            }
        }
    }

    fn acquire_shared_lock_with_timeout(file: &File, timeout: Duration) -> Result<()> {
        let start = Instant::now();

        loop {
            match FileExt::try_lock_shared(file) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        bail!("Timed out waiting for shared lock after {:?}", timeout);
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e).context("Failed to acquire shared lock on state file");
                }
            }
        }
    }

    /// Write `document` to disk: temp file, fsync, atomic rename, all under
    /// the exclusive lock.
    fn flush(&self, document: &mut StoreDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let _lock_guard =
            Self::acquire_exclusive_lock_with_timeout(&Self::lock_path(&self.path), LOCK_TIMEOUT)?;

        let temp_path = self.path.with_extension("tmp");
        document.last_saved = Some(Utc::now());
        document.version = DOCUMENT_VERSION;

        let content = serde_json::to_string_pretty(document)
            .context("Failed to serialize state to JSON")?;

        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
            temp_file
                .write_all(content.as_bytes())
                .context("Failed to write to temp file")?;
            temp_file
                .sync_all()
                .context("Failed to sync temp file to disk")?;
        }

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp file to state file: {:?} -> {:?}",
                temp_path, self.path
            )
        })?;

        Ok(())
    }

    /// Apply `mutate` and flush; on flush failure the in-memory document is
    /// restored so callers never observe an unsaved value.
    fn mutate(&self, mutate: impl FnOnce(&mut BTreeMap<String, String>) -> bool) -> Result<()> {
        let mut document = resilient_write(&self.document);
        let previous = document.clone();
        if !mutate(&mut document.values) {
            return Ok(());
        }
        if let Err(e) = self.flush(&mut document) {
            *document = previous;
            return Err(e);
        }
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(resilient_read(&self.document).values.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.mutate(|values| {
            if values.get(key).map(String::as_str) == Some(value) {
                return false;
            }
            values.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.mutate(|values| values.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(resilient_read(&self.document)
            .values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
