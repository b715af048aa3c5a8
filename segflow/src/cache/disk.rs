//! Filesystem cache store.
//!
//! Layout: `{root}/{step}/{fingerprint}.json`, one serde_json document per
//! entry. Writes go to a temporary file in the same directory and are
//! renamed into place, so readers never observe a partial entry.
//!
//! A write interrupted between the two steps leaves its temporary file
//! behind. Each `put` removes temporaries in the step's directory that are
//! older than [`STALE_TEMP_AGE`]; younger ones may belong to a write still
//! in flight.

use super::{CacheEntry, CacheStore};
use crate::errors::{Result, SegflowError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Age after which an orphaned temporary file is removed.
const STALE_TEMP_AGE: Duration = Duration::from_secs(300);

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

/// Stores entries as JSON files under a root directory.
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    /// Creates a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the directory holding the entries of `step`.
    #[must_use]
    pub fn step_dir(&self, step: &str) -> PathBuf {
        self.root.join(step)
    }

    /// Returns the file an entry is stored in.
    #[must_use]
    pub fn entry_path(&self, step: &str, fingerprint: &str) -> PathBuf {
        self.step_dir(step).join(format!("{fingerprint}.json"))
    }

    /// Removes temporary files in `dir` older than [`STALE_TEMP_AGE`].
    ///
    /// Best effort: failures are logged and ignored.
    async fn sweep_stale_temps(dir: &Path) {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "cannot list cache directory");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_name().to_str().is_some_and(is_temp_file) {
                continue;
            }
            let stale = entry
                .metadata()
                .await
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > STALE_TEMP_AGE);
            if stale {
                let path = entry.path();
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!(path = %path.display(), "removed stale cache temp file"),
                    Err(e) => debug!(path = %path.display(), error = %e, "cannot remove stale temp file"),
                }
            }
        }
    }
}

#[async_trait]
impl CacheStore for DiskCache {
    async fn get(&self, step: &str, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(step, fingerprint);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let corrupted = |reason: String| SegflowError::CacheCorruption {
            step: step.to_string(),
            fingerprint: fingerprint.to_string(),
            reason,
        };
        let entry: CacheEntry = serde_json::from_slice(&bytes).map_err(|e| corrupted(e.to_string()))?;
        if entry.step != step || entry.fingerprint != fingerprint {
            return Err(corrupted(format!(
                "entry is labelled {}/{}",
                entry.step, entry.fingerprint
            )));
        }
        Ok(Some(entry))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        let dir = self.step_dir(&entry.step);
        tokio::fs::create_dir_all(&dir).await?;
        Self::sweep_stale_temps(&dir).await;

        let bytes = serde_json::to_vec(entry)?;
        let tmp = dir.join(format!(".{}.{}.tmp", entry.fingerprint, Uuid::new_v4()));
        let target = self.entry_path(&entry.step, &entry.fingerprint);

        tokio::fs::write(&tmp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(step = %entry.step, path = %target.display(), bytes = bytes.len(), "cache entry written");
        Ok(())
    }

    async fn remove(&self, step: &str, fingerprint: &str) -> Result<()> {
        match tokio::fs::remove_file(self.entry_path(step, fingerprint)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
