//! Disk Mirror - persist cache snapshots as JSON files
//!
//! Layout of the mirror directory:
//!
//! ```text
//! <dir>/dataset.json      serialized Dataset
//! <dir>/statistics.json   serialized StatisticsSnapshot
//! ```
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written snapshot. Every stored value carries the
//! fingerprint of the source it was built from; loads ignore mismatches.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{CacheError, CacheResult, EngineResult};
use crate::models::{Dataset, Fingerprint, StatisticsSnapshot};

const DATASET_FILE: &str = "dataset.json";
const STATISTICS_FILE: &str = "statistics.json";

/// Directory-backed mirror of the cache slots.
#[derive(Debug, Clone)]
pub struct DiskMirror {
    dir: PathBuf,
}

impl DiskMirror {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: PathBuf::from(dir.as_ref()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the mirror directory exists (or can be created) and is a directory.
    pub fn is_reachable(&self) -> bool {
        self.ensure_dir().is_ok()
    }

    pub fn save_dataset(&self, dataset: &Dataset) -> CacheResult<()> {
        self.write_json(DATASET_FILE, dataset)
    }

    /// Stored dataset, if present and built from `fingerprint`.
    pub fn load_dataset(&self, fingerprint: &Fingerprint) -> CacheResult<Option<Dataset>> {
        let dataset: Option<Dataset> = self.read_json(DATASET_FILE)?;
        Ok(dataset.filter(|d| &d.fingerprint == fingerprint))
    }

    pub fn save_statistics(&self, statistics: &StatisticsSnapshot) -> CacheResult<()> {
        self.write_json(STATISTICS_FILE, statistics)
    }

    /// Stored statistics, if present, built from `fingerprint` and younger
    /// than `ttl` (when given).
    pub fn load_statistics(
        &self,
        fingerprint: &Fingerprint,
        ttl: Option<Duration>,
    ) -> CacheResult<Option<StatisticsSnapshot>> {
        let statistics: Option<StatisticsSnapshot> = self.read_json(STATISTICS_FILE)?;
        Ok(statistics
            .filter(|s| &s.fingerprint == fingerprint)
            .filter(|s| {
                ttl.map_or(true, |ttl| {
                    let age = Utc::now().signed_duration_since(s.computed_at);
                    age.to_std().map_or(true, |age| age < ttl)
                })
            }))
    }

    /// Run `op` on the blocking pool. Mirror failures come back as
    /// [`EngineError::CacheBackendUnavailable`](crate::error::EngineError::CacheBackendUnavailable).
    pub async fn run<T, F>(self: Arc<Self>, op: F) -> EngineResult<T>
    where
        F: FnOnce(&DiskMirror) -> CacheResult<T> + Send + 'static,
        T: Send + 'static,
    {
        Ok(tokio::task::spawn_blocking(move || op(&self)).await??)
    }

    /// Remove every mirrored snapshot.
    pub fn clear(&self) -> CacheResult<()> {
        for name in [DATASET_FILE, STATISTICS_FILE] {
            match fs::remove_file(self.dir.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn ensure_dir(&self) -> CacheResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            CacheError::Unavailable(format!("{}: {}", self.dir.display(), e))
        })?;
        if !self.dir.is_dir() {
            return Err(CacheError::Unavailable(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }
        Ok(())
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> CacheResult<()> {
        self.ensure_dir()?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));
        fs::write(&tmp, serde_json::to_vec(value)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, name: &str) -> CacheResult<Option<T>> {
        let path = self.dir.join(name);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&content)?))
    }
}
