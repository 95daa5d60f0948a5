//! Cache Store - atomically published dataset and statistics snapshots
//!
//! Two slots, each holding at most one immutable snapshot behind an `Arc`.
//! Readers clone the `Arc` under a short read lock and never observe a
//! partially built value; writers swap the whole entry.
//!
//! An optional [`DiskMirror`] persists both slots so a restart with an
//! unchanged source skips the rebuild.

pub mod disk;

pub use disk::DiskMirror;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::{Dataset, Fingerprint, StatisticsSnapshot};

/// A published value with its metadata.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    /// Fingerprint of the source the value was derived from.
    pub fingerprint: Fingerprint,
    pub stored_at: DateTime<Utc>,
    /// `None` never expires.
    pub ttl: Option<Duration>,
    inserted: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(value: Arc<T>, fingerprint: Fingerprint, ttl: Option<Duration>) -> Self {
        Self {
            value,
            fingerprint,
            stored_at: Utc::now(),
            ttl,
            inserted: Instant::now(),
        }
    }

    /// Time since the entry was published.
    pub fn age(&self) -> Duration {
        self.inserted.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.age() >= ttl)
    }
}

/// The named cache slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Dataset,
    Statistics,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Dataset => write!(f, "dataset"),
            Slot::Statistics => write!(f, "statistics"),
        }
    }
}

/// One atomically replaceable slot.
struct Cell<T> {
    entry: RwLock<Option<Arc<CacheEntry<T>>>>,
}

impl<T> Cell<T> {
    fn new() -> Self {
        Self {
            entry: RwLock::new(None),
        }
    }

    fn load(&self) -> Option<Arc<CacheEntry<T>>> {
        self.entry.read().clone()
    }

    fn store(&self, entry: CacheEntry<T>) -> Arc<CacheEntry<T>> {
        let entry = Arc::new(entry);
        *self.entry.write() = Some(entry.clone());
        entry
    }

    fn take(&self) -> bool {
        self.entry.write().take().is_some()
    }
}

/// In-process store for the current dataset and statistics.
pub struct CacheStore {
    dataset: Cell<Dataset>,
    statistics: Cell<StatisticsSnapshot>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            dataset: Cell::new(),
            statistics: Cell::new(),
        }
    }

    /// Current dataset entry, if any has been published.
    pub fn dataset(&self) -> Option<Arc<CacheEntry<Dataset>>> {
        self.dataset.load()
    }

    /// Publish `dataset`, replacing the previous one in a single step.
    pub fn set_dataset(&self, dataset: Arc<Dataset>) -> Arc<CacheEntry<Dataset>> {
        let fingerprint = dataset.fingerprint.clone();
        self.dataset.store(CacheEntry::new(dataset, fingerprint, None))
    }

    /// Current statistics entry, expired or not.
    pub fn statistics(&self) -> Option<Arc<CacheEntry<StatisticsSnapshot>>> {
        self.statistics.load()
    }

    /// Publish statistics with an optional time-to-live.
    ///
    /// The TTL runs from the snapshot's `computed_at`, so a snapshot restored
    /// from the mirror only keeps what is left of its lifetime.
    pub fn set_statistics(
        &self,
        statistics: Arc<StatisticsSnapshot>,
        ttl: Option<Duration>,
    ) -> Arc<CacheEntry<StatisticsSnapshot>> {
        let fingerprint = statistics.fingerprint.clone();
        let age = Utc::now()
            .signed_duration_since(statistics.computed_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let ttl = ttl.map(|ttl| ttl.saturating_sub(age));
        self.statistics.store(CacheEntry::new(statistics, fingerprint, ttl))
    }

    /// Drop one slot. Returns whether it held a value.
    pub fn invalidate(&self, slot: Slot) -> bool {
        match slot {
            Slot::Dataset => self.dataset.take(),
            Slot::Statistics => self.statistics.take(),
        }
    }

    /// Drop both slots.
    pub fn clear(&self) {
        self.invalidate(Slot::Statistics);
        self.invalidate(Slot::Dataset);
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}
