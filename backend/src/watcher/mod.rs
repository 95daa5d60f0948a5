//! Watcher - detect source changes and rebuild the cached dataset
//!
//! ```text
//! IDLE --trigger--> CHECKING --same fingerprint--> IDLE
//!                       |
//!                       +--new fingerprint--> REBUILDING --publish--> IDLE
//! ```
//!
//! Every trigger (interval tick, reader demand, file-system event, cache
//! clear) goes through [`Watcher::refresh`]. A single async mutex serializes
//! check+rebuild; a trigger that had to wait for the lock and sees that a
//! rebuild finished meanwhile returns [`RefreshOutcome::Coalesced`] instead
//! of running again.
//!
//! Readers are never blocked: they keep reading the previously published
//! dataset from the [`CacheStore`] until the new one is swapped in. A failed
//! rebuild publishes nothing.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::logs::{log_error, log_info, log_success, log_warning};
use crate::cache::{CacheStore, DiskMirror, Slot};
use crate::error::{EngineResult, LoadResult};
use crate::models::{Dataset, Fingerprint};
use crate::parser::{CsvSource, SourceSnapshot};
use crate::transform::{clean_with_report, CleanReport};

const LOG_TARGET: &str = "watcher";

/// Shortest accepted tick interval.
const MIN_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// State, triggers and outcomes
// =============================================================================

/// Observable watcher phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatcherState {
    Idle,
    Checking,
    Rebuilding,
}

impl WatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WatcherState::Checking,
            2 => WatcherState::Rebuilding,
            _ => WatcherState::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherState::Idle => "idle",
            WatcherState::Checking => "checking",
            WatcherState::Rebuilding => "rebuilding",
        }
    }
}

/// Why a refresh was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Interval tick.
    Tick,
    /// A reader found no published dataset.
    Demand,
    /// File-system event on the source.
    FileEvent,
    /// Explicit cache clear: rebuild even if the fingerprint is unchanged.
    ClearCache,
}

impl Trigger {
    pub fn is_forced(&self) -> bool {
        matches!(self, Trigger::ClearCache)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::Tick => "tick",
            Trigger::Demand => "demand",
            Trigger::FileEvent => "file event",
            Trigger::ClearCache => "cache clear",
        };
        f.write_str(name)
    }
}

/// Result of one [`Watcher::refresh`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// The cached dataset already matches the source.
    Unchanged { fingerprint: Fingerprint },
    /// Loaded, cleaned and published a new dataset.
    Rebuilt { fingerprint: Fingerprint, records: usize },
    /// Published a dataset restored from the disk mirror.
    Restored { fingerprint: Fingerprint, records: usize },
    /// Another trigger's rebuild completed while this one waited.
    Coalesced,
}

// =============================================================================
// Watcher
// =============================================================================

pub struct Watcher {
    source: CsvSource,
    store: Arc<CacheStore>,
    mirror: Option<Arc<DiskMirror>>,
    rebuild_lock: tokio::sync::Mutex<()>,
    state: AtomicU8,
    /// Incremented on every publish.
    generation: AtomicU64,
    /// Cleaner runs, for observability.
    rebuilds: AtomicU64,
    wake: Notify,
    last_error: Mutex<Option<String>>,
}

impl Watcher {
    pub fn new(source: CsvSource, store: Arc<CacheStore>) -> Self {
        Self {
            source,
            store,
            mirror: None,
            rebuild_lock: tokio::sync::Mutex::new(()),
            state: AtomicU8::new(WatcherState::Idle as u8),
            generation: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            wake: Notify::new(),
            last_error: Mutex::new(None),
        }
    }

    /// Persist published datasets to (and restore them from) `mirror`.
    pub fn with_mirror(mut self, mirror: Option<Arc<DiskMirror>>) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn source(&self) -> &CsvSource {
        &self.source
    }

    pub fn state(&self) -> WatcherState {
        WatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of datasets published so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of times the Cleaner has run.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Acquire)
    }

    /// Ask the background loop to check the source now.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    fn set_state(&self, state: WatcherState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Check the source and rebuild if needed. At most one check or rebuild
    /// runs at a time.
    pub async fn refresh(&self, trigger: Trigger) -> EngineResult<RefreshOutcome> {
        let ticket = self.generation();

        let _guard = match self.rebuild_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let guard = self.rebuild_lock.lock().await;
                if self.generation() > ticket {
                    tracing::debug!(%trigger, "coalesced into completed rebuild");
                    return Ok(RefreshOutcome::Coalesced);
                }
                guard
            }
        };

        let result = self.check_and_rebuild(trigger).await;
        self.set_state(WatcherState::Idle);
        result
    }

    async fn check_and_rebuild(&self, trigger: Trigger) -> EngineResult<RefreshOutcome> {
        self.set_state(WatcherState::Checking);

        let source = self.source.clone();
        let snapshot = tokio::task::spawn_blocking(move || source.read()).await??;
        let fingerprint = snapshot.fingerprint.clone();

        let current = self.store.dataset();
        if !trigger.is_forced() {
            if let Some(entry) = &current {
                if entry.fingerprint == fingerprint {
                    tracing::debug!(%trigger, fingerprint = fingerprint.short(), "source unchanged");
                    return Ok(RefreshOutcome::Unchanged { fingerprint });
                }
            }
        }

        self.set_state(WatcherState::Rebuilding);

        if current.is_none() && !trigger.is_forced() {
            if let Some(dataset) = self.restore(&fingerprint).await {
                let records = dataset.len();
                self.publish(Arc::new(dataset));
                log_success(
                    LOG_TARGET,
                    format!("Restored {} records from cache mirror ({})", records, fingerprint.short()),
                );
                return Ok(RefreshOutcome::Restored { fingerprint, records });
            }
        }

        log_info(
            LOG_TARGET,
            format!("Rebuilding dataset ({}, fingerprint {})", trigger, fingerprint.short()),
        );
        let (dataset, report) = tokio::task::spawn_blocking(move || build_dataset(snapshot)).await??;
        self.rebuilds.fetch_add(1, Ordering::AcqRel);

        let dataset = Arc::new(dataset);
        let records = dataset.len();
        self.publish(dataset.clone());
        log_success(
            LOG_TARGET,
            format!(
                "Published {} records ({} rows read, {} duplicates, {} outliers, {} incomplete)",
                records, report.input_rows, report.duplicates, report.outliers, report.missing_fields
            ),
        );

        self.mirror_dataset(dataset).await;
        Ok(RefreshOutcome::Rebuilt { fingerprint, records })
    }

    /// Swap in `dataset` and drop statistics derived from the previous one.
    fn publish(&self, dataset: Arc<Dataset>) {
        self.store.set_dataset(dataset);
        self.store.invalidate(Slot::Statistics);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    async fn restore(&self, fingerprint: &Fingerprint) -> Option<Dataset> {
        let mirror = self.mirror.clone()?;
        let fingerprint = fingerprint.clone();
        mirror
            .run(move |m| m.load_dataset(&fingerprint))
            .await
            .unwrap_or_else(|e| {
                log_warning(LOG_TARGET, format!("Cache mirror restore failed: {}", e));
                None
            })
    }

    async fn mirror_dataset(&self, dataset: Arc<Dataset>) {
        let Some(mirror) = self.mirror.clone() else {
            return;
        };
        if let Err(e) = mirror.run(move |m| m.save_dataset(&dataset)).await {
            log_warning(LOG_TARGET, format!("Cache mirror write failed: {}", e));
        }
    }

    /// Run the refresh loop: one check per `interval` tick and one per
    /// [`trigger`](Self::trigger) call. Errors are logged and retried on the
    /// next tick.
    pub fn spawn(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                let trigger = tokio::select! {
                    _ = ticker.tick() => Trigger::Tick,
                    _ = watcher.wake.notified() => Trigger::FileEvent,
                };
                let result = watcher.refresh(trigger).await;
                watcher.report(result);
            }
        })
    }

    /// Log refresh failures once per distinct error, and the recovery.
    fn report(&self, result: EngineResult<RefreshOutcome>) {
        let mut last_error = self.last_error.lock();
        match result {
            Ok(_) => {
                if last_error.take().is_some() {
                    log_success(LOG_TARGET, "Source available again");
                }
            }
            Err(e) => {
                let message = e.to_string();
                if last_error.as_deref() != Some(message.as_str()) {
                    log_error(LOG_TARGET, format!("Refresh failed: {}", message));
                    *last_error = Some(message);
                }
            }
        }
    }

    /// Subscribe to file-system events for the source file. The returned
    /// handle must be kept alive for events to keep arriving.
    pub fn watch_events(self: &Arc<Self>) -> notify::Result<RecommendedWatcher> {
        let path = self.source.path();
        let file_name = path.file_name().map(|name| name.to_os_string());
        let dir = watch_dir(path);
        let watcher = Arc::downgrade(self);

        let mut fs_watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            let relevant = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) && event
                .paths
                .iter()
                .any(|p| p.file_name() == file_name.as_deref());

            if relevant {
                if let Some(watcher) = watcher.upgrade() {
                    watcher.trigger();
                }
            }
        })?;
        fs_watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(dir = %dir.display(), "watching source directory for changes");
        Ok(fs_watcher)
    }
}

fn build_dataset(snapshot: SourceSnapshot) -> LoadResult<(Dataset, CleanReport)> {
    let loaded = snapshot.parse()?;
    let (records, report) = clean_with_report(&loaded.records);
    Ok((Dataset::new(records, loaded.fingerprint), report))
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, LoadError};
    use futures::future::join_all;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const HEADER: &str = "Recipe_name,Diet_type,Cuisine_type,Protein(g),Carbs(g),Fat(g)\n";

    fn setup(rows: &str) -> (TempDir, Arc<Watcher>, Arc<CacheStore>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("All_Diets.csv");
        fs::write(&path, format!("{}{}", HEADER, rows)).unwrap();
        let store = Arc::new(CacheStore::new());
        let watcher = Arc::new(Watcher::new(CsvSource::new(&path), store.clone()));
        (dir, watcher, store)
    }

    fn rewrite(dir: &TempDir, rows: &str) {
        fs::write(dir.path().join("All_Diets.csv"), format!("{}{}", HEADER, rows)).unwrap();
    }

    #[tokio::test]
    async fn test_first_refresh_builds() {
        let (_dir, watcher, store) = setup("Soup,vegan,thai,1,2,3\n");

        let outcome = watcher.refresh(Trigger::Demand).await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Rebuilt { records: 1, .. }));
        assert_eq!(store.dataset().unwrap().value.len(), 1);
        assert_eq!(watcher.state(), WatcherState::Idle);
        assert_eq!(watcher.generation(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_source_is_noop() {
        let (dir, watcher, store) = setup("Soup,vegan,thai,1,2,3\n");
        watcher.refresh(Trigger::Tick).await.unwrap();
        let before = store.dataset().unwrap();

        // Identical content rewritten
        rewrite(&dir, "Soup,vegan,thai,1,2,3\n");
        let outcome = watcher.refresh(Trigger::Tick).await.unwrap();

        assert!(matches!(outcome, RefreshOutcome::Unchanged { .. }));
        assert!(Arc::ptr_eq(&before, &store.dataset().unwrap()));
        assert_eq!(watcher.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn test_changed_source_rebuilds_and_drops_statistics() {
        let (dir, watcher, store) = setup("Soup,vegan,thai,1,2,3\n");
        watcher.refresh(Trigger::Tick).await.unwrap();
        let old = store.dataset().unwrap();
        store.set_statistics(
            Arc::new(crate::transform::compute_statistics(&old.value)),
            None,
        );

        rewrite(&dir, "Soup,vegan,thai,1,2,3\nStew,paleo,,4,5,6\n");
        let outcome = watcher.refresh(Trigger::FileEvent).await.unwrap();

        assert!(matches!(outcome, RefreshOutcome::Rebuilt { records: 2, .. }));
        assert_ne!(store.dataset().unwrap().fingerprint, old.fingerprint);
        assert!(store.statistics().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_triggers_rebuild_once() {
        let (_dir, watcher, store) = setup("Soup,vegan,thai,1,2,3\n");

        let outcomes = join_all((0..8).map(|_| watcher.refresh(Trigger::Demand))).await;

        assert!(outcomes.iter().all(|o| o.is_ok()));
        assert_eq!(watcher.rebuild_count(), 1);
        assert_eq!(watcher.generation(), 1);
        assert!(store.dataset().is_some());
    }

    #[tokio::test]
    async fn test_forced_refresh_rebuilds_same_content() {
        let (_dir, watcher, store) = setup("Soup,vegan,thai,1,2,3\n");
        watcher.refresh(Trigger::Tick).await.unwrap();
        let before = store.dataset().unwrap();

        let outcome = watcher.refresh(Trigger::ClearCache).await.unwrap();

        assert!(matches!(outcome, RefreshOutcome::Rebuilt { .. }));
        let after = store.dataset().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.fingerprint, after.fingerprint);
        assert_eq!(watcher.rebuild_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_source_keeps_previous_snapshot() {
        let (dir, watcher, store) = setup("Soup,vegan,thai,1,2,3\n");
        watcher.refresh(Trigger::Tick).await.unwrap();

        fs::remove_file(dir.path().join("All_Diets.csv")).unwrap();
        let err = watcher.refresh(Trigger::Tick).await.unwrap_err();

        assert!(matches!(err, EngineError::SourceUnavailable(LoadError::NotFound { .. })));
        assert_eq!(store.dataset().unwrap().value.len(), 1);
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[tokio::test]
    async fn test_unparsable_source_keeps_previous_snapshot() {
        let (dir, watcher, store) = setup("Soup,vegan,thai,1,2,3\n");
        watcher.refresh(Trigger::Tick).await.unwrap();
        let before = store.dataset().unwrap();

        fs::write(dir.path().join("All_Diets.csv"), "").unwrap();
        assert!(watcher.refresh(Trigger::Tick).await.is_err());
        assert!(Arc::ptr_eq(&before, &store.dataset().unwrap()));
    }

    #[tokio::test]
    async fn test_cold_start_restores_from_mirror() {
        let (dir, watcher, _store) = setup("Soup,vegan,thai,1,2,3\n");
        let mirror = Arc::new(DiskMirror::new(dir.path().join("mirror")));
        let first = Arc::new(
            Watcher::new(watcher.source().clone(), Arc::new(CacheStore::new()))
                .with_mirror(Some(mirror.clone())),
        );
        first.refresh(Trigger::Tick).await.unwrap();

        // A fresh process with an empty store and the same source
        let store = Arc::new(CacheStore::new());
        let second = Watcher::new(watcher.source().clone(), store.clone()).with_mirror(Some(mirror));
        let outcome = second.refresh(Trigger::Tick).await.unwrap();

        assert!(matches!(outcome, RefreshOutcome::Restored { records: 1, .. }));
        assert_eq!(second.rebuild_count(), 0);
        assert_eq!(store.dataset().unwrap().value.records[0].recipe_name, "Soup");
    }

    #[tokio::test]
    async fn test_spawned_loop_picks_up_changes() {
        let (dir, watcher, store) = setup("Soup,vegan,thai,1,2,3\n");
        let handle = watcher.spawn(Duration::from_millis(100));

        rewrite(&dir, "Soup,vegan,thai,1,2,3\nStew,paleo,,4,5,6\n");
        watcher.trigger();

        let mut records = 0;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            records = store.dataset().map(|e| e.value.len()).unwrap_or(0);
            if records == 2 {
                break;
            }
        }
        handle.abort();
        assert_eq!(records, 2);
    }

    #[test]
    fn test_watch_dir_for_bare_file_name() {
        assert_eq!(watch_dir(Path::new("diets.csv")), PathBuf::from("."));
        assert_eq!(watch_dir(Path::new("data/diets.csv")), PathBuf::from("data"));
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(RefreshOutcome::Rebuilt {
            fingerprint: Fingerprint::new("abc"),
            records: 3,
        })
        .unwrap();
        assert_eq!(json["outcome"], "rebuilt");
        assert_eq!(json["fingerprint"], "abc");
        assert_eq!(json["records"], 3);
    }
}
