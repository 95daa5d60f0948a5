//! Engine - the operations exposed to callers
//!
//! Owns one [`CacheStore`], one [`Watcher`] and the optional [`DiskMirror`],
//! constructed once per process and shared behind an `Arc`.
//!
//! Reads never touch the raw source beyond an existence check: queries run
//! against the published [`Dataset`], statistics are computed from it on
//! demand and cached until the dataset changes or the TTL runs out. Only the
//! first caller computes; concurrent callers wait for its result.

use notify::RecommendedWatcher;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::api::logs::{log_info, log_success, log_warning};
use crate::cache::{CacheStore, DiskMirror, Slot};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, LoadError};
use crate::models::{Dataset, Fingerprint, StatisticsSnapshot};
use crate::parser::CsvSource;
use crate::query::{DatasetPage, QueryRequest};
use crate::transform::compute_statistics;
use crate::watcher::{RefreshOutcome, Trigger, Watcher, WatcherState};

const LOG_TARGET: &str = "engine";

/// `health()` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// `ok` when the source and the cache backend are both usable, else `degraded`.
    pub status: String,
    pub cache_backend_reachable: bool,
    pub source_present: bool,
    pub watcher_state: WatcherState,
    pub dataset_fingerprint: Option<Fingerprint>,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<CacheStore>,
    watcher: Arc<Watcher>,
    mirror: Option<Arc<DiskMirror>>,
    stats_lock: tokio::sync::Mutex<()>,
    stats_computations: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    fs_events: Mutex<Option<RecommendedWatcher>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(CacheStore::new());
        let mirror = config.cache_dir.as_ref().map(|dir| Arc::new(DiskMirror::new(dir)));
        let watcher = Watcher::new(CsvSource::new(&config.source), store.clone())
            .with_mirror(mirror.clone());

        Self {
            config,
            store,
            watcher: Arc::new(watcher),
            mirror,
            stats_lock: tokio::sync::Mutex::new(()),
            stats_computations: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
            fs_events: Mutex::new(None),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn watcher(&self) -> &Arc<Watcher> {
        &self.watcher
    }

    /// Number of statistics computations so far.
    pub fn stats_computations(&self) -> u64 {
        self.stats_computations.load(Ordering::Acquire)
    }

    /// Start the background watcher (interval ticks and, if enabled,
    /// file-system events). Must be called inside a tokio runtime.
    pub fn start(&self) {
        log_info(
            LOG_TARGET,
            format!(
                "Watching {} every {:?}",
                self.config.source.display(),
                self.config.poll_interval
            ),
        );
        if let Some(mirror) = &self.mirror {
            if !mirror.is_reachable() {
                log_warning(
                    LOG_TARGET,
                    format!("Cache mirror {} unreachable, caching in-process only", mirror.dir().display()),
                );
            }
        }

        let handle = self.watcher.spawn(self.config.poll_interval);
        self.tasks.lock().push(handle);

        if self.config.watch_events {
            match self.watcher.watch_events() {
                Ok(fs_watcher) => *self.fs_events.lock() = Some(fs_watcher),
                Err(e) => log_warning(
                    LOG_TARGET,
                    format!("File events unavailable, relying on polling: {}", e),
                ),
            }
        }
    }

    /// Stop background work started by [`start`](Self::start).
    pub fn shutdown(&self) {
        self.fs_events.lock().take();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Filter, sort and paginate the current dataset from raw parameters.
    pub async fn fetch_dataset(&self, params: &HashMap<String, String>) -> EngineResult<DatasetPage> {
        self.query(&QueryRequest::from_params(params)).await
    }

    pub async fn query(&self, request: &QueryRequest) -> EngineResult<DatasetPage> {
        let dataset = self.current_dataset().await?;
        Ok(DatasetPage::build(&dataset, request))
    }

    /// Statistics for the current dataset, computed at most once per
    /// dataset and TTL window.
    pub async fn get_statistics(&self) -> EngineResult<Arc<StatisticsSnapshot>> {
        let dataset = self.current_dataset().await?;
        if let Some(stats) = self.fresh_statistics(&dataset) {
            tracing::debug!(fingerprint = dataset.fingerprint.short(), "statistics cache hit");
            return Ok(stats);
        }

        let _guard = self.stats_lock.lock().await;

        // Another caller may have finished while we waited, or the dataset moved on
        let dataset = self.store.dataset().map(|e| e.value.clone()).unwrap_or(dataset);
        if let Some(stats) = self.fresh_statistics(&dataset) {
            return Ok(stats);
        }

        if let Some(stats) = self.restore_statistics(&dataset.fingerprint).await {
            let stats = Arc::new(stats);
            // Keeps only the lifetime left since `computed_at`
            self.store.set_statistics(stats.clone(), Some(self.config.stats_ttl));
            log_success(LOG_TARGET, "Statistics restored from cache mirror");
            return Ok(stats);
        }

        tracing::debug!(fingerprint = dataset.fingerprint.short(), "statistics cache miss");
        let source = dataset.clone();
        let stats = Arc::new(tokio::task::spawn_blocking(move || compute_statistics(&source)).await?);
        self.stats_computations.fetch_add(1, Ordering::AcqRel);

        // Never cache statistics for a dataset that has already been replaced
        let current = self
            .store
            .dataset()
            .is_some_and(|entry| entry.fingerprint == stats.fingerprint);
        if current {
            self.store.set_statistics(stats.clone(), Some(self.config.stats_ttl));
            self.mirror_statistics(stats.clone()).await;
        }

        log_success(
            LOG_TARGET,
            format!("Computed statistics over {} recipes", stats.total_recipes),
        );
        Ok(stats)
    }

    /// Sorted distinct diet types.
    pub async fn list_diet_types(&self) -> EngineResult<Vec<String>> {
        Ok(self.current_dataset().await?.diet_types())
    }

    /// Sorted distinct non-empty cuisine types.
    pub async fn list_cuisine_types(&self) -> EngineResult<Vec<String>> {
        Ok(self.current_dataset().await?.cuisine_types())
    }

    pub fn health(&self) -> HealthReport {
        let source_present = self.watcher.source().exists();
        let cache_backend_reachable = self.mirror.as_ref().map_or(true, |m| m.is_reachable());
        let status = if source_present && cache_backend_reachable {
            "ok"
        } else {
            "degraded"
        };

        HealthReport {
            status: status.to_string(),
            cache_backend_reachable,
            source_present,
            watcher_state: self.watcher.state(),
            dataset_fingerprint: self.store.dataset().map(|e| e.fingerprint.clone()),
        }
    }

    /// Drop cached statistics and mirror files, then force a rebuild.
    /// Readers keep the previous dataset until the rebuilt one is published.
    pub async fn clear_cache(&self) -> EngineResult<RefreshOutcome> {
        self.store.invalidate(Slot::Statistics);

        if let Some(mirror) = self.mirror.clone() {
            if let Err(e) = mirror.run(|m| m.clear()).await {
                log_warning(LOG_TARGET, format!("Cache mirror clear failed: {}", e));
            }
        }

        log_info(LOG_TARGET, "Cache cleared, rebuilding dataset");
        self.watcher.refresh(Trigger::ClearCache).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// The published dataset, building it on first use.
    async fn current_dataset(&self) -> EngineResult<Arc<Dataset>> {
        let source = self.watcher.source();
        if !source.exists() {
            return Err(EngineError::SourceUnavailable(LoadError::NotFound {
                path: source.path().to_path_buf(),
            }));
        }

        if let Some(entry) = self.store.dataset() {
            return Ok(entry.value.clone());
        }

        tracing::debug!("dataset cache miss");
        self.watcher.refresh(Trigger::Demand).await?;
        self.store
            .dataset()
            .map(|entry| entry.value.clone())
            .ok_or_else(|| EngineError::ComputeFault("no dataset published after rebuild".to_string()))
    }

    fn fresh_statistics(&self, dataset: &Dataset) -> Option<Arc<StatisticsSnapshot>> {
        self.store
            .statistics()
            .filter(|entry| entry.fingerprint == dataset.fingerprint && !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    async fn restore_statistics(&self, fingerprint: &Fingerprint) -> Option<StatisticsSnapshot> {
        let mirror = self.mirror.clone()?;
        let fingerprint = fingerprint.clone();
        let ttl = self.config.stats_ttl;
        mirror
            .run(move |m| m.load_statistics(&fingerprint, Some(ttl)))
            .await
            .unwrap_or_else(|e| {
                log_warning(LOG_TARGET, format!("Cache mirror read failed: {}", e));
                None
            })
    }

    async fn mirror_statistics(&self, stats: Arc<StatisticsSnapshot>) {
        let Some(mirror) = self.mirror.clone() else {
            return;
        };
        if let Err(e) = mirror.run(move |m| m.save_statistics(&stats)).await {
            log_warning(LOG_TARGET, format!("Cache mirror write failed: {}", e));
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::future::join_all;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const HEADER: &str = "Recipe_name,Diet_type,Cuisine_type,Protein(g),Carbs(g),Fat(g)\n";

    fn write_source(dir: &TempDir, rows: &str) -> PathBuf {
        let path = dir.path().join("All_Diets.csv");
        fs::write(&path, format!("{}{}", HEADER, rows)).unwrap();
        path
    }

    fn engine(path: &PathBuf) -> Engine {
        Engine::new(EngineConfig::new(path).with_watch_events(false))
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_duplicate_and_outlier_scenario() {
        let dir = tempdir().unwrap();
        let path = write_source(&dir, "A,paleo,,10,10,10\nA,paleo,,10,10,10\nB,keto,,3000,5,5\n");
        let engine = engine(&path);

        let page = engine.fetch_dataset(&HashMap::new()).await.unwrap();

        assert_eq!(page.pagination.total_items, 1);
        let a = &page.data[0];
        assert_eq!((a.recipe_name.as_str(), a.diet_type.as_str()), ("A", "paleo"));
        assert_eq!(a.calories, 170.0);
        assert_eq!(a.total_macros, 30.0);
    }

    #[tokio::test]
    async fn test_per_page_is_clamped() {
        let dir = tempdir().unwrap();
        let rows: String = (0..150).map(|i| format!("r{},vegan,thai,1,1,1\n", i)).collect();
        let engine = engine(&write_source(&dir, &rows));

        let page = engine.fetch_dataset(&params(&[("per_page", "100000")])).await.unwrap();

        assert_eq!(page.pagination.per_page, 100);
        assert_eq!(page.data.len(), 100);
        assert_eq!(page.pagination.total_pages, 2);
    }

    #[tokio::test]
    async fn test_statistics_cached_within_ttl() {
        let dir = tempdir().unwrap();
        let engine = engine(&write_source(&dir, "Soup,vegan,thai,1,2,3\n"));

        let first = engine.get_statistics().await.unwrap();
        let second = engine.get_statistics().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.stats_computations(), 1);
        assert_eq!(engine.watcher().rebuild_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_statistics_compute_once() {
        let dir = tempdir().unwrap();
        let engine = engine(&write_source(&dir, "Soup,vegan,thai,1,2,3\nStew,paleo,,4,5,6\n"));

        let results = join_all((0..8).map(|_| engine.get_statistics())).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(engine.stats_computations(), 1);
        assert_eq!(engine.watcher().rebuild_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_statistics_recomputed() {
        let dir = tempdir().unwrap();
        let path = write_source(&dir, "Soup,vegan,thai,1,2,3\n");
        let engine = Engine::new(
            EngineConfig::new(&path)
                .with_watch_events(false)
                .with_stats_ttl(Duration::ZERO),
        );

        engine.get_statistics().await.unwrap();
        engine.get_statistics().await.unwrap();

        assert_eq!(engine.stats_computations(), 2);
        assert_eq!(engine.watcher().rebuild_count(), 1);
    }

    #[tokio::test]
    async fn test_statistics_follow_source_changes() {
        let dir = tempdir().unwrap();
        let path = write_source(&dir, "Soup,vegan,thai,1,2,3\n");
        let engine = engine(&path);
        let before = engine.get_statistics().await.unwrap();

        write_source(&dir, "Soup,vegan,thai,1,2,3\nStew,paleo,,4,5,6\n");
        engine.watcher().refresh(Trigger::Tick).await.unwrap();
        let after = engine.get_statistics().await.unwrap();

        assert_ne!(before.fingerprint, after.fingerprint);
        assert_eq!(after.total_recipes, 2);
        assert_eq!(after.fingerprint, engine.store().dataset().unwrap().fingerprint);
    }

    #[tokio::test]
    async fn test_type_lists() {
        let dir = tempdir().unwrap();
        let engine = engine(&write_source(
            &dir,
            "a,Vegan,Thai,1,1,1\nb,keto,,1,1,1\nc,vegan,greek,1,1,1\n",
        ));

        assert_eq!(engine.list_diet_types().await.unwrap(), vec!["keto", "vegan"]);
        assert_eq!(engine.list_cuisine_types().await.unwrap(), vec!["greek", "thai"]);
    }

    #[tokio::test]
    async fn test_clear_cache_rebuilds() {
        let dir = tempdir().unwrap();
        let engine = engine(&write_source(&dir, "Soup,vegan,thai,1,2,3\n"));
        let stats = engine.get_statistics().await.unwrap();

        let outcome = engine.clear_cache().await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Rebuilt { records: 1, .. }));
        assert!(engine.store().statistics().is_none());

        let again = engine.get_statistics().await.unwrap();
        assert!(!Arc::ptr_eq(&stats, &again));
        assert_eq!(stats.fingerprint, again.fingerprint);

        // Idempotent
        engine.clear_cache().await.unwrap();
        assert_eq!(engine.fetch_dataset(&HashMap::new()).await.unwrap().pagination.total_items, 1);
    }

    #[tokio::test]
    async fn test_missing_source() {
        let dir = tempdir().unwrap();
        let path = write_source(&dir, "Soup,vegan,thai,1,2,3\n");
        let engine = engine(&path);
        engine.fetch_dataset(&HashMap::new()).await.unwrap();

        fs::remove_file(&path).unwrap();

        let err = engine.fetch_dataset(&HashMap::new()).await.unwrap_err();
        assert!(err.is_source_unavailable());
        assert!(engine.get_statistics().await.unwrap_err().is_source_unavailable());

        let health = engine.health();
        assert!(!health.source_present);
        assert_eq!(health.status, "degraded");

        // Reappearing source is served again
        write_source(&dir, "Soup,vegan,thai,1,2,3\n");
        assert!(engine.fetch_dataset(&HashMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempdir().unwrap();
        let engine = engine(&write_source(&dir, "Soup,vegan,thai,1,2,3\n"));

        let health = engine.health();
        assert!(health.source_present);
        assert!(health.cache_backend_reachable);
        assert_eq!(health.status, "ok");
        assert_eq!(health.dataset_fingerprint, None);

        engine.fetch_dataset(&HashMap::new()).await.unwrap();
        assert!(engine.health().dataset_fingerprint.is_some());
        assert_eq!(engine.health().watcher_state, WatcherState::Idle);
    }

    #[tokio::test]
    async fn test_mirror_survives_restart() {
        let dir = tempdir().unwrap();
        let path = write_source(&dir, "Soup,vegan,thai,1,2,3\n");
        let config = EngineConfig::new(&path)
            .with_watch_events(false)
            .with_cache_dir(Some(dir.path().join("mirror")));

        let first = Engine::new(config.clone());
        let stats = first.get_statistics().await.unwrap();
        drop(first);

        let second = Engine::new(config);
        let restored = second.get_statistics().await.unwrap();

        assert_eq!(*restored, *stats);
        assert_eq!(second.stats_computations(), 0);
        assert_eq!(second.watcher().rebuild_count(), 0);
    }

    #[tokio::test]
    async fn test_restored_statistics_keep_remaining_ttl() {
        let dir = tempdir().unwrap();
        let path = write_source(&dir, "Soup,vegan,thai,1,2,3\n");
        let mirror_dir = dir.path().join("mirror");
        let config = EngineConfig::new(&path)
            .with_watch_events(false)
            .with_stats_ttl(Duration::from_secs(2))
            .with_cache_dir(Some(mirror_dir.clone()));

        let first = Engine::new(config.clone());
        let mut aged = StatisticsSnapshot::clone(&first.get_statistics().await.unwrap());
        drop(first);
        aged.computed_at = Utc::now() - chrono::Duration::milliseconds(1500);
        DiskMirror::new(&mirror_dir).save_statistics(&aged).unwrap();

        let second = Engine::new(config);
        let restored = second.get_statistics().await.unwrap();
        assert_eq!(restored.computed_at, aged.computed_at);
        assert_eq!(second.stats_computations(), 0);
        assert!(second.store().statistics().unwrap().ttl.unwrap() <= Duration::from_millis(500));

        // 2.2 s after computation: past the TTL even though restored 0.7 s ago
        tokio::time::sleep(Duration::from_millis(700)).await;
        let recomputed = second.get_statistics().await.unwrap();
        assert_eq!(second.stats_computations(), 1);
        assert!(recomputed.computed_at > aged.computed_at);
    }

    #[tokio::test]
    async fn test_clear_cache_coalesces_with_running_rebuild() {
        let dir = tempdir().unwrap();
        let engine = engine(&write_source(&dir, "Soup,vegan,thai,1,2,3\n"));
        engine.fetch_dataset(&HashMap::new()).await.unwrap();
        assert_eq!(engine.watcher().rebuild_count(), 1);

        write_source(&dir, "Soup,vegan,thai,1,2,3\nStew,paleo,,4,5,6\n");
        // The tick takes the rebuild lock first; the clear waits behind it
        let (tick, cleared) = tokio::join!(engine.watcher().refresh(Trigger::Tick), engine.clear_cache());

        assert!(matches!(tick.unwrap(), RefreshOutcome::Rebuilt { records: 2, .. }));
        assert_eq!(cleared.unwrap(), RefreshOutcome::Coalesced);
        assert_eq!(engine.watcher().rebuild_count(), 2);
        assert_eq!(engine.fetch_dataset(&HashMap::new()).await.unwrap().pagination.total_items, 2);
    }

    #[tokio::test]
    async fn test_readers_keep_previous_dataset_during_rebuild() {
        let dir = tempdir().unwrap();
        let engine = engine(&write_source(&dir, "Soup,vegan,thai,1,2,3\n"));
        engine.fetch_dataset(&HashMap::new()).await.unwrap();
        let held = engine.store().dataset().unwrap().value.clone();

        let rows: String = (0..50_000).map(|i| format!("r{},vegan,thai,1,1,1\n", i)).collect();
        write_source(&dir, &rows);

        let reader = async {
            for _ in 0..5_000 {
                if engine.watcher().state() == WatcherState::Rebuilding {
                    return Some(engine.fetch_dataset(&HashMap::new()).await.unwrap());
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            None
        };
        let (rebuilt, during) = tokio::join!(engine.watcher().refresh(Trigger::Tick), reader);

        assert!(matches!(rebuilt.unwrap(), RefreshOutcome::Rebuilt { records: 50_000, .. }));
        let during = during.expect("reader ran while the rebuild was in progress");
        assert_eq!(during.pagination.total_items, 1);
        assert_eq!(during.data[0].recipe_name, "Soup");

        assert_eq!(held.len(), 1);
        assert_ne!(held.fingerprint, engine.store().dataset().unwrap().fingerprint);
        assert_eq!(engine.fetch_dataset(&HashMap::new()).await.unwrap().pagination.total_items, 50_000);
    }

    #[tokio::test]
    async fn test_unreachable_mirror_degrades() {
        let dir = tempdir().unwrap();
        let path = write_source(&dir, "Soup,vegan,thai,1,2,3\n");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let engine = Engine::new(
            EngineConfig::new(&path)
                .with_watch_events(false)
                .with_cache_dir(Some(blocker)),
        );

        assert_eq!(engine.get_statistics().await.unwrap().total_recipes, 1);
        let health = engine.health();
        assert!(!health.cache_backend_reachable);
        assert_eq!(health.status, "degraded");
    }

    #[tokio::test]
    async fn test_started_engine_serves_and_stops() {
        let dir = tempdir().unwrap();
        let path = write_source(&dir, "Soup,vegan,thai,1,2,3\n");
        let engine = Engine::new(
            EngineConfig::new(&path).with_poll_interval(Duration::from_millis(100)),
        );
        engine.start();

        assert_eq!(engine.list_diet_types().await.unwrap(), vec!["vegan"]);
        engine.shutdown();
    }
}
