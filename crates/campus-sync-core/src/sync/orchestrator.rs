use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::state::{RefreshOutcome, RefreshSummary, TaskHandle, TaskStatus};
use super::task::RefreshTask;
use crate::cache::CacheManager;
use crate::clock::SharedClock;
use crate::error::{RefreshError, SyncError};
use crate::scheduler::RefreshCycle;

/// Default minimum time between two refreshes of the same task.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// State shared by every task of one orchestrator.
struct Shared {
    domain: String,
    cache: Arc<CacheManager>,
    clock: SharedClock,
    min_refresh_interval: Duration,
    /// Bumped by `reset`; results from runs started under an older epoch are dropped
    epoch: AtomicU64,
    /// Set by `reset`, cleared by `resume`; no result is applied while set
    suspended: AtomicBool,
    /// Held shared while a result is applied, exclusively by `reset`
    apply_gate: RwLock<()>,
}

#[async_trait]
trait TaskRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, shared: &Shared, force: bool) -> RefreshOutcome;

    fn reset(&self);
}

struct TaskSlot<T> {
    task: RefreshTask<T>,
    state: watch::Sender<TaskStatus<T>>,
    /// One run per task at a time, so the rate-limit check and apply are atomic
    running: Mutex<()>,
}

impl<T> TaskSlot<T> {
    fn recently_updated(&self, shared: &Shared) -> bool {
        let Some(last) = self.state.borrow().last_updated else {
            return false;
        };
        match chrono::Duration::from_std(shared.min_refresh_interval) {
            Ok(min) => shared.clock.now() - last < min,
            Err(_) => true,
        }
    }
}

#[async_trait]
impl<T> TaskRunner for TaskSlot<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.task.name()
    }

    async fn run(&self, shared: &Shared, force: bool) -> RefreshOutcome {
        let _running = self.running.lock().await;
        let name = self.task.name();

        if !force && self.recently_updated(shared) {
            debug!(domain = %shared.domain, task = %name, "Refreshed recently, skipping");
            return RefreshOutcome::Skipped;
        }

        if shared.suspended.load(Ordering::SeqCst) {
            debug!(domain = %shared.domain, task = %name, "Refreshes suspended, skipping");
            return RefreshOutcome::Discarded;
        }

        let epoch = shared.epoch.load(Ordering::SeqCst);
        let result: Result<T, RefreshError> = match self.task.fetch().await {
            Ok(bytes) => self.task.decode(&bytes).map_err(RefreshError::from),
            Err(e) => Err(e.into()),
        };

        let _apply = shared.apply_gate.read().await;
        if shared.epoch.load(Ordering::SeqCst) != epoch || shared.suspended.load(Ordering::SeqCst) {
            debug!(domain = %shared.domain, task = %name, "Orchestrator reset during refresh, dropping result");
            return RefreshOutcome::Discarded;
        }

        match result {
            Ok(value) => {
                if let Err(e) = shared.cache.put(name, &value, self.task.ttl()).await {
                    warn!(domain = %shared.domain, task = %name, error = %e, "Failed to cache refreshed value");
                }
                self.state.send_replace(TaskStatus {
                    last_value: Some(value),
                    last_updated: Some(shared.clock.now()),
                    is_stale: false,
                    last_error: None,
                });
                debug!(domain = %shared.domain, task = %name, "Refreshed");
                RefreshOutcome::Fresh
            }
            Err(err) => {
                match &err {
                    RefreshError::Decode(e) => {
                        error!(domain = %shared.domain, task = %name, error = %e, "Payload failed to decode, API contract may have changed")
                    }
                    RefreshError::Fetch(e) => {
                        warn!(domain = %shared.domain, task = %name, error = %e, "Fetch failed, falling back to cache")
                    }
                }

                match shared.cache.get_cached::<T>(name).await {
                    Ok(cached) => {
                        self.state.send_replace(TaskStatus {
                            last_value: Some(cached.data),
                            last_updated: Some(cached.cached_at),
                            is_stale: true,
                            last_error: Some(err),
                        });
                        RefreshOutcome::Stale
                    }
                    Err(_) => {
                        self.state.send_modify(|status| {
                            status.is_stale = status.last_value.is_some();
                            status.last_error = Some(err);
                        });
                        RefreshOutcome::Failed
                    }
                }
            }
        }
    }

    fn reset(&self) {
        self.state.send_replace(TaskStatus::default());
    }
}

/// Builds a `SyncOrchestrator`. Tasks can only be registered here.
pub struct SyncOrchestratorBuilder {
    domain: String,
    cache: Arc<CacheManager>,
    clock: Option<SharedClock>,
    min_refresh_interval: Duration,
    tasks: Vec<Arc<dyn TaskRunner>>,
}

impl SyncOrchestratorBuilder {
    /// Per-task rate limit; `Duration::ZERO` disables it.
    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Defaults to the cache's clock.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register a task and get a read-only handle to its published state.
    pub fn register<T>(&mut self, task: RefreshTask<T>) -> TaskHandle<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let (state, rx) = watch::channel(TaskStatus::default());
        let handle = TaskHandle::new(task.name().to_string(), rx);
        self.tasks.push(Arc::new(TaskSlot {
            task,
            state,
            running: Mutex::new(()),
        }));
        handle
    }

    pub fn build(self) -> Result<SyncOrchestrator, SyncError> {
        let mut index = HashMap::with_capacity(self.tasks.len());
        for (i, task) in self.tasks.iter().enumerate() {
            if index.insert(task.name().to_string(), i).is_some() {
                return Err(SyncError::DuplicateTask(task.name().to_string()));
            }
        }

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::clone(self.cache.clock()));

        Ok(SyncOrchestrator {
            tasks: self.tasks,
            index,
            shared: Shared {
                domain: self.domain,
                cache: self.cache,
                clock,
                min_refresh_interval: self.min_refresh_interval,
                epoch: AtomicU64::new(0),
                suspended: AtomicBool::new(false),
                apply_gate: RwLock::new(()),
            },
        })
    }
}

/// Refreshes a fixed set of resources, tolerating partial failure.
///
/// Every refresh method absorbs failures into the tasks' published state;
/// nothing here returns a fetch or decode error to the caller.
pub struct SyncOrchestrator {
    tasks: Vec<Arc<dyn TaskRunner>>,
    index: HashMap<String, usize>,
    shared: Shared,
}

impl SyncOrchestrator {
    pub fn builder(domain: impl Into<String>, cache: Arc<CacheManager>) -> SyncOrchestratorBuilder {
        SyncOrchestratorBuilder {
            domain: domain.into(),
            cache,
            clock: None,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            tasks: Vec::new(),
        }
    }

    pub fn domain(&self) -> &str {
        &self.shared.domain
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name())
    }

    /// Refresh every task concurrently, honoring the rate limit.
    pub async fn refresh_all(&self) -> RefreshSummary {
        self.run_tasks(self.tasks.iter(), false).await
    }

    /// Refresh every task concurrently, ignoring the rate limit.
    pub async fn force_refresh_all(&self) -> RefreshSummary {
        self.run_tasks(self.tasks.iter(), true).await
    }

    /// Refresh one task without waiting on the others.
    ///
    /// Dropping the returned future cancels only this task's fetch.
    pub async fn refresh_one(&self, name: &str) -> Result<RefreshOutcome, SyncError> {
        let task = self.task(name)?;
        Ok(task.run(&self.shared, false).await)
    }

    /// Refresh a subset of tasks concurrently. Unknown names are logged and skipped.
    pub async fn refresh_selected(&self, names: &[String]) -> RefreshSummary {
        let selected: Vec<&Arc<dyn TaskRunner>> = names
            .iter()
            .filter_map(|name| match self.task(name) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(domain = %self.shared.domain, error = %e, "Skipping unknown task");
                    None
                }
            })
            .collect();
        self.run_tasks(selected.into_iter(), false).await
    }

    /// Forget every task's published state, drop results of in-flight
    /// refreshes and suspend refreshing until `resume`. Used on sign-out.
    pub async fn reset(&self) {
        self.shared.suspended.store(true, Ordering::SeqCst);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        let _apply = self.shared.apply_gate.write().await;
        for task in &self.tasks {
            task.reset();
        }
        info!(domain = %self.shared.domain, "Published state reset");
    }

    /// Allow refreshes again after `reset`. Used on sign-in.
    pub fn resume(&self) {
        if self.shared.suspended.swap(false, Ordering::SeqCst) {
            info!(domain = %self.shared.domain, "Refreshes resumed");
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::SeqCst)
    }

    fn task(&self, name: &str) -> Result<&Arc<dyn TaskRunner>, SyncError> {
        self.index
            .get(name)
            .map(|&i| &self.tasks[i])
            .ok_or_else(|| SyncError::UnknownTask(name.to_string()))
    }

    async fn run_tasks<'a>(
        &'a self,
        tasks: impl Iterator<Item = &'a Arc<dyn TaskRunner>>,
        force: bool,
    ) -> RefreshSummary {
        let started = Instant::now();
        let outcomes = join_all(tasks.map(|task| async move {
            let outcome = task.run(&self.shared, force).await;
            (task.name().to_string(), outcome)
        }))
        .await;

        let summary = RefreshSummary { outcomes };
        info!(
            domain = %self.shared.domain,
            fresh = summary.count(RefreshOutcome::Fresh),
            stale = summary.count(RefreshOutcome::Stale),
            failed = summary.count(RefreshOutcome::Failed),
            skipped = summary.count(RefreshOutcome::Skipped),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Refresh cycle complete"
        );
        summary
    }
}

#[async_trait]
impl RefreshCycle for SyncOrchestrator {
    async fn run_cycle(&self) {
        self.refresh_all().await;
    }
}

/// Drives only the named tasks of an orchestrator, for schedulers that
/// refresh part of a domain on their own cadence.
pub struct TaskSelection {
    orchestrator: Arc<SyncOrchestrator>,
    names: Vec<String>,
}

impl TaskSelection {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, names: Vec<String>) -> Self {
        Self {
            orchestrator,
            names,
        }
    }
}

#[async_trait]
impl RefreshCycle for TaskSelection {
    async fn run_cycle(&self) {
        self.orchestrator.refresh_selected(&self.names).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::{FailureKind, FetchError};
    use crate::fetch::Fetcher;
    use crate::sync::state::Freshness;
    use tempfile::TempDir;

    /// Fetcher with a scripted result per resource.
    #[derive(Default)]
    struct FakeFetcher {
        results: parking_lot::Mutex<HashMap<String, Result<Vec<u8>, FetchError>>>,
        calls: parking_lot::Mutex<HashMap<String, usize>>,
        delay: Option<Duration>,
    }

    impl FakeFetcher {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        fn set(&self, resource: &str, result: Result<&str, FetchError>) {
            self.results
                .lock()
                .insert(resource.to_string(), result.map(|s| s.as_bytes().to_vec()));
        }

        fn calls(&self, resource: &str) -> usize {
            self.calls.lock().get(resource).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, resource: &str) -> Result<Vec<u8>, FetchError> {
            *self.calls.lock().entry(resource.to_string()).or_default() += 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.results
                .lock()
                .get(resource)
                .cloned()
                .unwrap_or(Err(FetchError::ServerError("no script".into())))
        }
    }

    struct Fixture {
        cache: Arc<CacheManager>,
        clock: ManualClock,
        fetcher: Arc<FakeFetcher>,
        _temp_dir: TempDir,
    }

    fn fixture(fetcher: FakeFetcher) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let clock = ManualClock::default();
        let cache = Arc::new(CacheManager::open(temp_dir.path()).with_clock(Arc::new(clock.clone())));
        Fixture {
            cache,
            clock,
            fetcher: Arc::new(fetcher),
            _temp_dir: temp_dir,
        }
    }

    fn json_task(fx: &Fixture, name: &str) -> RefreshTask<Vec<String>> {
        RefreshTask::json(name, Duration::from_secs(3600), fx.fetcher.clone(), name)
    }

    #[tokio::test]
    async fn test_partial_failure_is_isolated() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));
        fx.fetcher.set("bookings", Err(FetchError::NetworkUnavailable("offline".into())));
        fx.fetcher.set("spaces", Ok(r#"["Quiet Room"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        let rooms = builder.register(json_task(&fx, "rooms"));
        let bookings = builder.register(json_task(&fx, "bookings"));
        let spaces = builder.register(json_task(&fx, "spaces"));
        let orchestrator = builder.build().unwrap();

        let summary = orchestrator.refresh_all().await;

        assert_eq!(summary.outcome("rooms"), Some(RefreshOutcome::Fresh));
        assert_eq!(summary.outcome("bookings"), Some(RefreshOutcome::Failed));
        assert_eq!(summary.outcome("spaces"), Some(RefreshOutcome::Fresh));

        assert_eq!(rooms.snapshot().last_value, Some(vec!["A101".to_string()]));
        assert_eq!(rooms.snapshot().freshness(), Freshness::Fresh);
        assert_eq!(spaces.snapshot().last_value, Some(vec!["Quiet Room".to_string()]));

        let b = bookings.snapshot();
        assert_eq!(b.freshness(), Freshness::Empty);
        assert_eq!(b.last_error.map(|e| e.kind()), Some(FailureKind::NetworkUnavailable));
    }

    #[tokio::test]
    async fn test_fallback_to_cached_value_marks_stale() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok(r#"["v1"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone())
            .min_refresh_interval(Duration::ZERO);
        let rooms = builder.register(json_task(&fx, "rooms"));
        let orchestrator = builder.build().unwrap();

        orchestrator.refresh_all().await;
        let written = rooms.snapshot().last_updated.unwrap();

        fx.clock.advance(Duration::from_secs(120));
        fx.fetcher.set("rooms", Err(FetchError::Timeout));
        let summary = orchestrator.refresh_all().await;

        assert_eq!(summary.outcome("rooms"), Some(RefreshOutcome::Stale));
        let status = rooms.snapshot();
        assert_eq!(status.last_value, Some(vec!["v1".to_string()]));
        assert!(status.is_stale);
        assert_eq!(status.last_updated, Some(written));
        assert_eq!(status.last_error, Some(FetchError::Timeout.into()));
    }

    #[tokio::test]
    async fn test_decode_failure_falls_back_like_fetch_failure() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok(r#"["v1"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone())
            .min_refresh_interval(Duration::ZERO);
        let rooms = builder.register(json_task(&fx, "rooms"));
        let orchestrator = builder.build().unwrap();
        orchestrator.refresh_all().await;

        fx.fetcher.set("rooms", Ok("{\"unexpected\": true}"));
        orchestrator.refresh_all().await;

        let status = rooms.snapshot();
        assert_eq!(status.last_value, Some(vec!["v1".to_string()]));
        assert!(status.is_stale);
        assert_eq!(status.last_error.map(|e| e.kind()), Some(FailureKind::Decode));
    }

    #[tokio::test]
    async fn test_failure_after_cache_expired_keeps_last_value() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok(r#"["v1"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone())
            .min_refresh_interval(Duration::ZERO);
        let rooms = builder.register(RefreshTask::json(
            "rooms",
            Duration::from_secs(10),
            fx.fetcher.clone(),
            "rooms",
        ));
        let orchestrator = builder.build().unwrap();
        orchestrator.refresh_all().await;

        fx.clock.advance(Duration::from_secs(30));
        fx.fetcher.set("rooms", Err(FetchError::Unauthorized));
        let summary = orchestrator.refresh_all().await;

        assert_eq!(summary.outcome("rooms"), Some(RefreshOutcome::Failed));
        let status = rooms.snapshot();
        assert_eq!(status.last_value, Some(vec!["v1".to_string()]));
        assert!(status.is_stale);
        assert_eq!(status.last_error, Some(FetchError::Unauthorized.into()));
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Err(FetchError::Timeout));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone())
            .min_refresh_interval(Duration::ZERO);
        let rooms = builder.register(json_task(&fx, "rooms"));
        let orchestrator = builder.build().unwrap();
        orchestrator.refresh_all().await;
        assert!(rooms.snapshot().last_error.is_some());

        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));
        orchestrator.refresh_all().await;

        let status = rooms.snapshot();
        assert_eq!(status.freshness(), Freshness::Fresh);
        assert!(status.last_error.is_none());
        assert_eq!(status.last_updated, Some(fx.clock.now()));
    }

    #[tokio::test]
    async fn test_refresh_one_is_rate_limited_per_task() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));
        fx.fetcher.set("spaces", Ok(r#"["Quiet Room"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone())
            .min_refresh_interval(Duration::from_secs(60));
        builder.register(json_task(&fx, "rooms"));
        builder.register(json_task(&fx, "spaces"));
        let orchestrator = builder.build().unwrap();

        assert_eq!(orchestrator.refresh_one("rooms").await, Ok(RefreshOutcome::Fresh));
        fx.clock.advance(Duration::from_secs(30));
        assert_eq!(orchestrator.refresh_one("rooms").await, Ok(RefreshOutcome::Skipped));
        assert_eq!(fx.fetcher.calls("rooms"), 1);

        // Another task is not affected by the first one's limit
        assert_eq!(orchestrator.refresh_one("spaces").await, Ok(RefreshOutcome::Fresh));

        fx.clock.advance(Duration::from_secs(30));
        assert_eq!(orchestrator.refresh_one("rooms").await, Ok(RefreshOutcome::Fresh));
        assert_eq!(fx.fetcher.calls("rooms"), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_ignores_rate_limit() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        builder.register(json_task(&fx, "rooms"));
        let orchestrator = builder.build().unwrap();

        orchestrator.refresh_all().await;
        let summary = orchestrator.refresh_all().await;
        assert_eq!(summary.outcome("rooms"), Some(RefreshOutcome::Skipped));

        let summary = orchestrator.force_refresh_all().await;
        assert_eq!(summary.outcome("rooms"), Some(RefreshOutcome::Fresh));
        assert_eq!(fx.fetcher.calls("rooms"), 2);
    }

    #[tokio::test]
    async fn test_unknown_and_duplicate_tasks() {
        let fx = fixture(FakeFetcher::default());

        let orchestrator = SyncOrchestrator::builder("campus", fx.cache.clone())
            .build()
            .unwrap();
        assert_eq!(
            orchestrator.refresh_one("rooms").await,
            Err(SyncError::UnknownTask("rooms".into()))
        );

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        builder.register(json_task(&fx, "rooms"));
        builder.register(json_task(&fx, "rooms"));
        assert_eq!(
            builder.build().err(),
            Some(SyncError::DuplicateTask("rooms".into()))
        );
    }

    #[tokio::test]
    async fn test_refresh_selected_runs_only_named_tasks() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok("[]"));
        fx.fetcher.set("spaces", Ok("[]"));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        builder.register(json_task(&fx, "rooms"));
        builder.register(json_task(&fx, "spaces"));
        let orchestrator = Arc::new(builder.build().unwrap());

        let selection = TaskSelection::new(
            Arc::clone(&orchestrator),
            vec!["spaces".to_string(), "ghost".to_string()],
        );
        selection.run_cycle().await;

        assert_eq!(fx.fetcher.calls("rooms"), 0);
        assert_eq!(fx.fetcher.calls("spaces"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_runs_fetches_concurrently() {
        let fx = fixture(FakeFetcher::with_delay(Duration::from_secs(5)));
        for name in ["rooms", "bookings", "spaces"] {
            fx.fetcher.set(name, Ok("[]"));
        }

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        for name in ["rooms", "bookings", "spaces"] {
            builder.register(json_task(&fx, name));
        }
        let orchestrator = builder.build().unwrap();

        let started = tokio::time::Instant::now();
        let summary = orchestrator.refresh_all().await;

        assert_eq!(summary.count(RefreshOutcome::Fresh), 3);
        assert!(started.elapsed() < Duration::from_secs(10), "fetches ran sequentially");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_refresh_one_does_not_affect_siblings() {
        let fx = fixture(FakeFetcher::with_delay(Duration::from_secs(5)));
        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));
        fx.fetcher.set("spaces", Ok(r#"["Quiet Room"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        let rooms = builder.register(json_task(&fx, "rooms"));
        let spaces = builder.register(json_task(&fx, "spaces"));
        let orchestrator = builder.build().unwrap();

        let (cancelled, sibling) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(1), orchestrator.refresh_one("rooms")),
            orchestrator.refresh_one("spaces"),
        );

        assert!(cancelled.is_err());
        assert_eq!(sibling, Ok(RefreshOutcome::Fresh));
        assert!(rooms.snapshot().last_value.is_none());
        assert!(spaces.snapshot().last_value.is_some());

        // The cancelled task is free to run again
        assert_eq!(orchestrator.refresh_one("rooms").await, Ok(RefreshOutcome::Fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_in_flight_result() {
        let fx = fixture(FakeFetcher::with_delay(Duration::from_secs(5)));
        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        let rooms = builder.register(json_task(&fx, "rooms"));
        let orchestrator = Arc::new(builder.build().unwrap());

        let running = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.refresh_one("rooms").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        orchestrator.reset().await;

        assert_eq!(running.await.unwrap(), Ok(RefreshOutcome::Discarded));
        assert_eq!(rooms.snapshot(), TaskStatus::default());
        assert!(fx.cache.get::<Vec<String>>("rooms").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_queued_behind_reset_run_is_discarded() {
        let fx = fixture(FakeFetcher::with_delay(Duration::from_secs(5)));
        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone())
            .min_refresh_interval(Duration::ZERO);
        let rooms = builder.register(json_task(&fx, "rooms"));
        let orchestrator = Arc::new(builder.build().unwrap());

        // The second run waits on the first and only starts after the reset
        let first = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.refresh_one("rooms").await })
        };
        let queued = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.refresh_one("rooms").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        orchestrator.reset().await;
        fx.cache.clear_all().await;

        assert_eq!(first.await.unwrap(), Ok(RefreshOutcome::Discarded));
        assert_eq!(queued.await.unwrap(), Ok(RefreshOutcome::Discarded));
        assert_eq!(rooms.snapshot(), TaskStatus::default());
        assert!(fx.cache.get::<Vec<String>>("rooms").await.is_err());
        assert!(orchestrator.is_suspended());
    }

    #[tokio::test]
    async fn test_resume_after_reset_refreshes_again() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        let rooms = builder.register(json_task(&fx, "rooms"));
        let orchestrator = builder.build().unwrap();

        orchestrator.reset().await;
        assert_eq!(orchestrator.refresh_one("rooms").await, Ok(RefreshOutcome::Discarded));
        assert_eq!(fx.fetcher.calls("rooms"), 0);

        orchestrator.resume();
        assert_eq!(orchestrator.refresh_one("rooms").await, Ok(RefreshOutcome::Fresh));
        assert_eq!(rooms.snapshot().freshness(), Freshness::Fresh);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let fx = fixture(FakeFetcher::default());
        fx.fetcher.set("rooms", Ok(r#"["A101"]"#));

        let mut builder = SyncOrchestrator::builder("campus", fx.cache.clone());
        let rooms = builder.register(json_task(&fx, "rooms"));
        let orchestrator = builder.build().unwrap();

        let mut rx = rooms.subscribe();
        orchestrator.refresh_all().await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().last_value, Some(vec!["A101".to_string()]));
    }
}
