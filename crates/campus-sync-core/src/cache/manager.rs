use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{watch, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::disk::{DiskStore, FsDiskStore};
use super::entry::{CacheEntry, CachedData};
use super::memory::{MemoryTier, DEFAULT_MEMORY_CAPACITY};
use crate::clock::{system_clock, SharedClock};
use crate::error::CacheError;

/// Default period between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub disk_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    disk_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            disk_errors: self.disk_errors.load(Ordering::Relaxed),
        }
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Disk entries removed because they were expired or unreadable
    pub disk_removed: usize,
    /// Memory entries dropped (the whole memory tier is cleared every sweep)
    pub memory_cleared: usize,
}

/// One async mutex per key, created on first use.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody is holding or waiting on.
    fn prune(&self) {
        self.locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Owner of both cache tiers.
///
/// Reads check memory, then disk (promoting disk hits into memory). Writes go
/// to memory, then disk; a disk failure is logged and does not fail the write.
/// Operations on one key are serialized; operations on different keys run
/// concurrently. `clear_all` and the sweep exclude every per-key operation.
pub struct CacheManager {
    memory: MemoryTier,
    disk: Arc<dyn DiskStore>,
    locks: KeyLocks,
    gate: RwLock<()>,
    clock: SharedClock,
    counters: Counters,
}

impl CacheManager {
    pub fn new(disk: Arc<dyn DiskStore>) -> Self {
        Self {
            memory: MemoryTier::new(DEFAULT_MEMORY_CAPACITY),
            disk,
            locks: KeyLocks::default(),
            gate: RwLock::new(()),
            clock: system_clock(),
            counters: Counters::default(),
        }
    }

    /// Cache backed by one JSON file per key under `cache_dir`.
    pub fn open(cache_dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FsDiskStore::new(cache_dir)))
    }

    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory = MemoryTier::new(capacity);
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Store `value` under `key` for `ttl`.
    ///
    /// Only serialization can fail; disk problems degrade to memory-only.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let _gate = self.gate.read().await;
        let _key = self.locks.acquire(key).await;

        let serialize_err = |source| CacheError::Serialize {
            key: key.to_string(),
            source,
        };
        let entry = CacheEntry::new(value, self.clock.now(), ttl).map_err(serialize_err)?;
        let encoded = entry.encode().map_err(serialize_err)?;

        self.memory.insert(key, Arc::new(entry));

        if let Err(e) = self.disk.write(key, &encoded).await {
            Counters::bump(&self.counters.disk_errors);
            warn!(key = %key, error = %e, "Failed to write cache entry to disk");
        }
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache entry written");
        Ok(())
    }

    /// Read a fresh value for `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        self.get_cached(key).await.map(|cached| cached.data)
    }

    /// Read a fresh value for `key` along with when it was written.
    ///
    /// Missing, expired, corrupted and wrongly-typed entries all come back as
    /// `CacheError::NotFound`.
    pub async fn get_cached<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<CachedData<T>, CacheError> {
        let _gate = self.gate.read().await;
        let _key = self.locks.acquire(key).await;
        let now = self.clock.now();

        if let Some(entry) = self.memory.get(key) {
            if entry.is_expired_at(now) {
                self.memory.remove(key);
            } else {
                match entry.value::<T>() {
                    Ok(data) => {
                        Counters::bump(&self.counters.memory_hits);
                        debug!(key = %key, "Memory cache hit");
                        return Ok(cached(data, &entry));
                    }
                    Err(e) => {
                        debug!(key = %key, error = %e, "Memory entry does not match requested type");
                    }
                }
            }
        }

        if let Some(entry) = self.read_disk(key).await {
            if !entry.is_expired_at(now) {
                match entry.value::<T>() {
                    Ok(data) => {
                        Counters::bump(&self.counters.disk_hits);
                        debug!(key = %key, "Disk cache hit, promoting to memory");
                        let result = cached(data, &entry);
                        self.memory.insert(key, Arc::new(entry));
                        return Ok(result);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Disk entry does not match requested type");
                    }
                }
            }
        }

        Counters::bump(&self.counters.misses);
        Err(CacheError::NotFound(key.to_string()))
    }

    /// Whether a fresh entry exists for `key`, without decoding its value.
    pub async fn contains_fresh(&self, key: &str) -> bool {
        let _gate = self.gate.read().await;
        let _key = self.locks.acquire(key).await;
        let now = self.clock.now();

        if let Some(entry) = self.memory.get(key) {
            if !entry.is_expired_at(now) {
                return true;
            }
        }
        self.read_disk(key)
            .await
            .is_some_and(|entry| !entry.is_expired_at(now))
    }

    /// Remove `key` from both tiers.
    pub async fn clear(&self, key: &str) {
        let _gate = self.gate.read().await;
        let _key = self.locks.acquire(key).await;

        self.memory.remove(key);
        if let Err(e) = self.disk.remove(key).await {
            Counters::bump(&self.counters.disk_errors);
            warn!(key = %key, error = %e, "Failed to remove cache entry from disk");
        }
    }

    /// Remove every key from both tiers.
    pub async fn clear_all(&self) {
        let _gate = self.gate.write().await;

        self.memory.clear();
        if let Err(e) = self.disk.clear().await {
            Counters::bump(&self.counters.disk_errors);
            warn!(error = %e, "Failed to clear disk cache");
        }
        self.locks.prune();
        info!("Cache cleared");
    }

    /// Remove expired and unreadable disk entries, then clear the memory tier.
    ///
    /// Memory is a hot copy that refills from disk or the network on the next
    /// read, so it is dropped wholesale rather than checked entry by entry.
    pub async fn sweep_expired(&self) -> SweepReport {
        let _gate = self.gate.write().await;
        let now = self.clock.now();
        let mut report = SweepReport::default();

        let keys = match self.disk.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                Counters::bump(&self.counters.disk_errors);
                warn!(error = %e, "Failed to list disk cache during sweep");
                Vec::new()
            }
        };

        for key in keys {
            let keep = self
                .read_disk(&key)
                .await
                .is_some_and(|entry| !entry.is_expired_at(now));
            if keep {
                continue;
            }
            match self.disk.remove(&key).await {
                Ok(()) => report.disk_removed += 1,
                Err(e) => {
                    Counters::bump(&self.counters.disk_errors);
                    warn!(key = %key, error = %e, "Failed to remove expired cache entry");
                }
            }
        }

        report.memory_cleared = self.memory.len();
        self.memory.clear();
        self.locks.prune();

        debug!(
            disk_removed = report.disk_removed,
            memory_cleared = report.memory_cleared,
            "Cache sweep complete"
        );
        report
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Number of entries currently held in memory.
    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    /// Read and decode a disk entry. I/O errors and corrupt files read as absent.
    async fn read_disk(&self, key: &str) -> Option<CacheEntry> {
        let bytes = match self.disk.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                Counters::bump(&self.counters.disk_errors);
                warn!(key = %key, error = %e, "Failed to read cache entry from disk");
                return None;
            }
        };
        match CacheEntry::decode(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = %key, error = %e, "Ignoring corrupt cache entry");
                None
            }
        }
    }
}

fn cached<T>(data: T, entry: &CacheEntry) -> CachedData<T> {
    CachedData {
        data,
        cached_at: entry.written_at(),
        ttl: entry.ttl(),
    }
}

/// Handle to the background sweep task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Stop the sweeper and wait for an in-progress sweep to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Cache sweeper task ended abnormally");
        }
    }
}

/// Spawn a task that runs `sweep_expired` every `period`. The first sweep
/// happens one full period after spawning.
pub fn spawn_sweeper(cache: Arc<CacheManager>, period: Duration) -> SweeperHandle {
    let (shutdown, mut shutdown_rx) = watch::channel(false);

    info!(period_secs = period.as_secs(), "Starting background cache sweeper");

    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = cache.sweep_expired().await;
                    if report.disk_removed > 0 {
                        info!(disk_removed = report.disk_removed, "Scheduled cache sweep removed expired entries");
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        debug!("Cache sweeper stopped");
    });

    SweeperHandle { shutdown, handle }
}
