//! Two-tier TTL cache.
//!
//! `CacheManager` owns a bounded memory table and a directory of JSON files,
//! one per key. Entries expire `ttl` after they were written; expired,
//! missing and corrupt entries all read as `CacheError::NotFound`. A periodic
//! sweep (`spawn_sweeper`) deletes expired files and empties the memory tier.

pub mod disk;
pub mod entry;
pub mod manager;
pub mod memory;

pub use disk::{DiskStore, FsDiskStore};
pub use entry::{CacheEntry, CachedData};
pub use manager::{
    spawn_sweeper, CacheManager, CacheStats, SweepReport, SweeperHandle, DEFAULT_SWEEP_INTERVAL,
};
pub use memory::{MemoryTier, DEFAULT_MEMORY_CAPACITY};
