//! Cache and data-synchronization core for the campus client.
//!
//! The crate is organised leaves-first:
//!
//! - `cache`: TTL-based two-tier cache (bounded memory table + one JSON file per key)
//! - `fetch`: the "get bytes for resource R" contract and its HTTP implementation
//! - `sync`: refresh task descriptors, published state, and the orchestrator
//! - `scheduler`: fixed-interval refresh loops with cancellable waits
//! - `lifecycle`: sign-in / sign-out / foreground handling across all domains
//!
//! Nothing here is global. Build one `CacheManager` per process and hand an
//! `Arc` of it to every orchestrator.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod scheduler;
pub mod sync;

pub use cache::{CacheManager, CacheStats, CachedData, FsDiskStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use error::{CacheError, DecodeError, FetchError, RefreshError, SyncError};
pub use fetch::{Fetcher, HttpFetcher};
pub use lifecycle::{LifecycleEvent, SyncController};
pub use scheduler::{RefreshCycle, RefreshScheduler};
pub use sync::{RefreshTask, SyncOrchestrator, TaskHandle, TaskStatus};
