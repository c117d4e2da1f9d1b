//! Data synchronization: refresh task descriptors, their published state,
//! and the orchestrator that fetches them concurrently with cache fallback.

pub mod orchestrator;
pub mod state;
pub mod task;

pub use orchestrator::{
    SyncOrchestrator, SyncOrchestratorBuilder, TaskSelection, DEFAULT_MIN_REFRESH_INTERVAL,
};
pub use state::{Freshness, RefreshOutcome, RefreshSummary, TaskHandle, TaskStatus};
pub use task::RefreshTask;
