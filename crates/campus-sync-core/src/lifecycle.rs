//! Session lifecycle handling across every sync domain.
//!
//! The session layer calls `SyncController` methods directly, or sends
//! `LifecycleEvent`s over a channel to `spawn_listener`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheManager;
use crate::scheduler::RefreshScheduler;
use crate::sync::SyncOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    SignedIn,
    SignedOut,
    Foreground,
}

struct SyncDomain {
    orchestrator: Arc<SyncOrchestrator>,
    scheduler: RefreshScheduler,
}

/// Owns the schedulers of every domain and reacts to session changes.
pub struct SyncController {
    cache: Arc<CacheManager>,
    domains: Vec<SyncDomain>,
    signed_in: AtomicBool,
}

impl SyncController {
    pub fn new(cache: Arc<CacheManager>) -> Self {
        Self {
            cache,
            domains: Vec::new(),
            signed_in: AtomicBool::new(false),
        }
    }

    /// Add a domain refreshed in full every `interval`.
    pub fn add_domain(&mut self, orchestrator: Arc<SyncOrchestrator>, interval: Duration) {
        let scheduler = RefreshScheduler::new(
            orchestrator.domain().to_string(),
            interval,
            orchestrator.clone(),
        );
        self.domains.push(SyncDomain {
            orchestrator,
            scheduler,
        });
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn orchestrator(&self, domain: &str) -> Option<&Arc<SyncOrchestrator>> {
        self.domains
            .iter()
            .find(|d| d.orchestrator.domain() == domain)
            .map(|d| &d.orchestrator)
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in.load(Ordering::SeqCst)
    }

    pub fn schedulers_running(&self) -> usize {
        self.domains
            .iter()
            .filter(|d| d.scheduler.is_running())
            .count()
    }

    pub async fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::SignedIn => self.on_user_signed_in().await,
            LifecycleEvent::SignedOut => self.on_user_signed_out().await,
            LifecycleEvent::Foreground => self.on_app_foreground().await,
        }
    }

    /// Refresh every domain once, ignoring rate limits, then start the schedulers.
    pub async fn on_user_signed_in(&self) {
        info!(domains = self.domains.len(), "User signed in, starting sync");
        self.signed_in.store(true, Ordering::SeqCst);

        for domain in &self.domains {
            domain.orchestrator.resume();
        }
        join_all(
            self.domains
                .iter()
                .map(|d| d.orchestrator.force_refresh_all()),
        )
        .await;

        for domain in &self.domains {
            domain.scheduler.start();
        }
    }

    /// Stop every scheduler, forget published state and empty the cache.
    pub async fn on_user_signed_out(&self) {
        info!("User signed out, stopping sync and clearing cache");
        self.signed_in.store(false, Ordering::SeqCst);

        for domain in &self.domains {
            domain.scheduler.stop();
        }
        join_all(self.domains.iter().map(|d| d.orchestrator.reset())).await;
        self.cache.clear_all().await;
    }

    /// Rate-limited refresh of every domain, if signed in.
    pub async fn on_app_foreground(&self) {
        if !self.is_signed_in() {
            debug!("App foregrounded while signed out, nothing to refresh");
            return;
        }
        debug!("App foregrounded, refreshing");
        join_all(self.domains.iter().map(|d| d.orchestrator.refresh_all())).await;
    }

    /// Stop every scheduler and wait for in-flight cycles to finish.
    pub async fn shutdown(&self) {
        join_all(self.domains.iter().map(|d| d.scheduler.shutdown())).await;
        info!("Sync controller shut down");
    }
}

/// Apply lifecycle events from `events` in order until the sender is dropped.
pub fn spawn_listener(
    controller: Arc<SyncController>,
    mut events: mpsc::Receiver<LifecycleEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(?event, "Lifecycle event received");
            controller.handle(event).await;
        }
        debug!("Lifecycle channel closed");
    })
}
