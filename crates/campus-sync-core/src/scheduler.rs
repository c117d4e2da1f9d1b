//! Fixed-interval refresh loops.
//!
//! A `RefreshScheduler` runs one cycle, waits `interval`, and repeats until
//! stopped. The wait starts only after the cycle returns, and each instance
//! holds one cycle lock across loops, so cycles never overlap even when a
//! restarted loop meets a cycle left in flight by `stop()`. `stop()` wakes the
//! wait immediately; a cycle already in flight is left to finish and apply its
//! results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The scheduler's only handle into the work it drives.
#[async_trait]
pub trait RefreshCycle: Send + Sync {
    async fn run_cycle(&self);
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// `Stopped -> Running -> Stopped`, one loop per instance.
pub struct RefreshScheduler {
    name: String,
    interval: Duration,
    target: Arc<dyn RefreshCycle>,
    running: Mutex<Option<Running>>,
    /// Held for the duration of every cycle, by whichever loop runs it
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
}

impl RefreshScheduler {
    pub fn new(name: impl Into<String>, interval: Duration, target: Arc<dyn RefreshCycle>) -> Self {
        Self {
            name: name.into(),
            interval,
            target,
            running: Mutex::new(None),
            cycle_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Start the loop. No-op if already running. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!(scheduler = %self.name, "Already running");
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.name.clone(),
            self.interval,
            Arc::clone(&self.target),
            Arc::clone(&self.cycle_lock),
            shutdown_rx,
        ));
        *running = Some(Running { shutdown, handle });
        info!(scheduler = %self.name, interval_secs = self.interval.as_secs(), "Scheduler started");
    }

    /// Stop the loop without waiting for it to exit.
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            let _ = running.shutdown.send(true);
            info!(scheduler = %self.name, "Scheduler stopped");
        }
    }

    /// Stop the loop and wait until it has exited, including any in-flight cycle.
    pub async fn shutdown(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            if let Err(e) = running.handle.await {
                warn!(scheduler = %self.name, error = %e, "Scheduler task ended abnormally");
            }
            info!(scheduler = %self.name, "Scheduler shut down");
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn run_loop(
    name: String,
    interval: Duration,
    target: Arc<dyn RefreshCycle>,
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        {
            // A previous loop's cycle may still be running after a restart
            let _cycle = cycle_lock.lock().await;
            if *shutdown.borrow() {
                break;
            }
            debug!(scheduler = %name, "Running refresh cycle");
            target.run_cycle().await;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!(scheduler = %name, "Refresh loop exited");
}
