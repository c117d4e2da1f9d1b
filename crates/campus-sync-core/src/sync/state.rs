use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::RefreshError;

/// Published state of one refresh task.
///
/// - fresh: `last_value` set, `is_stale == false`
/// - stale: `last_value` set, `is_stale == true`, `last_error` says why
/// - no data yet: `last_value == None`
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus<T> {
    pub last_value: Option<T>,
    pub last_updated: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub last_error: Option<RefreshError>,
}

impl<T> Default for TaskStatus<T> {
    fn default() -> Self {
        Self {
            last_value: None,
            last_updated: None,
            is_stale: false,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Empty,
}

impl<T> TaskStatus<T> {
    pub fn freshness(&self) -> Freshness {
        match (&self.last_value, self.is_stale) {
            (None, _) => Freshness::Empty,
            (Some(_), true) => Freshness::Stale,
            (Some(_), false) => Freshness::Fresh,
        }
    }
}

/// What a single task refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Fetched, decoded and cached a new value
    Fresh,
    /// Refresh failed; published the last cached value instead
    Stale,
    /// Refresh failed and the cache had nothing usable
    Failed,
    /// Refreshed too recently; published state left unchanged
    Skipped,
    /// Result dropped because the orchestrator was reset while it ran
    Discarded,
}

/// Per-task outcomes of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub outcomes: Vec<(String, RefreshOutcome)>,
}

impl RefreshSummary {
    pub fn outcome(&self, name: &str) -> Option<RefreshOutcome> {
        self.outcomes
            .iter()
            .find(|(task, _)| task == name)
            .map(|(_, outcome)| *outcome)
    }

    pub fn count(&self, outcome: RefreshOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

/// Read-only view of one task's published state.
///
/// Any number of handles may exist; each read is a consistent snapshot.
#[derive(Debug, Clone)]
pub struct TaskHandle<T> {
    name: String,
    rx: watch::Receiver<TaskStatus<T>>,
}

impl<T: Clone> TaskHandle<T> {
    pub(crate) fn new(name: String, rx: watch::Receiver<TaskStatus<T>>) -> Self {
        Self { name, rx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> TaskStatus<T> {
        self.rx.borrow().clone()
    }

    /// A receiver that can await changes to the published state.
    pub fn subscribe(&self) -> watch::Receiver<TaskStatus<T>> {
        self.rx.clone()
    }
}
