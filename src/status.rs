//! The Status Reporter (spec §4.I): last tick's summary plus the Reconciler's
//! current state, read by the HTTP boundary and updated by the Reconciler at
//! tick start/end and on each item.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub successes: u64,
    pub errors: u64,
    pub dry_run: bool,
    pub message: Option<String>,
}

impl TickSummary {
    fn starting(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: None,
            successes: 0,
            errors: 0,
            dry_run,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: ReconcilerState,
    pub last_sync_time: i64,
    pub last_tick: Option<TickSummary>,
}

/// Shared, lock-protected status state. Cheap to clone (an `Arc` in practice
/// via the caller) and safe to read concurrently with the Reconciler writing.
pub struct StatusReporter {
    inner: RwLock<Inner>,
}

struct Inner {
    state: ReconcilerState,
    last_sync_time: i64,
    last_tick: Option<TickSummary>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: ReconcilerState::Idle,
                last_sync_time: 0,
                last_tick: None,
            }),
        }
    }

    pub fn tick_started(&self, started_at: DateTime<Utc>, dry_run: bool) {
        let mut inner = self.inner.write().expect("status lock poisoned");
        inner.state = ReconcilerState::Running;
        inner.last_tick = Some(TickSummary::starting(started_at, dry_run));
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write().expect("status lock poisoned");
        if let Some(tick) = inner.last_tick.as_mut() {
            tick.successes += 1;
        }
    }

    pub fn record_error(&self) {
        let mut inner = self.inner.write().expect("status lock poisoned");
        if let Some(tick) = inner.last_tick.as_mut() {
            tick.errors += 1;
        }
    }

    pub fn tick_finished(&self, finished_at: DateTime<Utc>, message: Option<String>) {
        let mut inner = self.inner.write().expect("status lock poisoned");
        inner.state = ReconcilerState::Idle;
        if let Some(tick) = inner.last_tick.as_mut() {
            tick.finished_at = Some(finished_at);
            tick.message = message;
        }
    }

    pub fn record_last_sync_time(&self, unix_seconds: i64) {
        let mut inner = self.inner.write().expect("status lock poisoned");
        inner.last_sync_time = unix_seconds;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().expect("status lock poisoned");
        StatusSnapshot {
            state: inner.state,
            last_sync_time: inner.last_sync_time,
            last_tick: inner.last_tick.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_idle_before_any_tick() {
        let reporter = StatusReporter::new();
        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.state, ReconcilerState::Idle);
        assert!(snapshot.last_tick.is_none());
    }

    #[test]
    fn tracks_successes_and_errors_within_a_tick() {
        let reporter = StatusReporter::new();
        reporter.tick_started(Utc::now(), false);
        reporter.record_success();
        reporter.record_success();
        reporter.record_error();
        reporter.tick_finished(Utc::now(), None);

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.state, ReconcilerState::Idle);
        let tick = snapshot.last_tick.unwrap();
        assert_eq!(tick.successes, 2);
        assert_eq!(tick.errors, 1);
        assert!(tick.finished_at.is_some());
    }
}
