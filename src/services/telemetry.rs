//! Process-wide counters for controller activity.
//!
//! Lock-free increments; read as a snapshot for status output. Increment
//! points follow the controller lifecycle: experiment created/deleted/
//! terminal, trial created/terminal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

#[derive(Default)]
pub struct Telemetry {
    experiments_created: AtomicU64,
    experiments_deleted: AtomicU64,
    experiments_succeeded: AtomicU64,
    experiments_failed: AtomicU64,
    trials_created: AtomicU64,
    trials_succeeded: AtomicU64,
    trials_failed: AtomicU64,
    suggestion_requests: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub experiments_created: u64,
    pub experiments_deleted: u64,
    pub experiments_succeeded: u64,
    pub experiments_failed: u64,
    pub trials_created: u64,
    pub trials_succeeded: u64,
    pub trials_failed: u64,
    pub suggestion_requests: u64,
}

impl Telemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_experiments_created(&self) {
        self.experiments_created.fetch_add(1, Ordering::Relaxed);
        debug!(counter = "experiments_created", "counter incremented");
    }

    pub fn inc_experiments_deleted(&self) {
        self.experiments_deleted.fetch_add(1, Ordering::Relaxed);
        debug!(counter = "experiments_deleted", "counter incremented");
    }

    pub fn inc_experiments_succeeded(&self) {
        self.experiments_succeeded.fetch_add(1, Ordering::Relaxed);
        debug!(counter = "experiments_succeeded", "counter incremented");
    }

    pub fn inc_experiments_failed(&self) {
        self.experiments_failed.fetch_add(1, Ordering::Relaxed);
        debug!(counter = "experiments_failed", "counter incremented");
    }

    pub fn inc_trials_created(&self) {
        self.trials_created.fetch_add(1, Ordering::Relaxed);
        debug!(counter = "trials_created", "counter incremented");
    }

    pub fn inc_trials_succeeded(&self) {
        self.trials_succeeded.fetch_add(1, Ordering::Relaxed);
        debug!(counter = "trials_succeeded", "counter incremented");
    }

    pub fn inc_trials_failed(&self) {
        self.trials_failed.fetch_add(1, Ordering::Relaxed);
        debug!(counter = "trials_failed", "counter incremented");
    }

    pub fn inc_suggestion_requests(&self) {
        self.suggestion_requests.fetch_add(1, Ordering::Relaxed);
        debug!(counter = "suggestion_requests", "counter incremented");
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            experiments_created: self.experiments_created.load(Ordering::Relaxed),
            experiments_deleted: self.experiments_deleted.load(Ordering::Relaxed),
            experiments_succeeded: self.experiments_succeeded.load(Ordering::Relaxed),
            experiments_failed: self.experiments_failed.load(Ordering::Relaxed),
            trials_created: self.trials_created.load(Ordering::Relaxed),
            trials_succeeded: self.trials_succeeded.load(Ordering::Relaxed),
            trials_failed: self.trials_failed.load(Ordering::Relaxed),
            suggestion_requests: self.suggestion_requests.load(Ordering::Relaxed),
        }
    }
}
