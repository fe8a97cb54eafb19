//! Debug-only call bookkeeping: sequence ids, batches, health snapshots.
//!
//! A batch is a maximal run of calls with at least one call open. When
//! the last open call settles, a health snapshot is scheduled after an
//! idle period; any new call cancels it. Nothing here feeds back into
//! gate decisions.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Counts for the current batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub batch: u64,
    pub started: u64,
    pub done: u64,
    pub succeeded: u64,
    pub errored: u64,
    pub pending: u64,
    pub total: u64,
}

/// Queued/running calls for one dedupe key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyCounts {
    pub queued: u32,
    pub running: u32,
}

#[derive(Default)]
struct Counters {
    seq: u64,
    open: u64,
    health: HealthSnapshot,
    per_key: HashMap<String, KeyCounts>,
}

pub struct Instrumentation {
    enabled: bool,
    idle: Duration,
    counters: Arc<Mutex<Counters>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    reports: Arc<AtomicU64>,
}

impl Instrumentation {
    pub fn new(enabled: bool, idle: Duration) -> Self {
        Self {
            enabled,
            idle,
            counters: Arc::new(Mutex::new(Counters::default())),
            timer: Mutex::new(None),
            reports: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A call was accepted for execution. Returns its sequence id
    /// (0 when disabled).
    pub fn call_queued(&self, key: &str) -> u64 {
        if !self.enabled {
            return 0;
        }
        self.cancel_report();

        let mut c = self.counters.lock();
        c.seq += 1;
        if c.open == 0 {
            let batch = c.health.batch + 1;
            c.health = HealthSnapshot {
                batch,
                total: c.health.total,
                ..HealthSnapshot::default()
            };
            debug!(batch, "batch opened");
        }
        c.open += 1;
        c.health.started += 1;
        c.health.pending += 1;
        c.health.total += 1;
        c.per_key.entry(key.to_string()).or_default().queued += 1;
        c.seq
    }

    /// The call got its exclusive window (or runs reentrantly).
    pub fn call_running(&self, key: &str) {
        if !self.enabled {
            return;
        }
        let mut c = self.counters.lock();
        if let Some(counts) = c.per_key.get_mut(key) {
            counts.queued = counts.queued.saturating_sub(1);
            counts.running += 1;
        }
    }

    /// The call settled. `was_running` is false when it never got to run.
    pub fn call_settled(&self, key: &str, ok: bool, was_running: bool) {
        if !self.enabled {
            return;
        }
        let drained = {
            let mut c = self.counters.lock();
            if let Some(counts) = c.per_key.get_mut(key) {
                if was_running {
                    counts.running = counts.running.saturating_sub(1);
                } else {
                    counts.queued = counts.queued.saturating_sub(1);
                }
                if counts.queued == 0 && counts.running == 0 {
                    c.per_key.remove(key);
                }
            }
            c.open = c.open.saturating_sub(1);
            c.health.done += 1;
            c.health.pending = c.health.pending.saturating_sub(1);
            if ok {
                c.health.succeeded += 1;
            } else {
                c.health.errored += 1;
            }
            c.open == 0
        };
        if drained {
            self.schedule_report();
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        self.counters.lock().health.clone()
    }

    pub fn key_counts(&self, key: &str) -> KeyCounts {
        self.counters
            .lock()
            .per_key
            .get(key)
            .copied()
            .unwrap_or_default()
    }

    /// Health snapshots emitted so far.
    pub fn reports(&self) -> u64 {
        self.reports.load(Ordering::SeqCst)
    }

    fn cancel_report(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    fn schedule_report(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let counters = Arc::clone(&self.counters);
        let reports = Arc::clone(&self.reports);
        let idle = self.idle;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(idle).await;
            let snapshot = {
                let c = counters.lock();
                if c.open > 0 {
                    return;
                }
                c.health.clone()
            };
            reports.fetch_add(1, Ordering::SeqCst);
            info!(
                batch = snapshot.batch,
                started = snapshot.started,
                done = snapshot.done,
                succeeded = snapshot.succeeded,
                errored = snapshot.errored,
                pending = snapshot.pending,
                total = snapshot.total,
                "dispatch health"
            );
        });
        if let Some(previous) = self.timer.lock().replace(timer) {
            previous.abort();
        }
    }
}

impl Drop for Instrumentation {
    fn drop(&mut self) {
        self.cancel_report();
    }
}
