//! Explicit observability handle.
//!
//! Library code never logs through module-level state. Callers construct a
//! `Telemetry` and pass clones of it down; each clone shares the same counters
//! and emits records under the same log target.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Counters {
    frames_seen: AtomicU64,
    frames_absent: AtomicU64,
    cycles: AtomicU64,
    sort_attempts: AtomicU64,
    sort_failures: AtomicU64,
    capacity_warnings: AtomicU64,
}

/// Counter values at one instant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub frames_seen: u64,
    pub frames_absent: u64,
    pub cycles: u64,
    pub sort_attempts: u64,
    pub sort_failures: u64,
    pub capacity_warnings: u64,
}

#[derive(Clone)]
pub struct Telemetry {
    target: Arc<str>,
    counters: Arc<Counters>,
}

impl Telemetry {
    pub fn new(target: &str) -> Self {
        Self {
            target: Arc::from(target),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn info(&self, message: std::fmt::Arguments<'_>) {
        log::log!(target: &*self.target, log::Level::Info, "{}", message);
    }

    pub fn debug(&self, message: std::fmt::Arguments<'_>) {
        log::log!(target: &*self.target, log::Level::Debug, "{}", message);
    }

    pub fn warn(&self, message: std::fmt::Arguments<'_>) {
        log::log!(target: &*self.target, log::Level::Warn, "{}", message);
    }

    pub fn error(&self, message: std::fmt::Arguments<'_>) {
        log::log!(target: &*self.target, log::Level::Error, "{}", message);
    }

    pub fn frame_seen(&self) {
        self.counters.frames_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_absent(&self) {
        self.counters.frames_absent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle(&self) {
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sort_attempt(&self) {
        self.counters.sort_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sort_failure(&self) {
        self.counters.sort_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn capacity_warning(&self) {
        self.counters
            .capacity_warnings
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let c = &self.counters;
        TelemetrySnapshot {
            frames_seen: c.frames_seen.load(Ordering::Relaxed),
            frames_absent: c.frames_absent.load(Ordering::Relaxed),
            cycles: c.cycles.load(Ordering::Relaxed),
            sort_attempts: c.sort_attempts.load(Ordering::Relaxed),
            sort_failures: c.sort_failures.load(Ordering::Relaxed),
            capacity_warnings: c.capacity_warnings.load(Ordering::Relaxed),
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new("robosort")
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("target", &self.target)
            .field("counters", &self.snapshot())
            .finish()
    }
}
