//! Runtime counters.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Thread-safe atomic gauge.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters maintained by a runtime.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub events_fired: Counter,
    pub executions: Counter,
    pub executions_failed: Counter,
    pub executions_in_flight: Gauge,
    pub plugins_loaded: Counter,
    pub load_failures: Counter,
    pub messages_delivered: Counter,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            events_fired: self.events_fired.get(),
            executions: self.executions.get(),
            executions_failed: self.executions_failed.get(),
            executions_in_flight: self.executions_in_flight.get(),
            plugins_loaded: self.plugins_loaded.get(),
            load_failures: self.load_failures.get(),
            messages_delivered: self.messages_delivered.get(),
        }
    }
}

/// Point-in-time copy of [`RuntimeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub events_fired: u64,
    pub executions: u64,
    pub executions_failed: u64,
    pub executions_in_flight: i64,
    pub plugins_loaded: u64,
    pub load_failures: u64,
    pub messages_delivered: u64,
}
