//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring ledger activity.
//!
//! # Metrics
//!
//! - `ledger_entries_total` - Total number of entries appended
//! - `ledger_append_duration_seconds` - Histogram of append latencies
//! - `ledger_batches_linked_total` - Batches allocated to projects
//! - `ledger_conflict_timeouts_total` - Project-lock acquisition timeouts

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Total entries appended
    pub entries_total: IntCounter,

    /// Append duration histogram
    pub append_duration: Histogram,

    /// Total batches linked to projects
    pub batches_linked_total: IntCounter,

    /// Project-lock acquisition timeouts
    pub conflict_timeouts_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total =
            IntCounter::new("ledger_entries_total", "Total number of entries appended")?;
        registry.register(Box::new(entries_total.clone()))?;

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        let batches_linked_total = IntCounter::new(
            "ledger_batches_linked_total",
            "Batches allocated to projects",
        )?;
        registry.register(Box::new(batches_linked_total.clone()))?;

        let conflict_timeouts_total = IntCounter::new(
            "ledger_conflict_timeouts_total",
            "Project-lock acquisition timeouts",
        )?;
        registry.register(Box::new(conflict_timeouts_total.clone()))?;

        Ok(Self {
            entries_total,
            append_duration,
            batches_linked_total,
            conflict_timeouts_total,
            registry,
        })
    }

    /// Record an appended entry with its latency
    pub fn record_append(&self, duration_seconds: f64) {
        self.entries_total.inc();
        self.append_duration.observe(duration_seconds);
    }

    /// Record a batch allocation
    pub fn record_batch_linked(&self) {
        self.batches_linked_total.inc();
    }

    /// Record a lock acquisition timeout
    pub fn record_conflict_timeout(&self) {
        self.conflict_timeouts_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
