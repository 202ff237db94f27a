//! # Reconciliation Metrics
//!
//! Prometheus metrics for monitoring the reconciliation engine.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! qc-18-summary-reconciliation = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `summary_lock_aborts_total` - Counter of batches reverted after a lock (by topic)
//! - `summary_forced_applies_total` - Counter of keys forced over an in-doubt row (by topic)
//! - `summary_finalize_failures_total` - Counter of finalize CAS misses (by topic)
//! - `summary_stage_seconds` - Histogram of stage durations (by topic, stage)
//! - `summary_current_offset` - Gauge of the last acknowledged offset (by topic, partition)

use std::time::Duration;

use crate::ports::{ReconciliationMetrics, Stage};

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Batches reverted after a lock, labeled by topic
    pub static ref LOCK_ABORTS: IntCounterVec = register_int_counter_vec!(
        "summary_lock_aborts_total",
        "Total number of batches reverted after unresolvable contention",
        &["topic"]
    )
    .expect("Failed to create LOCK_ABORTS metric");

    /// Forced applies, labeled by topic
    pub static ref FORCED_APPLIES: IntCounterVec = register_int_counter_vec!(
        "summary_forced_applies_total",
        "Total number of keys applied over another writer's in-doubt row",
        &["topic"]
    )
    .expect("Failed to create FORCED_APPLIES metric");

    /// Finalize CAS misses, labeled by topic
    pub static ref FINALIZE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "summary_finalize_failures_total",
        "Total number of rows left in-doubt after finalize",
        &["topic"]
    )
    .expect("Failed to create FINALIZE_FAILURES metric");

    /// Stage durations
    pub static ref STAGE_SECONDS: HistogramVec = register_histogram_vec!(
        "summary_stage_seconds",
        "Duration of reconciliation stages",
        &["topic", "stage"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("Failed to create STAGE_SECONDS metric");

    /// Last acknowledged offset
    pub static ref CURRENT_OFFSET: IntGaugeVec = register_int_gauge_vec!(
        "summary_current_offset",
        "Last acknowledged log offset",
        &["topic", "partition"]
    )
    .expect("Failed to create CURRENT_OFFSET metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

/// Record a batch reverted after a lock
#[cfg(feature = "metrics")]
pub fn record_lock_abort(topic: &str) {
    LOCK_ABORTS.with_label_values(&[topic]).inc();
}

/// Record a forced apply
#[cfg(feature = "metrics")]
pub fn record_forced_apply(topic: &str) {
    FORCED_APPLIES.with_label_values(&[topic]).inc();
}

/// Record a finalize miss
#[cfg(feature = "metrics")]
pub fn record_finalize_failure(topic: &str) {
    FINALIZE_FAILURES.with_label_values(&[topic]).inc();
}

/// Observe a stage duration
#[cfg(feature = "metrics")]
pub fn observe_stage(topic: &str, stage: Stage, elapsed: Duration) {
    STAGE_SECONDS
        .with_label_values(&[topic, stage.as_str()])
        .observe(elapsed.as_secs_f64());
}

/// Update the acknowledged offset gauge
#[cfg(feature = "metrics")]
pub fn set_current_offset(topic: &str, partition: u32, offset: u64) {
    CURRENT_OFFSET
        .with_label_values(&[topic, &partition.to_string()])
        .set(offset as i64);
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

/// Record a batch reverted after a lock (no-op)
#[cfg(not(feature = "metrics"))]
pub fn record_lock_abort(_topic: &str) {}

/// Record a forced apply (no-op)
#[cfg(not(feature = "metrics"))]
pub fn record_forced_apply(_topic: &str) {}

/// Record a finalize miss (no-op)
#[cfg(not(feature = "metrics"))]
pub fn record_finalize_failure(_topic: &str) {}

/// Observe a stage duration (no-op)
#[cfg(not(feature = "metrics"))]
pub fn observe_stage(_topic: &str, _stage: Stage, _elapsed: Duration) {}

/// Update the acknowledged offset gauge (no-op)
#[cfg(not(feature = "metrics"))]
pub fn set_current_offset(_topic: &str, _partition: u32, _offset: u64) {}

/// `ReconciliationMetrics` backed by the process-wide registry above.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl ReconciliationMetrics for PrometheusMetrics {
    fn record_lock_abort(&self, topic: &str) {
        record_lock_abort(topic);
    }

    fn record_forced_apply(&self, topic: &str) {
        record_forced_apply(topic);
    }

    fn record_finalize_failure(&self, topic: &str) {
        record_finalize_failure(topic);
    }

    fn observe_stage(&self, topic: &str, stage: Stage, elapsed: Duration) {
        observe_stage(topic, stage, elapsed);
    }

    fn set_current_offset(&self, topic: &str, partition: u32, offset: u64) {
        set_current_offset(topic, partition, offset);
    }
}
