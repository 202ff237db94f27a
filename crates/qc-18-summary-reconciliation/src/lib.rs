//! # QC-18 Summary Reconciliation
//!
//! Incremental maintenance of per-address summaries from chain events.
//!
//! **Subsystem ID:** 18
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Consume batches of block, uncle and transaction events from a
//! partitioned, offset-addressed log and fold them into versioned summary
//! rows (balance, total received, transaction and mining counters):
//! - Deltas derived per event, merged per address, applied through CAS
//! - Two-phase alignment of summary rows with acknowledged log offsets
//! - Contention with other writers resolved by backoff, an offset-oracle
//!   tiebreak, or a whole-batch revert
//!
//! ## Batch Guarantees
//!
//! | Outcome | Summary rows | Log offset |
//! |---------|--------------|------------|
//! | `Committed` | applied, then finalized | acknowledged |
//! | `Reverted` | restored to their pre-batch value | untouched |
//! | `Err(_)` | possibly in-doubt, healed on redelivery | untouched |
//!
//! ## Module Structure
//!
//! ```text
//! qc-18-summary-reconciliation/
//! ├── domain/          # SummaryDelta, SummarySnapshot, BatchInfo, errors
//! ├── algorithms/      # Delta processor, merger, per-key apply loop
//! ├── ports/           # API trait + store / oracle / log / metrics SPIs
//! ├── adapters/        # In-memory store and partitioned event log
//! ├── config.rs        # ReconciliationConfig (TOML + env)
//! ├── worker_pool.rs   # Bounded per-batch concurrency
//! ├── metrics.rs       # Prometheus metrics (feature "metrics")
//! └── service.rs       # ReconciliationEngine
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;
pub mod worker_pool;

// Re-exports
pub use adapters::{InMemoryEventLog, InMemoryLogConsumer, InMemorySummaryStore};
pub use algorithms::{
    affected_keys, apply_delta, merge_batch, merge_deltas, record_to_deltas, ApplyOutcome,
    ApplyPolicy, LockReason,
};
pub use config::{ConfigError, ReconciliationConfig};
pub use domain::{
    BatchInfo, BatchOutcome, ForceApplyRule, LogError, OracleError, ReconciliationError,
    ReconciliationResult, SourcePosition, StoreError, SummaryDelta, SummaryFields,
    SummarySnapshot,
};
pub use metrics::PrometheusMetrics;
pub use ports::{
    LogConsumer, NoopMetrics, OffsetOracle, ReconciliationMetrics, Stage,
    SummaryReconciliationApi, SummaryStore,
};
pub use service::{ReconciliationEngine, RunStats};
pub use worker_pool::{Admission, WorkerPool};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
    }
}
