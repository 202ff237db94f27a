//! # Inbound Ports (Driving Ports)
//!
//! Public API exposed by the Summary Reconciliation subsystem.

use async_trait::async_trait;
use shared_types::PumpRecord;

use crate::config::ReconciliationConfig;
use crate::domain::{BatchOutcome, ReconciliationResult};
use crate::ports::outbound::LogConsumer;

/// Primary API for the Summary Reconciliation subsystem.
#[async_trait]
pub trait SummaryReconciliationApi: Send + Sync {
    /// Reconcile one delivered batch end to end.
    ///
    /// ## Returns
    ///
    /// - `Ok(Committed)`: every key applied, offset acknowledged, rows finalized
    /// - `Ok(Reverted)`: lock detected, mutations rolled back, offset untouched
    /// - `Ok(Empty)`: nothing delivered
    /// - `Err(_)`: collaborator failure, offset untouched
    async fn process_batch(
        &self,
        records: Vec<PumpRecord>,
        consumer: &dyn LogConsumer,
    ) -> ReconciliationResult<BatchOutcome>;

    /// Active configuration.
    fn config(&self) -> &ReconciliationConfig;
}
