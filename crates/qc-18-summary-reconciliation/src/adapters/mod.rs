//! # Adapters Layer
//!
//! In-memory implementations of the outbound ports, used by tests and the
//! replay binary.

pub mod memory_log;
pub mod memory_store;

pub use memory_log::{InMemoryEventLog, InMemoryLogConsumer};
pub use memory_store::InMemorySummaryStore;
