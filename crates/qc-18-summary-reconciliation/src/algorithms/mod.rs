//! # Algorithms Module
//!
//! Delta derivation, merging and the per-key apply loop.

pub mod apply_loop;
pub mod merger;
pub mod processor;

pub use apply_loop::{apply_delta, ApplyOutcome, ApplyPolicy, LockReason};
pub use merger::{merge_batch, merge_deltas};
pub use processor::{affected_keys, record_to_deltas};
