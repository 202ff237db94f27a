//! # Ports Layer
//!
//! Hexagonal architecture ports (interfaces) for the Summary Reconciliation
//! subsystem.
//!
//! - **Driving Ports (Inbound)**: APIs consumed by adapters and the binary
//! - **Driven Ports (Outbound)**: SPIs implemented by adapters (store, log, metrics)

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
