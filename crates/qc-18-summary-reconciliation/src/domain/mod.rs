//! # Domain Layer
//!
//! Pure domain logic for the Summary Reconciliation subsystem.
//!
//! - `entities`: `SummaryDelta`, `SummarySnapshot`
//! - `value_objects`: `SummaryFields`, `SourcePosition`, `BatchInfo`,
//!   `BatchOutcome`, `ForceApplyRule`
//! - `errors`: store, log, oracle and batch-level errors
//!
//! This module contains NO I/O dependencies. All external interactions
//! are abstracted through ports in the `ports` module.

pub mod entities;
pub mod errors;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use value_objects::*;
