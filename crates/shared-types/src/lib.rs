//! # Shared Types Crate
//!
//! Types that cross the event-log boundary between the chain pumps and the
//! summary subsystems.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: payload and record shapes are defined here.
//! - **Wire Stability**: unknown event tags decode to `PumpEvent::Unknown`
//!   instead of failing the whole batch.

pub mod entities;
pub mod events;

pub use entities::*;
pub use events::*;
