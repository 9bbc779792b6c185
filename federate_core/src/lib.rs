//! Scalar identifiers and the time model shared by the coordination engine.
//!
//! This crate is deliberately tiny: it holds the types every other crate in
//! the workspace needs to agree on bit-for-bit (wire sizes, signedness), and
//! nothing about sockets, tasks, or the coordination protocol itself.

mod ids;
mod time;

pub use ids::{FederateId, FederationId, FederationIdError, PortId, TriggerHandle};
pub use time::{physical_time_now, Instant, Interval, FOREVER, NEVER};
