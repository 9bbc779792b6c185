//! Federate-side coordination engine: the bootstrap handshake with an
//! RTI, peer-to-peer discovery and connection, the NET/TAG/LTC
//! time-advance protocol, the inbound dispatcher, and the stop protocol.
//!
//! The local reactor event loop and the generated trigger table are out
//! of scope; they are injected through the [`scheduler::LocalScheduler`]
//! and [`scheduler::ActionTable`] traits.

pub mod config;
mod coordination;
mod dispatch;
pub mod error;
mod framed_io;
mod net;
mod p2p;
mod rti_client;
pub mod runtime;
pub mod scheduler;
mod server;
pub mod wire;

pub use config::{ClockSyncStat, FederateConfig, NeighborStructure};
pub use coordination::CoordinationState;
pub use dispatch::ConnectionRole;
pub use error::FederateError;
pub use rti_client::RtiClient;
pub use runtime::Federate;
pub use scheduler::{ActionTable, LocalScheduler};
pub use server::FederateServer;
