//! Configuration and the default constants from the wire contract.

use std::net::SocketAddr;
use std::time::Duration;

use federate_core::{FederateId, FederationId, Interval};

/// Defaults drawn from the external wire contract; every one is overridable
/// through a `FederateConfig` builder method.
pub mod defaults {
    use super::Duration;

    pub const DEFAULT_PORT: u16 = 15045;
    pub const STARTING_PORT: u16 = 15045;
    pub const PORT_RANGE_LIMIT: u16 = 16;
    pub const MAX_NUM_PORT_ADDRESSES: u16 = 16;
    pub const CONNECT_NUM_RETRIES: u32 = 5;
    pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(2);
    pub const ADDRESS_QUERY_RETRY_INTERVAL: Duration = Duration::from_millis(100);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
    pub const PORT_BIND_RETRY_LIMIT: u32 = 10;
    pub const PORT_BIND_RETRY_INTERVAL: Duration = Duration::from_secs(1);
    pub const DELAY_BETWEEN_SOCKET_RETRIES: Duration = Duration::from_millis(1);

    /// Cap on an accepted `MESSAGE`/`TIMED_MESSAGE` payload. The original C
    /// federate had no such check and silently truncated oversize payloads;
    /// this crate rejects them instead (see the coordination engine's
    /// dispatcher).
    pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024 * 1024;
}

/// Whether a clock-sync status is reported as on or off during the RTI
/// handshake. Clock sync itself is not implemented by this crate; it
/// always advertises `Off`, but the wire message that negotiates this is
/// part of the handshake contract and must still round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSyncStat {
    Off,
    On,
}

/// The federate's static position in the dependency graph, established at
/// build time and consumed once during `synchronize_with_other_federates`.
#[derive(Debug, Clone, Default)]
pub struct NeighborStructure {
    /// Federates that may send events to this one, with the logical delay
    /// on each connection.
    pub upstream: Vec<(FederateId, Interval)>,
    /// Federates that receive events from this one.
    pub downstream: Vec<FederateId>,
}

impl NeighborStructure {
    pub fn has_upstream(&self) -> bool {
        !self.upstream.is_empty()
    }

    pub fn has_downstream(&self) -> bool {
        !self.downstream.is_empty()
    }
}

/// Programmatic configuration for one federate. There is no file format:
/// this struct is built up by the embedding binary.
#[derive(Debug, Clone)]
pub struct FederateConfig {
    pub federate_id: FederateId,
    pub federation_id: FederationId,
    pub rti_addr: SocketAddr,
    /// When `true`, `rti_addr`'s port is a starting point only: the RTI
    /// client cycles `[STARTING_PORT, STARTING_PORT + PORT_RANGE_LIMIT)`
    /// both on initial connect and on a `FEDERATION_ID_DOES_NOT_MATCH`/
    /// `WRONG_SERVER` rejection. When `false`, `rti_addr`'s port is used
    /// as given and a rejection is fatal.
    pub rti_port_cycling: bool,
    /// `0` => let the OS assign the P2P server port and advertise it back;
    /// any other value binds that exact port (no cycling, since only the
    /// RTI uses the cycling sentinel `1`).
    pub server_port_hint: u16,
    pub neighbors: NeighborStructure,
    pub expected_inbound_peers: usize,
    pub clock_sync: ClockSyncStat,
}

impl FederateConfig {
    pub fn new(federate_id: FederateId, federation_id: FederationId, rti_addr: SocketAddr) -> Self {
        Self {
            federate_id,
            federation_id,
            rti_addr,
            rti_port_cycling: false,
            server_port_hint: 0,
            neighbors: NeighborStructure::default(),
            expected_inbound_peers: 0,
            clock_sync: ClockSyncStat::Off,
        }
    }

    pub fn with_rti_port_cycling(mut self, cycling: bool) -> Self {
        self.rti_port_cycling = cycling;
        self
    }

    pub fn with_server_port_hint(mut self, hint: u16) -> Self {
        self.server_port_hint = hint;
        self
    }

    pub fn with_neighbors(mut self, neighbors: NeighborStructure) -> Self {
        self.expected_inbound_peers = neighbors.upstream.len();
        self.neighbors = neighbors;
        self
    }

    pub fn with_expected_inbound_peers(mut self, n: usize) -> Self {
        self.expected_inbound_peers = n;
        self
    }
}
