//! Startup/Shutdown: ties the wire codec, socket I/O, RTI client, P2P
//! connector, coordination protocol, and inbound dispatcher together into
//! `Federate::synchronize_with_other_federates` and the steady-state send
//! APIs (§2 "Startup/Shutdown", §6.1 public API shape).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, OnceCell};

use federate_core::{physical_time_now, FederateId, Instant, PortId};

use crate::config::FederateConfig;
use crate::coordination::CoordinationState;
use crate::dispatch::{ConnectionRole, Dispatcher};
use crate::error::FederateError;
use crate::p2p;
use crate::rti_client::RtiClient;
use crate::scheduler::{ActionTable, LocalScheduler};
use crate::server::FederateServer;
use crate::wire::Message;

struct Running {
    coordination: Arc<CoordinationState>,
    peer_out: HashMap<FederateId, mpsc::UnboundedSender<Message>>,
}

/// The federate-side coordination engine for one federate process. Not
/// `Clone`: wrap in `Arc` at the call site if multiple tasks need a handle.
pub struct Federate<S, A> {
    config: FederateConfig,
    scheduler: Arc<S>,
    actions: Arc<A>,
    running: OnceCell<Running>,
}

impl<S, A> Federate<S, A>
where
    S: LocalScheduler + 'static,
    A: ActionTable + 'static,
{
    pub fn new(config: FederateConfig, scheduler: S, actions: A) -> Self {
        Self {
            config,
            scheduler: Arc::new(scheduler),
            actions: Arc::new(actions),
            running: OnceCell::new(),
        }
    }

    /// Performs the full bootstrap handshake: connect to the RTI, bind
    /// and advertise the P2P server, exchange neighbor connections, and
    /// negotiate a common start time. Returns the agreed logical start
    /// time (scenario 1, "startup alignment").
    #[tracing::instrument(skip(self), fields(federate_id = %self.config.federate_id))]
    pub async fn synchronize_with_other_federates(&self) -> Result<Instant, FederateError> {
        let mut rti = RtiClient::connect(&self.config).await?;

        let server = FederateServer::bind(self.config.server_port_hint).await?;
        rti.send_address_ad(server.port).await?;
        rti.send_udp_port_status(self.config.clock_sync).await?;

        let my_physical_time = physical_time_now();
        let start_time = rti.get_start_time(my_physical_time).await?;

        let downstream: Vec<FederateId> = self.config.neighbors.downstream.clone();
        let federation_id = self.config.federation_id.clone();
        let my_id = self.config.federate_id;
        let expected_inbound = self.config.expected_inbound_peers;

        let (inbound_peers, outbound_peers) = tokio::try_join!(
            server.accept_peers(expected_inbound, &federation_id),
            p2p::connect_peers(&mut rti, my_id, &federation_id, &downstream),
        )?;

        let has_upstream = self.config.neighbors.has_upstream();
        let has_downstream = self.config.neighbors.has_downstream();

        let rti_handles = rti.into_steady_state();

        let coordination = Arc::new(CoordinationState::new(
            my_id,
            federation_id,
            server.port,
            has_upstream,
            has_downstream,
            start_time,
            physical_time_now(),
            rti_handles.outbound.clone(),
        ));

        let rti_dispatcher = Dispatcher::new(
            ConnectionRole::Rti,
            my_id,
            Arc::clone(&coordination),
            Arc::clone(&self.scheduler),
            Arc::clone(&self.actions),
        );
        tokio::spawn(async move {
            if let Err(e) = rti_dispatcher.run(rti_handles.inbound).await {
                tracing::error!(error = %e, "RTI dispatcher exited");
            }
        });

        for (peer_id, handles) in inbound_peers {
            let dispatcher = Dispatcher::new(
                ConnectionRole::Peer(peer_id),
                my_id,
                Arc::clone(&coordination),
                Arc::clone(&self.scheduler),
                Arc::clone(&self.actions),
            );
            tokio::spawn(async move {
                if let Err(e) = dispatcher.run(handles.inbound).await {
                    tracing::error!(%peer_id, error = %e, "peer dispatcher exited");
                }
            });
        }

        self.running
            .set(Running {
                coordination,
                peer_out: outbound_peers,
            })
            .map_err(|_| {
                FederateError::Other(anyhow::anyhow!(
                    "synchronize_with_other_federates called more than once"
                ))
            })?;

        Ok(start_time)
    }

    fn running(&self) -> Result<&Running, FederateError> {
        self.running.get().ok_or_else(|| {
            FederateError::Other(anyhow::anyhow!(
                "federate not yet synchronized; call synchronize_with_other_federates first"
            ))
        })
    }

    /// `next_event_time(t)`: request permission to advance logical time.
    pub async fn next_event_time(&self, t: Instant) -> Result<Instant, FederateError> {
        self.running()?.coordination.next_event_time(t).await
    }

    /// `logical_time_complete(t)`.
    pub async fn logical_time_complete(&self, t: Instant) -> Result<(), FederateError> {
        self.running()?.coordination.logical_time_complete(t).await
    }

    /// Sends a timed message directly to a downstream peer's P2P socket.
    /// Enforces I3: refuses to emit an event timestamped beyond the last
    /// granted tag while an upstream federate exists, rather than relying
    /// solely on the caller to have waited.
    #[tracing::instrument(skip(self, payload), fields(federate_id = %self.config.federate_id))]
    pub async fn send_timed_message(
        &self,
        dest_federate: FederateId,
        dest_port: PortId,
        timestamp: Instant,
        payload: Vec<u8>,
    ) -> Result<(), FederateError> {
        let running = self.running()?;
        if self.config.neighbors.has_upstream() && timestamp > running.coordination.last_granted_tag() {
            return Err(FederateError::InvalidArgument(format!(
                "refusing to send timestamp {timestamp} beyond last granted tag {}",
                running.coordination.last_granted_tag()
            )));
        }
        let sender = running
            .peer_out
            .get(&dest_federate)
            .ok_or(FederateError::UnknownPeer(dest_federate))?;
        sender
            .send(Message::P2pTimedMessage {
                dest_port,
                dest_federate,
                timestamp,
                payload,
            })
            .map_err(|_| FederateError::SocketClosed(format!("peer {dest_federate}")))
    }

    /// Sends an untimed message directly to a peer's P2P socket.
    pub async fn send_message(
        &self,
        dest_federate: FederateId,
        dest_port: PortId,
        payload: Vec<u8>,
    ) -> Result<(), FederateError> {
        let running = self.running()?;
        let sender = running
            .peer_out
            .get(&dest_federate)
            .ok_or(FederateError::UnknownPeer(dest_federate))?;
        sender
            .send(Message::P2pMessage {
                dest_port,
                dest_federate,
                payload,
            })
            .map_err(|_| FederateError::SocketClosed(format!("peer {dest_federate}")))
    }

    /// `broadcast_stop()`: requests a global stop via the RTI.
    pub async fn request_stop(&self) -> Result<(), FederateError> {
        let running = self.running()?;
        running
            .coordination
            .broadcast_stop(self.scheduler.logical_time())
            .await
    }

    pub async fn stop_requested(&self) -> Result<bool, FederateError> {
        Ok(self.running()?.coordination.stop_requested().await)
    }
}
