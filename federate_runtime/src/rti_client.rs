//! Connects to the RTI, negotiates federation identity, and carries the
//! startup-phase request/response operations (`ADDRESS_QUERY`,
//! `TIMESTAMP`).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Buf;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use federate_core::{FederateId, Instant};

use crate::config::{defaults, FederateConfig};
use crate::error::FederateError;
use crate::framed_io::{self, FramedHandles};
use crate::net;
use crate::wire::{Message, RejectReason, WireCodec};

/// An established, authenticated connection to the RTI, still in its
/// synchronous startup phase: no dispatcher is reading the socket yet, so
/// `query_address`/`get_start_time` can issue a request and read its reply
/// directly off the same framed stream.
pub struct RtiClient {
    framed: Framed<TcpStream, WireCodec>,
    federate_id: FederateId,
}

/// Handles returned once the startup phase ends and the connection is
/// handed to the steady-state coordination engine.
pub type RtiHandles = FramedHandles;

impl RtiClient {
    /// Connects and performs the `FED_ID` handshake, cycling ports when
    /// the RTI address carries no explicit port override and retrying up
    /// to `CONNECT_NUM_RETRIES` times on a federation-id mismatch.
    #[tracing::instrument(skip(config), fields(federate_id = %config.federate_id))]
    pub async fn connect(config: &FederateConfig) -> Result<Self, FederateError> {
        let host = config.rti_addr.ip();
        for attempt in 0..defaults::CONNECT_NUM_RETRIES {
            let port = if config.rti_port_cycling {
                defaults::STARTING_PORT + (attempt as u16 % defaults::PORT_RANGE_LIMIT)
            } else {
                config.rti_addr.port()
            };
            let addr = SocketAddr::new(host, port);
            let stream = net::connect_with_retry(addr).await?;
            let mut framed = Framed::new(stream, WireCodec::new(defaults::MAX_PAYLOAD_LEN));

            framed
                .send(Message::FedId {
                    federate_id: config.federate_id,
                    federation_id: config.federation_id.as_str().to_string(),
                })
                .await?;

            match framed.next().await {
                Some(Ok(Message::Ack)) => {
                    tracing::info!(%addr, "RTI accepted federation id");
                    return Ok(Self {
                        framed,
                        federate_id: config.federate_id,
                    });
                }
                Some(Ok(Message::Reject { reason })) => {
                    tracing::warn!(?reason, "RTI rejected handshake");
                    match reason {
                        RejectReason::FederationIdDoesNotMatch | RejectReason::WrongServer
                            if config.rti_port_cycling =>
                        {
                            continue;
                        }
                        _ => return Err(FederateError::Rejected(reason)),
                    }
                }
                Some(Ok(other)) => {
                    return Err(FederateError::ProtocolViolation(format!(
                        "expected ACK/REJECT after FED_ID, got {:?}",
                        other.kind()
                    )))
                }
                Some(Err(e)) => return Err(e),
                None => return Err(FederateError::SocketClosed("RTI".to_string())),
            }
        }
        Err(FederateError::Timeout(
            "exhausted RTI handshake retries".to_string(),
        ))
    }

    /// `ADDRESS_AD`: advertise this federate's P2P server port. Must be
    /// sent exactly once, after the P2P server is listening.
    pub async fn send_address_ad(&mut self, server_port: u16) -> Result<(), FederateError> {
        self.framed
            .send(Message::AddressAd { server_port })
            .await?;
        Ok(())
    }

    pub async fn send_udp_port_status(&mut self, status: crate::config::ClockSyncStat) -> Result<(), FederateError> {
        self.framed.send(Message::UdpPort { status }).await?;
        Ok(())
    }

    /// `query_address(peer_id) -> (ip, port)`. Retries on `port == -1`
    /// ("not yet advertised") up to `CONNECT_NUM_RETRIES` times.
    ///
    /// The reply carries no kind byte: it is a bare `i32` port followed by
    /// a 4-byte IP, 8 bytes total. Routing it through the kind-byte-
    /// prefixed [`WireCodec`] would misparse a real RTI's response, so
    /// this reads the 8 bytes straight off the stream instead.
    #[tracing::instrument(skip(self))]
    pub async fn query_address(&mut self, peer_id: FederateId) -> Result<SocketAddr, FederateError> {
        for _ in 0..defaults::CONNECT_NUM_RETRIES {
            self.framed
                .send(Message::AddressQuery {
                    federate_id: peer_id,
                })
                .await?;
            let mut raw = [0u8; 8];
            read_raw_reply(&mut self.framed, &mut raw).await?;
            let port = i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            if port < 0 {
                tokio::time::sleep(defaults::ADDRESS_QUERY_RETRY_INTERVAL).await;
                continue;
            }
            let addr = SocketAddr::new(
                IpAddr::V4(Ipv4Addr::new(raw[4], raw[5], raw[6], raw[7])),
                port as u16,
            );
            return Ok(addr);
        }
        Err(FederateError::Timeout(format!(
            "address of federate {peer_id} never advertised"
        )))
    }

    /// `get_start_time(my_physical_time) -> Instant`. Sends `TIMESTAMP`
    /// carrying this federate's physical clock reading and awaits the
    /// RTI's chosen start time in reply.
    #[tracing::instrument(skip(self))]
    pub async fn get_start_time(&mut self, my_physical_time: Instant) -> Result<Instant, FederateError> {
        self.framed
            .send(Message::Timestamp {
                instant: my_physical_time,
            })
            .await?;
        match self.framed.next().await {
            Some(Ok(Message::Timestamp { instant })) => Ok(instant),
            Some(Ok(other)) => Err(FederateError::ProtocolViolation(format!(
                "expected TIMESTAMP reply, got {:?}",
                other.kind()
            ))),
            Some(Err(e)) => Err(e),
            None => Err(FederateError::SocketClosed("RTI".to_string())),
        }
    }

    /// Ends the startup phase: splits the connection into a writer task
    /// fed by an unbounded channel and an inbound stream ready for a
    /// `Dispatcher`.
    pub fn into_steady_state(self) -> RtiHandles {
        framed_io::spawn(self.framed, format!("rti/{}", self.federate_id))
    }
}

/// Fills `out` with bytes that have no kind byte, draining whatever the
/// codec's `Decoder` already pulled off the socket before falling back to
/// reading the rest directly from the stream. Without the drain step, a
/// reply that arrived in the same TCP segment as a previous frame would
/// be silently dropped on the floor.
async fn read_raw_reply(
    framed: &mut Framed<TcpStream, WireCodec>,
    out: &mut [u8],
) -> Result<(), FederateError> {
    let buffered = framed.read_buffer_mut();
    let available = buffered.len().min(out.len());
    out[..available].copy_from_slice(&buffered[..available]);
    buffered.advance(available);

    if available < out.len() {
        framed.get_mut().read_exact(&mut out[available..]).await?;
    }
    Ok(())
}
