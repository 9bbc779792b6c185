//! Federate Server: accepts inbound P2P connections, performs the
//! `P2P_SENDING_FED_ID` handshake, and hands each accepted peer off to the
//! steady-state connection plumbing (§4.3).

use std::collections::HashMap;

use federate_core::{FederateId, FederationId};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::config::defaults;
use crate::error::FederateError;
use crate::framed_io::{self, FramedHandles};
use crate::net::{self, PortHint};
use crate::wire::{Message, RejectReason, WireCodec};

pub struct FederateServer {
    listener: TcpListener,
    pub port: u16,
}

impl FederateServer {
    #[tracing::instrument]
    pub async fn bind(port_hint: u16) -> Result<Self, FederateError> {
        let (listener, port) = net::bind_server(PortHint::from(port_hint)).await?;
        tracing::info!(port, "P2P server listening");
        Ok(Self { listener, port })
    }

    /// Accepts exactly `expected_inbound_peers` connections, handshaking
    /// each with `P2P_SENDING_FED_ID`/`ACK`/`REJECT`. Returns one
    /// [`FramedHandles`] per accepted peer, keyed by the federate id the
    /// peer announced.
    #[tracing::instrument(skip(self))]
    pub async fn accept_peers(
        &self,
        expected_inbound_peers: usize,
        federation_id: &FederationId,
    ) -> Result<HashMap<FederateId, FramedHandles>, FederateError> {
        let mut peers = HashMap::with_capacity(expected_inbound_peers);
        while peers.len() < expected_inbound_peers {
            let (stream, addr) = net::accept_one(&self.listener).await?;
            match self.handshake_one(stream, federation_id).await {
                Ok((sender_fed, framed)) => {
                    tracing::info!(%addr, %sender_fed, "peer connected");
                    let handles = framed_io::spawn(framed, format!("peer/{sender_fed}"));
                    peers.insert(sender_fed, handles);
                }
                Err(e) => {
                    tracing::warn!(%addr, error = %e, "rejected inbound peer connection");
                }
            }
        }
        Ok(peers)
    }

    async fn handshake_one(
        &self,
        stream: TcpStream,
        federation_id: &FederationId,
    ) -> Result<(FederateId, Framed<TcpStream, WireCodec>), FederateError> {
        let mut framed = Framed::new(stream, WireCodec::new(defaults::MAX_PAYLOAD_LEN));
        match framed.next().await {
            Some(Ok(Message::P2pSendingFedId {
                sender_federate,
                federation_id: got,
            })) => {
                if got != federation_id.as_str() {
                    framed
                        .send(Message::Reject {
                            reason: RejectReason::FederationIdDoesNotMatch,
                        })
                        .await
                        .ok();
                    return Err(FederateError::Rejected(RejectReason::FederationIdDoesNotMatch));
                }
                framed.send(Message::Ack).await?;
                Ok((sender_federate, framed))
            }
            Some(Ok(other)) => {
                framed
                    .send(Message::Reject {
                        reason: RejectReason::WrongServer,
                    })
                    .await
                    .ok();
                Err(FederateError::ProtocolViolation(format!(
                    "expected P2P_SENDING_FED_ID, got {:?}",
                    other.kind()
                )))
            }
            Some(Err(e)) => Err(e),
            None => Err(FederateError::SocketClosed("peer".to_string())),
        }
    }
}
