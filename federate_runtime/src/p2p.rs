//! P2P Connector: resolves peer addresses via the RTI and dials outbound
//! P2P sockets, per §4.5.

use std::collections::HashMap;

use federate_core::{FederateId, FederationId};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::config::defaults;
use crate::error::FederateError;
use crate::framed_io;
use crate::net;
use crate::rti_client::RtiClient;
use crate::wire::{Message, RejectReason, WireCodec};

/// Dials every federate in `peer_ids`, resolving each address through the
/// still-synchronous `rti` connection. Bounded by `CONNECT_NUM_RETRIES`
/// per peer. The returned senders are write-only (§3 `Connection`:
/// outbound peer sockets have no reader).
#[tracing::instrument(skip(rti, peer_ids))]
pub async fn connect_peers(
    rti: &mut RtiClient,
    my_id: FederateId,
    federation_id: &FederationId,
    peer_ids: &[FederateId],
) -> Result<HashMap<FederateId, mpsc::UnboundedSender<Message>>, FederateError> {
    let mut peers = HashMap::with_capacity(peer_ids.len());
    for &peer_id in peer_ids {
        let addr = rti.query_address(peer_id).await?;
        let sender = connect_one(my_id, federation_id, peer_id, addr).await?;
        peers.insert(peer_id, sender);
    }
    Ok(peers)
}

async fn connect_one(
    my_id: FederateId,
    federation_id: &FederationId,
    peer_id: FederateId,
    addr: std::net::SocketAddr,
) -> Result<mpsc::UnboundedSender<Message>, FederateError> {
    let mut last_err = None;
    for _ in 0..defaults::CONNECT_NUM_RETRIES {
        let stream = match net::connect_with_retry(addr).await {
            Ok(s) => s,
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        };
        let mut framed = Framed::new(stream, WireCodec::new(defaults::MAX_PAYLOAD_LEN));
        framed
            .send(Message::P2pSendingFedId {
                sender_federate: my_id,
                federation_id: federation_id.as_str().to_string(),
            })
            .await?;
        match framed.next().await {
            Some(Ok(Message::Ack)) => {
                return Ok(framed_io::spawn_writer_only(framed, format!("peer/{peer_id}")));
            }
            Some(Ok(Message::Reject { reason })) => {
                tracing::warn!(%peer_id, ?reason, "peer rejected P2P handshake");
                last_err = Some(FederateError::Rejected(reason));
                if !matches!(
                    reason,
                    RejectReason::FederationIdDoesNotMatch | RejectReason::WrongServer
                ) {
                    break;
                }
            }
            Some(Ok(other)) => {
                last_err = Some(FederateError::ProtocolViolation(format!(
                    "expected ACK/REJECT after P2P_SENDING_FED_ID, got {:?}",
                    other.kind()
                )));
                break;
            }
            Some(Err(e)) => {
                last_err = Some(e);
            }
            None => {
                last_err = Some(FederateError::SocketClosed(format!("peer {peer_id}")));
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        FederateError::Timeout(format!("could not connect to peer {peer_id}"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use federate_core::FederationId;
    use tokio::net::TcpListener;

    #[test_log::test(tokio::test)]
    async fn connect_one_hands_back_a_write_only_sender() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let federation_id = FederationId::new("fed1").unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, WireCodec::new(defaults::MAX_PAYLOAD_LEN));
            match framed.next().await.unwrap().unwrap() {
                Message::P2pSendingFedId { sender_federate, .. } => {
                    assert_eq!(sender_federate, FederateId(1))
                }
                other => panic!("unexpected {other:?}"),
            }
            framed.send(Message::Ack).await.unwrap();
            // Send a message the write-only reader should just log and ignore.
            framed
                .send(Message::P2pMessage {
                    dest_port: federate_core::PortId(0),
                    dest_federate: FederateId(1),
                    payload: vec![],
                })
                .await
                .unwrap();
        });

        let sender = connect_one(FederateId(1), &federation_id, FederateId(2), addr)
            .await
            .unwrap();
        sender
            .send(Message::P2pMessage {
                dest_port: federate_core::PortId(0),
                dest_federate: FederateId(2),
                payload: b"hi".to_vec(),
            })
            .unwrap();
        server.await.unwrap();
    }
}
