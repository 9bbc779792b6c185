//! Splits a framed socket into an outbound writer task fed by an unbounded
//! channel and an inbound stream of decoded messages, so both the RTI
//! connection and P2P peer connections can share the same plumbing.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::Framed;

use crate::error::FederateError;
use crate::wire::{Message, WireCodec};

pub struct FramedHandles {
    pub outbound: mpsc::UnboundedSender<Message>,
    pub inbound: UnboundedReceiverStream<Result<Message, FederateError>>,
}

/// Spawns the writer and reader pump tasks for one framed connection.
/// Per I6, every write to this socket now flows through the single
/// `outbound` sender, so the writer task is the sole writer.
pub fn spawn(framed: Framed<TcpStream, WireCodec>, label: String) -> FramedHandles {
    let (sink, mut stream) = framed.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    {
        let label = label.clone();
        tokio::spawn(async move {
            let mut sink = sink;
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!(%label, error = %e, "write failed, closing writer task");
                    break;
                }
            }
        });
    }

    let (in_tx, in_rx) = mpsc::unbounded_channel::<Result<Message, FederateError>>();
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            if in_tx.send(item).is_err() {
                break;
            }
        }
        tracing::debug!(%label, "reader task exiting");
    });

    FramedHandles {
        outbound: out_tx,
        inbound: UnboundedReceiverStream::new(in_rx),
    }
}

/// Spawns a writer task only. Per the data model, an outbound peer
/// connection is write-only: nothing is expected to arrive on it, so the
/// reader side just drains the socket to detect closure and logs anything
/// unexpected instead of handing it to a dispatcher.
pub fn spawn_writer_only(framed: Framed<TcpStream, WireCodec>, label: String) -> mpsc::UnboundedSender<Message> {
    let (sink, mut stream) = framed.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

    {
        let label = label.clone();
        tokio::spawn(async move {
            let mut sink = sink;
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!(%label, error = %e, "write failed, closing writer task");
                    break;
                }
            }
        });
    }

    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(msg) => tracing::warn!(%label, kind = ?msg.kind(), "unexpected message on write-only connection"),
                Err(e) => {
                    tracing::warn!(%label, error = %e, "write-only connection closed");
                    break;
                }
            }
        }
    });

    out_tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;
    use tokio::net::TcpListener;

    #[test_log::test(tokio::test)]
    async fn spawn_forwards_writes_and_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Framed::new(stream, WireCodec::new(64 * 1024))
        });
        let client_stream = TcpStream::connect(addr).await.unwrap();
        let client_framed = Framed::new(client_stream, WireCodec::new(64 * 1024));
        let server_framed = server.await.unwrap();

        let handles = spawn(client_framed, "test".to_string());
        let mut server_handles = spawn(server_framed, "test-server".to_string());

        handles.outbound.send(Message::Ack).unwrap();
        let got = server_handles.inbound.next().await.unwrap().unwrap();
        assert_eq!(got, Message::Ack);

        server_handles.outbound.send(Message::Ack).unwrap();
        let mut handles = handles;
        let got = handles.inbound.next().await.unwrap().unwrap();
        assert_eq!(got, Message::Ack);
    }
}
