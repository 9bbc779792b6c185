//! End-to-end test of one federate pair synchronizing against a
//! hand-scripted mock RTI and then exchanging a direct P2P message,
//! covering the startup-alignment and simple-delivery scenarios without
//! an actual RTI implementation (out of scope for this crate).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::Framed;

use federate_core::{FederateId, FederationId, Instant, Interval, PortId, TriggerHandle};
use federate_runtime::config::ClockSyncStat;
use federate_runtime::wire::{Message, WireCodec};
use federate_runtime::{ActionTable, Federate, FederateConfig, LocalScheduler, NeighborStructure};

const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

struct RecordingScheduler {
    received: Arc<StdMutex<Vec<Vec<u8>>>>,
    logical_time: AtomicI64,
}

impl RecordingScheduler {
    fn new(received: Arc<StdMutex<Vec<Vec<u8>>>>) -> Self {
        Self {
            received,
            logical_time: AtomicI64::new(0),
        }
    }
}

impl LocalScheduler for RecordingScheduler {
    fn schedule(&self, trigger: TriggerHandle, _delay: Interval, payload: Vec<u8>) -> TriggerHandle {
        self.received.lock().unwrap().push(payload);
        trigger
    }
    fn logical_time(&self) -> Instant {
        self.logical_time.load(Ordering::SeqCst)
    }
    fn physical_time(&self) -> Instant {
        0
    }
    fn wait_until(&self, _t: Instant) {}
    fn notify_event(&self) {}
}

struct SinglePortActions;
impl ActionTable for SinglePortActions {
    fn action_for_port(&self, port: PortId) -> Option<TriggerHandle> {
        (port == PortId(0)).then_some(TriggerHandle(1))
    }
}

/// Serves exactly the sequence one federate client issues during
/// `synchronize_with_other_federates`: FED_ID, ADDRESS_AD, UDP_PORT,
/// TIMESTAMP, then any number of ADDRESS_QUERY requests.
async fn serve_one_federate(
    stream: TcpStream,
    registry: Arc<AsyncMutex<HashMap<FederateId, u16>>>,
) {
    let mut framed = Framed::new(stream, WireCodec::new(MAX_PAYLOAD));

    let my_id = match framed.next().await.unwrap().unwrap() {
        Message::FedId { federate_id, .. } => federate_id,
        other => panic!("expected FED_ID, got {other:?}"),
    };
    framed.send(Message::Ack).await.unwrap();

    match framed.next().await.unwrap().unwrap() {
        Message::AddressAd { server_port } => {
            registry.lock().await.insert(my_id, server_port);
        }
        other => panic!("expected ADDRESS_AD, got {other:?}"),
    }

    match framed.next().await.unwrap().unwrap() {
        Message::UdpPort { .. } => {}
        other => panic!("expected UDP_PORT, got {other:?}"),
    }

    match framed.next().await.unwrap().unwrap() {
        Message::Timestamp { .. } => {
            framed.send(Message::Timestamp { instant: 0 }).await.unwrap();
        }
        other => panic!("expected TIMESTAMP, got {other:?}"),
    }

    loop {
        match framed.next().await {
            Some(Ok(Message::AddressQuery { federate_id })) => {
                let port = registry.lock().await.get(&federate_id).copied();
                // No kind byte on this reply: raw i32 port + 4-byte IP,
                // written straight to the socket underlying `framed`.
                let mut reply = [0u8; 8];
                match port {
                    Some(p) => {
                        reply[..4].copy_from_slice(&(p as i32).to_be_bytes());
                        reply[4..].copy_from_slice(&[127, 0, 0, 1]);
                    }
                    None => reply[..4].copy_from_slice(&(-1i32).to_be_bytes()),
                }
                framed.get_mut().write_all(&reply).await.unwrap();
            }
            Some(Ok(other)) => panic!("unexpected message after startup: {other:?}"),
            Some(Err(e)) => panic!("mock RTI read error: {e}"),
            None => return,
        }
    }
}

#[test_log::test(tokio::test)]
async fn federate_pair_synchronizes_and_exchanges_a_direct_message() {
    let rti_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rti_addr: SocketAddr = rti_listener.local_addr().unwrap();
    let registry: Arc<AsyncMutex<HashMap<FederateId, u16>>> = Arc::new(AsyncMutex::new(HashMap::new()));

    tokio::spawn({
        let registry = Arc::clone(&registry);
        async move {
            loop {
                let (stream, _) = rti_listener.accept().await.unwrap();
                tokio::spawn(serve_one_federate(stream, Arc::clone(&registry)));
            }
        }
    });

    let federation_id = FederationId::new("integration-fed").unwrap();

    let config_a = FederateConfig::new(FederateId(0), federation_id.clone(), rti_addr)
        .with_neighbors(NeighborStructure {
            upstream: vec![],
            downstream: vec![FederateId(1)],
        });
    let config_b = FederateConfig::new(FederateId(1), federation_id, rti_addr)
        .with_neighbors(NeighborStructure {
            upstream: vec![(FederateId(0), 0)],
            downstream: vec![],
        });
    assert_eq!(config_a.clock_sync, ClockSyncStat::Off);

    let received_a: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
    let received_b: Arc<StdMutex<Vec<Vec<u8>>>> = Arc::new(StdMutex::new(Vec::new()));
    let federate_a = Federate::new(
        config_a,
        RecordingScheduler::new(Arc::clone(&received_a)),
        SinglePortActions,
    );
    let federate_b = Federate::new(
        config_b,
        RecordingScheduler::new(Arc::clone(&received_b)),
        SinglePortActions,
    );

    let (start_a, start_b) = tokio::try_join!(
        federate_a.synchronize_with_other_federates(),
        federate_b.synchronize_with_other_federates(),
    )
    .unwrap();
    assert_eq!(start_a, 0);
    assert_eq!(start_b, 0);

    federate_a
        .send_message(FederateId(1), PortId(0), b"hello from a".to_vec())
        .await
        .unwrap();

    for _ in 0..200 {
        if !received_b.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(received_b.lock().unwrap().as_slice(), &[b"hello from a".to_vec()]);
    assert!(received_a.lock().unwrap().is_empty());
}
