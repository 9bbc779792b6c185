//! One task per inbound socket (RTI listener or peer listener),
//! demultiplexing message kinds into `LocalScheduler::schedule` calls.

use std::sync::Arc;

use federate_core::{FederateId, Instant, PortId};
use futures::StreamExt;
use tokio_stream::Stream;

use crate::coordination::CoordinationState;
use crate::error::FederateError;
use crate::scheduler::{ActionTable, LocalScheduler};
use crate::wire::Message;

/// Which peer a given inbound socket belongs to. Only the RTI connection
/// may carry `TIME_ADVANCE_GRANT`/`STOP`; peer connections carry only data
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Rti,
    Peer(FederateId),
}

/// Demultiplexes one inbound byte stream. Owns no I/O itself — the caller
/// hands it an already-framed `Stream<Item = Result<Message, FederateError>>`.
pub struct Dispatcher<S, A> {
    role: ConnectionRole,
    my_id: FederateId,
    coordination: Arc<CoordinationState>,
    scheduler: Arc<S>,
    actions: Arc<A>,
}

impl<S, A> Dispatcher<S, A>
where
    S: LocalScheduler,
    A: ActionTable,
{
    pub fn new(
        role: ConnectionRole,
        my_id: FederateId,
        coordination: Arc<CoordinationState>,
        scheduler: Arc<S>,
        actions: Arc<A>,
    ) -> Self {
        Self {
            role,
            my_id,
            coordination,
            scheduler,
            actions,
        }
    }

    #[tracing::instrument(skip(self, stream), fields(role = ?self.role))]
    pub async fn run<St>(mut self, mut stream: St) -> Result<(), FederateError>
    where
        St: Stream<Item = Result<Message, FederateError>> + Unpin,
    {
        while let Some(frame) = stream.next().await {
            let msg = frame?;
            self.handle(msg).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, msg: Message) -> Result<(), FederateError> {
        match msg {
            Message::Message {
                dest_port,
                dest_federate,
                payload,
            }
            | Message::P2pMessage {
                dest_port,
                dest_federate,
                payload,
            } => {
                self.deliver_untimed(dest_federate, dest_port, payload);
                Ok(())
            }
            Message::TimedMessage {
                dest_port,
                dest_federate,
                timestamp,
                payload,
            }
            | Message::P2pTimedMessage {
                dest_port,
                dest_federate,
                timestamp,
                payload,
            } => {
                self.deliver_timed(dest_federate, dest_port, timestamp, payload);
                Ok(())
            }
            Message::TimeAdvanceGrant { instant } => {
                if self.role != ConnectionRole::Rti {
                    return Err(FederateError::ProtocolViolation(
                        "TIME_ADVANCE_GRANT received on a non-RTI connection".to_string(),
                    ));
                }
                self.coordination.handle_tag_advance_grant(instant).await?;
                self.scheduler.notify_event();
                Ok(())
            }
            Message::Stop { instant } => {
                if self.role != ConnectionRole::Rti {
                    return Err(FederateError::ProtocolViolation(
                        "STOP received on a non-RTI connection".to_string(),
                    ));
                }
                self.coordination.handle_stop_request(instant).await;
                self.scheduler.notify_event();
                Ok(())
            }
            other => Err(FederateError::ProtocolViolation(format!(
                "unexpected message kind after handshake: {:?}",
                other.kind()
            ))),
        }
    }

    fn deliver_untimed(
        &self,
        dest_federate: FederateId,
        dest_port: PortId,
        payload: Vec<u8>,
    ) {
        if dest_federate != self.my_id {
            tracing::warn!(?dest_federate, my_id = %self.my_id, "dropping message addressed to another federate");
            return;
        }
        let Some(trigger) = self.actions.action_for_port(dest_port) else {
            tracing::warn!(?dest_port, "dropping message for unmapped port");
            return;
        };
        self.scheduler.schedule(trigger, 0, payload);
        self.scheduler.notify_event();
    }

    fn deliver_timed(
        &self,
        dest_federate: FederateId,
        dest_port: PortId,
        timestamp: Instant,
        payload: Vec<u8>,
    ) {
        if dest_federate != self.my_id {
            tracing::warn!(?dest_federate, my_id = %self.my_id, "dropping message addressed to another federate");
            return;
        }
        let Some(trigger) = self.actions.action_for_port(dest_port) else {
            tracing::warn!(?dest_port, "dropping message for unmapped port");
            return;
        };
        let delay = timestamp - self.scheduler.logical_time();
        self.scheduler.schedule(trigger, delay, payload);
        self.scheduler.notify_event();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex as StdMutex;

    use federate_core::{FederationId, Interval, TriggerHandle};
    use tokio_stream::iter;

    #[derive(Default)]
    struct FakeScheduler {
        scheduled: StdMutex<Vec<(TriggerHandle, Interval, Vec<u8>)>>,
        logical_time: AtomicI64,
    }

    impl LocalScheduler for FakeScheduler {
        fn schedule(&self, trigger: TriggerHandle, delay: Interval, payload: Vec<u8>) -> TriggerHandle {
            self.scheduled.lock().unwrap().push((trigger, delay, payload));
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

    struct FakeActions;
    impl ActionTable for FakeActions {
        fn action_for_port(&self, port: PortId) -> Option<TriggerHandle> {
            if port == PortId(0) {
                Some(TriggerHandle(1))
            } else {
                None
            }
        }
    }

    fn coordination() -> Arc<CoordinationState> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(CoordinationState::new(
            FederateId(0),
            FederationId::new("fed").unwrap(),
            0,
            false,
            false,
            0,
            0,
            tx,
        ))
    }

    #[tokio::test]
    async fn delivers_timed_message_for_a_mapped_port() {
        let scheduler = Arc::new(FakeScheduler::default());
        let dispatcher = Dispatcher::new(
            ConnectionRole::Peer(FederateId(1)),
            FederateId(0),
            coordination(),
            Arc::clone(&scheduler),
            Arc::new(FakeActions),
        );
        let stream = iter(vec![Ok(Message::P2pTimedMessage {
            dest_port: PortId(0),
            dest_federate: FederateId(0),
            timestamp: 500,
            payload: b"hi".to_vec(),
        })]);
        dispatcher.run(stream).await.unwrap();
        let scheduled = scheduler.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, TriggerHandle(1));
        assert_eq!(scheduled[0].2, b"hi".to_vec());
    }

    #[tokio::test]
    async fn drops_message_for_an_unmapped_port() {
        let scheduler = Arc::new(FakeScheduler::default());
        let dispatcher = Dispatcher::new(
            ConnectionRole::Peer(FederateId(1)),
            FederateId(0),
            coordination(),
            Arc::clone(&scheduler),
            Arc::new(FakeActions),
        );
        let stream = iter(vec![Ok(Message::Message {
            dest_port: PortId(9),
            dest_federate: FederateId(0),
            payload: vec![],
        })]);
        dispatcher.run(stream).await.unwrap();
        assert!(scheduler.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tag_on_a_peer_connection_is_a_protocol_violation() {
        let scheduler = Arc::new(FakeScheduler::default());
        let dispatcher = Dispatcher::new(
            ConnectionRole::Peer(FederateId(1)),
            FederateId(0),
            coordination(),
            scheduler,
            Arc::new(FakeActions),
        );
        let stream = iter(vec![Ok(Message::TimeAdvanceGrant { instant: 10 })]);
        let err = dispatcher.run(stream).await.unwrap_err();
        assert!(matches!(err, FederateError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn tag_on_the_rti_connection_updates_coordination() {
        let scheduler = Arc::new(FakeScheduler::default());
        let coordination = coordination();
        let dispatcher = Dispatcher::new(
            ConnectionRole::Rti,
            FederateId(0),
            Arc::clone(&coordination),
            Arc::clone(&scheduler),
            Arc::new(FakeActions),
        );
        let stream = iter(vec![Ok(Message::TimeAdvanceGrant { instant: 10 })]);
        dispatcher.run(stream).await.unwrap();
        assert_eq!(coordination.last_granted_tag(), 10);
    }
}
