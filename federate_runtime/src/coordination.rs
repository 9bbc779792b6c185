//! The `CoordinationState` state machine: NET/TAG handshake, LOGICAL_TIME_COMPLETE,
//! and the global STOP protocol.
//!
//! Process-wide mutable state is bundled into a single value owned by
//! the runtime and shared via an `Arc`. The condition-variable wait for
//! a TAG is realized with `tokio::sync::watch`, raced against a
//! separate "earliest known local event" channel so a physical action
//! can preempt the wait without consuming the pending TAG.

use tokio::sync::{mpsc, watch, Mutex};

use federate_core::{FederateId, FederationId, Instant, NEVER};

use crate::error::FederateError;
use crate::wire::Message;

struct Inner {
    tag_pending: bool,
    has_upstream: bool,
    has_downstream: bool,
    stop_requested: bool,
    start_time: Instant,
    physical_start_time: Instant,
}

/// Shared coordination state for one federate process.
pub struct CoordinationState {
    pub my_id: FederateId,
    pub federation_id: FederationId,
    pub server_port: u16,

    inner: Mutex<Inner>,
    last_granted_tag: watch::Sender<Instant>,
    /// Updated by the embedding scheduler (via [`CoordinationState::notify_local_event`])
    /// whenever a new local event enters the queue, e.g. a physical action.
    /// Carries the earliest known pending local event time.
    earliest_local_event: watch::Sender<Instant>,
    rti_out: mpsc::UnboundedSender<Message>,
}

impl CoordinationState {
    pub fn new(
        my_id: FederateId,
        federation_id: FederationId,
        server_port: u16,
        has_upstream: bool,
        has_downstream: bool,
        start_time: Instant,
        physical_start_time: Instant,
        rti_out: mpsc::UnboundedSender<Message>,
    ) -> Self {
        Self {
            my_id,
            federation_id,
            server_port,
            inner: Mutex::new(Inner {
                tag_pending: false,
                has_upstream,
                has_downstream,
                stop_requested: false,
                start_time,
                physical_start_time,
            }),
            last_granted_tag: watch::Sender::new(NEVER),
            earliest_local_event: watch::Sender::new(federate_core::FOREVER),
            rti_out,
        }
    }

    pub async fn start_time(&self) -> Instant {
        self.inner.lock().await.start_time
    }

    pub fn last_granted_tag(&self) -> Instant {
        *self.last_granted_tag.borrow()
    }

    pub async fn stop_requested(&self) -> bool {
        self.inner.lock().await.stop_requested
    }

    /// Called by the embedding scheduler whenever the local event queue's
    /// earliest pending time changes (e.g. a physical action fired).
    pub fn notify_local_event(&self, earliest: Instant) {
        self.earliest_local_event.send_replace(earliest);
    }

    /// `next_event_time(t)`: request permission to advance logical time to
    /// `t`. Returns the time it is actually safe to advance to, which may
    /// be less than `t` (a TAG capped it, or a physical action preempted
    /// the wait).
    #[tracing::instrument(skip(self), fields(federate_id = %self.my_id))]
    pub async fn next_event_time(&self, t: Instant) -> Result<Instant, FederateError> {
        {
            let inner = self.inner.lock().await;
            if !inner.has_upstream && !inner.has_downstream {
                return Ok(t);
            }
            if self.last_granted_tag() >= t {
                return Ok(t);
            }
        }

        self.rti_out
            .send(Message::NextEventTime { instant: t })
            .map_err(|_| FederateError::SocketClosed("RTI".to_string()))?;

        let has_upstream = self.inner.lock().await.has_upstream;
        if !has_upstream {
            return Ok(t);
        }

        {
            let mut inner = self.inner.lock().await;
            inner.tag_pending = true;
        }

        let mut tag_rx = self.last_granted_tag.subscribe();
        let mut local_rx = self.earliest_local_event.subscribe();
        // Mark both as seen so we only wake on a *subsequent* change.
        tag_rx.borrow_and_update();
        local_rx.borrow_and_update();

        loop {
            tokio::select! {
                res = tag_rx.changed() => {
                    res.map_err(|_| FederateError::SocketClosed("RTI".to_string()))?;
                    let g = *tag_rx.borrow_and_update();
                    return Ok(t.min(g));
                }
                res = local_rx.changed() => {
                    res.map_err(|_| FederateError::Other(anyhow::anyhow!("local event channel closed")))?;
                    let earliest = *local_rx.borrow_and_update();
                    if earliest < t {
                        // tag_pending stays true: a future call may still
                        // observe the in-flight TAG.
                        return Ok(earliest);
                    }
                }
            }
        }
    }

    /// `logical_time_complete(t)`: notify the RTI that all work at or
    /// before `t` has finished locally. A no-op when no downstream federate
    /// depends on this one (I4).
    #[tracing::instrument(skip(self), fields(federate_id = %self.my_id))]
    pub async fn logical_time_complete(&self, t: Instant) -> Result<(), FederateError> {
        if !self.inner.lock().await.has_downstream {
            return Ok(());
        }
        self.rti_out
            .send(Message::LogicalTimeComplete { instant: t })
            .map_err(|_| FederateError::SocketClosed("RTI".to_string()))
    }

    /// `broadcast_stop()`: ask the RTI to relay a global stop.
    #[tracing::instrument(skip(self), fields(federate_id = %self.my_id))]
    pub async fn broadcast_stop(&self, current_logical_time: Instant) -> Result<(), FederateError> {
        {
            let mut inner = self.inner.lock().await;
            inner.stop_requested = true;
        }
        self.rti_out
            .send(Message::Stop {
                instant: current_logical_time,
            })
            .map_err(|_| FederateError::SocketClosed("RTI".to_string()))
    }

    /// Applied by the dispatcher on receipt of `TIME_ADVANCE_GRANT`. A
    /// TAG strictly less than the last granted tag is a protocol
    /// violation (I2, P3): TAG monotonicity is an RTI guarantee the
    /// federate must enforce on its end too.
    pub async fn handle_tag_advance_grant(&self, g: Instant) -> Result<(), FederateError> {
        let last = self.last_granted_tag();
        if g < last {
            return Err(FederateError::NonMonotoneTag {
                received: g,
                last_granted: last,
            });
        }
        self.last_granted_tag.send_replace(g);
        let mut inner = self.inner.lock().await;
        inner.tag_pending = false;
        Ok(())
    }

    /// Applied by the dispatcher on receipt of `STOP` from the RTI. The
    /// stop time is observed but this engine stops immediately rather
    /// than delaying to the advertised instant (see DESIGN.md).
    pub async fn handle_stop_request(&self, _t: Instant) {
        let mut inner = self.inner.lock().await;
        inner.stop_requested = true;
    }
}
