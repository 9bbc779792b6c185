//! The narrow capability boundary this engine is injected with, instead of
//! a back-pointer cycle between the coordination engine and the local
//! reactor scheduler (see the design note on cyclic dependencies).

use federate_core::{Instant, Interval, PortId, TriggerHandle};

/// The local reactor event loop and reaction scheduler. Out of scope to
/// implement here; the coordination engine only calls through this trait.
pub trait LocalScheduler: Send + Sync {
    /// Injects a network-originated event. `delay` is relative to the
    /// scheduler's current logical time; `payload` ownership transfers to
    /// the scheduler, which is responsible for freeing it once the event
    /// completes.
    fn schedule(&self, trigger: TriggerHandle, delay: Interval, payload: Vec<u8>) -> TriggerHandle;

    fn logical_time(&self) -> Instant;

    fn physical_time(&self) -> Instant;

    /// Blocks the calling task/thread until physical time reaches `t`, or
    /// until woken by a new local event.
    fn wait_until(&self, t: Instant);

    /// Wakes any party blocked in `wait_until` or in the coordination
    /// engine's NET/TAG wait, e.g. because a physical action fired.
    fn notify_event(&self);
}

/// Maps a destination port to the local trigger the generated user code
/// wired it to. Out of scope to implement here.
pub trait ActionTable: Send + Sync {
    fn action_for_port(&self, port_id: PortId) -> Option<TriggerHandle>;
}
