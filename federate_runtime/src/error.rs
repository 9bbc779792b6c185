//! The error taxonomy driving this crate's `Result` types.

use federate_core::{FederateId, Instant};

use crate::wire::RejectReason;

/// Errors surfaced by the coordination engine.
///
/// Fatal variants (`ProtocolViolation`, handshake rejections not eligible
/// for retry, `Timeout`) are meant to propagate all the way out of
/// `runtime::Federate::run`/`synchronize_with_other_federates`; the crate
/// never calls `std::process::exit` itself. `InvalidArgument` is returned
/// to the caller without tearing anything down.
#[derive(Debug, thiserror::Error)]
pub enum FederateError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("connection to {0} closed")]
    SocketClosed(String),

    #[error("RTI rejected handshake: {0:?}")]
    Rejected(RejectReason),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("received non-monotone TAG {received} after {last_granted}")]
    NonMonotoneTag {
        received: Instant,
        last_granted: Instant,
    },

    #[error("unknown peer federate {0}")]
    UnknownPeer(FederateId),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
