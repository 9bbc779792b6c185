//! Endian-agnostic header encode/decode and the framed wire format.

mod codec;
mod message;

pub use codec::WireCodec;
pub use message::{Message, MessageKind, RejectReason};
