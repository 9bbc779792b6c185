//! Message kinds, header layouts, and the big-endian integer codec.
//!
//! Header layouts are bit-exact per the wire contract (§4.1): every
//! integer field is big-endian regardless of host, and each `MessageKind`
//! has a fixed-size header whose shape is given in the table on
//! [`Message`].

use bytes::{Buf, BufMut};

use federate_core::{FederateId, Instant, PortId};

use crate::config::ClockSyncStat;

/// Wire discriminant for each message kind. Values are assigned by this
/// crate (the wire contract fixes header *shapes*, not byte values) and
/// are stable for the lifetime of the protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Message = 1,
    TimedMessage = 2,
    P2pSendingFedId = 3,
    P2pMessage = 4,
    P2pTimedMessage = 5,
    AddressQuery = 6,
    AddressAd = 7,
    FedId = 8,
    Timestamp = 9,
    NextEventTime = 10,
    TimeAdvanceGrant = 11,
    LogicalTimeComplete = 12,
    Stop = 13,
    Ack = 14,
    Reject = 15,
    UdpPort = 16,
}

impl MessageKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        use MessageKind::*;
        Some(match b {
            1 => Message,
            2 => TimedMessage,
            3 => P2pSendingFedId,
            4 => P2pMessage,
            5 => P2pTimedMessage,
            6 => AddressQuery,
            7 => AddressAd,
            8 => FedId,
            9 => Timestamp,
            10 => NextEventTime,
            11 => TimeAdvanceGrant,
            12 => LogicalTimeComplete,
            13 => Stop,
            14 => Ack,
            15 => Reject,
            16 => UdpPort,
            _ => return None,
        })
    }
}

/// Reasons a handshake may be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectReason {
    FederationIdDoesNotMatch = 1,
    WrongServer = 2,
    UnknownFederate = 3,
    UnexpectedMessage = 4,
}

impl RejectReason {
    pub fn from_byte(b: u8) -> Option<Self> {
        use RejectReason::*;
        Some(match b {
            1 => FederationIdDoesNotMatch,
            2 => WrongServer,
            3 => UnknownFederate,
            4 => UnexpectedMessage,
            _ => return None,
        })
    }
}

/// One message as exchanged between a federate and either the RTI or a
/// peer. This is the in-flight shape, not anything persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `MESSAGE`: untimed data to a local port. 9-byte header.
    Message {
        dest_port: PortId,
        dest_federate: FederateId,
        payload: Vec<u8>,
    },
    /// `TIMED_MESSAGE`: timestamped data to a local port. 17-byte header.
    TimedMessage {
        dest_port: PortId,
        dest_federate: FederateId,
        timestamp: Instant,
        payload: Vec<u8>,
    },
    /// `P2P_SENDING_FED_ID`: first message on an accepted P2P socket.
    P2pSendingFedId {
        sender_federate: FederateId,
        federation_id: String,
    },
    /// `P2P_MESSAGE`: untimed data sent directly peer-to-peer.
    P2pMessage {
        dest_port: PortId,
        dest_federate: FederateId,
        payload: Vec<u8>,
    },
    /// `P2P_TIMED_MESSAGE`: timed data sent directly peer-to-peer.
    P2pTimedMessage {
        dest_port: PortId,
        dest_federate: FederateId,
        timestamp: Instant,
        payload: Vec<u8>,
    },
    /// `ADDRESS_QUERY`: ask the RTI for a peer's P2P server address. The
    /// reply is not a `Message`: it is a bare `i32` port + 4-byte IP with
    /// no kind byte (see `rti_client::query_address`), so it never goes
    /// through the kind-byte-prefixed [`WireCodec`](super::WireCodec).
    AddressQuery { federate_id: FederateId },
    /// `ADDRESS_AD`: advertise this federate's P2P server port to the RTI.
    AddressAd { server_port: u16 },
    /// `FED_ID`: first message a federate sends the RTI after connecting.
    FedId {
        federate_id: FederateId,
        federation_id: String,
    },
    /// `TIMESTAMP`: used both ways during start-time negotiation.
    Timestamp { instant: Instant },
    /// `NEXT_EVENT_TIME`: federate -> RTI, requesting a TAG.
    NextEventTime { instant: Instant },
    /// `TIME_ADVANCE_GRANT`: RTI -> federate (8-byte payload, no kind
    /// re-read since the dispatcher already consumed the kind byte).
    TimeAdvanceGrant { instant: Instant },
    /// `LOGICAL_TIME_COMPLETE`: federate -> RTI.
    LogicalTimeComplete { instant: Instant },
    /// `STOP`: either direction.
    Stop { instant: Instant },
    Ack,
    Reject { reason: RejectReason },
    /// `UDP_PORT`: clock-sync negotiation; this crate always sends `Off`.
    UdpPort { status: ClockSyncStat },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Message { .. } => MessageKind::Message,
            Message::TimedMessage { .. } => MessageKind::TimedMessage,
            Message::P2pSendingFedId { .. } => MessageKind::P2pSendingFedId,
            Message::P2pMessage { .. } => MessageKind::P2pMessage,
            Message::P2pTimedMessage { .. } => MessageKind::P2pTimedMessage,
            Message::AddressQuery { .. } => MessageKind::AddressQuery,
            Message::AddressAd { .. } => MessageKind::AddressAd,
            Message::FedId { .. } => MessageKind::FedId,
            Message::Timestamp { .. } => MessageKind::Timestamp,
            Message::NextEventTime { .. } => MessageKind::NextEventTime,
            Message::TimeAdvanceGrant { .. } => MessageKind::TimeAdvanceGrant,
            Message::LogicalTimeComplete { .. } => MessageKind::LogicalTimeComplete,
            Message::Stop { .. } => MessageKind::Stop,
            Message::Ack => MessageKind::Ack,
            Message::Reject { .. } => MessageKind::Reject,
            Message::UdpPort { .. } => MessageKind::UdpPort,
        }
    }
}

pub(crate) fn put_u16(buf: &mut impl BufMut, v: u16) {
    buf.put_u16(v);
}

pub(crate) fn put_i32(buf: &mut impl BufMut, v: i32) {
    buf.put_i32(v);
}

pub(crate) fn put_i64(buf: &mut impl BufMut, v: i64) {
    buf.put_i64(v);
}

pub(crate) fn get_u16(buf: &mut impl Buf) -> u16 {
    buf.get_u16()
}

pub(crate) fn get_i32(buf: &mut impl Buf) -> i32 {
    buf.get_i32()
}

pub(crate) fn get_i64(buf: &mut impl Buf) -> i64 {
    buf.get_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    /// P1: decode(encode(x)) == x for each header-integer type.
    #[test]
    fn u16_round_trips() {
        for v in [0u16, 1, 255, 256, u16::MAX] {
            let mut buf = BytesMut::new();
            put_u16(&mut buf, v);
            let mut b = buf.freeze();
            assert_eq!(get_u16(&mut b), v);
        }
    }

    #[test]
    fn i32_round_trips() {
        for v in [0i32, -1, i32::MIN, i32::MAX, 12345] {
            let mut buf = BytesMut::new();
            put_i32(&mut buf, v);
            let mut b = buf.freeze();
            assert_eq!(get_i32(&mut b), v);
        }
    }

    #[test]
    fn i64_round_trips() {
        for v in [0i64, -1, i64::MIN, i64::MAX, 1_700_000_000_000_000_000] {
            let mut buf = BytesMut::new();
            put_i64(&mut buf, v);
            let mut b = buf.freeze();
            assert_eq!(get_i64(&mut b), v);
        }
    }

    /// P2: encoded bytes match big-endian (network) order.
    #[test]
    fn u16_is_big_endian_on_the_wire() {
        let mut buf = BytesMut::new();
        put_u16(&mut buf, 0x0102);
        assert_eq!(&buf[..], &[0x01, 0x02]);
    }

    #[test]
    fn i64_is_big_endian_on_the_wire() {
        let mut buf = BytesMut::new();
        put_i64(&mut buf, 0x0102030405060708);
        assert_eq!(&buf[..], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }
}
