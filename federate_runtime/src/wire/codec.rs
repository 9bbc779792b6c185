//! `tokio_util::codec::{Encoder, Decoder}` for [`Message`], in the spirit
//! of the generic bincode-based codec this engine's predecessor used, but
//! hand-rolled to produce the bit-exact big-endian headers the wire
//! contract requires instead of a host-independent serialization format.

use bytes::{Buf, BufMut, BytesMut};
use federate_core::{FederateId, PortId};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::ClockSyncStat;
use crate::error::FederateError;

use super::message::{get_i64, get_u16, put_i64, put_u16, Message, MessageKind, RejectReason};

/// Maximum accepted `length`/`fed_string_len` field, guarding against a
/// corrupt or hostile peer claiming an enormous frame. Strings on this
/// wire are capped at 255 bytes by the `FederationId` contract; payloads
/// are capped by `config::defaults::MAX_PAYLOAD_LEN`.
const MAX_FED_STRING_LEN: usize = 255;

#[derive(Debug)]
pub struct WireCodec {
    max_payload_len: u32,
}

impl WireCodec {
    pub fn new(max_payload_len: u32) -> Self {
        Self { max_payload_len }
    }
}

impl Decoder for WireCodec {
    type Item = Message;
    type Error = FederateError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, FederateError> {
        if buf.is_empty() {
            return Ok(None);
        }
        let kind_byte = buf[0];
        let kind = MessageKind::from_byte(kind_byte).ok_or_else(|| {
            FederateError::ProtocolViolation(format!("unknown message kind byte {kind_byte}"))
        })?;

        match kind {
            MessageKind::Message | MessageKind::P2pMessage => {
                decode_untimed_message(buf, self.max_payload_len, kind)
            }
            MessageKind::TimedMessage | MessageKind::P2pTimedMessage => {
                decode_timed_message(buf, self.max_payload_len, kind)
            }
            MessageKind::P2pSendingFedId => decode_fed_id_like(buf, true),
            MessageKind::FedId => decode_fed_id_like(buf, false),
            MessageKind::AddressQuery => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                let mut body = buf.split_to(3);
                body.advance(1);
                let federate_id = FederateId(get_u16(&mut body));
                Ok(Some(Message::AddressQuery { federate_id }))
            }
            MessageKind::AddressAd => {
                if buf.len() < 5 {
                    return Ok(None);
                }
                let mut body = buf.split_to(5);
                body.advance(1);
                let port = body.get_i32();
                Ok(Some(Message::AddressAd {
                    server_port: port as u16,
                }))
            }
            MessageKind::Timestamp | MessageKind::NextEventTime | MessageKind::LogicalTimeComplete
            | MessageKind::Stop | MessageKind::TimeAdvanceGrant => {
                if buf.len() < 9 {
                    return Ok(None);
                }
                let mut body = buf.split_to(9);
                body.advance(1);
                let instant = get_i64(&mut body);
                Ok(Some(match kind {
                    MessageKind::Timestamp => Message::Timestamp { instant },
                    MessageKind::NextEventTime => Message::NextEventTime { instant },
                    MessageKind::LogicalTimeComplete => Message::LogicalTimeComplete { instant },
                    MessageKind::Stop => Message::Stop { instant },
                    MessageKind::TimeAdvanceGrant => Message::TimeAdvanceGrant { instant },
                    _ => unreachable!(),
                }))
            }
            MessageKind::Ack => {
                buf.advance(1);
                Ok(Some(Message::Ack))
            }
            MessageKind::Reject => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let mut body = buf.split_to(2);
                body.advance(1);
                let reason_byte = body.get_u8();
                let reason = RejectReason::from_byte(reason_byte).ok_or_else(|| {
                    FederateError::ProtocolViolation(format!("unknown reject reason {reason_byte}"))
                })?;
                Ok(Some(Message::Reject { reason }))
            }
            MessageKind::UdpPort => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                let mut body = buf.split_to(2);
                body.advance(1);
                let status = match body.get_u8() {
                    0 => ClockSyncStat::Off,
                    _ => ClockSyncStat::On,
                };
                Ok(Some(Message::UdpPort { status }))
            }
        }
    }
}

fn decode_untimed_message(
    buf: &mut BytesMut,
    max_payload_len: u32,
    kind: MessageKind,
) -> Result<Option<Message>, FederateError> {
    if buf.len() < 9 {
        return Ok(None);
    }
    let length = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
    check_payload_len(length, max_payload_len)?;
    let total = 9 + length as usize;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }
    let mut body = buf.split_to(total);
    body.advance(1);
    let dest_port = PortId(get_u16(&mut body));
    let dest_federate = FederateId(get_u16(&mut body));
    body.advance(4);
    let payload = body.to_vec();
    Ok(Some(if kind == MessageKind::P2pMessage {
        Message::P2pMessage {
            dest_port,
            dest_federate,
            payload,
        }
    } else {
        Message::Message {
            dest_port,
            dest_federate,
            payload,
        }
    }))
}

fn decode_timed_message(
    buf: &mut BytesMut,
    max_payload_len: u32,
    kind: MessageKind,
) -> Result<Option<Message>, FederateError> {
    if buf.len() < 17 {
        return Ok(None);
    }
    let length = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);
    check_payload_len(length, max_payload_len)?;
    let total = 17 + length as usize;
    if buf.len() < total {
        buf.reserve(total - buf.len());
        return Ok(None);
    }
    let mut body = buf.split_to(total);
    body.advance(1);
    let dest_port = PortId(get_u16(&mut body));
    let dest_federate = FederateId(get_u16(&mut body));
    body.advance(4);
    let timestamp = get_i64(&mut body);
    let payload = body.to_vec();
    Ok(Some(if kind == MessageKind::P2pTimedMessage {
        Message::P2pTimedMessage {
            dest_port,
            dest_federate,
            timestamp,
            payload,
        }
    } else {
        Message::TimedMessage {
            dest_port,
            dest_federate,
            timestamp,
            payload,
        }
    }))
}

fn decode_fed_id_like(buf: &mut BytesMut, is_p2p: bool) -> Result<Option<Message>, FederateError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let str_len = buf[3] as usize;
    if str_len > MAX_FED_STRING_LEN {
        return Err(FederateError::ProtocolViolation(format!(
            "federation id length {str_len} exceeds {MAX_FED_STRING_LEN}"
        )));
    }
    let total = 4 + str_len;
    if buf.len() < total {
        return Ok(None);
    }
    let mut body = buf.split_to(total);
    body.advance(1);
    let fed_id = FederateId(get_u16(&mut body));
    body.advance(1);
    let mut bytes = vec![0u8; str_len];
    body.copy_to_slice(&mut bytes);
    let federation_id = String::from_utf8(bytes)
        .map_err(|e| FederateError::ProtocolViolation(format!("non-utf8 federation id: {e}")))?;
    Ok(Some(if is_p2p {
        Message::P2pSendingFedId {
            sender_federate: fed_id,
            federation_id,
        }
    } else {
        Message::FedId {
            federate_id: fed_id,
            federation_id,
        }
    }))
}

fn check_payload_len(length: u32, max_payload_len: u32) -> Result<(), FederateError> {
    if length > max_payload_len {
        return Err(FederateError::ProtocolViolation(format!(
            "payload length {length} exceeds configured maximum {max_payload_len}"
        )));
    }
    Ok(())
}

impl Encoder<Message> for WireCodec {
    type Error = FederateError;

    fn encode(&mut self, item: Message, buf: &mut BytesMut) -> Result<(), FederateError> {
        match item {
            Message::Message {
                dest_port,
                dest_federate,
                payload,
            } => encode_untimed(buf, MessageKind::Message, dest_port.0, dest_federate.0, &payload)?,
            Message::P2pMessage {
                dest_port,
                dest_federate,
                payload,
            } => encode_untimed(buf, MessageKind::P2pMessage, dest_port.0, dest_federate.0, &payload)?,
            Message::TimedMessage {
                dest_port,
                dest_federate,
                timestamp,
                payload,
            } => encode_timed(
                buf,
                MessageKind::TimedMessage,
                dest_port.0,
                dest_federate.0,
                timestamp,
                &payload,
            )?,
            Message::P2pTimedMessage {
                dest_port,
                dest_federate,
                timestamp,
                payload,
            } => encode_timed(
                buf,
                MessageKind::P2pTimedMessage,
                dest_port.0,
                dest_federate.0,
                timestamp,
                &payload,
            )?,
            Message::P2pSendingFedId {
                sender_federate,
                federation_id,
            } => encode_fed_id_like(buf, MessageKind::P2pSendingFedId, sender_federate.0, &federation_id)?,
            Message::FedId {
                federate_id,
                federation_id,
            } => encode_fed_id_like(buf, MessageKind::FedId, federate_id.0, &federation_id)?,
            Message::AddressQuery { federate_id } => {
                buf.put_u8(MessageKind::AddressQuery as u8);
                put_u16(buf, federate_id.0);
            }
            Message::AddressAd { server_port } => {
                buf.put_u8(MessageKind::AddressAd as u8);
                buf.put_i32(server_port as i32);
            }
            Message::Timestamp { instant } => encode_time(buf, MessageKind::Timestamp, instant),
            Message::NextEventTime { instant } => encode_time(buf, MessageKind::NextEventTime, instant),
            Message::LogicalTimeComplete { instant } => {
                encode_time(buf, MessageKind::LogicalTimeComplete, instant)
            }
            Message::Stop { instant } => encode_time(buf, MessageKind::Stop, instant),
            Message::TimeAdvanceGrant { instant } => {
                encode_time(buf, MessageKind::TimeAdvanceGrant, instant)
            }
            Message::Ack => buf.put_u8(MessageKind::Ack as u8),
            Message::Reject { reason } => {
                buf.put_u8(MessageKind::Reject as u8);
                buf.put_u8(reason as u8);
            }
            Message::UdpPort { status } => {
                buf.put_u8(MessageKind::UdpPort as u8);
                buf.put_u8(matches!(status, ClockSyncStat::On) as u8);
            }
        }
        Ok(())
    }
}

fn encode_untimed(
    buf: &mut BytesMut,
    kind: MessageKind,
    port: u16,
    federate: u16,
    payload: &[u8],
) -> Result<(), FederateError> {
    buf.reserve(9 + payload.len());
    buf.put_u8(kind as u8);
    put_u16(buf, port);
    put_u16(buf, federate);
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(())
}

fn encode_timed(
    buf: &mut BytesMut,
    kind: MessageKind,
    port: u16,
    federate: u16,
    timestamp: i64,
    payload: &[u8],
) -> Result<(), FederateError> {
    buf.reserve(17 + payload.len());
    buf.put_u8(kind as u8);
    put_u16(buf, port);
    put_u16(buf, federate);
    buf.put_u32(payload.len() as u32);
    put_i64(buf, timestamp);
    buf.put_slice(payload);
    Ok(())
}

fn encode_fed_id_like(
    buf: &mut BytesMut,
    kind: MessageKind,
    fed_id: u16,
    federation_id: &str,
) -> Result<(), FederateError> {
    if federation_id.len() > MAX_FED_STRING_LEN {
        return Err(FederateError::InvalidArgument(format!(
            "federation id longer than {MAX_FED_STRING_LEN}"
        )));
    }
    buf.reserve(4 + federation_id.len());
    buf.put_u8(kind as u8);
    put_u16(buf, fed_id);
    buf.put_u8(federation_id.len() as u8);
    buf.put_slice(federation_id.as_bytes());
    Ok(())
}

fn encode_time(buf: &mut BytesMut, kind: MessageKind, instant: i64) {
    buf.reserve(9);
    buf.put_u8(kind as u8);
    put_i64(buf, instant);
}
