//! SMPP v3.4 PDU codec
//!
//! Covers the PDUs an ESME exchanges on a bound session: bind, submit,
//! deliver, enquire_link, unbind and generic_nack. Frames are decoded
//! incrementally from a read buffer.

mod command;
pub mod tlv;

pub use command::{CommandId, CommandStatus};
pub use tlv::{tag, Tlv};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::session::BindRole;

/// Fixed PDU header size
pub const HEADER_LEN: usize = 16;

/// Frames larger than this are treated as a corrupt stream
pub const MAX_PDU_LEN: usize = 64 * 1024;

/// esm_class bit: user data header indicator
pub const ESM_CLASS_UDHI: u8 = 0x40;

/// esm_class message type: SMSC delivery receipt
pub const ESM_CLASS_DELIVERY_RECEIPT: u8 = 0x04;

/// interface_version sent in bind requests
pub const INTERFACE_VERSION: u8 = 0x34;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid command_length {0}")]
    InvalidLength(usize),

    #[error("Unknown command 0x{command_id:08x} (sequence {sequence_number})")]
    UnknownCommand {
        command_id: u32,
        sequence_number: u32,
    },

    #[error("Truncated {0} body")]
    Truncated(&'static str),

    #[error("Field {field} exceeds {max} octets")]
    FieldTooLong { field: &'static str, max: usize },
}

/// SMPP PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PduHeader {
    pub command_length: u32,
    pub command_id: CommandId,
    pub command_status: CommandStatus,
    pub sequence_number: u32,
}

/// Bind credentials and addressing as sent in a bind request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bind {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

/// Body shared by submit_sm and deliver_sm
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShortMessage {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub destination_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Bytes,
    pub optional_parameters: Vec<Tlv>,
}

impl ShortMessage {
    pub fn tlv(&self, tag: u16) -> Option<&Tlv> {
        tlv::find(&self.optional_parameters, tag)
    }

    /// Message body, preferring `message_payload` over `short_message`
    pub fn payload(&self) -> Bytes {
        match self.tlv(tag::MESSAGE_PAYLOAD) {
            Some(payload) if self.short_message.is_empty() => payload.value.clone(),
            _ => self.short_message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduBody {
    Bind { role: BindRole, bind: Bind },
    BindResp { role: BindRole, system_id: String },
    SubmitSm(ShortMessage),
    SubmitSmResp { message_id: Option<String> },
    DeliverSm(ShortMessage),
    DeliverSmResp,
    EnquireLink,
    EnquireLinkResp,
    Unbind,
    UnbindResp,
    GenericNack,
}

impl PduBody {
    pub fn command_id(&self) -> CommandId {
        match self {
            Self::Bind { role, .. } => role.bind_command(),
            Self::BindResp { role, .. } => role.bind_resp_command(),
            Self::SubmitSm(_) => CommandId::SubmitSm,
            Self::SubmitSmResp { .. } => CommandId::SubmitSmResp,
            Self::DeliverSm(_) => CommandId::DeliverSm,
            Self::DeliverSmResp => CommandId::DeliverSmResp,
            Self::EnquireLink => CommandId::EnquireLink,
            Self::EnquireLinkResp => CommandId::EnquireLinkResp,
            Self::Unbind => CommandId::Unbind,
            Self::UnbindResp => CommandId::UnbindResp,
            Self::GenericNack => CommandId::GenericNack,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    pub body: PduBody,
}

impl Pdu {
    pub fn request(sequence_number: u32, body: PduBody) -> Self {
        Self {
            command_status: CommandStatus::ESME_ROK,
            sequence_number,
            body,
        }
    }

    pub fn response(sequence_number: u32, status: CommandStatus, body: PduBody) -> Self {
        Self {
            command_status: status,
            sequence_number,
            body,
        }
    }

    pub fn command_id(&self) -> CommandId {
        self.body.command_id()
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut body = BytesMut::with_capacity(64);
        match &self.body {
            PduBody::Bind { bind, .. } => {
                put_cstring(&mut body, &bind.system_id, 16, "system_id")?;
                put_cstring(&mut body, &bind.password, 9, "password")?;
                put_cstring(&mut body, &bind.system_type, 13, "system_type")?;
                body.put_u8(bind.interface_version);
                body.put_u8(bind.addr_ton);
                body.put_u8(bind.addr_npi);
                put_cstring(&mut body, &bind.address_range, 41, "address_range")?;
            }
            PduBody::BindResp { system_id, .. } => {
                put_cstring(&mut body, system_id, 16, "system_id")?;
            }
            PduBody::SubmitSm(sm) | PduBody::DeliverSm(sm) => encode_short_message(&mut body, sm)?,
            PduBody::SubmitSmResp { message_id } => {
                if let Some(id) = message_id {
                    put_cstring(&mut body, id, 65, "message_id")?;
                }
            }
            PduBody::DeliverSmResp => body.put_u8(0),
            PduBody::EnquireLink
            | PduBody::EnquireLinkResp
            | PduBody::Unbind
            | PduBody::UnbindResp
            | PduBody::GenericNack => {}
        }

        let length = HEADER_LEN + body.len();
        let mut frame = BytesMut::with_capacity(length);
        frame.put_u32(length as u32);
        frame.put_u32(self.command_id() as u32);
        frame.put_u32(self.command_status.0);
        frame.put_u32(self.sequence_number);
        frame.extend_from_slice(&body);
        Ok(frame.freeze())
    }
}

/// Parse the fixed header of a complete frame
pub fn parse_header(data: &[u8]) -> Result<PduHeader, CodecError> {
    if data.len() < HEADER_LEN {
        return Err(CodecError::InvalidLength(data.len()));
    }

    let command_length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let command_id_raw = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let command_status = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let sequence_number = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);

    let command_id = CommandId::from_u32(command_id_raw).ok_or(CodecError::UnknownCommand {
        command_id: command_id_raw,
        sequence_number,
    })?;

    Ok(PduHeader {
        command_length,
        command_id,
        command_status: CommandStatus(command_status),
        sequence_number,
    })
}

/// Take one complete frame off the front of `buffer`, if available.
///
/// A frame is always consumed before its body is interpreted, so an
/// `UnknownCommand` or `Truncated` error leaves the stream aligned.
pub fn decode_frame(buffer: &mut BytesMut) -> Result<Option<Pdu>, CodecError> {
    if buffer.len() < 4 {
        return Ok(None);
    }
    let command_length = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
    if !(HEADER_LEN..=MAX_PDU_LEN).contains(&command_length) {
        return Err(CodecError::InvalidLength(command_length));
    }
    if buffer.len() < command_length {
        return Ok(None);
    }

    let frame = buffer.split_to(command_length).freeze();
    let header = parse_header(&frame)?;
    let mut body = &frame[HEADER_LEN..];

    let pdu_body = match header.command_id {
        CommandId::BindTransceiver | CommandId::BindReceiver | CommandId::BindTransmitter => {
            let role = BindRole::from_command(header.command_id).ok_or(CodecError::Truncated("bind"))?;
            PduBody::Bind {
                role,
                bind: Bind {
                    system_id: read_cstring(&mut body, "bind")?,
                    password: read_cstring(&mut body, "bind")?,
                    system_type: read_cstring(&mut body, "bind")?,
                    interface_version: read_u8(&mut body, "bind")?,
                    addr_ton: read_u8(&mut body, "bind")?,
                    addr_npi: read_u8(&mut body, "bind")?,
                    address_range: read_cstring(&mut body, "bind")?,
                },
            }
        }
        CommandId::BindTransceiverResp | CommandId::BindReceiverResp | CommandId::BindTransmitterResp => {
            let role = BindRole::from_command(header.command_id).ok_or(CodecError::Truncated("bind_resp"))?;
            let system_id = if body.is_empty() {
                String::new()
            } else {
                read_cstring(&mut body, "bind_resp")?
            };
            PduBody::BindResp { role, system_id }
        }
        CommandId::SubmitSm => PduBody::SubmitSm(decode_short_message(&mut body, "submit_sm")?),
        CommandId::DeliverSm => PduBody::DeliverSm(decode_short_message(&mut body, "deliver_sm")?),
        CommandId::SubmitSmResp => {
            let message_id = if body.is_empty() {
                None
            } else {
                Some(read_cstring(&mut body, "submit_sm_resp")?).filter(|id| !id.is_empty())
            };
            PduBody::SubmitSmResp { message_id }
        }
        CommandId::DeliverSmResp => PduBody::DeliverSmResp,
        CommandId::EnquireLink => PduBody::EnquireLink,
        CommandId::EnquireLinkResp => PduBody::EnquireLinkResp,
        CommandId::Unbind => PduBody::Unbind,
        CommandId::UnbindResp => PduBody::UnbindResp,
        CommandId::GenericNack => PduBody::GenericNack,
    };

    Ok(Some(Pdu {
        command_status: header.command_status,
        sequence_number: header.sequence_number,
        body: pdu_body,
    }))
}

fn encode_short_message(buf: &mut BytesMut, sm: &ShortMessage) -> Result<(), CodecError> {
    if sm.short_message.len() > 254 {
        return Err(CodecError::FieldTooLong {
            field: "short_message",
            max: 254,
        });
    }
    put_cstring(buf, &sm.service_type, 6, "service_type")?;
    buf.put_u8(sm.source_addr_ton);
    buf.put_u8(sm.source_addr_npi);
    put_cstring(buf, &sm.source_addr, 21, "source_addr")?;
    buf.put_u8(sm.dest_addr_ton);
    buf.put_u8(sm.dest_addr_npi);
    put_cstring(buf, &sm.destination_addr, 21, "destination_addr")?;
    buf.put_u8(sm.esm_class);
    buf.put_u8(sm.protocol_id);
    buf.put_u8(sm.priority_flag);
    put_cstring(buf, &sm.schedule_delivery_time, 17, "schedule_delivery_time")?;
    put_cstring(buf, &sm.validity_period, 17, "validity_period")?;
    buf.put_u8(sm.registered_delivery);
    buf.put_u8(sm.replace_if_present_flag);
    buf.put_u8(sm.data_coding);
    buf.put_u8(sm.sm_default_msg_id);
    buf.put_u8(sm.short_message.len() as u8);
    buf.put_slice(&sm.short_message);
    for tlv in &sm.optional_parameters {
        if tlv.value.len() > u16::MAX as usize {
            return Err(CodecError::FieldTooLong {
                field: "optional parameter",
                max: u16::MAX as usize,
            });
        }
        tlv.encode(buf);
    }
    Ok(())
}

fn decode_short_message(body: &mut &[u8], what: &'static str) -> Result<ShortMessage, CodecError> {
    let mut sm = ShortMessage {
        service_type: read_cstring(body, what)?,
        source_addr_ton: read_u8(body, what)?,
        source_addr_npi: read_u8(body, what)?,
        source_addr: read_cstring(body, what)?,
        dest_addr_ton: read_u8(body, what)?,
        dest_addr_npi: read_u8(body, what)?,
        destination_addr: read_cstring(body, what)?,
        esm_class: read_u8(body, what)?,
        protocol_id: read_u8(body, what)?,
        priority_flag: read_u8(body, what)?,
        schedule_delivery_time: read_cstring(body, what)?,
        validity_period: read_cstring(body, what)?,
        registered_delivery: read_u8(body, what)?,
        replace_if_present_flag: read_u8(body, what)?,
        data_coding: read_u8(body, what)?,
        sm_default_msg_id: read_u8(body, what)?,
        ..Default::default()
    };
    let sm_length = read_u8(body, what)? as usize;
    sm.short_message = read_bytes(body, sm_length, what)?;

    while body.has_remaining() {
        if body.remaining() < 4 {
            return Err(CodecError::Truncated(what));
        }
        let tag = body.get_u16();
        let length = body.get_u16() as usize;
        let value = read_bytes(body, length, what)?;
        sm.optional_parameters.push(Tlv { tag, value });
    }
    Ok(sm)
}

fn put_cstring(buf: &mut BytesMut, value: &str, max: usize, field: &'static str) -> Result<(), CodecError> {
    // max includes the NUL terminator
    if value.len() >= max {
        return Err(CodecError::FieldTooLong { field, max: max - 1 });
    }
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
    Ok(())
}

fn read_u8(body: &mut &[u8], what: &'static str) -> Result<u8, CodecError> {
    if !body.has_remaining() {
        return Err(CodecError::Truncated(what));
    }
    Ok(body.get_u8())
}

fn read_bytes(body: &mut &[u8], len: usize, what: &'static str) -> Result<Bytes, CodecError> {
    if body.remaining() < len {
        return Err(CodecError::Truncated(what));
    }
    Ok(body.copy_to_bytes(len))
}

fn read_cstring(body: &mut &[u8], what: &'static str) -> Result<String, CodecError> {
    let end = body
        .iter()
        .position(|b| *b == 0)
        .ok_or(CodecError::Truncated(what))?;
    let value = String::from_utf8_lossy(&body[..end]).into_owned();
    body.advance(end + 1);
    Ok(value)
}
