#[cfg(test)]
mod packet_test;

pub mod commit;
pub mod confirm;
pub mod dhpart;
pub mod error;
pub mod goclear;
pub mod hello;
pub mod ping;
pub mod sasrelay;

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use crate::error::{Error, Result};

pub use commit::CommitMessage;
pub use confirm::ConfirmMessage;
pub use dhpart::DhPartMessage;
pub use error::ErrorMessage;
pub use goclear::GoClearMessage;
pub use hello::HelloMessage;
pub use ping::{PingAckMessage, PingMessage};
pub use sasrelay::SasRelayMessage;

/// Framing cookie carried right after the RTP header of every ZRTP packet.
pub const ZRTP_PACKETS_MAGIC: u32 = 0x5a52_5450;
/// Extension magic opening the ZRTP message itself.
pub const ZRTP_MESSAGE_MAGIC: u16 = 0x505a;

pub const PROTOCOL_VERSION: &[u8; 4] = b"1.10";
pub const ZFONE_PROTOCOL_VERSION: &[u8; 4] = b"0.10";

pub const RTP_HEADER_SIZE: usize = 12;
pub const MESSAGE_HEADER_SIZE: usize = 12; // ext magic + length + 8-char type
/// RTP header + ext magic/length + type + CRC.
pub const MIN_PACKET_LENGTH: usize = RTP_HEADER_SIZE + 4 + 8 + 4;

pub const ZID_SIZE: usize = 12;
pub const CLIENT_ID_SIZE: usize = 16;
pub const VERSION_SIZE: usize = 4;
pub const COMP_TYPE_SIZE: usize = 4;
pub const HASH_IMAGE_SIZE: usize = 32;
pub const HMAC_SIZE: usize = 8;
pub const RSID_SIZE: usize = 8;
pub const HV_SIZE: usize = 32;
pub const HV_NONCE_SIZE: usize = 16;
pub const HV_KEY_SIZE: usize = 8;
pub const CFB_IV_SIZE: usize = 16;
pub const SAS_DIGEST_SIZE: usize = 32;
/// Upper bound of the variable pv field in DHPart.
pub const MAX_PV_SIZE: usize = 1024;

pub(crate) const ZRTP_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

macro_rules! message_types {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// ZRTP protocol message types with their 8-character wire names.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub enum MessageType {
            $($variant),+
        }

        impl MessageType {
            pub fn wire_name(&self) -> &'static [u8; 8] {
                match self {
                    $(MessageType::$variant => $name),+
                }
            }

            pub fn from_wire(name: &[u8]) -> Option<Self> {
                $(
                    if name == $name {
                        return Some(MessageType::$variant);
                    }
                )+
                None
            }
        }

        impl std::fmt::Display for MessageType {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let name = self.wire_name();
                write!(f, "{}", String::from_utf8_lossy(&name[..]).trim_end())
            }
        }
    };
}

message_types!(
    Hello => b"Hello   ",
    HelloAck => b"HelloACK",
    Commit => b"Commit  ",
    DhPart1 => b"DHPart1 ",
    DhPart2 => b"DHPart2 ",
    Confirm1 => b"Confirm1",
    Confirm2 => b"Confirm2",
    Conf2Ack => b"Conf2ACK",
    GoClear => b"GoClear ",
    ClearAck => b"ClearACK",
    Error => b"Error   ",
    ErrorAck => b"ErrorACK",
    SasRelay => b"SASrelay",
    RelayAck => b"RelayACK",
    Ping => b"Ping    ",
    PingAck => b"PingACK ",
);

/// A parsed ZRTP message, body typed by message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(HelloMessage),
    HelloAck,
    Commit(CommitMessage),
    DhPart1(DhPartMessage),
    DhPart2(DhPartMessage),
    Confirm1(ConfirmMessage),
    Confirm2(ConfirmMessage),
    Conf2Ack,
    GoClear(GoClearMessage),
    ClearAck,
    Error(ErrorMessage),
    ErrorAck,
    SasRelay(SasRelayMessage),
    RelayAck,
    Ping(PingMessage),
    PingAck(PingAckMessage),
}

impl Message {
    pub fn msg_type(&self) -> MessageType {
        match self {
            Message::Hello(_) => MessageType::Hello,
            Message::HelloAck => MessageType::HelloAck,
            Message::Commit(_) => MessageType::Commit,
            Message::DhPart1(_) => MessageType::DhPart1,
            Message::DhPart2(_) => MessageType::DhPart2,
            Message::Confirm1(_) => MessageType::Confirm1,
            Message::Confirm2(_) => MessageType::Confirm2,
            Message::Conf2Ack => MessageType::Conf2Ack,
            Message::GoClear(_) => MessageType::GoClear,
            Message::ClearAck => MessageType::ClearAck,
            Message::Error(_) => MessageType::Error,
            Message::ErrorAck => MessageType::ErrorAck,
            Message::SasRelay(_) => MessageType::SasRelay,
            Message::RelayAck => MessageType::RelayAck,
            Message::Ping(_) => MessageType::Ping,
            Message::PingAck(_) => MessageType::PingAck,
        }
    }

    fn marshal_body(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Message::Hello(m) => m.marshal(out),
            Message::Commit(m) => m.marshal(out),
            Message::DhPart1(m) | Message::DhPart2(m) => m.marshal(out),
            Message::Confirm1(m) | Message::Confirm2(m) => m.marshal(out),
            Message::GoClear(m) => m.marshal(out),
            Message::Error(m) => m.marshal(out),
            Message::SasRelay(m) => m.marshal(out),
            Message::Ping(m) => m.marshal(out),
            Message::PingAck(m) => m.marshal(out),
            Message::HelloAck
            | Message::Conf2Ack
            | Message::ClearAck
            | Message::ErrorAck
            | Message::RelayAck => Ok(()),
        }
    }

    /// The full message: extension magic, length in 32-bit words, type,
    /// body. This is the unit the total-hash and message HMACs run over
    /// is derived from (header included, CRC excluded).
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(128);
        self.marshal_body(&mut body)?;

        // bodies are defined in whole 32-bit words
        debug_assert_eq!(body.len() % 4, 0, "unaligned body for {}", self.msg_type());

        let total = MESSAGE_HEADER_SIZE + body.len();
        let mut out = Vec::with_capacity(total);
        out.write_u16::<BigEndian>(ZRTP_MESSAGE_MAGIC)
            .expect("vec write");
        out.write_u16::<BigEndian>((total / 4) as u16).expect("vec write");
        out.extend_from_slice(self.msg_type().wire_name());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parses one message starting at the extension magic.
    pub fn unmarshal(raw: &[u8]) -> Result<Message> {
        if raw.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::BufferSize(raw.len(), MESSAGE_HEADER_SIZE));
        }
        if BigEndian::read_u16(&raw[0..2]) != ZRTP_MESSAGE_MAGIC {
            return Err(Error::NotZrtp);
        }
        let words = BigEndian::read_u16(&raw[2..4]) as usize;
        if words * 4 != raw.len() {
            return Err(Error::PacketMalformed("length"));
        }

        let mut name = [0u8; 8];
        name.copy_from_slice(&raw[4..12]);
        let msg_type = MessageType::from_wire(&name).ok_or(Error::UnknownMessageType(name))?;

        let body = &raw[MESSAGE_HEADER_SIZE..];
        let mut r = Cursor::new(body);
        let msg = match msg_type {
            MessageType::Hello => Message::Hello(HelloMessage::unmarshal(&mut r, body.len())?),
            MessageType::HelloAck => Message::HelloAck,
            MessageType::Commit => Message::Commit(CommitMessage::unmarshal(&mut r, body.len())?),
            MessageType::DhPart1 => {
                Message::DhPart1(DhPartMessage::unmarshal(&mut r, body.len())?)
            }
            MessageType::DhPart2 => {
                Message::DhPart2(DhPartMessage::unmarshal(&mut r, body.len())?)
            }
            MessageType::Confirm1 => Message::Confirm1(ConfirmMessage::unmarshal(&mut r)?),
            MessageType::Confirm2 => Message::Confirm2(ConfirmMessage::unmarshal(&mut r)?),
            MessageType::Conf2Ack => Message::Conf2Ack,
            MessageType::GoClear => Message::GoClear(GoClearMessage::unmarshal(&mut r)?),
            MessageType::ClearAck => Message::ClearAck,
            MessageType::Error => Message::Error(ErrorMessage::unmarshal(&mut r)?),
            MessageType::ErrorAck => Message::ErrorAck,
            MessageType::SasRelay => Message::SasRelay(SasRelayMessage::unmarshal(&mut r)?),
            MessageType::RelayAck => Message::RelayAck,
            MessageType::Ping => Message::Ping(PingMessage::unmarshal(&mut r)?),
            MessageType::PingAck => Message::PingAck(PingAckMessage::unmarshal(&mut r)?),
        };
        Ok(msg)
    }
}

/// A preparsed incoming packet: straightened sequence, SSRC and the raw
/// message slice boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpInfo {
    pub seq: u16,
    pub ssrc: u32,
    /// Offset of the message (extension magic) inside the packet.
    pub message_offset: usize,
    pub message_len: usize,
}

/// Wraps a marshaled message into a full wire packet: RTP header with the
/// ZRTP framing cookie, the message and the trailing CRC-32C.
pub fn frame_packet(seq: u16, ssrc: u32, message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RTP_HEADER_SIZE + 4 + message.len() + 4);
    out.push(0x80); // RTP version 2
    out.push(0x00);
    out.write_u16::<BigEndian>(seq).expect("vec write");
    out.write_u32::<BigEndian>(0).expect("vec write"); // timestamp unused
    out.write_u32::<BigEndian>(ssrc).expect("vec write");
    out.write_u32::<BigEndian>(ZRTP_PACKETS_MAGIC).expect("vec write");
    out.extend_from_slice(message);
    let crc = ZRTP_CRC.checksum(&out);
    out.write_u32::<BigEndian>(crc).expect("vec write");
    out
}

/// True when the buffer is framed as a ZRTP packet (cookie present).
pub fn is_zrtp_packet(packet: &[u8]) -> bool {
    packet.len() >= MIN_PACKET_LENGTH
        && BigEndian::read_u32(&packet[RTP_HEADER_SIZE..RTP_HEADER_SIZE + 4])
            == ZRTP_PACKETS_MAGIC
}

/// Validates framing and CRC and extracts sequence/SSRC.
///
/// A CRC failure is reported as `CrcFail`; callers drop the packet with
/// no state change so corruption cannot be amplified into protocol
/// errors.
pub fn preparse(packet: &[u8]) -> Result<RtpInfo> {
    if packet.len() < MIN_PACKET_LENGTH {
        return Err(Error::BufferSize(packet.len(), MIN_PACKET_LENGTH));
    }
    if !is_zrtp_packet(packet) {
        return Err(Error::NotZrtp);
    }

    let crc_offset = packet.len() - 4;
    let expected = ZRTP_CRC.checksum(&packet[..crc_offset]);
    if BigEndian::read_u32(&packet[crc_offset..]) != expected {
        return Err(Error::CrcFail);
    }

    Ok(RtpInfo {
        seq: BigEndian::read_u16(&packet[2..4]),
        ssrc: BigEndian::read_u32(&packet[8..12]),
        message_offset: RTP_HEADER_SIZE + 4,
        message_len: crc_offset - (RTP_HEADER_SIZE + 4),
    })
}

/// Reads the message type of a preparsed packet without a full unmarshal.
pub fn peek_type(packet: &[u8], info: &RtpInfo) -> Result<MessageType> {
    if info.message_len < MESSAGE_HEADER_SIZE {
        return Err(Error::PacketMalformed("header"));
    }
    let name_off = info.message_offset + 4;
    let mut name = [0u8; 8];
    name.copy_from_slice(&packet[name_off..name_off + 8]);
    MessageType::from_wire(&name).ok_or(Error::UnknownMessageType(name))
}

pub(crate) fn read_exact_array<const N: usize>(r: &mut Cursor<&[u8]>) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    std::io::Read::read_exact(r, &mut buf).map_err(|_| Error::PacketMalformed("truncated"))?;
    Ok(buf)
}

pub(crate) fn read_u32_be(r: &mut Cursor<&[u8]>) -> Result<u32> {
    r.read_u32::<BigEndian>()
        .map_err(|_| Error::PacketMalformed("truncated"))
}
