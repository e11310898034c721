use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Wire-visible ZRTP protocol error codes, sent in an Error message.
/// Numeric values are fixed by the protocol.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum ProtocolError {
    Unknown = 0,
    Timeout = 1,
    /// Malformed packet (CRC OK, but wrong structure)
    InvalidPacket = 0x10,
    /// Critical software error
    Software = 0x20,
    /// Unsupported ZRTP version
    UnsupportedVersion = 0x30,
    /// Hello components mismatch
    HelloMismatch = 0x40,
    UnsupportedHash = 0x51,
    UnsupportedCipher = 0x52,
    UnsupportedPkExchange = 0x53,
    UnsupportedAuthTag = 0x54,
    UnsupportedSas = 0x55,
    /// No shared secret available, Preshared mode required
    NoSharedSecret = 0x56,
    /// DH error: bad pvi or pvr (== 1, 0, or p-1)
    PossibleMitm1 = 0x61,
    /// DH error: hvi does not match the hashed data
    PossibleMitm2 = 0x62,
    /// Received relayed SAS from an untrusted MiTM
    PossibleMitm3 = 0x63,
    /// Bad Confirm packet HMAC
    AuthDecryptFail = 0x70,
    NonceReuse = 0x80,
    EqualZid = 0x90,
    ServiceUnavailable = 0xA0,
    /// GoClear received, but not allowed
    GoClearUnsupported = 0x100,
    /// ZID in a new Hello differs from the previous stream
    WrongZid = 0x202,
    /// Message HMAC does not match the pre-received one
    WrongMessageHmac = 0x203,
}

impl ProtocolError {
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => ProtocolError::Timeout,
            0x10 => ProtocolError::InvalidPacket,
            0x20 => ProtocolError::Software,
            0x30 => ProtocolError::UnsupportedVersion,
            0x40 => ProtocolError::HelloMismatch,
            0x51 => ProtocolError::UnsupportedHash,
            0x52 => ProtocolError::UnsupportedCipher,
            0x53 => ProtocolError::UnsupportedPkExchange,
            0x54 => ProtocolError::UnsupportedAuthTag,
            0x55 => ProtocolError::UnsupportedSas,
            0x56 => ProtocolError::NoSharedSecret,
            0x61 => ProtocolError::PossibleMitm1,
            0x62 => ProtocolError::PossibleMitm2,
            0x63 => ProtocolError::PossibleMitm3,
            0x70 => ProtocolError::AuthDecryptFail,
            0x80 => ProtocolError::NonceReuse,
            0x90 => ProtocolError::EqualZid,
            0xA0 => ProtocolError::ServiceUnavailable,
            0x100 => ProtocolError::GoClearUnsupported,
            0x202 => ProtocolError::WrongZid,
            0x203 => ProtocolError::WrongMessageHmac,
            _ => ProtocolError::Unknown,
        }
    }

    pub fn code(&self) -> u32 {
        *self as u32
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtocolError::Unknown => "unknown error",
            ProtocolError::Timeout => "retry schedule exhausted",
            ProtocolError::InvalidPacket => "malformed packet",
            ProtocolError::Software => "critical software error",
            ProtocolError::UnsupportedVersion => "unsupported ZRTP version",
            ProtocolError::HelloMismatch => "Hello components mismatch",
            ProtocolError::UnsupportedHash => "hash type not supported",
            ProtocolError::UnsupportedCipher => "cipher type not supported",
            ProtocolError::UnsupportedPkExchange => "public key exchange not supported",
            ProtocolError::UnsupportedAuthTag => "SRTP auth tag not supported",
            ProtocolError::UnsupportedSas => "SAS scheme not supported",
            ProtocolError::NoSharedSecret => "no shared secret for Preshared mode",
            ProtocolError::PossibleMitm1 => "bad DH public value, possible MiTM",
            ProtocolError::PossibleMitm2 => "hvi commitment mismatch, possible MiTM",
            ProtocolError::PossibleMitm3 => "SAS relayed by untrusted endpoint",
            ProtocolError::AuthDecryptFail => "bad Confirm HMAC",
            ProtocolError::NonceReuse => "nonce reuse",
            ProtocolError::EqualZid => "equal ZIDs in Hello",
            ProtocolError::ServiceUnavailable => "service unavailable",
            ProtocolError::GoClearUnsupported => "GoClear not allowed",
            ProtocolError::WrongZid => "ZID changed mid-session",
            ProtocolError::WrongMessageHmac => "message HMAC chain mismatch",
        };
        write!(f, "{s} (0x{:x})", self.code())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("illegal operation in current state")]
    WrongState,
    #[error("wrong or unsupported parameter")]
    BadParam,
    #[error("input buffer too small: {0} bytes, need {1}")]
    BufferSize(usize, usize),
    #[error("ZRTP packet CRC mismatch")]
    CrcFail,
    #[error("ZRTP replay protection failed, seq {0}")]
    ZrtpReplay(u16),
    #[error("not a ZRTP packet")]
    NotZrtp,
    #[error("malformed {0} message")]
    PacketMalformed(&'static str),
    #[error("unknown message type {0:?}")]
    UnknownMessageType([u8; 8]),
    #[error("no usable {0} component in common")]
    ComponentUnsupported(&'static str),
    #[error("unknown component id {0}")]
    UnknownComponent(String),
    #[error("message authentication failed")]
    AuthFail,
    #[error("cipher failure")]
    CipherFail,
    #[error("crypto algorithm failure")]
    AlgoFail,
    #[error("key material expired")]
    KeyExpired,
    #[error("random generator not seeded or failed")]
    RngFail,
    #[error("attack detected")]
    Attack,
    #[error("function not available in current configuration")]
    NotAvailable,
    #[error("packet dropped")]
    Drop,
    #[error("protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("{0}")]
    Srtp(#[from] srtp::Error),
}
