use std::io::Cursor;

use byteorder::{BigEndian, WriteBytesExt};

use super::*;

/// Zfone discovery Ping. The engine never originates these but answers
/// them for interoperability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    pub version: [u8; 4],
    pub endpoint_hash: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingAckMessage {
    pub version: [u8; 4],
    pub endpoint_hash: [u8; 8],
    pub peer_endpoint_hash: [u8; 8],
    pub peer_ssrc: u32,
}

impl PingMessage {
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.version);
        out.extend_from_slice(&self.endpoint_hash);
        Ok(())
    }

    pub fn unmarshal(r: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(PingMessage {
            version: read_exact_array(r)?,
            endpoint_hash: read_exact_array(r)?,
        })
    }
}

impl PingAckMessage {
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.version);
        out.extend_from_slice(&self.endpoint_hash);
        out.extend_from_slice(&self.peer_endpoint_hash);
        out.write_u32::<BigEndian>(self.peer_ssrc).expect("vec write");
        Ok(())
    }

    pub fn unmarshal(r: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(PingAckMessage {
            version: read_exact_array(r)?,
            endpoint_hash: read_exact_array(r)?,
            peer_endpoint_hash: read_exact_array(r)?,
            peer_ssrc: read_u32_be(r)?,
        })
    }
}
