use std::io::Cursor;

use byteorder::{BigEndian, WriteBytesExt};

use super::*;
use crate::error::ProtocolError;

/// Error carries the wire-visible protocol error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: u32,
}

impl ErrorMessage {
    pub fn new(error: ProtocolError) -> Self {
        ErrorMessage { code: error.code() }
    }

    pub fn error(&self) -> ProtocolError {
        ProtocolError::from_code(self.code)
    }

    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u32::<BigEndian>(self.code).expect("vec write");
        Ok(())
    }

    pub fn unmarshal(r: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(ErrorMessage {
            code: read_u32_be(r)?,
        })
    }
}
