use std::io::Cursor;

use super::*;

/// GoClear asks the peer to drop SRTP. The clear_hmac proves the request
/// comes from the keyed endpoint, not an injected teardown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GoClearMessage {
    pub clear_hmac: [u8; 8],
}

impl GoClearMessage {
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.clear_hmac);
        Ok(())
    }

    pub fn unmarshal(r: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(GoClearMessage {
            clear_hmac: read_exact_array(r)?,
        })
    }
}
