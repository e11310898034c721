use std::io::Cursor;

use super::*;

/// Length of the CFB-protected region of a SASRelay body.
pub const SASRELAY_ENCRYPTED_SIZE: usize = 2 + 1 + 1 + 4 + 32;

/// SASRelay lets a trusted MiTM hand the far leg's SAS to this endpoint
/// so the users compare one consistent string. Protected exactly like
/// Confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasRelayMessage {
    pub hmac: [u8; 8],
    pub iv: [u8; 16],
    pub encrypted: Vec<u8>,
}

/// Decrypted view of the protected SASRelay fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SasRelayBody {
    pub sig_len: u8,
    pub flags: u8,
    /// Rendering scheme for the relayed value, 4-char component id.
    pub sas_scheme: [u8; 4],
    pub sashash: [u8; 32],
}

impl SasRelayBody {
    pub fn to_plaintext(&self) -> [u8; SASRELAY_ENCRYPTED_SIZE] {
        let mut out = [0u8; SASRELAY_ENCRYPTED_SIZE];
        out[2] = self.sig_len;
        out[3] = self.flags;
        out[4..8].copy_from_slice(&self.sas_scheme);
        out[8..40].copy_from_slice(&self.sashash);
        out
    }

    pub fn from_plaintext(buf: &[u8]) -> Result<Self> {
        if buf.len() != SASRELAY_ENCRYPTED_SIZE {
            return Err(Error::PacketMalformed("SASRelay"));
        }
        let mut sas_scheme = [0u8; 4];
        sas_scheme.copy_from_slice(&buf[4..8]);
        let mut sashash = [0u8; 32];
        sashash.copy_from_slice(&buf[8..40]);
        Ok(SasRelayBody {
            sig_len: buf[2],
            flags: buf[3],
            sas_scheme,
            sashash,
        })
    }
}

impl SasRelayMessage {
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.encrypted.len() != SASRELAY_ENCRYPTED_SIZE {
            return Err(Error::BadParam);
        }
        out.extend_from_slice(&self.hmac);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.encrypted);
        Ok(())
    }

    pub fn unmarshal(r: &mut Cursor<&[u8]>) -> Result<Self> {
        let hmac: [u8; 8] = read_exact_array(r)?;
        let iv: [u8; 16] = read_exact_array(r)?;
        let encrypted: [u8; SASRELAY_ENCRYPTED_SIZE] = read_exact_array(r)?;
        Ok(SasRelayMessage {
            hmac,
            iv,
            encrypted: encrypted.to_vec(),
        })
    }
}
