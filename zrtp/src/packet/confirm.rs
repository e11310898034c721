use std::io::Cursor;

use super::*;

pub const CONFIRM_FLAG_DISCLOSE: u8 = 0x01;
pub const CONFIRM_FLAG_ALLOWCLEAR: u8 = 0x02;
pub const CONFIRM_FLAG_SAS_VERIFIED: u8 = 0x04;
pub const CONFIRM_FLAG_ENROLLMENT: u8 = 0x08;

/// Length of the CFB-protected region of a Confirm body.
pub const CONFIRM_ENCRYPTED_SIZE: usize = 32 + 2 + 1 + 1 + 4;

/// Confirm1/Confirm2. Everything after the IV travels CFB-encrypted
/// under the sender's ZRTP key; the leading HMAC (keyed with the
/// sender's HMAC key) covers the encrypted region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmMessage {
    pub hmac: [u8; 8],
    pub iv: [u8; 16],
    /// The protected region: on the wire this is ciphertext; decrypted
    /// in place by the receiving stream.
    pub encrypted: Vec<u8>,
}

/// Decrypted view of the protected Confirm fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfirmBody {
    /// H0, the innermost hash chain pre-image.
    pub hash_image: [u8; 32],
    pub sig_len: u8,
    pub disclose: bool,
    pub allowclear: bool,
    pub sas_verified: bool,
    pub enrollment: bool,
    /// Retained-secret cache TTL in seconds.
    pub expire_interval: u32,
}

impl ConfirmBody {
    pub fn to_plaintext(&self) -> [u8; CONFIRM_ENCRYPTED_SIZE] {
        let mut out = [0u8; CONFIRM_ENCRYPTED_SIZE];
        out[..32].copy_from_slice(&self.hash_image);
        out[34] = self.sig_len;
        let mut flags = 0u8;
        if self.disclose {
            flags |= CONFIRM_FLAG_DISCLOSE;
        }
        if self.allowclear {
            flags |= CONFIRM_FLAG_ALLOWCLEAR;
        }
        if self.sas_verified {
            flags |= CONFIRM_FLAG_SAS_VERIFIED;
        }
        if self.enrollment {
            flags |= CONFIRM_FLAG_ENROLLMENT;
        }
        out[35] = flags;
        out[36..40].copy_from_slice(&self.expire_interval.to_be_bytes());
        out
    }

    pub fn from_plaintext(buf: &[u8]) -> Result<Self> {
        if buf.len() != CONFIRM_ENCRYPTED_SIZE {
            return Err(Error::PacketMalformed("Confirm"));
        }
        let mut hash_image = [0u8; 32];
        hash_image.copy_from_slice(&buf[..32]);
        let flags = buf[35];
        Ok(ConfirmBody {
            hash_image,
            sig_len: buf[34],
            disclose: flags & CONFIRM_FLAG_DISCLOSE != 0,
            allowclear: flags & CONFIRM_FLAG_ALLOWCLEAR != 0,
            sas_verified: flags & CONFIRM_FLAG_SAS_VERIFIED != 0,
            enrollment: flags & CONFIRM_FLAG_ENROLLMENT != 0,
            expire_interval: u32::from_be_bytes([buf[36], buf[37], buf[38], buf[39]]),
        })
    }
}

impl ConfirmMessage {
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.encrypted.len() != CONFIRM_ENCRYPTED_SIZE {
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
        let encrypted: [u8; CONFIRM_ENCRYPTED_SIZE] = read_exact_array(r)?;
        Ok(ConfirmMessage {
            hmac,
            iv,
            encrypted: encrypted.to_vec(),
        })
    }
}
