use std::io::Cursor;

use super::*;
use crate::crypto::{CipherId, HashId, PkId, SasId, TagLengthId};

/// Commit pins the component choice and carries the commitment value:
/// a 32-byte hvi for DH mode, or a nonce (plus a keyed HMAC for
/// Preshared) for the fast modes. The hv length tells the mode apart on
/// the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    /// H2, pre-image of the Hello hash image.
    pub hash_image: [u8; 32],
    pub zid: [u8; 12],
    pub hash_scheme: HashId,
    pub cipher_type: CipherId,
    pub auth_tag_len: TagLengthId,
    pub pk_scheme: PkId,
    pub sas_scheme: SasId,
    /// 32 bytes (DH), 24 bytes (Preshared: nonce + keyed hmac) or
    /// 16 bytes (Multistream: nonce).
    pub hv: Vec<u8>,
    pub hmac: [u8; 8],
}

impl CommitMessage {
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        match self.hv.len() {
            len if len == HV_SIZE
                || len == HV_NONCE_SIZE
                || len == HV_NONCE_SIZE + HV_KEY_SIZE => {}
            _ => return Err(Error::BadParam),
        }

        out.extend_from_slice(&self.hash_image);
        out.extend_from_slice(&self.zid);
        out.extend_from_slice(self.hash_scheme.wire_id());
        out.extend_from_slice(self.cipher_type.wire_id());
        out.extend_from_slice(self.auth_tag_len.wire_id());
        out.extend_from_slice(self.pk_scheme.wire_id());
        out.extend_from_slice(self.sas_scheme.wire_id());
        out.extend_from_slice(&self.hv);
        out.extend_from_slice(&self.hmac);
        Ok(())
    }

    pub fn unmarshal(r: &mut Cursor<&[u8]>, body_len: usize) -> Result<Self> {
        let fixed = 32 + 12 + 5 * COMP_TYPE_SIZE + HMAC_SIZE;
        let hv_len = body_len
            .checked_sub(fixed)
            .ok_or(Error::PacketMalformed("Commit"))?;
        if hv_len != HV_SIZE && hv_len != HV_NONCE_SIZE && hv_len != HV_NONCE_SIZE + HV_KEY_SIZE
        {
            return Err(Error::PacketMalformed("Commit"));
        }

        let hash_image: [u8; 32] = read_exact_array(r)?;
        let zid: [u8; 12] = read_exact_array(r)?;

        let hash_id: [u8; 4] = read_exact_array(r)?;
        let cipher_id: [u8; 4] = read_exact_array(r)?;
        let atl_id: [u8; 4] = read_exact_array(r)?;
        let pk_id: [u8; 4] = read_exact_array(r)?;
        let sas_id: [u8; 4] = read_exact_array(r)?;

        let hash_scheme =
            HashId::from_wire(&hash_id).ok_or(Error::ComponentUnsupported("hash"))?;
        let cipher_type =
            CipherId::from_wire(&cipher_id).ok_or(Error::ComponentUnsupported("cipher"))?;
        let auth_tag_len =
            TagLengthId::from_wire(&atl_id).ok_or(Error::ComponentUnsupported("auth tag"))?;
        let pk_scheme = PkId::from_wire(&pk_id).ok_or(Error::ComponentUnsupported("pk"))?;
        let sas_scheme = SasId::from_wire(&sas_id).ok_or(Error::ComponentUnsupported("sas"))?;

        let mut hv = vec![0u8; hv_len];
        std::io::Read::read_exact(r, &mut hv)
            .map_err(|_| Error::PacketMalformed("truncated"))?;
        let hmac: [u8; 8] = read_exact_array(r)?;

        Ok(CommitMessage {
            hash_image,
            zid,
            hash_scheme,
            cipher_type,
            auth_tag_len,
            pk_scheme,
            sas_scheme,
            hv,
            hmac,
        })
    }
}
