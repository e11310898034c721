use std::io::Cursor;

use super::*;

/// DHPart1/DHPart2 carry the public value and the truncated IDs of the
/// retained secrets the sender knows for this peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DhPartMessage {
    /// H1, pre-image of the Commit hash image.
    pub hash_image: [u8; 32],
    pub rs1_id: [u8; 8],
    pub rs2_id: [u8; 8],
    pub aux_id: [u8; 8],
    pub pbx_id: [u8; 8],
    /// Public value, sized by the negotiated PK scheme.
    pub pv: Vec<u8>,
    pub hmac: [u8; 8],
}

impl DhPartMessage {
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.pv.len() > MAX_PV_SIZE || self.pv.len() % 4 != 0 {
            return Err(Error::BadParam);
        }
        out.extend_from_slice(&self.hash_image);
        out.extend_from_slice(&self.rs1_id);
        out.extend_from_slice(&self.rs2_id);
        out.extend_from_slice(&self.aux_id);
        out.extend_from_slice(&self.pbx_id);
        out.extend_from_slice(&self.pv);
        out.extend_from_slice(&self.hmac);
        Ok(())
    }

    pub fn unmarshal(r: &mut Cursor<&[u8]>, body_len: usize) -> Result<Self> {
        let fixed = 32 + 4 * RSID_SIZE + HMAC_SIZE;
        let pv_len = body_len
            .checked_sub(fixed)
            .ok_or(Error::PacketMalformed("DHPart"))?;
        if pv_len > MAX_PV_SIZE {
            return Err(Error::PacketMalformed("DHPart"));
        }

        let hash_image: [u8; 32] = read_exact_array(r)?;
        let rs1_id: [u8; 8] = read_exact_array(r)?;
        let rs2_id: [u8; 8] = read_exact_array(r)?;
        let aux_id: [u8; 8] = read_exact_array(r)?;
        let pbx_id: [u8; 8] = read_exact_array(r)?;
        let mut pv = vec![0u8; pv_len];
        std::io::Read::read_exact(r, &mut pv)
            .map_err(|_| Error::PacketMalformed("truncated"))?;
        let hmac: [u8; 8] = read_exact_array(r)?;

        Ok(DhPartMessage {
            hash_image,
            rs1_id,
            rs2_id,
            aux_id,
            pbx_id,
            pv,
            hmac,
        })
    }
}
