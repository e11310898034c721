use std::io::Cursor;

use super::*;
use crate::crypto::{CipherId, HashId, PkId, SasId, TagLengthId};

const FLAG_PASSIVE: u8 = 0x01;
const FLAG_MITM: u8 = 0x02;
const FLAG_SIG: u8 = 0x04;
const FLAG_UNLIMITED: u8 = 0x08;

/// Hello advertises identity, protocol version and the component lists
/// this endpoint is willing to negotiate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HelloMessage {
    pub version: [u8; 4],
    pub client_id: [u8; 16],
    /// H3, the outermost hash chain image.
    pub hash_image: [u8; 32],
    pub zid: [u8; 12],
    pub passive: bool,
    pub mitm: bool,
    pub sig_capable: bool,
    pub unlimited: bool,
    pub hash_schemes: Vec<HashId>,
    pub cipher_types: Vec<CipherId>,
    pub auth_tag_lens: Vec<TagLengthId>,
    pub pk_schemes: Vec<PkId>,
    pub sas_schemes: Vec<SasId>,
    pub hmac: [u8; 8],
}

impl HelloMessage {
    pub fn marshal(&self, out: &mut Vec<u8>) -> Result<()> {
        if self.hash_schemes.len() > 7
            || self.cipher_types.len() > 7
            || self.auth_tag_lens.len() > 7
            || self.pk_schemes.len() > 7
            || self.sas_schemes.len() > 7
        {
            return Err(Error::BadParam);
        }

        out.extend_from_slice(&self.version);
        out.extend_from_slice(&self.client_id);
        out.extend_from_slice(&self.hash_image);
        out.extend_from_slice(&self.zid);

        let mut flags = 0u8;
        if self.passive {
            flags |= FLAG_PASSIVE;
        }
        if self.mitm {
            flags |= FLAG_MITM;
        }
        if self.sig_capable {
            flags |= FLAG_SIG;
        }
        if self.unlimited {
            flags |= FLAG_UNLIMITED;
        }
        out.push(flags);
        out.push(self.hash_schemes.len() as u8);
        out.push(((self.cipher_types.len() as u8) << 4) | self.auth_tag_lens.len() as u8);
        out.push(((self.pk_schemes.len() as u8) << 4) | self.sas_schemes.len() as u8);

        for h in &self.hash_schemes {
            out.extend_from_slice(h.wire_id());
        }
        for c in &self.cipher_types {
            out.extend_from_slice(c.wire_id());
        }
        for a in &self.auth_tag_lens {
            out.extend_from_slice(a.wire_id());
        }
        for p in &self.pk_schemes {
            out.extend_from_slice(p.wire_id());
        }
        for s in &self.sas_schemes {
            out.extend_from_slice(s.wire_id());
        }
        out.extend_from_slice(&self.hmac);
        Ok(())
    }

    pub fn unmarshal(r: &mut Cursor<&[u8]>, body_len: usize) -> Result<Self> {
        let version: [u8; 4] = read_exact_array(r)?;
        let client_id: [u8; 16] = read_exact_array(r)?;
        let hash_image: [u8; 32] = read_exact_array(r)?;
        let zid: [u8; 12] = read_exact_array(r)?;
        let packed: [u8; 4] = read_exact_array(r)?;

        let flags = packed[0];
        let hc = (packed[1] & 0x0f) as usize;
        let cc = (packed[2] >> 4) as usize;
        let ac = (packed[2] & 0x0f) as usize;
        let kc = (packed[3] >> 4) as usize;
        let sc = (packed[3] & 0x0f) as usize;

        let fixed = 4 + 16 + 32 + 12 + 4 + HMAC_SIZE;
        if body_len != fixed + (hc + cc + ac + kc + sc) * COMP_TYPE_SIZE {
            return Err(Error::PacketMalformed("Hello"));
        }

        fn read_comps<T, F: Fn(&[u8]) -> Option<T>>(
            r: &mut Cursor<&[u8]>,
            n: usize,
            parse: F,
        ) -> Result<Vec<T>> {
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                let id: [u8; 4] = read_exact_array(r)?;
                // Unknown identifiers are skipped, not fatal: the peer may
                // support components newer than this build.
                if let Some(c) = parse(&id) {
                    out.push(c);
                }
            }
            Ok(out)
        }

        let hash_schemes = read_comps(r, hc, HashId::from_wire)?;
        let cipher_types = read_comps(r, cc, CipherId::from_wire)?;
        let auth_tag_lens = read_comps(r, ac, TagLengthId::from_wire)?;
        let pk_schemes = read_comps(r, kc, PkId::from_wire)?;
        let sas_schemes = read_comps(r, sc, SasId::from_wire)?;
        let hmac: [u8; 8] = read_exact_array(r)?;

        Ok(HelloMessage {
            version,
            client_id,
            hash_image,
            zid,
            passive: flags & FLAG_PASSIVE != 0,
            mitm: flags & FLAG_MITM != 0,
            sig_capable: flags & FLAG_SIG != 0,
            unlimited: flags & FLAG_UNLIMITED != 0,
            hash_schemes,
            cipher_types,
            auth_tag_lens,
            pk_schemes,
            sas_schemes,
            hmac,
        })
    }
}
