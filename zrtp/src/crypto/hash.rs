use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha384};

use super::HashId;
use crate::error::{Error, Result};

impl HashId {
    pub fn digest_len(&self) -> usize {
        match self {
            HashId::S256 => 32,
            HashId::S384 => 48,
        }
    }
}

/// Incremental digest over the negotiated hash.
pub enum HashCtx {
    Sha256(Sha256),
    Sha384(Sha384),
}

impl HashCtx {
    pub fn new(id: HashId) -> Self {
        match id {
            HashId::S256 => HashCtx::Sha256(Sha256::new()),
            HashId::S384 => HashCtx::Sha384(Sha384::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            HashCtx::Sha256(h) => h.update(data),
            HashCtx::Sha384(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            HashCtx::Sha256(h) => h.finalize().to_vec(),
            HashCtx::Sha384(h) => h.finalize().to_vec(),
        }
    }
}

pub fn digest(id: HashId, data: &[u8]) -> Vec<u8> {
    let mut ctx = HashCtx::new(id);
    ctx.update(data);
    ctx.finalize()
}

pub fn hmac(id: HashId, key: &[u8], data: &[u8]) -> Vec<u8> {
    match id {
        HashId::S256 => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                .expect("hmac accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashId::S384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key)
                .expect("hmac accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// Truncated HMAC used for message HMACs and retained secret IDs.
pub fn hmac_trunc(id: HashId, key: &[u8], data: &[u8], len: usize) -> Vec<u8> {
    let mut out = hmac(id, key, data);
    out.truncate(len);
    out
}

/// Known-answer self-test, run once at component registration.
pub fn self_test(id: HashId) -> Result<()> {
    match id {
        HashId::S256 => {
            // FIPS 180-2 "abc" vector
            let d = digest(id, b"abc");
            let expected: [u8; 32] = [
                0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d,
                0xae, 0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10,
                0xff, 0x61, 0xf2, 0x00, 0x15, 0xad,
            ];
            if d != expected {
                return Err(Error::AlgoFail);
            }
            // RFC 4231 test case 2
            let mac = hmac(id, b"Jefe", b"what do ya want for nothing?");
            let expected_mac: [u8; 32] = [
                0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08,
                0x95, 0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec,
                0x58, 0xb9, 0x64, 0xec, 0x38, 0x43,
            ];
            if mac != expected_mac {
                return Err(Error::AlgoFail);
            }
        }
        HashId::S384 => {
            let d = digest(id, b"abc");
            let expected: [u8; 48] = [
                0xcb, 0x00, 0x75, 0x3f, 0x45, 0xa3, 0x5e, 0x8b, 0xb5, 0xa0, 0x3d, 0x69, 0x9a,
                0xc6, 0x50, 0x07, 0x27, 0x2c, 0x32, 0xab, 0x0e, 0xde, 0xd1, 0x63, 0x1a, 0x8b,
                0x60, 0x5a, 0x43, 0xff, 0x5b, 0xed, 0x80, 0x86, 0x07, 0x2b, 0xa1, 0xe7, 0xcc,
                0x23, 0x58, 0xba, 0xec, 0xa1, 0x34, 0xc8, 0x25, 0xa7,
            ];
            if d != expected {
                return Err(Error::AlgoFail);
            }
        }
    }
    Ok(())
}
