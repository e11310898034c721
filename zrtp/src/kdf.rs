#[cfg(test)]
mod kdf_test;

use crate::crypto::hash::{self, HashCtx};
use crate::crypto::HashId;
use crate::packet::{HMAC_SIZE, ZID_SIZE};

pub const KDF_STR: &[u8] = b"ZRTP-HMAC-KDF";

pub const LABEL_INITIATOR_HMAC_KEY: &str = "Initiator HMAC key";
pub const LABEL_RESPONDER_HMAC_KEY: &str = "Responder HMAC key";
pub const LABEL_INITIATOR_ZRTP_KEY: &str = "Initiator ZRTP key";
pub const LABEL_RESPONDER_ZRTP_KEY: &str = "Responder ZRTP key";
pub const LABEL_INITIATOR_SRTP_KEY: &str = "Initiator SRTP master key";
pub const LABEL_INITIATOR_SRTP_SALT: &str = "Initiator SRTP master salt";
pub const LABEL_RESPONDER_SRTP_KEY: &str = "Responder SRTP master key";
pub const LABEL_RESPONDER_SRTP_SALT: &str = "Responder SRTP master salt";
pub const LABEL_SAS: &str = "SAS";
pub const LABEL_RETAINED_SECRET: &str = "retained secret";
pub const LABEL_SESSION_KEY: &str = "ZRTP Session Key";
pub const LABEL_MULTISTREAM: &str = "ZRTP MSK";
pub const LABEL_PRESHARED: &str = "ZRTP PSK";

pub const ROLE_INITIATOR: &[u8] = b"Initiator";
pub const ROLE_RESPONDER: &[u8] = b"Responder";
pub const GOCLEAR_STR: &[u8] = b"GoClear";

const SRTP_SALT_BITS: u32 = 112;

/// KDF(KI, Label, Context, L) per the ZRTP key derivation construction:
/// HMAC(KI, be32(1) || Label || 0x00 || Context || be32(L)), truncated to
/// the leftmost L bits.
pub fn kdf(hash: HashId, ki: &[u8], label: &str, context: &[u8], out_bits: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + label.len() + 1 + context.len() + 4);
    data.extend_from_slice(&1u32.to_be_bytes());
    data.extend_from_slice(label.as_bytes());
    data.push(0);
    data.extend_from_slice(context);
    data.extend_from_slice(&out_bits.to_be_bytes());

    let mut out = hash::hmac(hash, ki, &data);
    out.truncate((out_bits as usize).div_ceil(8));
    out
}

/// KDF context: ZIDi || ZIDr || total_hash.
pub fn kdf_context(zid_i: &[u8; ZID_SIZE], zid_r: &[u8; ZID_SIZE], total_hash: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * ZID_SIZE + total_hash.len());
    out.extend_from_slice(zid_i);
    out.extend_from_slice(zid_r);
    out.extend_from_slice(total_hash);
    out
}

/// s0 assembly. `key_material` is the hashed DH result for DH streams or
/// the preshared key for Preshared streams; `shared` holds up to three
/// retained secrets both sides proved knowledge of, in rs1, rs2, aux,
/// pbx order. Absent slots contribute a zero length.
pub fn compute_s0(
    hash: HashId,
    key_material: &[u8],
    zid_i: &[u8; ZID_SIZE],
    zid_r: &[u8; ZID_SIZE],
    total_hash: &[u8],
    shared: &[Option<&[u8]>; 3],
) -> Vec<u8> {
    let mut ctx = HashCtx::new(hash);
    ctx.update(&1u32.to_be_bytes());
    ctx.update(key_material);
    ctx.update(KDF_STR);
    ctx.update(zid_i);
    ctx.update(zid_r);
    ctx.update(total_hash);
    for s in shared {
        match s {
            Some(v) => {
                ctx.update(&(v.len() as u32).to_be_bytes());
                ctx.update(v);
            }
            None => ctx.update(&0u32.to_be_bytes()),
        }
    }
    ctx.finalize()
}

/// Truncated ID a side publishes for one retained secret in DHPart.
/// The role string is the publisher's protocol role.
pub fn secret_id(hash: HashId, secret: &[u8], role: &[u8]) -> [u8; HMAC_SIZE] {
    let mac = hash::hmac_trunc(hash, secret, role, HMAC_SIZE);
    let mut out = [0u8; HMAC_SIZE];
    out.copy_from_slice(&mac);
    out
}

/// Preshared key: hash(len(rs1) || rs1 || len(aux) || aux || len(pbx) || pbx).
pub fn compute_preshared_key(
    hash: HashId,
    rs1: Option<&[u8]>,
    aux: Option<&[u8]>,
    pbx: Option<&[u8]>,
) -> Vec<u8> {
    let mut ctx = HashCtx::new(hash);
    for s in [rs1, aux, pbx] {
        match s {
            Some(v) => {
                ctx.update(&(v.len() as u32).to_be_bytes());
                ctx.update(v);
            }
            None => ctx.update(&0u32.to_be_bytes()),
        }
    }
    ctx.finalize()
}

/// Everything a stream expands from s0 before entering Secure.
pub struct StreamKeyMaterial {
    /// Keys this endpoint signs and encrypts with.
    pub hmackey: Vec<u8>,
    pub zrtp_key: Vec<u8>,
    /// Keys the peer's Confirm/GoClear traffic is checked against.
    pub peer_hmackey: Vec<u8>,
    pub peer_zrtp_key: Vec<u8>,
    pub srtp_local: srtp::StreamKeys,
    pub srtp_remote: srtp::StreamKeys,
    /// Full SAS digest; rendering truncates it further.
    pub sashash: Vec<u8>,
    pub new_rs1: Vec<u8>,
    pub session_key: Vec<u8>,
}

impl Drop for StreamKeyMaterial {
    fn drop(&mut self) {
        for b in self
            .hmackey
            .iter_mut()
            .chain(self.zrtp_key.iter_mut())
            .chain(self.peer_hmackey.iter_mut())
            .chain(self.peer_zrtp_key.iter_mut())
            .chain(self.sashash.iter_mut())
            .chain(self.new_rs1.iter_mut())
            .chain(self.session_key.iter_mut())
        {
            *b = 0;
        }
    }
}

/// Expands s0 into the per-stream keys. The initiator-labeled set is
/// "ours" when this endpoint won the Initiator role.
pub fn derive_stream_keys(
    hash: HashId,
    s0: &[u8],
    context: &[u8],
    cipher_key_len: usize,
    is_initiator: bool,
) -> StreamKeyMaterial {
    let hash_bits = (hash.digest_len() * 8) as u32;
    let cipher_bits = (cipher_key_len * 8) as u32;

    let init_hmac = kdf(hash, s0, LABEL_INITIATOR_HMAC_KEY, context, hash_bits);
    let resp_hmac = kdf(hash, s0, LABEL_RESPONDER_HMAC_KEY, context, hash_bits);
    let init_zrtp = kdf(hash, s0, LABEL_INITIATOR_ZRTP_KEY, context, cipher_bits);
    let resp_zrtp = kdf(hash, s0, LABEL_RESPONDER_ZRTP_KEY, context, cipher_bits);

    let init_srtp = srtp::StreamKeys::new(
        kdf(hash, s0, LABEL_INITIATOR_SRTP_KEY, context, cipher_bits),
        kdf(hash, s0, LABEL_INITIATOR_SRTP_SALT, context, SRTP_SALT_BITS),
    );
    let resp_srtp = srtp::StreamKeys::new(
        kdf(hash, s0, LABEL_RESPONDER_SRTP_KEY, context, cipher_bits),
        kdf(hash, s0, LABEL_RESPONDER_SRTP_SALT, context, SRTP_SALT_BITS),
    );

    let sashash = kdf(hash, s0, LABEL_SAS, context, 256);
    let new_rs1 = kdf(hash, s0, LABEL_RETAINED_SECRET, context, 256);
    let session_key = kdf(hash, s0, LABEL_SESSION_KEY, context, hash_bits);

    let (hmackey, peer_hmackey, zrtp_key, peer_zrtp_key, srtp_local, srtp_remote) =
        if is_initiator {
            (init_hmac, resp_hmac, init_zrtp, resp_zrtp, init_srtp, resp_srtp)
        } else {
            (resp_hmac, init_hmac, resp_zrtp, init_zrtp, resp_srtp, init_srtp)
        };

    StreamKeyMaterial {
        hmackey,
        zrtp_key,
        peer_hmackey,
        peer_zrtp_key,
        srtp_local,
        srtp_remote,
        sashash,
        new_rs1,
        session_key,
    }
}

/// s0 for a Multistream stream: expanded from the session key with a
/// stream-specific total hash, no DH.
pub fn compute_multistream_s0(hash: HashId, session_key: &[u8], context: &[u8]) -> Vec<u8> {
    kdf(
        hash,
        session_key,
        LABEL_MULTISTREAM,
        context,
        (hash.digest_len() * 8) as u32,
    )
}

/// Keyed HMAC over the GoClear constant proving a teardown request is
/// authentic.
pub fn clear_hmac(hash: HashId, hmackey: &[u8]) -> [u8; HMAC_SIZE] {
    let mac = hash::hmac_trunc(hash, hmackey, GOCLEAR_STR, HMAC_SIZE);
    let mut out = [0u8; HMAC_SIZE];
    out.copy_from_slice(&mac);
    out
}
