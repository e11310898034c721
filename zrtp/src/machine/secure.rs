use std::sync::Arc;

use subtle::ConstantTimeEq;

use super::*;
use crate::cache::RetainedSecret;
use crate::crypto::{cipher, sas, CipherId, TagLengthId};
use crate::engine::unix_now;
use crate::kdf;
use crate::packet::confirm::{ConfirmBody, CONFIRM_ENCRYPTED_SIZE};
use crate::packet::ConfirmMessage;
use crate::session::{Negotiated, Session};
use crate::stream::{PendingKeys, StreamCrypto};

/// Outcome of the retained-secret sort against the IDs the peer
/// published in its DHPart.
pub(crate) struct SortOutcome {
    pub s1: Option<Vec<u8>>,
    pub s2: Option<Vec<u8>>,
    pub s3: Option<Vec<u8>>,
    /// A cached rs1 existed but the peer proved a different value.
    pub rs_mismatch: bool,
}

/// Matches our retained secrets against the peer's published IDs.
/// `my_role` decides which role label the peer used for its IDs.
pub(crate) fn sort_secrets(
    session: &Session,
    my_role: Role,
    hash: crate::crypto::HashId,
    peer_rs1: &[u8; 8],
    peer_rs2: &[u8; 8],
    peer_aux: &[u8; 8],
    peer_pbx: &[u8; 8],
) -> SortOutcome {
    let peer_label = match my_role {
        Role::Initiator => kdf::ROLE_RESPONDER,
        _ => kdf::ROLE_INITIATOR,
    };

    let mut shared = session.shared.lock().expect("session lock");
    let secrets = &mut shared.secrets;

    let expected = |value: Option<&[u8]>| value.map(|v| kdf::secret_id(hash, v, peer_label));

    let mut s1 = None;
    if let Some(id) = expected(secrets.rs1.value()) {
        if id == *peer_rs1 || id == *peer_rs2 {
            secrets.rs1.matched = true;
            s1 = secrets.rs1.value.clone();
        }
    }
    if s1.is_none() {
        if let Some(id) = expected(secrets.rs2.value()) {
            if id == *peer_rs1 || id == *peer_rs2 {
                secrets.rs2.matched = true;
                s1 = secrets.rs2.value.clone();
            }
        }
    }

    let mut s2 = None;
    if let Some(id) = expected(secrets.aux.value()) {
        if id == *peer_aux && secrets.aux.cached {
            secrets.aux.matched = true;
            s2 = secrets.aux.value.clone();
        }
    }

    let mut s3 = None;
    if let Some(id) = expected(secrets.pbx.value()) {
        if id == *peer_pbx && secrets.pbx.cached {
            secrets.pbx.matched = true;
            s3 = secrets.pbx.value.clone();
        }
    }

    // A cached, unexpired rs1 the peer does not know is either a lost
    // peer cache or a relay in the middle. The protocol continues; the
    // user re-verifies the SAS.
    let rs_mismatch = secrets.rs1.cached && !secrets.rs1.matched && !secrets.rs2.matched;
    if rs_mismatch {
        secrets.rs1.wrong = true;
        shared.mitm_alert_detected = true;
    }

    SortOutcome {
        s1,
        s2,
        s3,
        rs_mismatch,
    }
}

/// The KDF context ZIDi || ZIDr || total_hash for this stream's role.
pub(crate) fn stream_kdf_context(
    session: &Session,
    role: Role,
    total_hash: &[u8],
) -> Result<Vec<u8>> {
    let peer = session.peer_zid().ok_or(Error::WrongState)?;
    let (zid_i, zid_r) = match role {
        Role::Initiator => (*session.zid(), peer),
        _ => (peer, *session.zid()),
    };
    Ok(kdf::kdf_context(&zid_i, &zid_r, total_hash))
}

/// Expands s0 into every per-stream key and stashes the results on the
/// stream: signing keys immediately, the rest pending for Secure entry.
pub(crate) fn install_keys(
    inner: &mut StreamInner,
    negotiated: &Negotiated,
    s0: Vec<u8>,
    context: &[u8],
) -> Result<()> {
    let is_initiator = inner.role == Role::Initiator;
    let material = kdf::derive_stream_keys(
        negotiated.hash,
        &s0,
        context,
        negotiated.cipher.key_len(),
        is_initiator,
    );

    inner.crypto = Some(StreamCrypto {
        hmackey: material.hmackey.clone(),
        peer_hmackey: material.peer_hmackey.clone(),
        zrtp_key: material.zrtp_key.clone(),
        peer_zrtp_key: material.peer_zrtp_key.clone(),
    });
    inner.pending = Some(PendingKeys {
        srtp_local: material.srtp_local.clone(),
        srtp_remote: material.srtp_remote.clone(),
        sashash: material.sashash.clone(),
        new_rs1: material.new_rs1.clone(),
        session_key: material.session_key.clone(),
    });
    inner.proto.s0 = s0;
    Ok(())
}

/// Builds our Confirm: body CFB-encrypted under our ZRTP key, HMAC over
/// the ciphertext under our HMAC key.
pub(crate) fn build_confirm(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    negotiated: &Negotiated,
    profile: &crate::config::Profile,
) -> Result<ConfirmMessage> {
    let crypto = inner.crypto.as_ref().ok_or(Error::WrongState)?;

    let body = ConfirmBody {
        hash_image: inner.messages.h0,
        sig_len: 0,
        disclose: profile.disclose_bit,
        allowclear: profile.allowclear,
        sas_verified: stream.session()?.verified(),
        enrollment: inner.mitm_mode == crate::stream::MitmMode::RegServer,
        expire_interval: profile.cache_ttl,
    };

    let iv: [u8; 16] = stream.ctx.entropy.random_array()?;
    let mut encrypted = body.to_plaintext().to_vec();
    cipher::cfb_encrypt(negotiated.cipher, &crypto.zrtp_key, &iv, &mut encrypted)?;

    let mac = crate::crypto::hash::hmac_trunc(negotiated.hash, &crypto.hmackey, &encrypted, 8);
    let mut hmac = [0u8; 8];
    hmac.copy_from_slice(&mac);

    Ok(ConfirmMessage {
        hmac,
        iv,
        encrypted,
    })
}

/// Verifies and decrypts a peer Confirm. An HMAC or size failure is the
/// auth_decrypt condition.
pub(crate) fn process_peer_confirm(
    inner: &StreamInner,
    negotiated: &Negotiated,
    msg: &ConfirmMessage,
) -> Result<ConfirmBody> {
    let crypto = inner.crypto.as_ref().ok_or(Error::WrongState)?;
    if msg.encrypted.len() != CONFIRM_ENCRYPTED_SIZE {
        return Err(Error::Protocol(ProtocolError::AuthDecryptFail));
    }

    let mac = crate::crypto::hash::hmac_trunc(
        negotiated.hash,
        &crypto.peer_hmackey,
        &msg.encrypted,
        8,
    );
    // constant time, a Confirm forger gets no timing oracle
    if mac.ct_eq(&msg.hmac).unwrap_u8() != 1 {
        return Err(Error::Protocol(ProtocolError::AuthDecryptFail));
    }

    let mut plain = msg.encrypted.clone();
    cipher::cfb_decrypt(negotiated.cipher, &crypto.peer_zrtp_key, &msg.iv, &mut plain)?;
    ConfirmBody::from_plaintext(&plain)
}

/// Folds the peer's Confirm flags into the stream.
pub(crate) fn apply_peer_confirm(
    inner: &mut StreamInner,
    profile: &crate::config::Profile,
    body: &ConfirmBody,
) {
    inner.allowclear = profile.allowclear && body.allowclear;
    inner.peer_disclose = body.disclose;
    inner.peer_sas_verified = body.sas_verified;
    inner.peer_enrollment = body.enrollment;

    // zero from the peer reads as "no expiry"
    let peer_ttl = if body.expire_interval == 0 {
        u32::MAX
    } else {
        body.expire_interval
    };
    inner.cache_ttl = profile.cache_ttl.min(peer_ttl);
}

fn srtp_profile(cipher: CipherId, tag: TagLengthId, feedback: bool) -> srtp::ProtectionProfile {
    match (cipher, tag, feedback) {
        (CipherId::Aes1, TagLengthId::Hs80, false) => {
            srtp::ProtectionProfile::Aes128CmHmacSha1_80
        }
        (CipherId::Aes1, TagLengthId::Hs32, false) => {
            srtp::ProtectionProfile::Aes128CmHmacSha1_32
        }
        (CipherId::Aes3, TagLengthId::Hs80, false) => {
            srtp::ProtectionProfile::Aes256CmHmacSha1_80
        }
        (CipherId::Aes3, TagLengthId::Hs32, false) => {
            srtp::ProtectionProfile::Aes256CmHmacSha1_32
        }
        (CipherId::Aes1, TagLengthId::Hs80, true) => {
            srtp::ProtectionProfile::Aes128CfbHmacSha1_80
        }
        (CipherId::Aes1, TagLengthId::Hs32, true) => {
            srtp::ProtectionProfile::Aes128CfbHmacSha1_32
        }
        (CipherId::Aes3, TagLengthId::Hs80, true) => {
            srtp::ProtectionProfile::Aes256CfbHmacSha1_80
        }
        (CipherId::Aes3, TagLengthId::Hs32, true) => {
            srtp::ProtectionProfile::Aes256CfbHmacSha1_32
        }
    }
}

/// Final transition: install SRTP, render the SAS once per session,
/// rotate retained secrets, wipe negotiation crypto.
pub(crate) fn enter_secure(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    let session = stream.session()?;
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;
    let pending = inner.pending.take().ok_or(Error::WrongState)?;
    let peer_zid = session.peer_zid().ok_or(Error::WrongState)?;

    let protection = srtp::SessionProtection::new(
        srtp_profile(
            negotiated.cipher,
            negotiated.auth_tag_len,
            session.profile.srtp_feedback_mode,
        ),
        &pending.srtp_local,
        &pending.srtp_remote,
    )?;
    inner.srtp = Some(protection);

    {
        let mut shared = session.shared.lock().expect("session lock");
        if !shared.sas_computed {
            shared.sas = sas::render(negotiated.sas_scheme, &pending.sashash);
            shared.sasbin = pending.sashash.clone();
            shared.sas_computed = true;
        }
        if inner.mode != StreamMode::Multistream {
            shared.zrtp_session_key = Some(pending.session_key.clone());
        }
    }

    let now = unix_now();
    let cache = &stream.ctx.cache;
    match inner.mode {
        StreamMode::Dh => {
            let rs = RetainedSecret::new(pending.new_rs1.clone(), now, inner.cache_ttl);
            cache.put(session.zid(), &peer_zid, &rs);
            cache.set_preshared_counter(session.zid(), &peer_zid, 0);
            cache.reset_since(session.zid(), &peer_zid, now);

            let mut shared = session.shared.lock().expect("session lock");
            let old_rs1 = std::mem::take(&mut shared.secrets.rs1);
            shared.secrets.rs2 = old_rs1;
            shared.secrets.rs1 = crate::session::SecretSlot {
                value: Some(pending.new_rs1.clone()),
                cached: true,
                matched: false,
                wrong: false,
                ttl: inner.cache_ttl,
                lastused_at: now,
            };
        }
        StreamMode::Preshared => {
            let counter = cache.preshared_counter(session.zid(), &peer_zid);
            cache.set_preshared_counter(session.zid(), &peer_zid, counter + 1);
        }
        _ => {}
    }

    // negotiation crypto is done; only the signing keys stay
    inner.proto = Default::default();
    inner.dh = None;
    drop(pending);

    change_state(stream, inner, State::Secure);
    outbox.protocol(ProtocolEvent::IsSecure);
    outbox.events.push(Emitted::Secure);

    if inner.peer_enrollment {
        inner.mitm_mode = crate::stream::MitmMode::RegClient;
        outbox.protocol(ProtocolEvent::IsClientEnrollment);
    }
    outbox.protocol(ProtocolEvent::IsSecureDone);

    if let Some(parked) = inner.concurrent.take() {
        outbox.resume.push(parked);
    }

    log::info!(
        "stream {}: SECURE ({:?} mode, {} {})",
        stream.id(),
        inner.mode,
        negotiated.cipher,
        negotiated.auth_tag_len,
    );
    Ok(())
}
