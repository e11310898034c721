use std::sync::Arc;

use super::*;
use crate::crypto::pk::DhExchange;
use crate::crypto::PkId;
use crate::kdf;
use crate::packet::{CommitMessage, ConfirmMessage, DhPartMessage, HV_NONCE_SIZE, HV_SIZE};
use crate::session::{Negotiated, Session};

/// IDs we publish for our retained secrets, under our own role label.
pub(crate) fn own_secret_ids(
    session: &Session,
    hash: crate::crypto::HashId,
    role: Role,
) -> [[u8; 8]; 4] {
    let label = role_label(role);
    let shared = session.shared.lock().expect("session lock");
    let id_of = |v: Option<&[u8]>| match v {
        Some(v) => kdf::secret_id(hash, v, label),
        None => [0u8; 8],
    };
    [
        id_of(shared.secrets.rs1.value()),
        id_of(shared.secrets.rs2.value()),
        id_of(shared.secrets.aux.value()),
        id_of(shared.secrets.pbx.value()),
    ]
}

/// Mode for the next exchange: Multistream once the session has a key,
/// Preshared when the profile leads with it and continuity allows, full
/// DH otherwise.
fn define_stream_mode(
    stream: &Arc<Stream>,
    inner: &StreamInner,
    session: &Session,
    negotiated: &Negotiated,
) -> (StreamMode, PkId) {
    let profile = &session.profile;
    let peer = inner
        .messages
        .peer_hello
        .as_ref()
        .expect("mode decided after discovery");

    let shared = session.shared.lock().expect("session lock");
    if shared.zrtp_session_key.is_some()
        && profile.pk_schemes.contains(&PkId::Mult)
        && peer.pk_schemes.contains(&PkId::Mult)
    {
        return (StreamMode::Multistream, PkId::Mult);
    }

    if profile.pk_schemes.first() == Some(&PkId::Prsh)
        && peer.pk_schemes.contains(&PkId::Prsh)
        && shared.secrets.rs1.cached
    {
        if let Some(peer_zid) = shared.peer_zid {
            let counter = stream.ctx.cache.preshared_counter(session.zid(), &peer_zid);
            if counter < profile.preshared_max_allowed {
                return (StreamMode::Preshared, PkId::Prsh);
            }
            // continuity budget exhausted, force a fresh DH
        }
    }

    (StreamMode::Dh, negotiated.pk_scheme)
}

/// Host or autosecure entry into the Initiator role. May park the
/// stream behind a concurrent DH exchange with a recall timer.
pub(crate) fn start_initiating_secure(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    if !matches!(inner.state, State::Clear | State::StartInitiatingSecure) {
        return Err(Error::WrongState);
    }
    let session = stream.session()?;
    if !may_commit(stream, inner) {
        outbox.protocol(ProtocolEvent::IsPassiveRestriction);
        return Ok(());
    }
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;
    let peer_zid = session.peer_zid().ok_or(Error::WrongState)?;

    if let Some(concurrent) = stream.ctx.dh_exchange_in_progress(&peer_zid, stream.id()) {
        log::debug!(
            "stream {}: concurrent DH on stream {} in flight, parking",
            stream.id(),
            concurrent.id()
        );
        if inner.state != State::StartInitiatingSecure {
            change_state(stream, inner, State::StartInitiatingSecure);
            stream.schedule(TaskKind::Process, stream.ctx.timing.process_t1);
        } else {
            // still blocked at recall time, keep polling
            stream.reschedule(TaskKind::Process, stream.ctx.timing.process_t1);
        }
        outbox.park = Some((concurrent, Arc::clone(stream)));
        return Ok(());
    }
    stream.cancel_task(TaskKind::Process);

    let (mode, pk) = define_stream_mode(stream, inner, &session, &negotiated);
    set_mode(stream, inner, mode);
    inner.role = Role::Initiator;

    let hv = match mode {
        StreamMode::Dh => prepare_dh_half(stream, inner, &session, &negotiated, pk)?,
        StreamMode::Preshared => {
            let psk = preshared_key(&session, &negotiated)?;
            let mut hv = stream.ctx.entropy.random_bytes(HV_NONCE_SIZE)?;
            let mac =
                crate::crypto::hash::hmac_trunc(negotiated.hash, &psk, &hv, 8);
            hv.extend_from_slice(&mac);
            hv
        }
        StreamMode::Multistream => stream.ctx.entropy.random_bytes(HV_NONCE_SIZE)?,
        _ => return Err(Error::WrongState),
    };
    inner.proto.hv = hv.clone();

    let commit = CommitMessage {
        hash_image: inner.messages.h2,
        zid: *session.zid(),
        hash_scheme: negotiated.hash,
        cipher_type: negotiated.cipher,
        auth_tag_len: negotiated.auth_tag_len,
        pk_scheme: pk,
        sas_scheme: negotiated.sas_scheme,
        hv,
        hmac: [0u8; 8],
    };
    let mut raw = Message::Commit(commit.clone()).marshal()?;
    let mac = sign_message(&mut raw, &inner.messages.h1);
    let mut commit = commit;
    commit.hmac = mac;

    inner.messages.commit = Some(commit);
    inner.messages.commit_raw = raw.clone();

    // Fast modes have no DHPart leg; the key material is fixed the
    // moment the Commit exists.
    if mode != StreamMode::Dh {
        derive_fast_mode_keys(inner, &session, &negotiated, mode)?;
    }

    change_state(stream, inner, State::InitiatingSecure);
    outbox.protocol(ProtocolEvent::IsInitiatingSecure);
    outbox.send(MessageType::Commit, raw);
    stream.schedule(TaskKind::Commit, stream.ctx.timing.t2);
    Ok(())
}

/// Generates our DH half and the DHPart2 it will travel in, then the
/// commitment hvi = hash(peer Hello || DHPart2).
fn prepare_dh_half(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    session: &Session,
    negotiated: &Negotiated,
    pk: PkId,
) -> Result<Vec<u8>> {
    let dh = DhExchange::generate(pk)?;
    let ids = own_secret_ids(session, negotiated.hash, Role::Initiator);

    let dhpart = DhPartMessage {
        hash_image: inner.messages.h1,
        rs1_id: ids[0],
        rs2_id: ids[1],
        aux_id: ids[2],
        pbx_id: ids[3],
        pv: dh.public_value().to_vec(),
        hmac: [0u8; 8],
    };
    let mut raw = Message::DhPart2(dhpart.clone()).marshal()?;
    let mac = sign_message(&mut raw, &inner.messages.h0);
    let mut dhpart = dhpart;
    dhpart.hmac = mac;

    let mut hv_input =
        Vec::with_capacity(inner.messages.peer_hello_raw.len() + raw.len());
    hv_input.extend_from_slice(&inner.messages.peer_hello_raw);
    hv_input.extend_from_slice(&raw);
    let mut hv = crate::crypto::hash::digest(negotiated.hash, &hv_input);
    hv.truncate(HV_SIZE);

    inner.dh = Some(dh);
    inner.messages.dhpart = Some(dhpart);
    inner.messages.dhpart_raw = raw;
    Ok(hv)
}

pub(crate) fn preshared_key(session: &Session, negotiated: &Negotiated) -> Result<Vec<u8>> {
    let shared = session.shared.lock().expect("session lock");
    let secrets = &shared.secrets;
    if !secrets.rs1.cached && !secrets.aux.cached && !secrets.pbx.cached {
        return Err(Error::Protocol(ProtocolError::NoSharedSecret));
    }
    Ok(kdf::compute_preshared_key(
        negotiated.hash,
        secrets.rs1.cached.then(|| secrets.rs1.value()).flatten(),
        secrets.aux.cached.then(|| secrets.aux.value()).flatten(),
        secrets.pbx.cached.then(|| secrets.pbx.value()).flatten(),
    ))
}

/// Multistream/Preshared s0 and keys; total hash covers the responder
/// Hello and the Commit only.
pub(crate) fn derive_fast_mode_keys(
    inner: &mut StreamInner,
    session: &Session,
    negotiated: &Negotiated,
    mode: StreamMode,
) -> Result<()> {
    let (responder_hello, commit): (&[u8], &[u8]) = match inner.role {
        Role::Initiator => (&inner.messages.peer_hello_raw, &inner.messages.commit_raw),
        _ => (&inner.messages.hello_raw, &inner.messages.peer_commit_raw),
    };
    let mut th_input = Vec::with_capacity(responder_hello.len() + commit.len());
    th_input.extend_from_slice(responder_hello);
    th_input.extend_from_slice(commit);
    let total_hash = crate::crypto::hash::digest(negotiated.hash, &th_input);

    let context = secure::stream_kdf_context(session, inner.role, &total_hash)?;
    let peer_zid = session.peer_zid().ok_or(Error::WrongState)?;
    let (zid_i, zid_r) = match inner.role {
        Role::Initiator => (*session.zid(), peer_zid),
        _ => (peer_zid, *session.zid()),
    };

    let s0 = match mode {
        StreamMode::Multistream => {
            let shared = session.shared.lock().expect("session lock");
            let key = shared
                .zrtp_session_key
                .as_ref()
                .ok_or(Error::Protocol(ProtocolError::NoSharedSecret))?;
            kdf::compute_multistream_s0(negotiated.hash, key, &context)
        }
        StreamMode::Preshared => {
            let psk = preshared_key(session, negotiated)?;
            kdf::compute_s0(
                negotiated.hash,
                &psk,
                &zid_i,
                &zid_r,
                &total_hash,
                &[None, None, None],
            )
        }
        _ => return Err(Error::WrongState),
    };

    inner.proto.total_hash = total_hash;
    secure::install_keys(inner, negotiated, s0, &context)
}

/// DHPart1 from the responder: the DH result and every key fall out.
pub(crate) fn on_dhpart1(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    dhpart: DhPartMessage,
    raw: &[u8],
) -> Result<()> {
    if inner.state != State::InitiatingSecure || inner.mode != StreamMode::Dh {
        return Ok(());
    }
    let session = stream.session()?;
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;

    // chain: H1r hashes up to the peer Hello image, and reveals the key
    // its Hello HMAC was computed with
    let h2r = sha256_image(&dhpart.hash_image);
    let peer_hello = inner.messages.peer_hello.as_ref().ok_or(Error::WrongState)?;
    if sha256_image(&h2r) != peer_hello.hash_image
        || verify_chained_hmac(&inner.messages.peer_hello_raw, &h2r).is_err()
    {
        outbox.security(SecurityEvent::WrongMessageHmac);
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::WrongMessageHmac,
        );
    }

    let dh = inner.dh.as_ref().ok_or(Error::WrongState)?;
    let dh_result = match dh.shared_secret(&dhpart.pv) {
        Ok(v) => v,
        Err(_) => {
            log::error!("stream {}: degenerate DH public value", stream.id());
            return error::enter_initiating_error(
                stream,
                inner,
                outbox,
                ProtocolError::PossibleMitm1,
            );
        }
    };

    stream.cancel_task(TaskKind::Commit);

    let total_hash = {
        let m = &inner.messages;
        let mut input = Vec::with_capacity(
            m.peer_hello_raw.len() + m.commit_raw.len() + raw.len() + m.dhpart_raw.len(),
        );
        input.extend_from_slice(&m.peer_hello_raw);
        input.extend_from_slice(&m.commit_raw);
        input.extend_from_slice(raw);
        input.extend_from_slice(&m.dhpart_raw);
        crate::crypto::hash::digest(negotiated.hash, &input)
    };
    let dhss = crate::crypto::hash::digest(negotiated.hash, &dh_result);

    let sort = secure::sort_secrets(
        &session,
        Role::Initiator,
        negotiated.hash,
        &dhpart.rs1_id,
        &dhpart.rs2_id,
        &dhpart.aux_id,
        &dhpart.pbx_id,
    );
    if sort.rs_mismatch {
        log::warn!(
            "stream {}: cached retained secret does not match the peer's",
            stream.id()
        );
        outbox.security(SecurityEvent::MitmWarning);
    }

    let peer_zid = session.peer_zid().ok_or(Error::WrongState)?;
    let s0 = kdf::compute_s0(
        negotiated.hash,
        &dhss,
        session.zid(),
        &peer_zid,
        &total_hash,
        &[sort.s1.as_deref(), sort.s2.as_deref(), sort.s3.as_deref()],
    );
    let context = secure::stream_kdf_context(&session, Role::Initiator, &total_hash)?;
    secure::install_keys(inner, &negotiated, s0, &context)?;

    inner.proto.total_hash = total_hash;
    inner.proto.dhss = dhss;
    inner.messages.peer_dhpart = Some(dhpart);
    inner.messages.peer_dhpart_raw = raw.to_vec();

    change_state(stream, inner, State::WaitConfirm1);
    outbox.send(MessageType::DhPart2, inner.messages.dhpart_raw.clone());
    stream.schedule(TaskKind::DhPart, stream.ctx.timing.t2);
    Ok(())
}

pub(crate) fn on_confirm1(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    confirm: ConfirmMessage,
) -> Result<()> {
    let fast = inner.mode != StreamMode::Dh;
    let expected_state = if fast {
        State::InitiatingSecure
    } else {
        State::WaitConfirm1
    };
    if inner.state != expected_state || inner.role != Role::Initiator {
        return Ok(());
    }
    let session = stream.session()?;
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;

    let body = match secure::process_peer_confirm(inner, &negotiated, &confirm) {
        Ok(body) => body,
        Err(_) => {
            log::error!("stream {}: Confirm1 failed authentication", stream.id());
            return error::enter_initiating_error(
                stream,
                inner,
                outbox,
                ProtocolError::AuthDecryptFail,
            );
        }
    };

    // H0r closes the responder chain
    let chain_ok = if fast {
        let h3r = sha256_image(&sha256_image(&sha256_image(&body.hash_image)));
        let h2r = sha256_image(&sha256_image(&body.hash_image));
        inner
            .messages
            .peer_hello
            .as_ref()
            .map(|h| h.hash_image == h3r)
            .unwrap_or(false)
            && verify_chained_hmac(&inner.messages.peer_hello_raw, &h2r).is_ok()
    } else {
        let h1r = sha256_image(&body.hash_image);
        inner
            .messages
            .peer_dhpart
            .as_ref()
            .map(|d| d.hash_image == h1r)
            .unwrap_or(false)
            && verify_chained_hmac(&inner.messages.peer_dhpart_raw, &body.hash_image).is_ok()
    };
    if !chain_ok {
        outbox.security(SecurityEvent::WrongMessageHmac);
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::WrongMessageHmac,
        );
    }

    if fast {
        stream.cancel_task(TaskKind::Commit);
    } else {
        stream.cancel_task(TaskKind::DhPart);
    }

    secure::apply_peer_confirm(inner, &session.profile, &body);
    inner.messages.peer_confirm = Some(confirm);

    let our_confirm = secure::build_confirm(stream, inner, &negotiated, &session.profile)?;
    let raw = Message::Confirm2(our_confirm.clone()).marshal()?;
    inner.messages.confirm = Some(our_confirm);
    inner.messages.confirm_raw = raw.clone();

    change_state(stream, inner, State::WaitConfirmAck);
    outbox.send(MessageType::Confirm2, raw);
    stream.schedule(TaskKind::Confirm, stream.ctx.timing.t2);
    Ok(())
}

pub(crate) fn on_conf2ack(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    if inner.state != State::WaitConfirmAck {
        return Ok(());
    }
    stream.cancel_task(TaskKind::Confirm);
    secure::enter_secure(stream, inner, outbox)
}
