use std::sync::Arc;

use super::*;
use crate::crypto::pk::{validate_public_value, DhExchange};
use crate::kdf;
use crate::packet::{CommitMessage, ConfirmMessage, DhPartMessage, HV_NONCE_SIZE, HV_SIZE};

/// Commit from the peer. Covers the plain responder path, the implicit
/// HelloAck, duplicates, and the simultaneous-Commit tie-break.
pub(crate) fn on_commit(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    commit: CommitMessage,
    raw: &[u8],
) -> Result<()> {
    if inner.messages.peer_hello.is_none() {
        // a Commit before any Hello has nothing to bind to
        return Ok(());
    }

    match inner.state {
        State::WaitHelloAck => {
            // Commit acknowledges our Hello just like a HelloAck would
            stream.cancel_task(TaskKind::Hello);
            inner.is_helloack_received = true;
            change_state(stream, inner, State::Clear);
            outbox.protocol(ProtocolEvent::IsClear);
        }
        State::Clear => {}
        State::StartInitiatingSecure => {
            // parked behind a concurrent exchange; answering costs nothing
            stream.cancel_task(TaskKind::Process);
        }
        State::InitiatingSecure => {
            // both sides committed; the larger commitment value wins
            if !tie_break_lost(inner, &commit) {
                log::debug!(
                    "stream {}: simultaneous Commit, we win the tie-break",
                    stream.id()
                );
                return Ok(());
            }
            log::debug!(
                "stream {}: simultaneous Commit, peer wins the tie-break",
                stream.id()
            );
            stream.cancel_task(TaskKind::Commit);
            inner.messages.commit = None;
            inner.messages.commit_raw.clear();
            inner.crypto = None;
            inner.pending = None;
        }
        State::PendingSecure => {
            // retransmitted Commit, our answer was lost
            if inner.mode == StreamMode::Dh {
                outbox.send(MessageType::DhPart1, inner.messages.dhpart_raw.clone());
            } else {
                outbox.send(MessageType::Confirm1, inner.messages.confirm_raw.clone());
            }
            return Ok(());
        }
        State::WaitConfirm2 if inner.mode != StreamMode::Dh => {
            outbox.send(MessageType::Confirm1, inner.messages.confirm_raw.clone());
            return Ok(());
        }
        _ => return Ok(()),
    }

    if must_reject_commit(stream, inner)? {
        log::info!(
            "stream {}: passive rules reject the peer Commit",
            stream.id()
        );
        outbox.protocol(ProtocolEvent::IsPassiveRestriction);
        return Ok(());
    }

    // H2 proves the Hello chain
    let peer_hello = inner.messages.peer_hello.as_ref().ok_or(Error::WrongState)?;
    if sha256_image(&commit.hash_image) != peer_hello.hash_image
        || verify_chained_hmac(&inner.messages.peer_hello_raw, &commit.hash_image).is_err()
    {
        outbox.security(SecurityEvent::WrongMessageHmac);
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::WrongMessageHmac,
        );
    }

    let session = stream.session()?;

    // the responder adopts the initiator's component choice, provided
    // our profile lists every id
    let profile = &session.profile;
    if !profile.hash_schemes.contains(&commit.hash_scheme) {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedHash,
        );
    }
    if !profile.cipher_types.contains(&commit.cipher_type) {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedCipher,
        );
    }
    if !profile.auth_tag_lens.contains(&commit.auth_tag_len) {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedAuthTag,
        );
    }
    if !profile.sas_schemes.contains(&commit.sas_scheme) {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedSas,
        );
    }

    let mode = match commit.pk_scheme {
        crate::crypto::PkId::Mult => StreamMode::Multistream,
        crate::crypto::PkId::Prsh => StreamMode::Preshared,
        pk if profile.pk_schemes.contains(&pk) => StreamMode::Dh,
        _ => {
            return error::enter_initiating_error(
                stream,
                inner,
                outbox,
                ProtocolError::UnsupportedPkExchange,
            )
        }
    };

    let expected_hv_len = match mode {
        StreamMode::Dh => HV_SIZE,
        StreamMode::Multistream => HV_NONCE_SIZE,
        _ => HV_NONCE_SIZE + 8,
    };
    if commit.hv.len() != expected_hv_len {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::InvalidPacket,
        );
    }

    // fast-mode nonces must be unique within the session
    if mode != StreamMode::Dh {
        let mut shared = session.shared.lock().expect("session lock");
        let nonce = commit.hv[..HV_NONCE_SIZE].to_vec();
        if shared.used_nonces.contains(&nonce) {
            drop(shared);
            return error::enter_initiating_error(
                stream,
                inner,
                outbox,
                ProtocolError::NonceReuse,
            );
        }
        shared.used_nonces.push(nonce);
    }

    let pk_fallback = session.negotiated().map(|n| n.pk_scheme);
    let negotiated = crate::session::Negotiated {
        hash: commit.hash_scheme,
        cipher: commit.cipher_type,
        auth_tag_len: commit.auth_tag_len,
        pk_scheme: if mode == StreamMode::Dh {
            commit.pk_scheme
        } else {
            pk_fallback.unwrap_or(commit.pk_scheme)
        },
        sas_scheme: commit.sas_scheme,
    };
    session.shared.lock().expect("session lock").negotiated = Some(negotiated);

    set_mode(stream, inner, mode);
    inner.role = Role::Responder;
    inner.proto.peer_hv = commit.hv.clone();
    inner.messages.peer_commit = Some(commit.clone());
    inner.messages.peer_commit_raw = raw.to_vec();

    change_state(stream, inner, State::PendingSecure);
    outbox.protocol(ProtocolEvent::IsPendingSecure);

    match mode {
        StreamMode::Dh => {
            let dh = match inner.dh.take() {
                // tie-break loser reuses the exchange generated for its
                // own abandoned Commit when the group matches
                Some(dh) if dh.public_value().len() == commit.pk_scheme.pv_len() => dh,
                _ => DhExchange::generate(commit.pk_scheme)?,
            };
            let ids = initiator::own_secret_ids(&session, negotiated.hash, Role::Responder);
            let dhpart = DhPartMessage {
                hash_image: inner.messages.h1,
                rs1_id: ids[0],
                rs2_id: ids[1],
                aux_id: ids[2],
                pbx_id: ids[3],
                pv: dh.public_value().to_vec(),
                hmac: [0u8; 8],
            };
            let mut dhraw = Message::DhPart1(dhpart.clone()).marshal()?;
            let mac = sign_message(&mut dhraw, &inner.messages.h0);
            let mut dhpart = dhpart;
            dhpart.hmac = mac;

            inner.dh = Some(dh);
            inner.messages.dhpart = Some(dhpart);
            inner.messages.dhpart_raw = dhraw.clone();
            outbox.send(MessageType::DhPart1, dhraw);
        }
        _ => {
            // Preshared key continuity gate
            if mode == StreamMode::Preshared {
                let peer_zid = session.peer_zid().ok_or(Error::WrongState)?;
                let counter = stream.ctx.cache.preshared_counter(session.zid(), &peer_zid);
                if counter >= session.profile.preshared_max_allowed {
                    return error::enter_initiating_error(
                        stream,
                        inner,
                        outbox,
                        ProtocolError::NoSharedSecret,
                    );
                }
                let psk = match initiator::preshared_key(&session, &negotiated) {
                    Ok(psk) => psk,
                    Err(_) => {
                        return error::enter_initiating_error(
                            stream,
                            inner,
                            outbox,
                            ProtocolError::NoSharedSecret,
                        )
                    }
                };
                let nonce = &inner.proto.peer_hv[..HV_NONCE_SIZE];
                let mac = crate::crypto::hash::hmac_trunc(negotiated.hash, &psk, nonce, 8);
                if mac != inner.proto.peer_hv[HV_NONCE_SIZE..] {
                    return error::enter_initiating_error(
                        stream,
                        inner,
                        outbox,
                        ProtocolError::NoSharedSecret,
                    );
                }
            }

            if initiator::derive_fast_mode_keys(inner, &session, &negotiated, mode).is_err() {
                // a fast Commit we cannot key: no session key, no secrets
                return error::enter_initiating_error(
                    stream,
                    inner,
                    outbox,
                    ProtocolError::NoSharedSecret,
                );
            }
            send_confirm1(stream, inner, outbox, &negotiated, &session.profile)?;
        }
    }
    Ok(())
}

/// True when the peer's commitment beats ours and we fall back to the
/// responder role.
fn tie_break_lost(inner: &StreamInner, commit: &CommitMessage) -> bool {
    let ours = &inner.proto.hv;
    let theirs = &commit.hv;
    // full hvi for DH, nonce only for the fast modes
    let n = if ours.len() == HV_SIZE && theirs.len() == HV_SIZE {
        HV_SIZE
    } else {
        HV_NONCE_SIZE.min(ours.len()).min(theirs.len())
    };
    theirs[..n] > ours[..n]
}

fn send_confirm1(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    negotiated: &crate::session::Negotiated,
    profile: &crate::config::Profile,
) -> Result<()> {
    let confirm = secure::build_confirm(stream, inner, negotiated, profile)?;
    let raw = Message::Confirm1(confirm.clone()).marshal()?;
    inner.messages.confirm = Some(confirm);
    inner.messages.confirm_raw = raw.clone();
    change_state(stream, inner, State::WaitConfirm2);
    outbox.send(MessageType::Confirm1, raw);
    Ok(())
}

/// DHPart2 from the initiator: verify the hvi commitment, run our half
/// of the exchange, answer with Confirm1.
pub(crate) fn on_dhpart2(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    dhpart: DhPartMessage,
    raw: &[u8],
) -> Result<()> {
    match inner.state {
        State::PendingSecure if inner.mode == StreamMode::Dh => {}
        State::WaitConfirm2 if inner.mode == StreamMode::Dh => {
            // our Confirm1 was lost
            outbox.send(MessageType::Confirm1, inner.messages.confirm_raw.clone());
            return Ok(());
        }
        _ => return Ok(()),
    }
    let session = stream.session()?;
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;

    // H1 proves the Commit chain
    let peer_commit = inner.messages.peer_commit.as_ref().ok_or(Error::WrongState)?;
    if sha256_image(&dhpart.hash_image) != peer_commit.hash_image
        || verify_chained_hmac(&inner.messages.peer_commit_raw, &dhpart.hash_image).is_err()
    {
        outbox.security(SecurityEvent::WrongMessageHmac);
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::WrongMessageHmac,
        );
    }

    // the Commit promised exactly this DHPart2
    let mut hv_input =
        Vec::with_capacity(inner.messages.hello_raw.len() + raw.len());
    hv_input.extend_from_slice(&inner.messages.hello_raw);
    hv_input.extend_from_slice(raw);
    let mut hvi = crate::crypto::hash::digest(negotiated.hash, &hv_input);
    hvi.truncate(HV_SIZE);
    if hvi != inner.proto.peer_hv {
        log::error!(
            "stream {}: hvi does not cover the received DHPart2",
            stream.id()
        );
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::PossibleMitm2,
        );
    }

    if validate_public_value(negotiated.pk_scheme, &dhpart.pv).is_err() {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::PossibleMitm1,
        );
    }
    let dh = inner.dh.as_ref().ok_or(Error::WrongState)?;
    let dh_result = match dh.shared_secret(&dhpart.pv) {
        Ok(v) => v,
        Err(_) => {
            return error::enter_initiating_error(
                stream,
                inner,
                outbox,
                ProtocolError::PossibleMitm1,
            )
        }
    };

    let total_hash = {
        let m = &inner.messages;
        let mut input = Vec::with_capacity(
            m.hello_raw.len() + m.peer_commit_raw.len() + m.dhpart_raw.len() + raw.len(),
        );
        input.extend_from_slice(&m.hello_raw);
        input.extend_from_slice(&m.peer_commit_raw);
        input.extend_from_slice(&m.dhpart_raw);
        input.extend_from_slice(raw);
        crate::crypto::hash::digest(negotiated.hash, &input)
    };
    let dhss = crate::crypto::hash::digest(negotiated.hash, &dh_result);

    let sort = secure::sort_secrets(
        &session,
        Role::Responder,
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
        &peer_zid,
        session.zid(),
        &total_hash,
        &[sort.s1.as_deref(), sort.s2.as_deref(), sort.s3.as_deref()],
    );
    let context = secure::stream_kdf_context(&session, Role::Responder, &total_hash)?;
    secure::install_keys(inner, &negotiated, s0, &context)?;

    inner.proto.total_hash = total_hash;
    inner.proto.dhss = dhss;
    inner.messages.peer_dhpart = Some(dhpart);
    inner.messages.peer_dhpart_raw = raw.to_vec();

    send_confirm1(stream, inner, outbox, &negotiated, &session.profile)
}

pub(crate) fn on_confirm2(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    confirm: ConfirmMessage,
) -> Result<()> {
    match inner.state {
        State::WaitConfirm2 => {}
        State::Secure if inner.role == Role::Responder => {
            // our Conf2Ack was lost
            outbox.send(MessageType::Conf2Ack, Message::Conf2Ack.marshal()?);
            return Ok(());
        }
        _ => return Ok(()),
    }
    let session = stream.session()?;
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;

    let body = match secure::process_peer_confirm(inner, &negotiated, &confirm) {
        Ok(body) => body,
        Err(_) => {
            log::error!("stream {}: Confirm2 failed authentication", stream.id());
            return error::enter_initiating_error(
                stream,
                inner,
                outbox,
                ProtocolError::AuthDecryptFail,
            );
        }
    };

    // H0i closes the initiator chain
    let chain_ok = if inner.mode == StreamMode::Dh {
        let h1 = sha256_image(&body.hash_image);
        inner
            .messages
            .peer_dhpart
            .as_ref()
            .map(|d| d.hash_image == h1)
            .unwrap_or(false)
            && verify_chained_hmac(&inner.messages.peer_dhpart_raw, &body.hash_image).is_ok()
    } else {
        let h1 = sha256_image(&body.hash_image);
        let h2 = sha256_image(&h1);
        inner
            .messages
            .peer_commit
            .as_ref()
            .map(|c| c.hash_image == h2)
            .unwrap_or(false)
            && verify_chained_hmac(&inner.messages.peer_commit_raw, &h1).is_ok()
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

    secure::apply_peer_confirm(inner, &session.profile, &body);
    inner.messages.peer_confirm = Some(confirm);

    outbox.send(MessageType::Conf2Ack, Message::Conf2Ack.marshal()?);
    secure::enter_secure(stream, inner, outbox)
}
