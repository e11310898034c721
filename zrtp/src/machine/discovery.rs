use std::sync::Arc;

use super::*;
use crate::packet::{HelloMessage, PROTOCOL_VERSION};

/// Builds and caches our Hello, then starts the T1 resend schedule.
pub(crate) fn start_discovery(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    let session = stream.session()?;
    let ctx = &stream.ctx;

    // fresh hash chain for this exchange
    inner.messages.h0 = ctx.entropy.random_array()?;
    inner.messages.h1 = sha256_image(&inner.messages.h0);
    inner.messages.h2 = sha256_image(&inner.messages.h1);
    inner.messages.h3 = sha256_image(&inner.messages.h2);

    let profile = &session.profile;
    let hello = HelloMessage {
        version: *PROTOCOL_VERSION,
        client_id: ctx.config.client_id,
        hash_image: inner.messages.h3,
        zid: *session.zid(),
        passive: ctx.config.license_mode == crate::config::LicenseMode::Passive,
        mitm: ctx.config.is_mitm,
        sig_capable: false,
        unlimited: ctx.config.license_mode == crate::config::LicenseMode::Unlimited,
        hash_schemes: profile.hash_schemes.clone(),
        cipher_types: profile.cipher_types.clone(),
        auth_tag_lens: profile.auth_tag_lens.clone(),
        pk_schemes: profile.pk_schemes.clone(),
        sas_schemes: profile.sas_schemes.clone(),
        hmac: [0u8; 8],
    };

    let mut raw = Message::Hello(hello.clone()).marshal()?;
    let mac = sign_message(&mut raw, &inner.messages.h2);
    let mut hello = hello;
    hello.hmac = mac;

    inner.messages.hello = Some(hello);
    inner.messages.hello_raw = raw.clone();

    change_state(stream, inner, State::Start);
    change_state(stream, inner, State::WaitHelloAck);
    outbox.send(MessageType::Hello, raw);
    stream.schedule(TaskKind::Hello, stream.ctx.timing.t1);
    Ok(())
}

/// Peer Hello: validate, negotiate components, load secrets, answer.
pub(crate) fn on_hello(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    hello: HelloMessage,
    raw: &[u8],
) -> Result<()> {
    let session = stream.session()?;

    if let Some(expected) = inner.messages.signaling_hash {
        if sha256_image(raw) != expected {
            log::warn!(
                "stream {}: Hello does not match the signaling hash, dropped",
                stream.id()
            );
            outbox.security(SecurityEvent::WrongSignalingHash);
            return Ok(());
        }
    }

    if hello.version != *PROTOCOL_VERSION {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedVersion,
        );
    }
    if hello.zid == *session.zid() {
        return error::enter_initiating_error(stream, inner, outbox, ProtocolError::EqualZid);
    }

    if let Some(cached) = &inner.messages.peer_hello {
        if cached.zid != hello.zid {
            return error::enter_initiating_error(stream, inner, outbox, ProtocolError::WrongZid);
        }
        // retransmitted Hello, the peer missed our answer
        outbox.send(MessageType::HelloAck, Message::HelloAck.marshal()?);
        return Ok(());
    }

    {
        let mut shared = session.shared.lock().expect("session lock");
        match shared.peer_zid {
            None => shared.peer_zid = Some(hello.zid),
            Some(existing) if existing != hello.zid => {
                drop(shared);
                return error::enter_initiating_error(
                    stream,
                    inner,
                    outbox,
                    ProtocolError::WrongZid,
                );
            }
            _ => {}
        }
    }

    inner.peer_passive = hello.passive;
    inner.peer_mitm = hello.mitm;
    if hello.mitm && !stream.ctx.config.is_mitm {
        inner.mitm_mode = crate::stream::MitmMode::Client;
    }

    negotiate_components(stream, inner, outbox, &hello)?;
    if inner.state == State::InitiatingError {
        // no usable component intersection, the error is on its way out
        return Ok(());
    }

    session.prepare_secrets(&hello.zid)?;

    inner.messages.peer_hello = Some(hello);
    inner.messages.peer_hello_raw = raw.to_vec();
    inner.is_hello_received = true;

    // With the optimization on we answer with Commit instead of a
    // HelloAck once our own Hello is acknowledged, saving one round.
    let profile = &session.profile;
    let commit_now = profile.discovery_optimization
        && profile.autosecure
        && inner.is_helloack_received
        && may_commit(stream, inner);

    if commit_now {
        stream.cancel_task(TaskKind::Hello);
        enter_clear(stream, inner, outbox)?;
    } else {
        outbox.send(MessageType::HelloAck, Message::HelloAck.marshal()?);
        if inner.is_helloack_received && inner.state == State::WaitHello {
            enter_clear(stream, inner, outbox)?;
        }
    }
    Ok(())
}

pub(crate) fn on_helloack(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    if inner.state != State::WaitHelloAck {
        return Ok(());
    }
    stream.cancel_task(TaskKind::Hello);
    inner.is_helloack_received = true;

    if inner.is_hello_received {
        enter_clear(stream, inner, outbox)
    } else {
        change_state(stream, inner, State::WaitHello);
        Ok(())
    }
}

/// Discovery finished on both halves.
pub(crate) fn enter_clear(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    change_state(stream, inner, State::Clear);
    outbox.protocol(ProtocolEvent::IsClear);

    let session = stream.session()?;
    if session.profile.autosecure {
        if may_commit(stream, inner) {
            initiator::start_initiating_secure(stream, inner, outbox)?;
        } else {
            outbox.protocol(ProtocolEvent::IsPassiveRestriction);
        }
    }
    Ok(())
}

/// Intersects local preferences with the peer's advertised lists. The
/// choice is session wide; later streams inherit it.
fn negotiate_components(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    hello: &HelloMessage,
) -> Result<()> {
    use crate::crypto::select_component;

    let session = stream.session()?;
    {
        let shared = session.shared.lock().expect("session lock");
        if shared.negotiated.is_some() {
            return Ok(());
        }
    }

    let profile = &session.profile;
    let Some(hash) = select_component(&profile.hash_schemes, &hello.hash_schemes) else {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedHash,
        );
    };
    let Some(cipher) = select_component(&profile.cipher_types, &hello.cipher_types) else {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedCipher,
        );
    };
    let Some(auth_tag_len) = select_component(&profile.auth_tag_lens, &hello.auth_tag_lens)
    else {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedAuthTag,
        );
    };
    // fast-mode ids are not key agreements on their own
    let dh_prefs: Vec<_> = profile
        .pk_schemes
        .iter()
        .copied()
        .filter(|p| !p.is_fast())
        .collect();
    let Some(pk_scheme) = select_component(&dh_prefs, &hello.pk_schemes) else {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedPkExchange,
        );
    };
    let Some(sas_scheme) = select_component(&profile.sas_schemes, &hello.sas_schemes) else {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::UnsupportedSas,
        );
    };

    let negotiated = crate::session::Negotiated {
        hash,
        cipher,
        auth_tag_len,
        pk_scheme,
        sas_scheme,
    };
    log::debug!(
        "stream {}: negotiated {hash} {cipher} {auth_tag_len} {pk_scheme} {sas_scheme}",
        stream.id()
    );
    session.shared.lock().expect("session lock").negotiated = Some(negotiated);
    Ok(())
}
