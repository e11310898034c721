#[cfg(test)]
mod machine_test;

pub(crate) mod clear;
pub(crate) mod discovery;
pub(crate) mod error;
pub(crate) mod initiator;
pub(crate) mod mitm;
pub(crate) mod responder;
pub(crate) mod secure;

use std::sync::Arc;

use crate::crypto::hash;
use crate::crypto::HashId;
use crate::error::{Error, ProtocolError, Result};
use crate::event::{ProtocolEvent, SecurityEvent};
use crate::packet::{Message, MessageType, PingAckMessage, RtpInfo, HMAC_SIZE};
use crate::sched::TaskKind;
use crate::stream::{Role, State, Stream, StreamInner, StreamMode};

/// Side effects accumulated while the stream lock is held and flushed
/// after it is released, so host callbacks never run under the lock.
#[derive(Default)]
pub(crate) struct Outbox {
    pub packets: Vec<(MessageType, Vec<u8>)>,
    pub events: Vec<Emitted>,
    /// Parked streams to resume once this exchange progressed.
    pub resume: Vec<Arc<Stream>>,
    /// (running stream, parked stream): registers the parked stream on
    /// the running one after the locks are released.
    pub park: Option<(Arc<Stream>, Arc<Stream>)>,
}

pub(crate) enum Emitted {
    Protocol(ProtocolEvent),
    Security(SecurityEvent),
    Secure,
    NotSecure,
}

impl Outbox {
    pub fn send(&mut self, msg_type: MessageType, raw: Vec<u8>) {
        self.packets.push((msg_type, raw));
    }

    pub fn protocol(&mut self, event: ProtocolEvent) {
        self.events.push(Emitted::Protocol(event));
    }

    pub fn security(&mut self, event: SecurityEvent) {
        self.events.push(Emitted::Security(event));
    }
}

/// Runs one state-machine step under the stream lock, then flushes the
/// outbox: packets to the transport, events to the host, parked streams
/// back into the start path.
pub(crate) fn with_stream<R>(
    stream: &Arc<Stream>,
    f: impl FnOnce(&Arc<Stream>, &mut StreamInner, &mut Outbox) -> Result<R>,
) -> Result<R> {
    let mut outbox = Outbox::default();
    let result = {
        let mut inner = stream.inner.lock().expect("stream lock");
        f(stream, &mut inner, &mut outbox)
    };
    flush(stream, outbox);
    result
}

fn flush(stream: &Arc<Stream>, outbox: Outbox) {
    for (msg_type, raw) in outbox.packets {
        stream.send_wire(msg_type, &raw);
    }
    let events = &stream.ctx.events;
    for event in outbox.events {
        match event {
            Emitted::Protocol(e) => events.on_protocol_event(stream.id(), e),
            Emitted::Security(e) => events.on_security_event(stream.id(), e),
            Emitted::Secure => events.on_secure(stream.id()),
            Emitted::NotSecure => events.on_not_secure(stream.id()),
        }
    }
    if let Some((running, parked)) = outbox.park {
        let mut running_inner = running.inner.lock().expect("stream lock");
        if matches!(
            running_inner.state,
            State::StartInitiatingSecure
                | State::InitiatingSecure
                | State::WaitConfirm1
                | State::WaitConfirmAck
                | State::PendingSecure
                | State::WaitConfirm2
        ) {
            running_inner.concurrent = Some(parked);
        } else {
            // the exchange finished while we were parking; recall now
            drop(running_inner);
            let _ = with_stream(&parked, |stream, inner, outbox| {
                if inner.state == State::StartInitiatingSecure {
                    initiator::start_initiating_secure(stream, inner, outbox)
                } else {
                    Ok(())
                }
            });
        }
    }
    for parked in outbox.resume {
        let result = with_stream(&parked, |stream, inner, outbox| {
            if inner.state == State::StartInitiatingSecure {
                initiator::start_initiating_secure(stream, inner, outbox)
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            log::debug!("stream {}: resume failed: {e}", parked.id());
        }
    }
}

/// Switches the stream state, recording the previous one.
pub(crate) fn change_state(stream: &Arc<Stream>, inner: &mut StreamInner, state: State) {
    log::debug!("stream {}: {} -> {}", stream.id(), inner.state, state);
    inner.prev_state = inner.state;
    inner.state = state;
    stream.set_state_cell(state);
}

pub(crate) fn set_mode(stream: &Arc<Stream>, inner: &mut StreamInner, mode: StreamMode) {
    inner.mode = mode;
    stream.set_mode_cell(mode);
}

/// Straightens the 16-bit wire sequence into a growing counter; a
/// non-increasing sequence is a ZRTP replay and never reaches the
/// machine.
pub(crate) fn check_replay(inner: &mut StreamInner, info: &RtpInfo) -> Result<()> {
    let ext = match inner.last_in_seq {
        None => info.seq as u32,
        Some(last) => {
            let last16 = last as u16;
            let roc = last >> 16;
            if info.seq > last16 {
                (roc << 16) | info.seq as u32
            } else if last16.wrapping_sub(info.seq) > 0x8000 {
                (roc.wrapping_add(1) << 16) | info.seq as u32
            } else {
                return Err(Error::ZrtpReplay(info.seq));
            }
        }
    };
    inner.last_in_seq = Some(ext);
    Ok(())
}

/// Truncated message HMAC keyed with a hash chain image. The MAC covers
/// the whole marshaled message except its trailing HMAC field.
pub(crate) fn message_hmac(raw: &[u8], key: &[u8]) -> [u8; HMAC_SIZE] {
    let n = raw.len() - HMAC_SIZE;
    let mac = hash::hmac_trunc(HashId::S256, key, &raw[..n], HMAC_SIZE);
    let mut out = [0u8; HMAC_SIZE];
    out.copy_from_slice(&mac);
    out
}

/// Patches the trailing HMAC field of a freshly marshaled message.
pub(crate) fn sign_message(raw: &mut [u8], key: &[u8]) -> [u8; HMAC_SIZE] {
    let mac = message_hmac(raw, key);
    let n = raw.len() - HMAC_SIZE;
    raw[n..].copy_from_slice(&mac);
    mac
}

/// Verifies an earlier message against the chain key revealed by a later
/// one. Failure is the wrong_meshmac condition.
pub(crate) fn verify_chained_hmac(raw: &[u8], key: &[u8]) -> Result<()> {
    if raw.len() < HMAC_SIZE {
        return Err(Error::Protocol(ProtocolError::WrongMessageHmac));
    }
    let expected = message_hmac(raw, key);
    if raw[raw.len() - HMAC_SIZE..] != expected {
        return Err(Error::Protocol(ProtocolError::WrongMessageHmac));
    }
    Ok(())
}

pub(crate) fn sha256_image(data: &[u8]) -> [u8; 32] {
    let d = hash::digest(HashId::S256, data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&d);
    out
}

/// Top-level dispatch of a parsed, CRC-valid, replay-checked message.
pub(crate) fn handle_message(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    msg: Message,
    raw: &[u8],
) -> Result<()> {
    log::trace!(
        "stream {}: {} in state {}",
        stream.id(),
        msg.msg_type(),
        inner.state
    );

    if matches!(inner.state, State::Error | State::NoZrtp | State::None) {
        // terminal states still answer Error retransmissions
        if msg.msg_type() == MessageType::Error {
            outbox.send(MessageType::ErrorAck, Message::ErrorAck.marshal()?);
        }
        return Ok(());
    }

    match msg {
        Message::Hello(hello) => discovery::on_hello(stream, inner, outbox, hello, raw),
        Message::HelloAck => discovery::on_helloack(stream, inner, outbox),
        Message::Commit(commit) => responder::on_commit(stream, inner, outbox, commit, raw),
        Message::DhPart1(dhpart) => initiator::on_dhpart1(stream, inner, outbox, dhpart, raw),
        Message::DhPart2(dhpart) => responder::on_dhpart2(stream, inner, outbox, dhpart, raw),
        Message::Confirm1(confirm) => initiator::on_confirm1(stream, inner, outbox, confirm),
        Message::Confirm2(confirm) => responder::on_confirm2(stream, inner, outbox, confirm),
        Message::Conf2Ack => initiator::on_conf2ack(stream, inner, outbox),
        Message::GoClear(goclear) => clear::on_goclear(stream, inner, outbox, goclear),
        Message::ClearAck => clear::on_clearack(stream, inner, outbox),
        Message::Error(err) => error::on_error(stream, inner, outbox, err),
        Message::ErrorAck => error::on_errorack(stream, inner, outbox),
        Message::SasRelay(relay) => mitm::on_sasrelay(stream, inner, outbox, relay),
        Message::RelayAck => mitm::on_relayack(stream, inner, outbox),
        Message::Ping(ping) => {
            // Zfone interop: answer from any live state, no transition
            let session = stream.session()?;
            let endpoint_hash = {
                let digest = sha256_image(session.zid());
                let mut out = [0u8; 8];
                out.copy_from_slice(&digest[..8]);
                out
            };
            let ack = PingAckMessage {
                version: *crate::packet::ZFONE_PROTOCOL_VERSION,
                endpoint_hash,
                peer_endpoint_hash: ping.endpoint_hash,
                peer_ssrc: inner.peer_ssrc,
            };
            outbox.send(MessageType::PingAck, Message::PingAck(ack).marshal()?);
            Ok(())
        }
        Message::PingAck(_) => Ok(()),
    }
}

/// Scheduler callback: resend the cached message for this slot or give
/// up according to the slot's retry budget.
pub(crate) fn handle_retry(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    kind: TaskKind,
) -> Result<()> {
    let timing = &stream.ctx.timing;
    let task = &stream.tasks[kind.index()];
    let retries = task.bump_retries();
    let next = timing.next_timeout(kind, task.timeout_ms());

    match kind {
        TaskKind::Hello => {
            if inner.state != State::WaitHelloAck {
                return Ok(());
            }
            let cap = if inner.is_hello_received {
                timing.t1_max_count_ext
            } else {
                timing.t1_max_count
            };
            if retries == timing.no_zrtp_fast_count {
                outbox.protocol(ProtocolEvent::NoZrtpQuick);
            }
            if retries >= cap {
                log::info!("stream {}: discovery exhausted, peer has no ZRTP", stream.id());
                change_state(stream, inner, State::NoZrtp);
                outbox.protocol(ProtocolEvent::NoZrtp);
                outbox.events.push(Emitted::NotSecure);
                return Ok(());
            }
            outbox.send(MessageType::Hello, inner.messages.hello_raw.clone());
            stream.reschedule(kind, next);
        }
        TaskKind::Commit => {
            if inner.state != State::InitiatingSecure {
                return Ok(());
            }
            if retries >= timing.t2_max_count {
                return error::enter_initiating_error(
                    stream,
                    inner,
                    outbox,
                    ProtocolError::Timeout,
                );
            }
            outbox.send(MessageType::Commit, inner.messages.commit_raw.clone());
            stream.reschedule(kind, next);
        }
        TaskKind::DhPart => {
            if inner.state != State::WaitConfirm1 {
                return Ok(());
            }
            if retries >= timing.t2_max_count {
                return error::enter_initiating_error(
                    stream,
                    inner,
                    outbox,
                    ProtocolError::Timeout,
                );
            }
            outbox.send(MessageType::DhPart2, inner.messages.dhpart_raw.clone());
            stream.reschedule(kind, next);
        }
        TaskKind::Confirm => {
            if inner.state != State::WaitConfirmAck {
                return Ok(());
            }
            if retries >= timing.t2_max_count {
                return error::enter_initiating_error(
                    stream,
                    inner,
                    outbox,
                    ProtocolError::Timeout,
                );
            }
            outbox.send(MessageType::Confirm2, inner.messages.confirm_raw.clone());
            stream.reschedule(kind, next);
        }
        TaskKind::GoClear => {
            if inner.state != State::InitiatingClear {
                return Ok(());
            }
            // unbounded: keeps NAT bindings open until the peer confirms
            outbox.send(MessageType::GoClear, inner.messages.goclear_raw.clone());
            stream.reschedule(kind, next);
        }
        TaskKind::Error => {
            if inner.state != State::InitiatingError {
                return Ok(());
            }
            if retries >= timing.eti_max_count {
                change_state(stream, inner, State::Error);
                return Ok(());
            }
            outbox.send(MessageType::Error, inner.messages.error_raw.clone());
            stream.reschedule(kind, next);
        }
        TaskKind::ErrorAck => {}
        TaskKind::SasRelay => {
            if inner.state != State::SasRelaying {
                return Ok(());
            }
            if retries >= timing.t2_max_count {
                log::warn!("stream {}: SAS relay unanswered, giving up", stream.id());
                change_state(stream, inner, State::Secure);
                return Ok(());
            }
            outbox.send(MessageType::SasRelay, inner.messages.sasrelay_raw.clone());
            stream.reschedule(kind, next);
        }
        TaskKind::Process => {
            if inner.state != State::StartInitiatingSecure {
                return Ok(());
            }
            if retries >= timing.process_t1_max_count {
                return error::enter_initiating_error(
                    stream,
                    inner,
                    outbox,
                    ProtocolError::Timeout,
                );
            }
            initiator::start_initiating_secure(stream, inner, outbox)?;
        }
    }
    Ok(())
}

/// May this endpoint ever send a Commit towards the current peer?
pub(crate) fn may_commit(stream: &Arc<Stream>, inner: &StreamInner) -> bool {
    use crate::config::LicenseMode;
    match stream.ctx.config.license_mode {
        LicenseMode::Passive => false,
        LicenseMode::Active => !inner.peer_passive,
        LicenseMode::Unlimited => true,
    }
}

/// Must this endpoint reject the peer's Commit? A passive endpoint that
/// initiated signaling rejects every Commit; a passive endpoint rejects
/// Commits from a PBX.
pub(crate) fn must_reject_commit(stream: &Arc<Stream>, inner: &StreamInner) -> Result<bool> {
    use crate::config::{LicenseMode, SignalingRole};
    if stream.ctx.config.license_mode != LicenseMode::Passive {
        return Ok(false);
    }
    let session = stream.session()?;
    Ok(session.signaling_role == SignalingRole::Initiator
        || (inner.peer_mitm && !stream.ctx.config.is_mitm))
}

pub(crate) fn role_label(role: Role) -> &'static [u8] {
    match role {
        Role::Initiator => crate::kdf::ROLE_INITIATOR,
        _ => crate::kdf::ROLE_RESPONDER,
    }
}
