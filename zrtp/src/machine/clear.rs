use std::sync::Arc;

use super::*;
use crate::kdf;
use crate::packet::GoClearMessage;

/// Host call: from Secure it initiates GoClear; from PendingClear it is
/// the explicit confirmation that completes the peer-initiated
/// teardown.
pub(crate) fn host_clear(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    match inner.state {
        State::Secure => {
            if !inner.allowclear {
                return Err(Error::NotAvailable);
            }
            let session = stream.session()?;
            let negotiated = session.negotiated().ok_or(Error::WrongState)?;
            let crypto = inner.crypto.as_ref().ok_or(Error::WrongState)?;

            let goclear = GoClearMessage {
                clear_hmac: kdf::clear_hmac(negotiated.hash, &crypto.hmackey),
            };
            let raw = Message::GoClear(goclear.clone()).marshal()?;
            inner.messages.goclear = Some(goclear);
            inner.messages.goclear_raw = raw.clone();

            change_state(stream, inner, State::InitiatingClear);
            outbox.send(MessageType::GoClear, raw);
            stream.schedule(TaskKind::GoClear, stream.ctx.timing.t3);
            Ok(())
        }
        State::PendingClear => {
            outbox.send(MessageType::ClearAck, Message::ClearAck.marshal()?);
            teardown_srtp(stream, inner, outbox);
            Ok(())
        }
        _ => Err(Error::WrongState),
    }
}

/// GoClear from the peer. Only honored when allowclear was negotiated
/// and the keyed HMAC checks out; the transition still waits for the
/// host's confirmation.
pub(crate) fn on_goclear(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    goclear: GoClearMessage,
) -> Result<()> {
    match inner.state {
        State::Secure | State::SasRelaying => {}
        State::PendingClear => return Ok(()), // peer resend, host still deciding
        _ => return Ok(()),
    }

    if !inner.allowclear {
        log::warn!(
            "stream {}: GoClear received but allowclear is off, dropped",
            stream.id()
        );
        outbox.security(SecurityEvent::ProtocolError(
            ProtocolError::GoClearUnsupported,
        ));
        return Ok(());
    }

    let session = stream.session()?;
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;
    let crypto = inner.crypto.as_ref().ok_or(Error::WrongState)?;
    let expected = kdf::clear_hmac(negotiated.hash, &crypto.peer_hmackey);
    if expected != goclear.clear_hmac {
        log::warn!(
            "stream {}: GoClear with a bad HMAC, dropped",
            stream.id()
        );
        outbox.security(SecurityEvent::ProtocolError(
            ProtocolError::GoClearUnsupported,
        ));
        return Ok(());
    }

    change_state(stream, inner, State::PendingClear);
    outbox.protocol(ProtocolEvent::IsPendingClear);
    Ok(())
}

pub(crate) fn on_clearack(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    if inner.state != State::InitiatingClear {
        return Ok(());
    }
    stream.cancel_task(TaskKind::GoClear);
    teardown_srtp(stream, inner, outbox);
    Ok(())
}

/// Drops the SRTP contexts and returns the stream to Clear. The signing
/// keys survive so the stream can re-secure.
pub(crate) fn teardown_srtp(stream: &Arc<Stream>, inner: &mut StreamInner, outbox: &mut Outbox) {
    inner.srtp = None;
    change_state(stream, inner, State::Clear);
    outbox.protocol(ProtocolEvent::IsClear);
    outbox.events.push(Emitted::NotSecure);
}
