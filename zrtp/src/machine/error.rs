use std::sync::Arc;

use super::*;
use crate::packet::ErrorMessage;

/// Local failure: park every retransmission, announce the code to the
/// peer with bounded retries, wait for its ErrorAck.
pub(crate) fn enter_initiating_error(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    code: ProtocolError,
) -> Result<()> {
    if matches!(
        inner.state,
        State::Error | State::PendingError | State::NoZrtp | State::None
    ) {
        return Ok(());
    }

    log::error!("stream {}: protocol error: {code}", stream.id());
    inner.last_error = Some(code);
    inner.srtp = None;
    stream.cancel_all_tasks();

    let msg = ErrorMessage::new(code);
    let raw = Message::Error(msg.clone()).marshal()?;
    inner.messages.error = Some(msg);
    inner.messages.error_raw = raw.clone();

    change_state(stream, inner, State::InitiatingError);
    outbox.security(SecurityEvent::ProtocolError(code));
    outbox.events.push(Emitted::NotSecure);
    outbox.send(MessageType::Error, raw);
    stream.schedule(TaskKind::Error, stream.ctx.timing.et);
    Ok(())
}

/// Error from the peer: acknowledge and park terminally.
pub(crate) fn on_error(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    msg: ErrorMessage,
) -> Result<()> {
    let code = msg.error();
    log::error!("stream {}: peer reports error: {code}", stream.id());

    inner.last_error = Some(code);
    inner.srtp = None;
    stream.cancel_all_tasks();

    outbox.send(MessageType::ErrorAck, Message::ErrorAck.marshal()?);
    change_state(stream, inner, State::PendingError);
    change_state(stream, inner, State::Error);
    outbox.security(SecurityEvent::ProtocolError(code));
    outbox.events.push(Emitted::NotSecure);
    Ok(())
}

pub(crate) fn on_errorack(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    _outbox: &mut Outbox,
) -> Result<()> {
    if inner.state != State::InitiatingError {
        return Ok(());
    }
    stream.cancel_task(TaskKind::Error);
    change_state(stream, inner, State::Error);
    Ok(())
}

/// Synchronous shutdown path of `Stream::stop`. A stream caught mid
/// exchange tells the peer it is going away; Secure and idle streams go
/// quietly.
pub(crate) fn stop_stream(stream: &Arc<Stream>, inner: &mut StreamInner, outbox: &mut Outbox) {
    let mid_exchange = matches!(
        inner.state,
        State::Start
            | State::WaitHelloAck
            | State::WaitHello
            | State::StartInitiatingSecure
            | State::InitiatingSecure
            | State::WaitConfirm1
            | State::WaitConfirmAck
            | State::PendingSecure
            | State::WaitConfirm2
    );
    if mid_exchange {
        log::debug!("stream {}: stopping mid exchange", stream.id());
        if let Ok(raw) =
            Message::Error(ErrorMessage::new(ProtocolError::ServiceUnavailable)).marshal()
        {
            outbox.send(MessageType::Error, raw);
        }
    }
}
