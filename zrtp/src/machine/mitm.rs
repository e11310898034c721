use std::sync::Arc;

use subtle::ConstantTimeEq;

use super::*;
use crate::crypto::{cipher, sas, SasId};
use crate::packet::sasrelay::{SasRelayBody, SASRELAY_ENCRYPTED_SIZE};
use crate::packet::SasRelayMessage;

/// Trusted-MiTM server: pushes the far leg's SAS hash to this stream's
/// peer so both human ends compare one string.
pub(crate) fn start_sas_relay(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    sashash: &[u8; 32],
    scheme: SasId,
) -> Result<()> {
    if inner.state != State::Secure {
        return Err(Error::WrongState);
    }
    if !stream.ctx.config.is_mitm {
        return Err(Error::NotAvailable);
    }
    let session = stream.session()?;
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;
    let crypto = inner.crypto.as_ref().ok_or(Error::WrongState)?;

    let body = SasRelayBody {
        sig_len: 0,
        flags: 0,
        sas_scheme: *scheme.wire_id(),
        sashash: *sashash,
    };
    let iv: [u8; 16] = stream.ctx.entropy.random_array()?;
    let mut encrypted = body.to_plaintext().to_vec();
    cipher::cfb_encrypt(negotiated.cipher, &crypto.zrtp_key, &iv, &mut encrypted)?;
    let mac = crate::crypto::hash::hmac_trunc(negotiated.hash, &crypto.hmackey, &encrypted, 8);
    let mut hmac = [0u8; 8];
    hmac.copy_from_slice(&mac);

    let relay = SasRelayMessage {
        hmac,
        iv,
        encrypted,
    };
    let raw = Message::SasRelay(relay.clone()).marshal()?;
    inner.messages.sasrelay = Some(relay);
    inner.messages.sasrelay_raw = raw.clone();
    inner.mitm_mode = crate::stream::MitmMode::ReconfirmServer;

    change_state(stream, inner, State::SasRelaying);
    outbox.send(MessageType::SasRelay, raw);
    stream.schedule(TaskKind::SasRelay, stream.ctx.timing.t2);
    Ok(())
}

/// SASRelay at the client leg: only a peer that introduced itself as a
/// trusted MiTM in its Hello may relay; everything else smells like a
/// wiretap inserting itself.
pub(crate) fn on_sasrelay(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
    relay: SasRelayMessage,
) -> Result<()> {
    if inner.state != State::Secure {
        return Ok(());
    }
    if !inner.peer_mitm {
        log::error!(
            "stream {}: SAS relayed by an endpoint that is not a trusted MiTM",
            stream.id()
        );
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::PossibleMitm3,
        );
    }

    let session = stream.session()?;
    let negotiated = session.negotiated().ok_or(Error::WrongState)?;
    let crypto = inner.crypto.as_ref().ok_or(Error::WrongState)?;

    if relay.encrypted.len() != SASRELAY_ENCRYPTED_SIZE {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::AuthDecryptFail,
        );
    }
    let mac = crate::crypto::hash::hmac_trunc(
        negotiated.hash,
        &crypto.peer_hmackey,
        &relay.encrypted,
        8,
    );
    if mac.ct_eq(&relay.hmac).unwrap_u8() != 1 {
        return error::enter_initiating_error(
            stream,
            inner,
            outbox,
            ProtocolError::AuthDecryptFail,
        );
    }

    let mut plain = relay.encrypted.clone();
    cipher::cfb_decrypt(negotiated.cipher, &crypto.peer_zrtp_key, &relay.iv, &mut plain)?;
    let body = SasRelayBody::from_plaintext(&plain)?;

    // an all-zero hash means the MiTM only reconfirms the rendering
    if body.sashash != [0u8; 32] {
        let scheme = SasId::from_wire(&body.sas_scheme).unwrap_or(negotiated.sas_scheme);
        let mut shared = session.shared.lock().expect("session lock");
        shared.sas = sas::render(scheme, &body.sashash);
        shared.sasbin = body.sashash.to_vec();
        drop(shared);
        outbox.protocol(ProtocolEvent::LocalSasUpdated);
    }

    inner.mitm_mode = crate::stream::MitmMode::ReconfirmClient;
    outbox.send(MessageType::RelayAck, Message::RelayAck.marshal()?);
    Ok(())
}

pub(crate) fn on_relayack(
    stream: &Arc<Stream>,
    inner: &mut StreamInner,
    outbox: &mut Outbox,
) -> Result<()> {
    if inner.state != State::SasRelaying {
        return Ok(());
    }
    stream.cancel_task(TaskKind::SasRelay);
    change_state(stream, inner, State::Secure);
    outbox.protocol(ProtocolEvent::RemoteSasUpdated);
    Ok(())
}
