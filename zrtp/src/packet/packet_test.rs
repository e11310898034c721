use super::*;
use crate::crypto::{CipherId, HashId, PkId, SasId, TagLengthId};
use crate::error::ProtocolError;

fn sample_hello() -> HelloMessage {
    HelloMessage {
        version: *PROTOCOL_VERSION,
        client_id: *b"zrtp-rs test    ",
        hash_image: [0xa5; 32],
        zid: [0x42; 12],
        passive: false,
        mitm: true,
        sig_capable: false,
        unlimited: false,
        hash_schemes: vec![HashId::S256, HashId::S384],
        cipher_types: vec![CipherId::Aes1],
        auth_tag_lens: vec![TagLengthId::Hs32, TagLengthId::Hs80],
        pk_schemes: vec![PkId::Dh3k, PkId::Ec25, PkId::Mult],
        sas_schemes: vec![SasId::B32],
        hmac: [0x11; 8],
    }
}

#[test]
fn test_hello_round_trip() {
    let msg = Message::Hello(sample_hello());
    let raw = msg.marshal().unwrap();
    let parsed = Message::unmarshal(&raw).unwrap();
    assert_eq!(parsed, msg);

    // and the reparse marshals back to identical bytes
    assert_eq!(parsed.marshal().unwrap(), raw);
}

#[test]
fn test_message_header_fields() {
    let raw = Message::Hello(sample_hello()).marshal().unwrap();
    assert_eq!(&raw[0..2], &[0x50, 0x5a], "extension magic");
    let words = u16::from_be_bytes([raw[2], raw[3]]) as usize;
    assert_eq!(words * 4, raw.len(), "length counts 32-bit words");
    assert_eq!(&raw[4..12], b"Hello   ");
}

#[test]
fn test_commit_hv_length_discriminates_mode() {
    let mut commit = CommitMessage {
        hash_image: [1; 32],
        zid: [2; 12],
        hash_scheme: HashId::S256,
        cipher_type: CipherId::Aes1,
        auth_tag_len: TagLengthId::Hs32,
        pk_scheme: PkId::Dh3k,
        sas_scheme: SasId::B32,
        hv: vec![7; HV_SIZE],
        hmac: [3; 8],
    };

    for (hv_len, pk) in [
        (HV_SIZE, PkId::Dh3k),
        (HV_NONCE_SIZE, PkId::Mult),
        (HV_NONCE_SIZE + HV_KEY_SIZE, PkId::Prsh),
    ] {
        commit.hv = vec![7; hv_len];
        commit.pk_scheme = pk;
        let raw = Message::Commit(commit.clone()).marshal().unwrap();
        match Message::unmarshal(&raw).unwrap() {
            Message::Commit(c) => assert_eq!(c.hv.len(), hv_len),
            other => panic!("expected Commit, got {other:?}"),
        }
    }

    commit.hv = vec![7; 20];
    assert!(Message::Commit(commit).marshal().is_err());
}

#[test]
fn test_dhpart_round_trip() {
    let msg = Message::DhPart1(DhPartMessage {
        hash_image: [9; 32],
        rs1_id: [1; 8],
        rs2_id: [2; 8],
        aux_id: [3; 8],
        pbx_id: [4; 8],
        pv: vec![0xcd; PkId::Dh3k.pv_len()],
        hmac: [5; 8],
    });
    let raw = msg.marshal().unwrap();
    let parsed = Message::unmarshal(&raw).unwrap();
    assert_eq!(parsed, msg);
}

#[test]
fn test_confirm_round_trip() {
    let body = confirm::ConfirmBody {
        hash_image: [0x77; 32],
        sig_len: 0,
        disclose: false,
        allowclear: true,
        sas_verified: true,
        enrollment: false,
        expire_interval: 0xdead_beef,
    };
    let plain = body.to_plaintext();
    let reparsed = confirm::ConfirmBody::from_plaintext(&plain).unwrap();
    assert_eq!(reparsed, body);

    let msg = Message::Confirm1(ConfirmMessage {
        hmac: [8; 8],
        iv: [6; 16],
        encrypted: plain.to_vec(),
    });
    let raw = msg.marshal().unwrap();
    assert_eq!(Message::unmarshal(&raw).unwrap(), msg);
}

#[test]
fn test_error_and_acks() {
    let msg = Message::Error(ErrorMessage::new(ProtocolError::PossibleMitm1));
    let raw = msg.marshal().unwrap();
    match Message::unmarshal(&raw).unwrap() {
        Message::Error(e) => assert_eq!(e.error(), ProtocolError::PossibleMitm1),
        other => panic!("expected Error, got {other:?}"),
    }

    for ack in [
        Message::HelloAck,
        Message::Conf2Ack,
        Message::ClearAck,
        Message::ErrorAck,
        Message::RelayAck,
    ] {
        let raw = ack.marshal().unwrap();
        assert_eq!(raw.len(), MESSAGE_HEADER_SIZE);
        assert_eq!(Message::unmarshal(&raw).unwrap(), ack);
    }
}

#[test]
fn test_frame_and_preparse() {
    let msg = Message::Hello(sample_hello()).marshal().unwrap();
    let packet = frame_packet(17, 0xcafe_f00d, &msg);

    assert!(is_zrtp_packet(&packet));
    let info = preparse(&packet).unwrap();
    assert_eq!(info.seq, 17);
    assert_eq!(info.ssrc, 0xcafe_f00d);
    assert_eq!(info.message_len, msg.len());
    assert_eq!(
        &packet[info.message_offset..info.message_offset + info.message_len],
        &msg[..]
    );
    assert_eq!(peek_type(&packet, &info).unwrap(), MessageType::Hello);
}

#[test]
fn test_crc_rejects_bit_flips() {
    let msg = Message::Hello(sample_hello()).marshal().unwrap();
    let packet = frame_packet(1, 7, &msg);

    // flip one bit in every byte position between the cookie and the CRC
    for pos in (RTP_HEADER_SIZE + 4)..(packet.len() - 4) {
        let mut damaged = packet.clone();
        damaged[pos] ^= 0x10;
        assert_eq!(
            preparse(&damaged),
            Err(crate::error::Error::CrcFail),
            "bit flip at {pos} escaped the CRC"
        );
    }
}

#[test]
fn test_preparse_rejects_short_and_foreign_packets() {
    assert!(preparse(&[0u8; 8]).is_err());

    // plain RTP: no cookie
    let mut rtp = vec![0u8; 64];
    rtp[0] = 0x80;
    assert_eq!(preparse(&rtp), Err(crate::error::Error::NotZrtp));
    assert!(!is_zrtp_packet(&rtp));
}

#[test]
fn test_unmarshal_rejects_bad_length_word() {
    let mut raw = Message::HelloAck.marshal().unwrap();
    raw[3] += 1;
    assert!(Message::unmarshal(&raw).is_err());
}

#[test]
fn test_unknown_message_type() {
    let mut raw = Message::HelloAck.marshal().unwrap();
    raw[4..12].copy_from_slice(b"Bogus   ");
    assert!(matches!(
        Message::unmarshal(&raw),
        Err(crate::error::Error::UnknownMessageType(_))
    ));
}
