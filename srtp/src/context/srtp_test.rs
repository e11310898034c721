use byteorder::{BigEndian, ByteOrder};

use super::*;

const PROFILE: ProtectionProfile = ProtectionProfile::Aes128CmHmacSha1_80;

fn master_key() -> Vec<u8> {
    vec![
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
        0x0e, 0x0f,
    ]
}

fn master_salt() -> Vec<u8> {
    vec![
        0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5, 0xa6, 0xa7, 0xa8, 0xa9, 0xaa, 0xab, 0xac, 0xad,
    ]
}

fn build_rtp(seq: u16, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0u8; 12];
    pkt[0] = 0x80;
    pkt[1] = 0x60;
    BigEndian::write_u16(&mut pkt[2..4], seq);
    BigEndian::write_u32(&mut pkt[8..12], ssrc);
    pkt.extend_from_slice(payload);
    pkt
}

fn encrypt_context() -> Context {
    Context::new(&master_key(), &master_salt(), PROFILE, None, None).unwrap()
}

fn decrypt_context() -> Context {
    Context::new(&master_key(), &master_salt(), PROFILE, None, None).unwrap()
}

#[test]
fn test_rtp_round_trip_distinct_indices() {
    let mut enc = encrypt_context();
    let mut dec = decrypt_context();

    for seq in 0u16..32 {
        let plain = build_rtp(seq, 0x1234_5678, &[0xde, 0xad, 0xbe, 0xef, seq as u8]);
        let protected = enc.encrypt_rtp(&plain).unwrap();
        assert_ne!(&protected[12..17], &plain[12..17], "payload left in clear");
        assert_eq!(protected.len(), plain.len() + PROFILE.rtp_auth_tag_len());

        let decrypted = dec.decrypt_rtp(&protected).unwrap();
        assert_eq!(&decrypted[..], &plain[..]);
    }
}

#[test]
fn test_rtp_replay_rejected() {
    let mut enc = encrypt_context();
    let mut dec = decrypt_context();

    let plain = build_rtp(700, 0x11, b"media");
    let protected = enc.encrypt_rtp(&plain).unwrap();

    dec.decrypt_rtp(&protected).unwrap();
    let second = dec.decrypt_rtp(&protected);
    assert_eq!(second, Err(Error::SrtpSsrcDuplicated(0x11, 700)));
}

#[test]
fn test_rtp_tampered_auth_tag() {
    let mut enc = encrypt_context();
    let mut dec = decrypt_context();

    let plain = build_rtp(9, 0x22, b"payload");
    let protected = enc.encrypt_rtp(&plain).unwrap();

    let mut tampered = protected.to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    assert_eq!(
        dec.decrypt_rtp(&tampered),
        Err(Error::RtpFailedToVerifyAuthTag)
    );

    // failed authentication must not advance the replay window
    let ok = dec.decrypt_rtp(&protected);
    assert!(ok.is_ok(), "original packet rejected after tampered copy");
}

#[test]
fn test_rtp_tampered_payload() {
    let mut enc = encrypt_context();
    let mut dec = decrypt_context();

    let plain = build_rtp(10, 0x22, b"payload");
    let protected = enc.encrypt_rtp(&plain).unwrap();

    let mut tampered = protected.to_vec();
    tampered[13] ^= 0x80;
    assert_eq!(
        dec.decrypt_rtp(&tampered),
        Err(Error::RtpFailedToVerifyAuthTag)
    );
}

#[test]
fn test_rtp_short_packet() {
    let mut dec = decrypt_context();
    let result = dec.decrypt_rtp(&build_rtp(0, 0x1, b""));
    assert!(result.is_err(), "packet shorter than the auth tag accepted");
}

#[test]
fn test_cfb_profile_round_trip() {
    let profile = ProtectionProfile::Aes128CfbHmacSha1_80;
    let mut enc = Context::new(&master_key(), &master_salt(), profile, None, None).unwrap();
    let mut dec = Context::new(&master_key(), &master_salt(), profile, None, None).unwrap();

    let plain = build_rtp(41, 0x77, b"feedback mode payload");
    let protected = enc.encrypt_rtp(&plain).unwrap();
    assert_ne!(&protected[12..20], &plain[12..20]);
    let decrypted = dec.decrypt_rtp(&protected).unwrap();
    assert_eq!(&decrypted[..], &plain[..]);
}

#[test]
fn test_aes256_round_trip() {
    let profile = ProtectionProfile::Aes256CmHmacSha1_32;
    let key = vec![0x42u8; 32];
    let mut enc = Context::new(&key, &master_salt(), profile, None, None).unwrap();
    let mut dec = Context::new(&key, &master_salt(), profile, None, None).unwrap();

    let plain = build_rtp(5, 0x99, b"aes256");
    let protected = enc.encrypt_rtp(&plain).unwrap();
    assert_eq!(protected.len(), plain.len() + 4);
    let decrypted = dec.decrypt_rtp(&protected).unwrap();
    assert_eq!(&decrypted[..], &plain[..]);
}
