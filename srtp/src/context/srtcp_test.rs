use byteorder::{BigEndian, ByteOrder};

use super::*;

const PROFILE: ProtectionProfile = ProtectionProfile::Aes128CmHmacSha1_80;

fn build_rtcp(ssrc: u32, payload: &[u8]) -> Vec<u8> {
    // sender report header + sender ssrc
    let mut pkt = vec![0x81, 0xc8, 0x00, 0x0b];
    pkt.resize(8, 0);
    BigEndian::write_u32(&mut pkt[4..8], ssrc);
    pkt.extend_from_slice(payload);
    pkt
}

fn context() -> Context {
    let key = vec![0x31u8; 16];
    let salt = vec![0x5au8; 14];
    Context::new(&key, &salt, PROFILE, None, None).unwrap()
}

#[test]
fn test_rtcp_round_trip() {
    let mut enc = context();
    let mut dec = context();

    let plain = build_rtcp(0xdead_beef, b"report body");
    let protected = enc.encrypt_rtcp(&plain).unwrap();

    assert_eq!(
        protected.len(),
        plain.len() + SRTCP_INDEX_SIZE + PROFILE.rtcp_auth_tag_len()
    );
    // body encrypted, header and ssrc in the clear
    assert_eq!(&protected[..8], &plain[..8]);
    assert_ne!(&protected[8..plain.len()], &plain[8..]);

    // E-bit set on the trailing index word
    let tail = protected.len() - PROFILE.rtcp_auth_tag_len() - SRTCP_INDEX_SIZE;
    assert_eq!(protected[tail] >> 7, 1, "E-bit must be set");

    let decrypted = dec.decrypt_rtcp(&protected).unwrap();
    assert_eq!(&decrypted[..], &plain[..]);
}

#[test]
fn test_rtcp_index_increments() {
    let mut enc = context();
    let plain = build_rtcp(7, b"x");

    let first = enc.encrypt_rtcp(&plain).unwrap();
    let second = enc.encrypt_rtcp(&plain).unwrap();

    let index_of = |pkt: &[u8]| {
        let tail = pkt.len() - PROFILE.rtcp_auth_tag_len() - SRTCP_INDEX_SIZE;
        BigEndian::read_u32(&pkt[tail..tail + 4]) & !(1 << 31)
    };
    assert_eq!(index_of(&first), 1);
    assert_eq!(index_of(&second), 2);
}

#[test]
fn test_rtcp_replay_rejected() {
    let mut enc = context();
    let mut dec = context();

    let plain = build_rtcp(0x42, b"once only");
    let protected = enc.encrypt_rtcp(&plain).unwrap();

    dec.decrypt_rtcp(&protected).unwrap();
    assert_eq!(
        dec.decrypt_rtcp(&protected),
        Err(Error::SrtcpSsrcDuplicated(0x42, 1))
    );
}

#[test]
fn test_rtcp_tampered_tag() {
    let mut enc = context();
    let mut dec = context();

    let plain = build_rtcp(0x42, b"tamper me");
    let protected = enc.encrypt_rtcp(&plain).unwrap();

    let mut tampered = protected.to_vec();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x40;
    assert_eq!(
        dec.decrypt_rtcp(&tampered),
        Err(Error::RtcpFailedToVerifyAuthTag)
    );
}

#[test]
fn test_rtcp_too_short() {
    let mut dec = context();
    assert!(dec.decrypt_rtcp(&[0x81, 0xc8, 0x00, 0x0b]).is_err());
}
