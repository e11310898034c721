use super::*;

const TEST_PROFILE: ProtectionProfile = ProtectionProfile::Aes128CmHmacSha1_80;

fn test_key() -> Vec<u8> {
    vec![
        0xE1, 0xF9, 0x7A, 0x0D, 0x3E, 0x01, 0x8B, 0xE0, 0xD6, 0x4F, 0xA3, 0x2C, 0x06, 0xDE,
        0x41, 0x39,
    ]
}

fn test_salt() -> Vec<u8> {
    vec![
        0x0E, 0xC6, 0x75, 0xAD, 0x49, 0x8A, 0xFE, 0xEB, 0xB6, 0x96, 0x0B, 0x3A, 0xAB, 0xE6,
    ]
}

#[test]
fn test_context_key_len() {
    assert!(
        Context::new(&[], &test_salt(), TEST_PROFILE, None, None).is_err(),
        "Context accepted a 0 length key"
    );
    assert!(
        Context::new(&test_key(), &[], TEST_PROFILE, None, None).is_err(),
        "Context accepted a 0 length salt"
    );
    assert!(
        Context::new(&test_key(), &test_salt(), TEST_PROFILE, None, None).is_ok(),
        "Context failed with a valid length key and salt"
    );
}

#[test]
fn test_aes256_key_len() {
    let profile = ProtectionProfile::Aes256CmHmacSha1_80;
    assert!(Context::new(&test_key(), &test_salt(), profile, None, None).is_err());
    assert!(Context::new(&[7u8; 32], &test_salt(), profile, None, None).is_ok());
}

#[test]
fn test_rtp_header_unmarshal() {
    let mut raw = vec![0u8; 20];
    raw[0] = 0x80;
    raw[2] = 0x12;
    raw[3] = 0x34;
    raw[8..12].copy_from_slice(&0xcafe_babeu32.to_be_bytes());

    let header = RtpHeader::unmarshal(&raw).unwrap();
    assert_eq!(header.header_len, 12);
    assert_eq!(header.sequence_number, 0x1234);
    assert_eq!(header.ssrc, 0xcafe_babe);

    // two CSRCs push the payload out by eight bytes
    raw[0] = 0x82;
    let header = RtpHeader::unmarshal(&raw).unwrap();
    assert_eq!(header.header_len, 20);
}

#[test]
fn test_rtp_header_too_small() {
    assert!(RtpHeader::unmarshal(&[0x80, 0, 0]).is_err());
}

#[test]
fn test_next_rollover_count() {
    let mut s = SrtpSsrcState::default();

    let (roc, diff, _) = s.next_rollover_count(30123);
    assert_eq!(roc, 0, "rollover count should be 0 before initialization");
    s.update_rollover_count(30123, diff);

    let (roc, diff, _) = s.next_rollover_count(65535);
    assert_eq!(roc, 0);
    s.update_rollover_count(65535, diff);

    // wrap forward
    let (roc, diff, _) = s.next_rollover_count(0);
    assert_eq!(roc, 1, "rollover should be guessed across the wrap");
    s.update_rollover_count(0, diff);

    // late packet from before the wrap
    let (roc, _, _) = s.next_rollover_count(65530);
    assert_eq!(roc, 0, "late pre-wrap packet should use the old rollover");
}
