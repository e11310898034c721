use super::*;

// Key Derivation Test Vectors from https://tools.ietf.org/html/rfc3711#appendix-B.3
const MASTER_KEY: [u8; 16] = [
    0xE1, 0xF9, 0x7A, 0x0D, 0x3E, 0x01, 0x8B, 0xE0, 0xD6, 0x4F, 0xA3, 0x2C, 0x06, 0xDE, 0x41,
    0x39,
];
const MASTER_SALT: [u8; 14] = [
    0x0E, 0xC6, 0x75, 0xAD, 0x49, 0x8A, 0xFE, 0xEB, 0xB6, 0x96, 0x0B, 0x3A, 0xAB, 0xE6,
];

#[test]
fn test_rfc3711_session_key() -> Result<()> {
    let session_key = aes_cm_key_derivation(
        LABEL_SRTP_ENCRYPTION,
        &MASTER_KEY,
        &MASTER_SALT,
        0,
        MASTER_KEY.len(),
    )?;

    let expected = [
        0xC6, 0x1E, 0x7A, 0x93, 0x74, 0x4F, 0x39, 0xEE, 0x10, 0x73, 0x4A, 0xFE, 0x3F, 0xF7,
        0xA0, 0x87,
    ];
    assert_eq!(session_key, expected);
    Ok(())
}

#[test]
fn test_rfc3711_session_salt() -> Result<()> {
    let session_salt = aes_cm_key_derivation(
        LABEL_SRTP_SALT,
        &MASTER_KEY,
        &MASTER_SALT,
        0,
        MASTER_SALT.len(),
    )?;

    let expected = [
        0x30, 0xCB, 0xBC, 0x08, 0x86, 0x3D, 0x8C, 0x85, 0xD4, 0x9D, 0xB3, 0x4A, 0x9A, 0xE1,
    ];
    assert_eq!(session_salt, expected);
    Ok(())
}

#[test]
fn test_rfc3711_session_auth_tag() -> Result<()> {
    let session_auth_tag = aes_cm_key_derivation(
        LABEL_SRTP_AUTHENTICATION_TAG,
        &MASTER_KEY,
        &MASTER_SALT,
        0,
        20,
    )?;

    let expected = [
        0xCE, 0xBE, 0x32, 0x1F, 0x6F, 0xF7, 0x71, 0x6B, 0x6F, 0xD4, 0xAB, 0x49, 0xAF, 0x25,
        0x6A, 0x15, 0x6D, 0x38, 0xBA, 0xA4,
    ];
    assert_eq!(session_auth_tag, expected);
    Ok(())
}

#[test]
fn test_index_over_kdr_rejected() {
    let result = aes_cm_key_derivation(LABEL_SRTP_ENCRYPTION, &MASTER_KEY, &MASTER_SALT, 1, 16);
    assert_eq!(result, Err(Error::UnsupportedIndexOverKdr));
}

#[test]
fn test_counter_layout() {
    let salt = [0u8; 14];
    let counter = generate_counter(0x3456, 0x12, 0xdeadbeef, &salt);

    // ssrc at octets 4..8, roc at 8..12, seq << 16 at 12..16
    assert_eq!(&counter[4..8], &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(&counter[8..12], &[0x00, 0x00, 0x00, 0x12]);
    assert_eq!(&counter[12..16], &[0x00, 0x34, 0x56, 0x00]);
}
