use super::*;

const ZID_I: [u8; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
const ZID_R: [u8; 12] = [13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24];

#[test]
fn test_kdf_truncates_to_bit_length() {
    let ki = [0x55u8; 32];
    let ctx = kdf_context(&ZID_I, &ZID_R, &[0u8; 32]);

    let full = kdf(HashId::S256, &ki, LABEL_SAS, &ctx, 256);
    assert_eq!(full.len(), 32);

    let short = kdf(HashId::S256, &ki, LABEL_SAS, &ctx, 128);
    assert_eq!(short.len(), 16);
    assert_eq!(&full[..16], &short[..], "truncation keeps leftmost bits");
}

#[test]
fn test_kdf_labels_are_domain_separating() {
    let ki = [0x55u8; 32];
    let ctx = kdf_context(&ZID_I, &ZID_R, &[0u8; 32]);

    let a = kdf(HashId::S256, &ki, LABEL_INITIATOR_HMAC_KEY, &ctx, 256);
    let b = kdf(HashId::S256, &ki, LABEL_RESPONDER_HMAC_KEY, &ctx, 256);
    assert_ne!(a, b);
}

#[test]
fn test_s0_varies_with_shared_secrets() {
    let dhss = [0x99u8; 32];
    let th = [0x01u8; 32];
    let rs1 = [0xaau8; 32];

    let without = compute_s0(HashId::S256, &dhss, &ZID_I, &ZID_R, &th, &[None, None, None]);
    let with = compute_s0(
        HashId::S256,
        &dhss,
        &ZID_I,
        &ZID_R,
        &th,
        &[Some(&rs1), None, None],
    );
    assert_eq!(without.len(), 32);
    assert_ne!(without, with);
}

#[test]
fn test_secret_ids_differ_by_role() {
    let secret = [0x10u8; 32];
    let init = secret_id(HashId::S256, &secret, ROLE_INITIATOR);
    let resp = secret_id(HashId::S256, &secret, ROLE_RESPONDER);
    assert_ne!(init, resp);
}

#[test]
fn test_derive_stream_keys_mirror() {
    let s0 = [0x42u8; 32];
    let ctx = kdf_context(&ZID_I, &ZID_R, &[7u8; 32]);

    let initiator = derive_stream_keys(HashId::S256, &s0, &ctx, 16, true);
    let responder = derive_stream_keys(HashId::S256, &s0, &ctx, 16, false);

    // what one side sends with, the other verifies with
    assert_eq!(initiator.hmackey, responder.peer_hmackey);
    assert_eq!(initiator.zrtp_key, responder.peer_zrtp_key);
    assert_eq!(responder.hmackey, initiator.peer_hmackey);

    assert_eq!(initiator.srtp_local.master_key, responder.srtp_remote.master_key);
    assert_eq!(initiator.srtp_local.master_salt, responder.srtp_remote.master_salt);
    assert_eq!(initiator.srtp_remote.master_key, responder.srtp_local.master_key);

    // both ends agree on the session-level values
    assert_eq!(initiator.sashash, responder.sashash);
    assert_eq!(initiator.new_rs1, responder.new_rs1);
    assert_eq!(initiator.session_key, responder.session_key);

    assert_eq!(initiator.zrtp_key.len(), 16);
    assert_eq!(initiator.srtp_local.master_salt.len(), 14);
}

#[test]
fn test_multistream_s0_depends_on_context() {
    let sk = [0x31u8; 32];
    let a = compute_multistream_s0(HashId::S256, &sk, &kdf_context(&ZID_I, &ZID_R, &[1u8; 32]));
    let b = compute_multistream_s0(HashId::S256, &sk, &kdf_context(&ZID_I, &ZID_R, &[2u8; 32]));
    assert_ne!(a, b);
}

#[test]
fn test_preshared_key_slots() {
    let rs1 = [9u8; 32];
    let with = compute_preshared_key(HashId::S256, Some(&rs1), None, None);
    let without = compute_preshared_key(HashId::S256, None, None, None);
    assert_ne!(with, without);
}
