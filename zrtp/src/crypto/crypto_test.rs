use super::pk::{validate_public_value, DhExchange};
use super::*;
use crate::error::{Error, ProtocolError};

#[test]
fn test_wire_id_round_trip() {
    for &id in PkId::ALL {
        assert_eq!(PkId::from_wire(id.wire_id()), Some(id));
    }
    for &id in HashId::ALL {
        assert_eq!(HashId::from_wire(id.wire_id()), Some(id));
    }
    assert_eq!(SasId::B32.wire_id(), b"B32 ");
    assert_eq!(PkId::from_wire(b"XXXX"), None);
}

#[test]
fn test_registry_defaults() {
    let reg = ComponentRegistry::with_defaults();
    assert!(reg.has_hash(HashId::S256));
    assert!(reg.has_hash(HashId::S384));
    assert!(reg.has_cipher(CipherId::Aes1));
    assert!(reg.has_pk(PkId::Dh3k));
    assert!(reg.check_profile(&crate::config::Profile::default()).is_ok());
}

#[test]
fn test_select_component_prefers_local_order() {
    let local = [CipherId::Aes3, CipherId::Aes1];
    let peer = [CipherId::Aes1, CipherId::Aes3];
    assert_eq!(select_component(&local, &peer), Some(CipherId::Aes3));

    let peer_only_aes1 = [CipherId::Aes1];
    assert_eq!(
        select_component(&local, &peer_only_aes1),
        Some(CipherId::Aes1)
    );

    let empty: [CipherId; 0] = [];
    assert_eq!(select_component(&local, &empty), None);
}

#[test]
fn test_ffc_dh_agreement() {
    let a = DhExchange::generate(PkId::Dh2k).unwrap();
    let b = DhExchange::generate(PkId::Dh2k).unwrap();

    assert_eq!(a.public_value().len(), PkId::Dh2k.pv_len());

    let s_ab = a.shared_secret(b.public_value()).unwrap();
    let s_ba = b.shared_secret(a.public_value()).unwrap();
    assert_eq!(s_ab, s_ba, "both sides must compute the same DH result");
    assert_eq!(s_ab.len(), PkId::Dh2k.pv_len());
}

#[test]
fn test_ffc_rejects_degenerate_pv() {
    let a = DhExchange::generate(PkId::Dh3k).unwrap();
    let len = PkId::Dh3k.pv_len();

    let zero = vec![0u8; len];
    let mut one = vec![0u8; len];
    one[len - 1] = 1;

    for bad in [zero, one] {
        assert_eq!(
            a.shared_secret(&bad),
            Err(Error::Protocol(ProtocolError::PossibleMitm1))
        );
        assert_eq!(
            validate_public_value(PkId::Dh3k, &bad),
            Err(Error::Protocol(ProtocolError::PossibleMitm1))
        );
    }

    // p - 1
    let p_minus_1 = (&super::dh_groups::GROUP_3072.prime - 1u8).to_bytes_be();
    assert_eq!(
        validate_public_value(PkId::Dh3k, &p_minus_1),
        Err(Error::Protocol(ProtocolError::PossibleMitm1))
    );
}

#[test]
fn test_ec25_agreement() {
    let a = DhExchange::generate(PkId::Ec25).unwrap();
    let b = DhExchange::generate(PkId::Ec25).unwrap();

    assert_eq!(a.public_value().len(), 64);
    assert!(validate_public_value(PkId::Ec25, a.public_value()).is_ok());

    let s_ab = a.shared_secret(b.public_value()).unwrap();
    let s_ba = b.shared_secret(a.public_value()).unwrap();
    assert_eq!(s_ab, s_ba);
}

#[test]
fn test_ec_rejects_off_curve_point() {
    let garbage = vec![0x5au8; 64];
    assert_eq!(
        validate_public_value(PkId::Ec25, &garbage),
        Err(Error::Protocol(ProtocolError::PossibleMitm1))
    );
}
