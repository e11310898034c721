use super::*;

const ZID_A: Zid = [1; 12];
const ZID_B: Zid = [2; 12];

#[test]
fn test_entry_id_symmetric_high_first() {
    let ab = entry_id(&ZID_A, &ZID_B);
    let ba = entry_id(&ZID_B, &ZID_A);
    assert_eq!(ab, ba);
    assert_eq!(&ab[..12], &ZID_B, "greater ZID leads");
    assert_eq!(&ab[12..], &ZID_A);
}

#[test]
fn test_put_rotates_current_to_previous() {
    let cache = InMemoryCache::new();
    assert_eq!(cache.get(&ZID_A, &ZID_B, false), None);

    let first = RetainedSecret::new(vec![1; 32], 100, 3600);
    cache.put(&ZID_A, &ZID_B, &first);
    assert_eq!(cache.get(&ZID_A, &ZID_B, false), Some(first.clone()));
    assert_eq!(cache.get(&ZID_A, &ZID_B, true), None);

    let second = RetainedSecret::new(vec![2; 32], 200, 3600);
    cache.put(&ZID_B, &ZID_A, &second);
    assert_eq!(cache.get(&ZID_A, &ZID_B, false), Some(second));
    assert_eq!(cache.get(&ZID_A, &ZID_B, true), Some(first));
}

#[test]
fn test_verified_flag() {
    let cache = InMemoryCache::new();
    assert!(!cache.verified(&ZID_A, &ZID_B));
    cache.set_verified(&ZID_A, &ZID_B, true);
    assert!(cache.verified(&ZID_B, &ZID_A));
    cache.set_verified(&ZID_A, &ZID_B, false);
    assert!(!cache.verified(&ZID_A, &ZID_B));
}

#[test]
fn test_preshared_counter() {
    let cache = InMemoryCache::new();
    assert_eq!(cache.preshared_counter(&ZID_A, &ZID_B), 0);
    cache.set_preshared_counter(&ZID_A, &ZID_B, 7);
    assert_eq!(cache.preshared_counter(&ZID_B, &ZID_A), 7);
}

#[test]
fn test_mitm_secret_slot_is_independent() {
    let cache = InMemoryCache::new();
    let rs = RetainedSecret::new(vec![3; 32], 0, u32::MAX);
    let pbx = RetainedSecret::new(vec![4; 32], 0, u32::MAX);

    cache.put(&ZID_A, &ZID_B, &rs);
    cache.put_mitm(&ZID_A, &ZID_B, &pbx);

    assert_eq!(cache.get(&ZID_A, &ZID_B, false), Some(rs));
    assert_eq!(cache.get_mitm(&ZID_A, &ZID_B), Some(pbx));
}

#[test]
fn test_expiry() {
    let fresh = RetainedSecret::new(vec![0; 32], 1000, 60);
    assert!(!fresh.is_expired(1030));
    assert!(fresh.is_expired(1061));

    let eternal = RetainedSecret::new(vec![0; 32], 0, u32::MAX);
    assert!(!eternal.is_expired(u32::MAX));
}
