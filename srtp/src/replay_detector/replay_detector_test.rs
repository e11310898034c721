use super::*;

fn run(detector: &mut dyn ReplayDetector, input: &[u64], expected: &[bool]) {
    for (i, seq) in input.iter().enumerate() {
        let ok = detector.check(*seq);
        assert_eq!(
            ok, expected[i],
            "check({seq}) at position {i} returned {ok}, expected {}",
            expected[i]
        );
        if ok {
            detector.accept();
        }
    }
}

#[test]
fn test_in_order_then_duplicate() {
    let mut d = SlidingWindowDetector::new(128, (1 << 48) - 1);
    run(
        &mut d,
        &[0, 1, 2, 3, 4, 4, 2, 5],
        &[true, true, true, true, true, false, false, true],
    );
}

#[test]
fn test_out_of_order_within_window() {
    let mut d = SlidingWindowDetector::new(128, (1 << 48) - 1);
    run(
        &mut d,
        &[10, 5, 6, 10, 5, 11],
        &[true, true, true, false, false, true],
    );
}

#[test]
fn test_older_than_window() {
    let mut d = SlidingWindowDetector::new(128, (1 << 48) - 1);
    run(&mut d, &[1000, 872, 873], &[true, false, true]);
}

#[test]
fn test_over_max_seq() {
    let mut d = SlidingWindowDetector::new(128, 100);
    run(&mut d, &[99, 100, 101], &[true, true, false]);
}

#[test]
fn test_check_without_accept_does_not_commit() {
    let mut d = SlidingWindowDetector::new(128, (1 << 48) - 1);
    assert!(d.check(7));
    // auth failed, accept never called
    assert!(d.check(7), "unaccepted index must stay usable");
    d.accept();
    assert!(!d.check(7));
}

#[test]
fn test_wrapped_rollover() {
    let max = u16::MAX as u64;
    let mut d = WrappedSlidingWindowDetector::new(64, max);
    run(
        &mut d,
        &[65533, 65534, 65535, 0, 1, 65535, 0, 2],
        &[true, true, true, true, true, false, false, true],
    );
}

#[test]
fn test_noop_accepts_everything() {
    let mut d = NoOpReplayDetector::new();
    run(&mut d, &[5, 5, 5], &[true, true, true]);
}
