use crate::context::{MAX_SEQUENCE_NUMBER, MAX_SRTCP_INDEX};
use crate::replay_detector::*;

pub type ContextOption = Box<dyn Fn() -> Box<dyn ReplayDetector + Send + 'static> + Send + Sync>;

/// Minimum replay window required by the protocol.
pub const DEFAULT_REPLAY_PROTECTION_WINDOW: usize = 128;

/// Sets the SRTP replay protection window size.
pub fn srtp_replay_protection(window_size: usize) -> ContextOption {
    Box::new(move || {
        Box::new(WrappedSlidingWindowDetector::new(
            window_size,
            MAX_SEQUENCE_NUMBER as u64,
        ))
    })
}

/// Sets the SRTCP replay protection window size.
pub fn srtcp_replay_protection(window_size: usize) -> ContextOption {
    Box::new(move || {
        Box::new(SlidingWindowDetector::new(
            window_size,
            MAX_SRTCP_INDEX as u64,
        ))
    })
}

/// Disables SRTP replay protection.
pub fn srtp_no_replay_protection() -> ContextOption {
    Box::new(|| Box::new(NoOpReplayDetector::new()))
}

/// Disables SRTCP replay protection.
pub fn srtcp_no_replay_protection() -> ContextOption {
    Box::new(|| Box::new(NoOpReplayDetector::new()))
}

pub(crate) fn srtp_replay_protection_default() -> ContextOption {
    srtp_replay_protection(DEFAULT_REPLAY_PROTECTION_WINDOW)
}

pub(crate) fn srtcp_replay_protection_default() -> ContextOption {
    srtcp_replay_protection(DEFAULT_REPLAY_PROTECTION_WINDOW)
}
