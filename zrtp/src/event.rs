use crate::error::ProtocolError;

/// Protocol progress notifications delivered to the host.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolEvent {
    IsClear,
    IsInitiatingSecure,
    IsPendingSecure,
    IsPendingClear,
    /// Discovery gave up, the peer never answered.
    NoZrtp,
    /// The first few Hellos went unanswered; the host may abandon early.
    NoZrtpQuick,
    IsClientEnrollment,
    NewUserEnrolled,
    UserAlreadyEnrolled,
    UserUnenrolled,
    LocalSasUpdated,
    RemoteSasUpdated,
    IsSecure,
    /// Securing fully finished: retained secrets rotated and persisted.
    IsSecureDone,
    /// Passive license rules blocked the secure transition.
    IsPassiveRestriction,
}

/// Attack and anomaly notifications. These must be surfaced to the user.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SecurityEvent {
    /// The stream entered the Error state; the code tells why.
    ProtocolError(ProtocolError),
    /// Incoming Hello does not match the hash received over signaling.
    WrongSignalingHash,
    /// A message HMAC failed against the key revealed by the hash chain.
    WrongMessageHmac,
    /// A cached retained secret exists on both sides but the values differ.
    MitmWarning,
}

/// Host-implemented event sink. Callbacks may fire from the scheduler
/// thread; implementations must not call back into the engine from them
/// while holding their own locks shared with media threads.
pub trait EventHandler: Send + Sync {
    fn on_protocol_event(&self, _stream_id: u32, _event: ProtocolEvent) {}

    fn on_security_event(&self, _stream_id: u32, _event: SecurityEvent) {}

    /// Simplified notification: the stream reached Secure.
    fn on_secure(&self, _stream_id: u32) {}

    /// Simplified notification: the stream left Secure or failed to get there.
    fn on_not_secure(&self, _stream_id: u32) {}
}

/// Sink that drops every event.
pub struct NullEventHandler;

impl EventHandler for NullEventHandler {}
