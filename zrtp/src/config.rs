use crate::crypto::{CipherId, HashId, PkId, SasId, TagLengthId};

/// Default interval retained secrets stay valid, 30 days in seconds.
pub const CACHE_DEFAULT_TTL: u32 = 30 * 24 * 60 * 60;

/// How many consecutive Preshared exchanges are allowed before a full DH
/// run is forced to restore key continuity.
pub const PRESHARED_MAX_ALLOWED: u32 = 20;

/// License mode restricts when this endpoint may initiate key agreement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LicenseMode {
    /// Never send Commit; only answer an active peer.
    Passive,
    /// Initiate, except towards a passive peer.
    Active,
    /// No restrictions.
    #[default]
    Unlimited,
}

/// Which side of the signaling dialog started the call. A passive
/// endpoint that initiated signaling rejects all Commits.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SignalingRole {
    #[default]
    Unknown,
    Initiator,
    Responder,
}

/// Per-session preferences applied at `session_init`.
///
/// Preference lists are in priority order; the first entry also present
/// in the peer Hello wins its category.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Permit SRTP termination via GoClear. When disabled all incoming
    /// GoClear packets are rejected and none are generated.
    pub allowclear: bool,
    /// Start securing automatically right after discovery.
    pub autosecure: bool,
    /// Set when the application may disclose stream keys.
    pub disclose_bit: bool,
    /// Answer a peer Hello with Commit instead of HelloAck, saving one
    /// round trip. Slow peers computing DH may prefer this off.
    pub discovery_optimization: bool,
    /// Retained secret time-to-live in seconds.
    pub cache_ttl: u32,
    /// Consecutive Preshared exchanges allowed before DH is forced.
    pub preshared_max_allowed: u32,
    /// Run the SRTP payload cipher in feedback mode instead of counter
    /// mode.
    pub srtp_feedback_mode: bool,
    pub sas_schemes: Vec<SasId>,
    pub cipher_types: Vec<CipherId>,
    pub pk_schemes: Vec<PkId>,
    pub auth_tag_lens: Vec<TagLengthId>,
    pub hash_schemes: Vec<HashId>,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            allowclear: true,
            autosecure: true,
            disclose_bit: false,
            discovery_optimization: true,
            cache_ttl: CACHE_DEFAULT_TTL,
            preshared_max_allowed: PRESHARED_MAX_ALLOWED,
            srtp_feedback_mode: false,
            sas_schemes: vec![SasId::B32, SasId::B256],
            cipher_types: vec![CipherId::Aes1, CipherId::Aes3],
            pk_schemes: vec![PkId::Dh3k, PkId::Dh2k, PkId::Ec25, PkId::Mult],
            auth_tag_lens: vec![TagLengthId::Hs32, TagLengthId::Hs80],
            hash_schemes: vec![HashId::S256, HashId::S384],
        }
    }
}

/// Engine-wide configuration fixed at init.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 16-byte client identifier carried in Hello, space padded.
    pub client_id: [u8; 16],
    pub license_mode: LicenseMode,
    /// This endpoint is a trusted MiTM (PBX).
    pub is_mitm: bool,
    /// Use the long retry schedule for circuit-switched transports.
    pub csd_timing: bool,
}

impl EngineConfig {
    pub fn new(client_id: &str) -> Self {
        let mut id = [b' '; 16];
        let src = client_id.as_bytes();
        let n = src.len().min(16);
        id[..n].copy_from_slice(&src[..n]);
        EngineConfig {
            client_id: id,
            license_mode: LicenseMode::Unlimited,
            is_mitm: false,
            csd_timing: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new("zrtp-rs")
    }
}
