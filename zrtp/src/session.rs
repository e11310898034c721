use std::sync::{Arc, Mutex, Weak};

use crate::cache::{RetainedSecret, Zid};
use crate::config::{Profile, SignalingRole};
use crate::crypto::sas::RenderedSas;
use crate::crypto::{CipherId, HashId, PkId, SasId, TagLengthId};
use crate::engine::{unix_now, EngineContext};
use crate::error::{Error, Result};
use crate::stream::Stream;

pub const MAX_STREAMS_PER_SESSION: usize = 2;

/// Secret length the engine generates and rotates, bytes.
pub(crate) const RS_LENGTH: usize = 32;

/// Component set agreed for the session after the first Hello exchange.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub hash: HashId,
    pub cipher: CipherId,
    pub auth_tag_len: TagLengthId,
    pub pk_scheme: PkId,
    pub sas_scheme: SasId,
}

/// One retained secret slot with its protocol flags.
#[derive(Debug, Clone, Default)]
pub(crate) struct SecretSlot {
    pub value: Option<Vec<u8>>,
    /// Loaded from the cache rather than generated for this session.
    pub cached: bool,
    /// The peer proved knowledge of the same value.
    pub matched: bool,
    /// Both sides hold a non-expired value but they differ.
    pub wrong: bool,
    pub ttl: u32,
    pub lastused_at: u32,
}

impl SecretSlot {
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

/// The session's retained secrets, loaded once when its first stream
/// starts negotiating.
#[derive(Debug, Clone, Default)]
pub(crate) struct SecretsBundle {
    pub rs1: SecretSlot,
    pub rs2: SecretSlot,
    pub aux: SecretSlot,
    pub pbx: SecretSlot,
    pub loaded: bool,
}

pub(crate) struct SessionShared {
    pub peer_zid: Option<Zid>,
    pub negotiated: Option<Negotiated>,
    pub secrets: SecretsBundle,
    /// Lets Multistream children derive keys without a new DH.
    pub zrtp_session_key: Option<Vec<u8>>,
    pub sas: RenderedSas,
    pub sasbin: Vec<u8>,
    pub sas_computed: bool,
    pub mitm_alert_detected: bool,
    /// Fast-mode commitment nonces seen in this session.
    pub used_nonces: Vec<Vec<u8>>,
}

/// One call between the local endpoint and one remote endpoint. Owns up
/// to [`MAX_STREAMS_PER_SESSION`] media streams.
pub struct Session {
    pub(crate) id: u32,
    pub(crate) zid: Zid,
    pub(crate) profile: Profile,
    pub(crate) signaling_role: SignalingRole,
    pub(crate) ctx: Arc<EngineContext>,
    pub(crate) shared: Mutex<SessionShared>,
    pub(crate) streams: Mutex<Vec<Arc<Stream>>>,
    /// Serializes the first `start` so simultaneous host calls cannot
    /// both begin discovery on the same stream.
    pub(crate) init_lock: Mutex<()>,
}

impl Session {
    pub(crate) fn new(
        id: u32,
        zid: Zid,
        profile: Profile,
        signaling_role: SignalingRole,
        ctx: Arc<EngineContext>,
    ) -> Arc<Self> {
        Arc::new(Session {
            id,
            zid,
            profile,
            signaling_role,
            ctx,
            shared: Mutex::new(SessionShared {
                peer_zid: None,
                negotiated: None,
                secrets: SecretsBundle::default(),
                zrtp_session_key: None,
                sas: RenderedSas::default(),
                sasbin: Vec::new(),
                sas_computed: false,
                mitm_alert_detected: false,
                used_nonces: Vec::new(),
            }),
            streams: Mutex::new(Vec::new()),
            init_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn zid(&self) -> &Zid {
        &self.zid
    }

    pub fn peer_zid(&self) -> Option<Zid> {
        self.shared.lock().expect("session lock").peer_zid
    }

    /// Attaches a media stream to the session.
    pub fn attach_stream(self: &Arc<Self>, ssrc: u32) -> Result<Arc<Stream>> {
        let mut streams = self.streams.lock().expect("session lock");
        if streams.len() >= MAX_STREAMS_PER_SESSION {
            return Err(Error::BadParam);
        }
        let stream = Stream::new(
            self.ctx.next_stream_id(),
            ssrc,
            Arc::downgrade(self),
            Arc::clone(&self.ctx),
        );
        streams.push(Arc::clone(&stream));
        log::debug!(
            "session {}: attached stream {} (ssrc {ssrc:#x})",
            self.id,
            stream.id()
        );
        Ok(stream)
    }

    pub fn streams(&self) -> Vec<Arc<Stream>> {
        self.streams.lock().expect("session lock").clone()
    }

    /// The rendered SAS strings, available once any stream is Secure.
    pub fn sas(&self) -> RenderedSas {
        self.shared.lock().expect("session lock").sas.clone()
    }

    pub fn negotiated(&self) -> Option<Negotiated> {
        self.shared.lock().expect("session lock").negotiated
    }

    /// Host verdict after the user compared SAS strings. Persisted per
    /// ZID pair.
    pub fn set_verified(&self, verified: bool) -> Result<()> {
        let peer = self.peer_zid().ok_or(Error::WrongState)?;
        self.ctx.cache.set_verified(&self.zid, &peer, verified);
        Ok(())
    }

    pub fn verified(&self) -> bool {
        match self.peer_zid() {
            Some(peer) => self.ctx.cache.verified(&self.zid, &peer),
            None => false,
        }
    }

    /// Installs the caller-provided auxiliary shared secret. Must be set
    /// before key agreement starts to take part in the secret sort.
    pub fn set_aux_secret(&self, secret: &[u8]) -> Result<()> {
        let mut shared = self.shared.lock().expect("session lock");
        if shared.secrets.loaded {
            return Err(Error::WrongState);
        }
        shared.secrets.aux = SecretSlot {
            value: Some(secret.to_vec()),
            cached: true,
            matched: false,
            wrong: false,
            ttl: u32::MAX,
            lastused_at: unix_now(),
        };
        Ok(())
    }

    /// Loads retained secrets from the cache on the first negotiating
    /// stream. Missing or expired slots are filled with fresh random
    /// values so the exchange shape does not leak cache state.
    pub(crate) fn prepare_secrets(&self, peer_zid: &Zid) -> Result<()> {
        let mut shared = self.shared.lock().expect("session lock");
        if shared.secrets.loaded {
            return Ok(());
        }
        let now = unix_now();

        let load = |found: Option<RetainedSecret>| -> Result<SecretSlot> {
            match found {
                Some(rs) if !rs.is_expired(now) => Ok(SecretSlot {
                    value: Some(rs.value.clone()),
                    cached: true,
                    matched: false,
                    wrong: false,
                    ttl: rs.ttl,
                    lastused_at: rs.lastused_at,
                }),
                _ => Ok(SecretSlot {
                    value: Some(self.ctx.entropy.random_bytes(RS_LENGTH)?),
                    cached: false,
                    matched: false,
                    wrong: false,
                    ttl: self.profile.cache_ttl,
                    lastused_at: now,
                }),
            }
        };

        shared.secrets.rs1 = load(self.ctx.cache.get(&self.zid, peer_zid, false))?;
        shared.secrets.rs2 = load(self.ctx.cache.get(&self.zid, peer_zid, true))?;
        if shared.secrets.aux.value.is_none() {
            shared.secrets.aux = load(None)?;
        }
        shared.secrets.pbx = load(self.ctx.cache.get_mitm(&self.zid, peer_zid))?;
        shared.secrets.loaded = true;

        log::debug!(
            "session {}: secrets prepared (rs1 cached: {}, rs2 cached: {}, pbx cached: {})",
            self.id,
            shared.secrets.rs1.cached,
            shared.secrets.rs2.cached,
            shared.secrets.pbx.cached,
        );
        Ok(())
    }

    /// Synchronously stops every stream.
    pub fn stop(&self) {
        let streams = self.streams();
        for stream in streams {
            stream.stop();
        }
    }

    pub(crate) fn weak(self: &Arc<Self>) -> Weak<Self> {
        Arc::downgrade(self)
    }
}

/// Read-only snapshot for UI and logging.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: u32,
    pub zid: Zid,
    pub peer_zid: Option<Zid>,
    pub negotiated: Option<Negotiated>,
    pub sas: RenderedSas,
    pub verified: bool,
    pub mitm_alert_detected: bool,
}

impl Session {
    pub fn info(&self) -> SessionInfo {
        let shared = self.shared.lock().expect("session lock");
        let peer_zid = shared.peer_zid;
        let info = SessionInfo {
            id: self.id,
            zid: self.zid,
            peer_zid,
            negotiated: shared.negotiated,
            sas: shared.sas.clone(),
            verified: false,
            mitm_alert_detected: shared.mitm_alert_detected,
        };
        drop(shared);
        SessionInfo {
            verified: self.verified(),
            ..info
        }
    }
}
