use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cache::{SecretCache, Zid};
use crate::config::{EngineConfig, Profile, SignalingRole};
use crate::crypto::ComponentRegistry;
use crate::error::{Error, Result};
use crate::event::EventHandler;
use crate::rand_source::EntropyPool;
use crate::sched::{Scheduler, TimingProfile};
use crate::session::Session;
use crate::stream::{State, Stream, StreamMode};

pub(crate) fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Host transport for outgoing ZRTP packets. The engine builds complete
/// wire packets; the host owns sockets and addressing.
pub trait PacketSender: Send + Sync {
    fn send_packet(&self, stream_id: u32, packet: &[u8]) -> Result<usize>;
}

/// The callback bundle every engine is created with.
pub struct Callbacks {
    pub cache: Arc<dyn SecretCache>,
    pub scheduler: Arc<dyn Scheduler>,
    pub events: Arc<dyn EventHandler>,
    pub sender: Arc<dyn PacketSender>,
}

/// Shared engine state handed to every session and stream.
pub struct EngineContext {
    pub config: EngineConfig,
    pub registry: ComponentRegistry,
    pub entropy: EntropyPool,
    pub cache: Arc<dyn SecretCache>,
    pub scheduler: Arc<dyn Scheduler>,
    pub events: Arc<dyn EventHandler>,
    pub sender: Arc<dyn PacketSender>,
    pub timing: TimingProfile,
    pub(crate) sessions: Mutex<Vec<Weak<Session>>>,
    next_session_id: AtomicU32,
    next_stream_id: AtomicU32,
}

impl EngineContext {
    pub(crate) fn next_stream_id(&self) -> u32 {
        self.next_stream_id.fetch_add(1, Ordering::AcqRel)
    }

    fn next_session_id(&self) -> u32 {
        self.next_session_id.fetch_add(1, Ordering::AcqRel)
    }

    /// True when another stream towards the same peer is mid key
    /// agreement. Only one DH exchange may run per ZID pair; fast modes
    /// must also wait for a running DH stream.
    ///
    /// Reads the lock-free state mirrors so it can be called while the
    /// asking stream's own lock is held.
    pub(crate) fn dh_exchange_in_progress(
        &self,
        peer_zid: &Zid,
        asking_stream: u32,
    ) -> Option<Arc<Stream>> {
        let sessions = self.sessions.lock().expect("engine lock");
        for weak in sessions.iter() {
            let Some(session) = weak.upgrade() else {
                continue;
            };
            if session.peer_zid().as_ref() != Some(peer_zid) {
                continue;
            }
            for stream in session.streams() {
                if stream.id() == asking_stream || stream.mode() != StreamMode::Dh {
                    continue;
                }
                if matches!(
                    stream.state(),
                    State::StartInitiatingSecure
                        | State::InitiatingSecure
                        | State::WaitConfirm1
                        | State::WaitConfirmAck
                        | State::PendingSecure
                        | State::WaitConfirm2
                ) {
                    return Some(stream);
                }
            }
        }
        None
    }
}

/// The engine: process-global context owning the component registries,
/// the entropy pool, the callback bundle and the session list.
pub struct ZrtpEngine {
    pub(crate) ctx: Arc<EngineContext>,
}

impl ZrtpEngine {
    pub fn new(config: EngineConfig, callbacks: Callbacks) -> Arc<Self> {
        let registry = ComponentRegistry::with_defaults();
        let timing = if config.csd_timing {
            TimingProfile::csd()
        } else {
            TimingProfile::default()
        };

        log::info!(
            "zrtp engine up, client id {:?}",
            String::from_utf8_lossy(&config.client_id)
        );

        Arc::new(ZrtpEngine {
            ctx: Arc::new(EngineContext {
                config,
                registry,
                entropy: EntropyPool::new(),
                cache: callbacks.cache,
                scheduler: callbacks.scheduler,
                events: callbacks.events,
                sender: callbacks.sender,
                timing,
                sessions: Mutex::new(Vec::new()),
                next_session_id: AtomicU32::new(1),
                next_stream_id: AtomicU32::new(1),
            }),
        })
    }

    /// Feeds host entropy (timing jitter, audio noise) into the pool.
    pub fn add_entropy(&self, data: &[u8]) {
        self.ctx.entropy.add_entropy(data);
    }

    /// Creates a session for one call. The profile is validated against
    /// the registered components.
    pub fn session_init(
        &self,
        profile: Profile,
        zid: Zid,
        signaling_role: SignalingRole,
    ) -> Result<Arc<Session>> {
        self.ctx.registry.check_profile(&profile)?;
        if profile.hash_schemes.is_empty()
            || profile.cipher_types.is_empty()
            || profile.pk_schemes.is_empty()
            || profile.auth_tag_lens.is_empty()
            || profile.sas_schemes.is_empty()
        {
            return Err(Error::BadParam);
        }

        let session = Session::new(
            self.ctx.next_session_id(),
            zid,
            profile,
            signaling_role,
            Arc::clone(&self.ctx),
        );
        self.ctx
            .sessions
            .lock()
            .expect("engine lock")
            .push(session.weak());
        Ok(session)
    }

    /// Detaches a finished session. Its streams are stopped first.
    pub fn session_done(&self, session: &Arc<Session>) {
        session.stop();
        let mut sessions = self.ctx.sessions.lock().expect("engine lock");
        sessions.retain(|weak| {
            weak.upgrade()
                .map(|s| !Arc::ptr_eq(&s, session))
                .unwrap_or(false)
        });
    }

    /// Shuts the engine down: stops every live session.
    pub fn down(&self) {
        let sessions: Vec<_> = {
            let guard = self.ctx.sessions.lock().expect("engine lock");
            guard.iter().filter_map(|w| w.upgrade()).collect()
        };
        for session in sessions {
            session.stop();
        }
        self.ctx.sessions.lock().expect("engine lock").clear();
        log::info!("zrtp engine down");
    }
}
