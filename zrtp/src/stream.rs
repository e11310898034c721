use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;

use crate::crypto::pk::DhExchange;
use crate::engine::EngineContext;
use crate::error::{Error, ProtocolError, Result};
use crate::machine;
use crate::packet::{
    self, CommitMessage, ConfirmMessage, DhPartMessage, GoClearMessage, HelloMessage,
    MessageType, SasRelayMessage,
};
use crate::sched::{RetryTask, ScheduledTask, TaskKind, TASK_KIND_COUNT};
use crate::session::Session;

/// Stream protocol states.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    None = 0,
    /// Attached, protocol not started.
    Active,
    /// Protocol initiated, discovery not started yet.
    Start,
    /// Hello resending, waiting for HelloAck.
    WaitHelloAck,
    /// HelloAck received, waiting for the peer Hello.
    WaitHello,
    Clear,
    /// Going to initiate, possibly parked behind a concurrent exchange.
    StartInitiatingSecure,
    /// Commit resending, waiting for DHPart1.
    InitiatingSecure,
    /// DHPart2 resending, waiting for Confirm1.
    WaitConfirm1,
    /// Confirm2 resending, waiting for Conf2Ack.
    WaitConfirmAck,
    /// Responder path, waiting for DHPart2.
    PendingSecure,
    /// Responder path, waiting for Confirm2.
    WaitConfirm2,
    Secure,
    /// Trusted-MiTM SAS transfer in flight.
    SasRelaying,
    InitiatingClear,
    PendingClear,
    InitiatingError,
    PendingError,
    Error,
    NoZrtp,
}

impl State {
    pub(crate) fn from_u8(v: u8) -> State {
        match v {
            1 => State::Active,
            2 => State::Start,
            3 => State::WaitHelloAck,
            4 => State::WaitHello,
            5 => State::Clear,
            6 => State::StartInitiatingSecure,
            7 => State::InitiatingSecure,
            8 => State::WaitConfirm1,
            9 => State::WaitConfirmAck,
            10 => State::PendingSecure,
            11 => State::WaitConfirm2,
            12 => State::Secure,
            13 => State::SasRelaying,
            14 => State::InitiatingClear,
            15 => State::PendingClear,
            16 => State::InitiatingError,
            17 => State::PendingError,
            18 => State::Error,
            19 => State::NoZrtp,
            _ => State::None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum StreamMode {
    #[default]
    Unknown = 0,
    Clear,
    Dh,
    Preshared,
    Multistream,
}

impl StreamMode {
    pub(crate) fn from_u8(v: u8) -> StreamMode {
        match v {
            1 => StreamMode::Clear,
            2 => StreamMode::Dh,
            3 => StreamMode::Preshared,
            4 => StreamMode::Multistream,
            _ => StreamMode::Unknown,
        }
    }
}

/// Role of this endpoint in the trusted MiTM ritual.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum MitmMode {
    #[default]
    None,
    /// Talking to a trusted-MiTM peer.
    Client,
    /// PBX pushing a SAS to a registered client.
    ReconfirmServer,
    /// Accepted a SAS transfer from the trusted MiTM.
    ReconfirmClient,
    /// PBX answering an enrollment call.
    RegServer,
    /// Invited into the enrollment ritual by the Confirm flag.
    RegClient,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum Role {
    #[default]
    Unknown,
    Initiator,
    Responder,
}

/// Messages built and received during the exchange, kept marshaled for
/// resends, HMAC verification and the total hash.
#[derive(Default)]
pub(crate) struct MessageCache {
    pub hello: Option<HelloMessage>,
    pub hello_raw: Vec<u8>,
    pub peer_hello: Option<HelloMessage>,
    pub peer_hello_raw: Vec<u8>,
    pub commit: Option<CommitMessage>,
    pub commit_raw: Vec<u8>,
    pub peer_commit: Option<CommitMessage>,
    pub peer_commit_raw: Vec<u8>,
    pub dhpart: Option<DhPartMessage>,
    pub dhpart_raw: Vec<u8>,
    pub peer_dhpart: Option<DhPartMessage>,
    pub peer_dhpart_raw: Vec<u8>,
    pub confirm: Option<ConfirmMessage>,
    pub confirm_raw: Vec<u8>,
    pub peer_confirm: Option<ConfirmMessage>,
    pub goclear: Option<GoClearMessage>,
    pub goclear_raw: Vec<u8>,
    pub error: Option<packet::ErrorMessage>,
    pub error_raw: Vec<u8>,
    pub sasrelay: Option<SasRelayMessage>,
    pub sasrelay_raw: Vec<u8>,

    /// Local hash chain, innermost first. h3 goes into our Hello.
    pub h0: [u8; 32],
    pub h1: [u8; 32],
    pub h2: [u8; 32],
    pub h3: [u8; 32],

    /// Expected hash of the peer Hello, delivered over signaling.
    pub signaling_hash: Option<[u8; 32]>,
}

/// Transient negotiation crypto, wiped at Secure entry.
#[derive(Default)]
pub(crate) struct ProtoCrypto {
    pub s0: Vec<u8>,
    /// Local commitment: hvi for DH, nonce (+ keyed hmac) for fast modes.
    pub hv: Vec<u8>,
    pub peer_hv: Vec<u8>,
    pub total_hash: Vec<u8>,
    pub dhss: Vec<u8>,
}

impl Drop for ProtoCrypto {
    fn drop(&mut self) {
        for b in self.s0.iter_mut().chain(self.dhss.iter_mut()) {
            *b = 0;
        }
    }
}

/// Key material derived from s0 that is consumed at Secure entry.
#[derive(Default)]
pub(crate) struct PendingKeys {
    pub srtp_local: srtp::StreamKeys,
    pub srtp_remote: srtp::StreamKeys,
    pub sashash: Vec<u8>,
    pub new_rs1: Vec<u8>,
    pub session_key: Vec<u8>,
}

impl Drop for PendingKeys {
    fn drop(&mut self) {
        for b in self
            .sashash
            .iter_mut()
            .chain(self.new_rs1.iter_mut())
            .chain(self.session_key.iter_mut())
        {
            *b = 0;
        }
    }
}

/// Keys that survive Secure entry; needed to sign and verify Confirm,
/// GoClear and SASRelay after the transient crypto is gone.
#[derive(Default)]
pub(crate) struct StreamCrypto {
    pub hmackey: Vec<u8>,
    pub peer_hmackey: Vec<u8>,
    pub zrtp_key: Vec<u8>,
    pub peer_zrtp_key: Vec<u8>,
}

impl Drop for StreamCrypto {
    fn drop(&mut self) {
        for b in self
            .hmackey
            .iter_mut()
            .chain(self.peer_hmackey.iter_mut())
            .chain(self.zrtp_key.iter_mut())
            .chain(self.peer_zrtp_key.iter_mut())
        {
            *b = 0;
        }
    }
}

pub(crate) struct StreamInner {
    pub state: State,
    pub prev_state: State,
    pub mode: StreamMode,
    pub mitm_mode: MitmMode,
    pub role: Role,

    pub is_hello_received: bool,
    pub is_helloack_received: bool,

    pub messages: MessageCache,
    pub dh: Option<DhExchange>,
    pub proto: ProtoCrypto,
    pub crypto: Option<StreamCrypto>,
    pub pending: Option<PendingKeys>,
    pub srtp: Option<srtp::SessionProtection>,

    /// Highest straightened incoming ZRTP sequence.
    pub last_in_seq: Option<u32>,
    pub peer_ssrc: u32,

    pub peer_passive: bool,
    pub peer_mitm: bool,
    pub peer_disclose: bool,
    pub peer_sas_verified: bool,
    pub peer_enrollment: bool,

    pub allowclear: bool,
    pub cache_ttl: u32,
    pub last_error: Option<ProtocolError>,

    /// Parked stream resumed once this exchange leaves InitiatingSecure.
    pub concurrent: Option<Arc<Stream>>,
}

/// One media direction-pair within a session.
pub struct Stream {
    id: u32,
    ssrc: u32,
    pub(crate) session: Weak<Session>,
    pub(crate) ctx: Arc<EngineContext>,
    pub(crate) inner: Mutex<StreamInner>,
    /// Lock-free mirrors of state and mode for cross-stream scans.
    state_cell: AtomicU8,
    mode_cell: AtomicU8,
    out_seq: AtomicU32,
    pub(crate) tasks: [Arc<RetryTask>; TASK_KIND_COUNT],
}

impl Stream {
    pub(crate) fn new(
        id: u32,
        ssrc: u32,
        session: Weak<Session>,
        ctx: Arc<EngineContext>,
    ) -> Arc<Self> {
        let tasks = [
            Arc::new(RetryTask::new(TaskKind::Hello)),
            Arc::new(RetryTask::new(TaskKind::Commit)),
            Arc::new(RetryTask::new(TaskKind::DhPart)),
            Arc::new(RetryTask::new(TaskKind::Confirm)),
            Arc::new(RetryTask::new(TaskKind::GoClear)),
            Arc::new(RetryTask::new(TaskKind::Error)),
            Arc::new(RetryTask::new(TaskKind::ErrorAck)),
            Arc::new(RetryTask::new(TaskKind::SasRelay)),
            Arc::new(RetryTask::new(TaskKind::Process)),
        ];
        Arc::new(Stream {
            id,
            ssrc,
            session,
            ctx,
            inner: Mutex::new(StreamInner {
                state: State::Active,
                prev_state: State::None,
                mode: StreamMode::Unknown,
                mitm_mode: MitmMode::None,
                role: Role::Unknown,
                is_hello_received: false,
                is_helloack_received: false,
                messages: MessageCache::default(),
                dh: None,
                proto: ProtoCrypto::default(),
                crypto: None,
                pending: None,
                srtp: None,
                last_in_seq: None,
                peer_ssrc: 0,
                peer_passive: false,
                peer_mitm: false,
                peer_disclose: false,
                peer_sas_verified: false,
                peer_enrollment: false,
                allowclear: false,
                cache_ttl: u32::MAX,
                last_error: None,
                concurrent: None,
            }),
            state_cell: AtomicU8::new(State::Active as u8),
            mode_cell: AtomicU8::new(StreamMode::Unknown as u8),
            out_seq: AtomicU32::new(1),
            tasks,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Current state, readable without the stream lock.
    pub fn state(&self) -> State {
        State::from_u8(self.state_cell.load(Ordering::Acquire))
    }

    pub fn mode(&self) -> StreamMode {
        StreamMode::from_u8(self.mode_cell.load(Ordering::Acquire))
    }

    pub(crate) fn set_state_cell(&self, state: State) {
        self.state_cell.store(state as u8, Ordering::Release);
    }

    pub(crate) fn set_mode_cell(&self, mode: StreamMode) {
        self.mode_cell.store(mode as u8, Ordering::Release);
    }

    pub(crate) fn session(&self) -> Result<Arc<Session>> {
        self.session.upgrade().ok_or(Error::WrongState)
    }

    /// Begins discovery: sends Hello and runs the retry schedule.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let session = self.session()?;
        let _init = session.init_lock.lock().expect("init lock");
        if self.state() != State::Active {
            return Err(Error::WrongState);
        }
        machine::with_stream(self, |stream, inner, outbox| {
            machine::discovery::start_discovery(stream, inner, outbox)
        })
    }

    /// Starts securing. With `autosecure` this happens on its own after
    /// discovery.
    pub fn secure(self: &Arc<Self>) -> Result<()> {
        machine::with_stream(self, |stream, inner, outbox| {
            if inner.state != State::Clear {
                return Err(Error::WrongState);
            }
            machine::initiator::start_initiating_secure(stream, inner, outbox)
        })
    }

    /// From Secure: initiates GoClear. From PendingClear: the host's
    /// confirmation that completes the peer-initiated teardown.
    pub fn clear(self: &Arc<Self>) -> Result<()> {
        machine::with_stream(self, |stream, inner, outbox| {
            machine::clear::host_clear(stream, inner, outbox)
        })
    }

    /// Synchronous shutdown: emits a final Error message when the
    /// exchange is mid-flight, then drains scheduled callbacks so the
    /// stream can be dropped safely.
    pub fn stop(self: &Arc<Self>) {
        let _ = machine::with_stream(self, |stream, inner, outbox| {
            machine::error::stop_stream(stream, inner, outbox);
            Ok(())
        });
        self.cancel_all_tasks();
        self.ctx.scheduler.wait_call_later(self.id);
        let mut inner = self.inner.lock().expect("stream lock");
        inner.srtp = None;
        inner.crypto = None;
        inner.dh = None;
        inner.state = State::None;
        self.set_state_cell(State::None);
    }

    /// Trusted-MiTM server call: relays the SAS hash of the linked leg
    /// to this stream's peer.
    pub fn relay_sas(
        self: &Arc<Self>,
        sashash: &[u8; 32],
        scheme: crate::crypto::SasId,
    ) -> Result<()> {
        machine::with_stream(self, |stream, inner, outbox| {
            machine::mitm::start_sas_relay(stream, inner, outbox, sashash, scheme)
        })
    }

    /// Expected hash of the peer Hello received over the signaling path.
    pub fn set_signaling_hash(&self, hash: [u8; 32]) {
        let mut inner = self.inner.lock().expect("stream lock");
        inner.messages.signaling_hash = Some(hash);
    }

    /// Hash of our own Hello, to be published over signaling.
    pub fn signaling_hash(&self) -> Option<[u8; 32]> {
        let inner = self.inner.lock().expect("stream lock");
        if inner.messages.hello_raw.is_empty() {
            return None;
        }
        let digest = crate::crypto::hash::digest(
            crate::crypto::HashId::S256,
            &inner.messages.hello_raw,
        );
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Some(out)
    }

    /// Outgoing RTP. In Secure the payload is encrypted in place and the
    /// auth tag appended; otherwise the packet passes through unchanged.
    pub fn process_rtp(&self, packet: &[u8]) -> Result<Bytes> {
        let mut inner = self.inner.lock().expect("stream lock");
        match &mut inner.srtp {
            Some(protection) => Ok(protection.outbound.encrypt_rtp(packet)?),
            None => Ok(Bytes::copy_from_slice(packet)),
        }
    }

    /// Outgoing RTCP, as [`Stream::process_rtp`].
    pub fn process_rtcp(&self, packet: &[u8]) -> Result<Bytes> {
        let mut inner = self.inner.lock().expect("stream lock");
        match &mut inner.srtp {
            Some(protection) => Ok(protection.outbound.encrypt_rtcp(packet)?),
            None => Ok(Bytes::copy_from_slice(packet)),
        }
    }

    /// Incoming packet from the RTP port. ZRTP control packets are
    /// consumed (None); media is unprotected and returned.
    pub fn process_srtp(self: &Arc<Self>, packet: &[u8]) -> Result<Option<Bytes>> {
        if packet::is_zrtp_packet(packet) {
            self.process_zrtp(packet)?;
            return Ok(None);
        }
        let mut inner = self.inner.lock().expect("stream lock");
        match &mut inner.srtp {
            Some(protection) => Ok(Some(protection.inbound.decrypt_rtp(packet)?)),
            None => Ok(Some(Bytes::copy_from_slice(packet))),
        }
    }

    /// Incoming packet from the RTCP port.
    pub fn process_srtcp(self: &Arc<Self>, packet: &[u8]) -> Result<Option<Bytes>> {
        if packet::is_zrtp_packet(packet) {
            self.process_zrtp(packet)?;
            return Ok(None);
        }
        let mut inner = self.inner.lock().expect("stream lock");
        match &mut inner.srtp {
            Some(protection) => Ok(Some(protection.inbound.decrypt_rtcp(packet)?)),
            None => Ok(Some(Bytes::copy_from_slice(packet))),
        }
    }

    fn process_zrtp(self: &Arc<Self>, packet: &[u8]) -> Result<()> {
        let info = match packet::preparse(packet) {
            Ok(info) => info,
            Err(Error::CrcFail) => {
                // silent drop, a flipped bit must not drive the machine
                log::warn!("stream {}: dropping ZRTP packet with bad CRC", self.id);
                return Err(Error::CrcFail);
            }
            Err(e) => return Err(e),
        };

        let message =
            &packet[info.message_offset..info.message_offset + info.message_len];
        let parsed = packet::Message::unmarshal(message)?;

        machine::with_stream(self, |stream, inner, outbox| {
            machine::check_replay(inner, &info)?;
            inner.peer_ssrc = info.ssrc;
            machine::handle_message(stream, inner, outbox, parsed, message)
        })
    }

    /// Entry point for scheduler callbacks.
    pub(crate) fn handle_retry(self: &Arc<Self>, kind: TaskKind) {
        let result = machine::with_stream(self, |stream, inner, outbox| {
            machine::handle_retry(stream, inner, outbox, kind)
        });
        if let Err(e) = result {
            log::debug!("stream {}: retry {kind:?} stopped: {e}", self.id);
        }
    }

    /// Frames a marshaled message and hands it to the host transport.
    pub(crate) fn send_wire(&self, msg_type: MessageType, message: &[u8]) {
        let seq = (self.out_seq.fetch_add(1, Ordering::AcqRel) & 0xffff) as u16;
        let framed = packet::frame_packet(seq, self.ssrc, message);
        log::trace!(
            "stream {}: sending {msg_type} seq {seq} ({} bytes)",
            self.id,
            framed.len()
        );
        if let Err(e) = self.ctx.sender.send_packet(self.id, &framed) {
            // transient transport failures ride on the retransmission
            // schedule
            log::warn!("stream {}: send {msg_type} failed: {e}", self.id);
        }
    }

    pub(crate) fn schedule(self: &Arc<Self>, kind: TaskKind, timeout_ms: u32) {
        let task = &self.tasks[kind.index()];
        let generation = task.arm(timeout_ms);
        self.ctx.scheduler.call_later(ScheduledTask {
            stream: Arc::clone(self),
            task: Arc::clone(task),
            generation,
        });
    }

    pub(crate) fn reschedule(self: &Arc<Self>, kind: TaskKind, timeout_ms: u32) {
        let task = &self.tasks[kind.index()];
        let generation = task.rearm(timeout_ms);
        self.ctx.scheduler.call_later(ScheduledTask {
            stream: Arc::clone(self),
            task: Arc::clone(task),
            generation,
        });
    }

    pub(crate) fn cancel_task(&self, kind: TaskKind) {
        self.tasks[kind.index()].cancel();
        self.ctx.scheduler.cancel_call_later(self.id, Some(kind));
    }

    pub(crate) fn cancel_all_tasks(&self) {
        for task in &self.tasks {
            task.cancel();
        }
        self.ctx.scheduler.cancel_call_later(self.id, None);
    }

    pub fn info(&self) -> StreamInfo {
        let inner = self.inner.lock().expect("stream lock");
        StreamInfo {
            id: self.id,
            state: inner.state,
            prev_state: inner.prev_state,
            mode: inner.mode,
            mitm_mode: inner.mitm_mode,
            last_error: inner.last_error,
            allowclear: inner.allowclear,
            cache_ttl: inner.cache_ttl,
            peer_passive: inner.peer_passive,
            peer_mitm: inner.peer_mitm,
            peer_disclose: inner.peer_disclose,
        }
    }
}

/// Read-only snapshot for UI and logging.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub id: u32,
    pub state: State,
    pub prev_state: State,
    pub mode: StreamMode,
    pub mitm_mode: MitmMode,
    pub last_error: Option<ProtocolError>,
    pub allowclear: bool,
    pub cache_ttl: u32,
    pub peer_passive: bool,
    pub peer_mitm: bool,
    pub peer_disclose: bool,
}
