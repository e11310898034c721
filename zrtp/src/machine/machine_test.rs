use std::sync::{Arc, Mutex};

use super::*;
use crate::cache::{InMemoryCache, SecretCache};
use crate::config::{EngineConfig, LicenseMode, Profile, SignalingRole};
use crate::crypto::{PkId, SasId};
use crate::engine::{Callbacks, PacketSender, ZrtpEngine};
use crate::error::ProtocolError;
use crate::event::EventHandler;
use crate::packet;
use crate::sched::{ScheduledTask, Scheduler, TaskKind};
use crate::session::Session;

const ZID_A: [u8; 12] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
];
const ZID_B: [u8; 12] = [
    0x0d, 0x0e, 0x0f, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18,
];

#[derive(Default)]
struct TestSender {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl PacketSender for TestSender {
    fn send_packet(&self, _stream_id: u32, packet: &[u8]) -> Result<usize> {
        self.sent.lock().unwrap().push(packet.to_vec());
        Ok(packet.len())
    }
}

/// Manual scheduler: tasks queue up and tests fire them explicitly, so
/// every scenario is deterministic without real timers.
#[derive(Default)]
struct TestScheduler {
    queue: Mutex<Vec<(u32, ScheduledTask)>>,
}

impl TestScheduler {
    /// Fires the next queued task of the given kind, returning its
    /// scheduled timeout.
    fn fire(&self, kind: TaskKind) -> Option<u32> {
        let entry = {
            let mut queue = self.queue.lock().unwrap();
            let pos = queue.iter().position(|(_, t)| t.kind() == kind)?;
            queue.remove(pos)
        };
        let timeout = entry.0;
        entry.1.run();
        Some(timeout)
    }

    fn pending(&self, kind: TaskKind) -> usize {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, t)| t.kind() == kind)
            .count()
    }
}

impl Scheduler for TestScheduler {
    fn call_later(&self, task: ScheduledTask) {
        self.queue
            .lock()
            .unwrap()
            .push((task.timeout_ms(), task));
    }

    fn cancel_call_later(&self, stream_id: u32, kind: Option<TaskKind>) {
        self.queue.lock().unwrap().retain(|(_, t)| {
            !(t.stream_id() == stream_id && kind.map_or(true, |k| t.kind() == k))
        });
    }

    fn wait_call_later(&self, _stream_id: u32) {}
}

#[derive(Default)]
struct TestEvents {
    protocol: Mutex<Vec<ProtocolEvent>>,
    security: Mutex<Vec<SecurityEvent>>,
    secure: Mutex<u32>,
}

impl EventHandler for TestEvents {
    fn on_protocol_event(&self, _stream_id: u32, event: ProtocolEvent) {
        self.protocol.lock().unwrap().push(event);
    }

    fn on_security_event(&self, _stream_id: u32, event: SecurityEvent) {
        self.security.lock().unwrap().push(event);
    }

    fn on_secure(&self, _stream_id: u32) {
        *self.secure.lock().unwrap() += 1;
    }
}

impl TestEvents {
    fn saw_protocol(&self, event: ProtocolEvent) -> bool {
        self.protocol.lock().unwrap().contains(&event)
    }

    fn saw_security(&self, event: SecurityEvent) -> bool {
        self.security.lock().unwrap().contains(&event)
    }
}

struct Endpoint {
    engine: Arc<ZrtpEngine>,
    session: Arc<Session>,
    stream: Arc<Stream>,
    sender: Arc<TestSender>,
    sched: Arc<TestScheduler>,
    events: Arc<TestEvents>,
    cache: Arc<InMemoryCache>,
}

impl Endpoint {
    fn new(
        zid: [u8; 12],
        role: SignalingRole,
        profile: Profile,
        config: EngineConfig,
        cache: Arc<InMemoryCache>,
    ) -> Endpoint {
        let sender = Arc::new(TestSender::default());
        let sched = Arc::new(TestScheduler::default());
        let events = Arc::new(TestEvents::default());
        let engine = ZrtpEngine::new(
            config,
            Callbacks {
                cache: cache.clone(),
                scheduler: sched.clone(),
                events: events.clone(),
                sender: sender.clone(),
            },
        );
        let session = engine.session_init(profile, zid, role).unwrap();
        let stream = session.attach_stream(0x1000 + zid[0] as u32).unwrap();
        Endpoint {
            engine,
            session,
            stream,
            sender,
            sched,
            events,
            cache,
        }
    }

    fn plain(zid: [u8; 12], role: SignalingRole) -> Endpoint {
        Endpoint::new(
            zid,
            role,
            Profile::default(),
            EngineConfig::new("test endpoint"),
            Arc::new(InMemoryCache::new()),
        )
    }

    fn drain(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.sender.sent.lock().unwrap())
    }
}

fn msg_type_of(packet: &[u8]) -> packet::MessageType {
    let info = packet::preparse(packet).unwrap();
    packet::peek_type(packet, &info).unwrap()
}

/// Shuttles packets between the endpoints until both go quiet. Returns
/// every message type seen on the wire.
fn pump(a: &Endpoint, b: &Endpoint) -> Vec<packet::MessageType> {
    let mut log = Vec::new();
    for _ in 0..64 {
        let pa = a.drain();
        let pb = b.drain();
        if pa.is_empty() && pb.is_empty() {
            return log;
        }
        for p in pa {
            log.push(msg_type_of(&p));
            let _ = b.stream.process_srtp(&p);
        }
        for p in pb {
            log.push(msg_type_of(&p));
            let _ = a.stream.process_srtp(&p);
        }
    }
    panic!("endpoints never went quiet");
}

fn run_call(a: &Endpoint, b: &Endpoint) -> Vec<packet::MessageType> {
    let _ = env_logger::builder().is_test(true).try_init();
    a.stream.start().unwrap();
    b.stream.start().unwrap();
    pump(a, b)
}

fn build_rtp(seq: u16, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0u8; 12];
    pkt[0] = 0x80;
    pkt[2..4].copy_from_slice(&seq.to_be_bytes());
    pkt[8..12].copy_from_slice(&ssrc.to_be_bytes());
    pkt.extend_from_slice(payload);
    pkt
}

#[test]
fn test_happy_path_dh() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);

    let log = run_call(&a, &b);

    assert_eq!(a.stream.state(), State::Secure);
    assert_eq!(b.stream.state(), State::Secure);
    assert_eq!(a.stream.mode(), StreamMode::Dh);

    // exactly one side ran the Initiator leg
    let dhpart1 = log.iter().filter(|t| **t == packet::MessageType::DhPart1).count();
    let dhpart2 = log.iter().filter(|t| **t == packet::MessageType::DhPart2).count();
    assert!(dhpart1 >= 1);
    assert!(dhpart2 >= 1);

    // both render the same non-empty SAS
    let sas_a = a.session.sas();
    let sas_b = b.session.sas();
    assert!(!sas_a.sas1.is_empty());
    assert_eq!(sas_a, sas_b);
    assert_eq!(sas_a.sas1.len(), 4, "B32 renders four characters");

    assert!(a.events.saw_protocol(ProtocolEvent::IsSecure));
    assert!(b.events.saw_protocol(ProtocolEvent::IsSecureDone));
    assert_eq!(*a.events.secure.lock().unwrap(), 1);

    // media now flows protected
    let rtp = build_rtp(1, 0xabc, b"voice frame");
    let protected = a.stream.process_rtp(&rtp).unwrap();
    assert_ne!(&protected[..], &rtp[..]);
    let received = b.stream.process_srtp(&protected).unwrap().unwrap();
    assert_eq!(&received[..], &rtp[..]);

    // and RTCP too
    let mut rtcp = vec![0x81, 0xc8, 0x00, 0x06];
    rtcp.extend_from_slice(&0xabcu32.to_be_bytes());
    rtcp.extend_from_slice(b"sender report here..");
    let protected = a.stream.process_rtcp(&rtcp).unwrap();
    let received = b.stream.process_srtcp(&protected).unwrap().unwrap();
    assert_eq!(&received[..], &rtcp[..]);
}

#[test]
fn test_feedback_mode_media() {
    let mut profile = Profile::default();
    profile.srtp_feedback_mode = true;

    let a = Endpoint::new(
        ZID_A,
        SignalingRole::Initiator,
        profile.clone(),
        EngineConfig::new("a"),
        Arc::new(InMemoryCache::new()),
    );
    let b = Endpoint::new(
        ZID_B,
        SignalingRole::Responder,
        profile,
        EngineConfig::new("b"),
        Arc::new(InMemoryCache::new()),
    );
    run_call(&a, &b);
    assert_eq!(a.stream.state(), State::Secure);

    let rtp = build_rtp(3, 0x42, b"cfb payload");
    let protected = a.stream.process_rtp(&rtp).unwrap();
    assert_ne!(&protected[..], &rtp[..]);
    let received = b.stream.process_srtp(&protected).unwrap().unwrap();
    assert_eq!(&received[..], &rtp[..]);
}

#[test]
fn test_media_passes_through_before_secure() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let rtp = build_rtp(1, 0x1, b"early media");
    let out = a.stream.process_rtp(&rtp).unwrap();
    assert_eq!(&out[..], &rtp[..]);
    let back = a.stream.process_srtp(&rtp).unwrap().unwrap();
    assert_eq!(&back[..], &rtp[..]);
}

#[test]
fn test_both_compute_identical_secrets() {
    let cache_a = Arc::new(InMemoryCache::new());
    let cache_b = Arc::new(InMemoryCache::new());

    let a = Endpoint::new(
        ZID_A,
        SignalingRole::Initiator,
        Profile::default(),
        EngineConfig::new("a"),
        cache_a.clone(),
    );
    let b = Endpoint::new(
        ZID_B,
        SignalingRole::Responder,
        Profile::default(),
        EngineConfig::new("b"),
        cache_b.clone(),
    );
    run_call(&a, &b);

    let rs_a = cache_a.get(&ZID_A, &ZID_B, false).expect("a cached rs1");
    let rs_b = cache_b.get(&ZID_B, &ZID_A, false).expect("b cached rs1");
    assert_eq!(rs_a.value, rs_b.value, "retained secrets must agree");
    assert_eq!(rs_a.value.len(), 32);

    assert_eq!(a.session.sas(), b.session.sas());
}

#[test]
fn test_retained_secret_rotation_across_calls() {
    let cache_a = Arc::new(InMemoryCache::new());
    let cache_b = Arc::new(InMemoryCache::new());

    let first = {
        let a = Endpoint::new(
            ZID_A,
            SignalingRole::Initiator,
            Profile::default(),
            EngineConfig::new("a"),
            cache_a.clone(),
        );
        let b = Endpoint::new(
            ZID_B,
            SignalingRole::Responder,
            Profile::default(),
            EngineConfig::new("b"),
            cache_b.clone(),
        );
        run_call(&a, &b);
        cache_a.get(&ZID_A, &ZID_B, false).unwrap().value.clone()
    };

    // second call with the persisted caches
    let a = Endpoint::new(
        ZID_A,
        SignalingRole::Initiator,
        Profile::default(),
        EngineConfig::new("a"),
        cache_a.clone(),
    );
    let b = Endpoint::new(
        ZID_B,
        SignalingRole::Responder,
        Profile::default(),
        EngineConfig::new("b"),
        cache_b.clone(),
    );
    run_call(&a, &b);

    assert_eq!(a.stream.state(), State::Secure);
    // matched continuity must not raise the MiTM warning
    assert!(!a.events.saw_security(SecurityEvent::MitmWarning));
    assert!(!b.events.saw_security(SecurityEvent::MitmWarning));

    // the previous rs1 rotated into the second slot, a fresh one on top
    let prev = cache_a.get(&ZID_A, &ZID_B, true).unwrap();
    assert_eq!(prev.value, first);
    let curr = cache_a.get(&ZID_A, &ZID_B, false).unwrap();
    assert_ne!(curr.value, first);
}

#[test]
fn test_lost_cache_raises_mitm_warning() {
    let cache_a = Arc::new(InMemoryCache::new());
    let cache_b = Arc::new(InMemoryCache::new());

    {
        let a = Endpoint::new(
            ZID_A,
            SignalingRole::Initiator,
            Profile::default(),
            EngineConfig::new("a"),
            cache_a.clone(),
        );
        let b = Endpoint::new(
            ZID_B,
            SignalingRole::Responder,
            Profile::default(),
            EngineConfig::new("b"),
            cache_b.clone(),
        );
        run_call(&a, &b);
    }

    // B lost its cache; A still holds a non-expired rs1
    let a = Endpoint::new(
        ZID_A,
        SignalingRole::Initiator,
        Profile::default(),
        EngineConfig::new("a"),
        cache_a.clone(),
    );
    let b = Endpoint::new(
        ZID_B,
        SignalingRole::Responder,
        Profile::default(),
        EngineConfig::new("b"),
        Arc::new(InMemoryCache::new()),
    );
    run_call(&a, &b);

    // the exchange still completes; the user re-verifies the SAS
    assert_eq!(a.stream.state(), State::Secure);
    assert!(a.events.saw_security(SecurityEvent::MitmWarning));
}

#[test]
fn test_degenerate_pv_is_rejected() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);

    a.stream.start().unwrap();
    b.stream.start().unwrap();

    // run the wire by hand until a DHPart1 appears (whichever endpoint
    // lost the tie-break sends it), then replace its pv with zeros the
    // way an active relay would
    let mut seq = 5000u16;
    let mut attacked: Option<&Endpoint> = None;
    'outer: for _ in 0..32 {
        let pa = a.drain();
        let pb = b.drain();
        assert!(!(pa.is_empty() && pb.is_empty()), "exchange stalled");

        for p in pa.iter().chain(pb.iter()) {
            let from_a = pa.contains(p);
            if msg_type_of(p) == packet::MessageType::DhPart1 {
                let info = packet::preparse(p).unwrap();
                let msg = packet::Message::unmarshal(
                    &p[info.message_offset..info.message_offset + info.message_len],
                )
                .unwrap();
                let packet::Message::DhPart1(mut dhpart) = msg else {
                    unreachable!();
                };
                for byte in dhpart.pv.iter_mut() {
                    *byte = 0;
                }
                let forged = packet::Message::DhPart1(dhpart).marshal().unwrap();
                seq += 1;
                let framed = packet::frame_packet(seq, info.ssrc, &forged);
                let target = if from_a { &b } else { &a };
                let _ = target.stream.process_srtp(&framed);
                attacked = Some(target);
                break 'outer;
            }
        }

        for p in pa {
            let _ = b.stream.process_srtp(&p);
        }
        for p in pb {
            let _ = a.stream.process_srtp(&p);
        }
    }

    // the initiator must refuse the value and error out on the wire
    let target = attacked.expect("no DHPart1 was ever sent");
    assert_eq!(target.stream.state(), State::InitiatingError);
    assert!(target
        .events
        .saw_security(SecurityEvent::ProtocolError(ProtocolError::PossibleMitm1)));
    let out = target.drain();
    assert!(out
        .iter()
        .any(|p| msg_type_of(p) == packet::MessageType::Error));
    assert_eq!(
        target.stream.info().last_error,
        Some(ProtocolError::PossibleMitm1)
    );
}

#[test]
fn test_zrtp_replay_is_dropped() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);

    a.stream.start().unwrap();
    let hello = a.drain().remove(0);

    b.stream.process_srtp(&hello).unwrap();
    let state_after_first = b.stream.info();
    b.drain();

    // identical packet, identical (older) sequence number
    let replayed = b.stream.process_srtp(&hello);
    assert!(matches!(replayed, Err(Error::ZrtpReplay(_))));
    assert_eq!(b.stream.info().state, state_after_first.state);
    assert!(b.drain().is_empty(), "replay must not produce traffic");
}

#[test]
fn test_crc_damage_is_silently_dropped() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);

    a.stream.start().unwrap();
    let mut hello = a.drain().remove(0);
    hello[20] ^= 0x01;

    assert_eq!(b.stream.process_srtp(&hello), Err(Error::CrcFail));
    assert_eq!(b.stream.state(), State::Active);
    assert!(b.drain().is_empty());
}

#[test]
fn test_equal_zids_abort() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_A, SignalingRole::Responder);

    a.stream.start().unwrap();
    b.stream.start().unwrap();
    pump(&a, &b);

    assert!(a
        .events
        .saw_security(SecurityEvent::ProtocolError(ProtocolError::EqualZid)));
    assert!(matches!(
        a.stream.state(),
        State::InitiatingError | State::Error
    ));
}

#[test]
fn test_component_mismatch_errors_out() {
    let mut profile_a = Profile::default();
    profile_a.cipher_types = vec![crate::crypto::CipherId::Aes1];
    let mut profile_b = Profile::default();
    profile_b.cipher_types = vec![crate::crypto::CipherId::Aes3];

    let a = Endpoint::new(
        ZID_A,
        SignalingRole::Initiator,
        profile_a,
        EngineConfig::new("a"),
        Arc::new(InMemoryCache::new()),
    );
    let b = Endpoint::new(
        ZID_B,
        SignalingRole::Responder,
        profile_b,
        EngineConfig::new("b"),
        Arc::new(InMemoryCache::new()),
    );

    a.stream.start().unwrap();
    b.stream.start().unwrap();
    pump(&a, &b);

    assert!(a
        .events
        .saw_security(SecurityEvent::ProtocolError(ProtocolError::UnsupportedCipher)));
}

#[test]
fn test_hello_retransmit_schedule() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    a.stream.start().unwrap();
    assert_eq!(a.drain().len(), 1);

    // timeouts double and cap: 50, 100, 200, 200 ...
    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(a.sched.fire(TaskKind::Hello).expect("hello task queued"));
        assert_eq!(a.drain().len(), 1, "every firing resends the Hello");
    }
    assert_eq!(seen, vec![50, 100, 200, 200]);
}

#[test]
fn test_no_zrtp_after_retry_cap() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    a.stream.start().unwrap();
    a.drain();

    let mut fired = 0;
    while a.sched.fire(TaskKind::Hello).is_some() {
        a.drain();
        fired += 1;
        assert!(fired <= 30, "retry schedule never gave up");
    }

    assert_eq!(fired, 20, "T1 allows twenty attempts");
    assert_eq!(a.stream.state(), State::NoZrtp);
    assert!(a.events.saw_protocol(ProtocolEvent::NoZrtpQuick));
    assert!(a.events.saw_protocol(ProtocolEvent::NoZrtp));
}

#[test]
fn test_packet_loss_tolerance() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);

    a.stream.start().unwrap();
    b.stream.start().unwrap();

    // A's first Hello plus the next two retransmits vanish; B's traffic
    // still reaches A
    a.drain();
    for p in b.drain() {
        let _ = a.stream.process_srtp(&p);
    }
    for p in a.drain() {
        let _ = b.stream.process_srtp(&p);
    }
    for p in b.drain() {
        let _ = a.stream.process_srtp(&p);
    }

    assert_eq!(a.sched.fire(TaskKind::Hello), Some(50));
    a.drain();
    assert_eq!(a.sched.fire(TaskKind::Hello), Some(100));
    a.drain();

    // the fourth Hello gets through; the exchange completes
    assert_eq!(a.sched.fire(TaskKind::Hello), Some(200));
    pump(&a, &b);

    assert_eq!(a.stream.state(), State::Secure);
    assert_eq!(b.stream.state(), State::Secure);
}

#[test]
fn test_multistream_after_dh() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);
    run_call(&a, &b);
    assert_eq!(a.stream.state(), State::Secure);
    let sas_before = a.session.sas();

    let a2 = a.session.attach_stream(0x2001).unwrap();
    let b2 = b.session.attach_stream(0x2002).unwrap();
    a2.start().unwrap();
    b2.start().unwrap();

    let mut log = Vec::new();
    for _ in 0..64 {
        let pa = a.drain();
        let pb = b.drain();
        if pa.is_empty() && pb.is_empty() {
            break;
        }
        for p in pa {
            log.push(msg_type_of(&p));
            let _ = b2.process_srtp(&p);
        }
        for p in pb {
            log.push(msg_type_of(&p));
            let _ = a2.process_srtp(&p);
        }
    }

    assert_eq!(a2.state(), State::Secure);
    assert_eq!(b2.state(), State::Secure);
    assert_eq!(a2.mode(), StreamMode::Multistream);
    assert_eq!(b2.mode(), StreamMode::Multistream);

    // no DH leg ran on the secondary stream
    assert!(!log.contains(&packet::MessageType::DhPart1));
    assert!(!log.contains(&packet::MessageType::DhPart2));

    // parent SAS untouched
    assert_eq!(a.session.sas(), sas_before);

    // and the child carries media of its own
    let rtp = build_rtp(9, 0x2001, b"second stream");
    let protected = a2.process_rtp(&rtp).unwrap();
    let received = b2.process_srtp(&protected).unwrap().unwrap();
    assert_eq!(&received[..], &rtp[..]);
}

#[test]
fn test_preshared_after_dh() {
    let cache_a = Arc::new(InMemoryCache::new());
    let cache_b = Arc::new(InMemoryCache::new());

    let mut presh_profile = Profile::default();
    presh_profile.pk_schemes = vec![PkId::Prsh, PkId::Dh3k, PkId::Dh2k];

    {
        let a = Endpoint::new(
            ZID_A,
            SignalingRole::Initiator,
            Profile::default(),
            EngineConfig::new("a"),
            cache_a.clone(),
        );
        let b = Endpoint::new(
            ZID_B,
            SignalingRole::Responder,
            Profile::default(),
            EngineConfig::new("b"),
            cache_b.clone(),
        );
        run_call(&a, &b);
    }

    let a = Endpoint::new(
        ZID_A,
        SignalingRole::Initiator,
        presh_profile.clone(),
        EngineConfig::new("a"),
        cache_a.clone(),
    );
    let b = Endpoint::new(
        ZID_B,
        SignalingRole::Responder,
        presh_profile,
        EngineConfig::new("b"),
        cache_b.clone(),
    );
    let log = run_call(&a, &b);

    assert_eq!(a.stream.state(), State::Secure);
    assert!(
        a.stream.mode() == StreamMode::Preshared || b.stream.mode() == StreamMode::Preshared
    );
    assert!(!log.contains(&packet::MessageType::DhPart1));

    // continuity counter advanced on both ends
    assert_eq!(cache_a.preshared_counter(&ZID_A, &ZID_B), 1);
    assert_eq!(cache_b.preshared_counter(&ZID_B, &ZID_A), 1);
}

#[test]
fn test_goclear_allowed() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);
    run_call(&a, &b);

    a.stream.clear().unwrap();
    pump(&a, &b);

    assert_eq!(b.stream.state(), State::PendingClear);
    assert!(b.events.saw_protocol(ProtocolEvent::IsPendingClear));

    // only the host's confirmation completes the teardown
    b.stream.clear().unwrap();
    pump(&a, &b);

    assert_eq!(a.stream.state(), State::Clear);
    assert_eq!(b.stream.state(), State::Clear);

    // media is clear again
    let rtp = build_rtp(77, 0xabc, b"plain again");
    let out = a.stream.process_rtp(&rtp).unwrap();
    assert_eq!(&out[..], &rtp[..]);
}

#[test]
fn test_goclear_rejected_when_disallowed() {
    let mut no_clear = Profile::default();
    no_clear.allowclear = false;

    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::new(
        ZID_B,
        SignalingRole::Responder,
        no_clear,
        EngineConfig::new("b"),
        Arc::new(InMemoryCache::new()),
    );
    run_call(&a, &b);
    assert_eq!(b.stream.state(), State::Secure);

    // allowclear was not negotiated, the host call must refuse
    assert_eq!(a.stream.clear(), Err(Error::NotAvailable));

    // and an injected GoClear is dropped with a security note
    let goclear = packet::Message::GoClear(packet::GoClearMessage {
        clear_hmac: [0x42; 8],
    })
    .marshal()
    .unwrap();
    let framed = packet::frame_packet(9000, 0x1, &goclear);
    let _ = b.stream.process_srtp(&framed);

    assert_eq!(b.stream.state(), State::Secure, "SRTP must continue");
    assert!(b.events.saw_security(SecurityEvent::ProtocolError(
        ProtocolError::GoClearUnsupported
    )));
}

#[test]
fn test_passive_endpoint_never_commits() {
    let mut config_a = EngineConfig::new("a");
    config_a.license_mode = LicenseMode::Passive;

    let a = Endpoint::new(
        ZID_A,
        SignalingRole::Initiator,
        Profile::default(),
        config_a,
        Arc::new(InMemoryCache::new()),
    );
    // Active endpoints do not commit towards a passive peer either
    let mut config_b = EngineConfig::new("b");
    config_b.license_mode = LicenseMode::Active;
    let b = Endpoint::new(
        ZID_B,
        SignalingRole::Responder,
        Profile::default(),
        config_b,
        Arc::new(InMemoryCache::new()),
    );

    let log = run_call(&a, &b);

    assert!(!log.contains(&packet::MessageType::Commit));
    assert_eq!(a.stream.state(), State::Clear);
    assert_eq!(b.stream.state(), State::Clear);
    assert!(a.events.saw_protocol(ProtocolEvent::IsPassiveRestriction));
}

#[test]
fn test_signaling_hash_gates_hello() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);

    b.stream.set_signaling_hash([0xee; 32]);
    a.stream.start().unwrap();
    let hello = a.drain().remove(0);

    b.stream.process_srtp(&hello).unwrap();
    assert!(b.events.saw_security(SecurityEvent::WrongSignalingHash));
    assert!(b.drain().is_empty(), "mismatching Hello must not be answered");

    // the matching hash admits the Hello
    let c = Endpoint::plain(ZID_B, SignalingRole::Responder);
    c.stream.set_signaling_hash(a.stream.signaling_hash().unwrap());
    c.stream.process_srtp(&hello).unwrap();
    assert!(!c.drain().is_empty());
}

#[test]
fn test_ping_is_answered() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    a.stream.start().unwrap();
    a.drain();

    let ping = packet::Message::Ping(packet::PingMessage {
        version: *packet::ZFONE_PROTOCOL_VERSION,
        endpoint_hash: [7; 8],
    })
    .marshal()
    .unwrap();
    let framed = packet::frame_packet(100, 0xfeed, &ping);
    a.stream.process_srtp(&framed).unwrap();

    let out = a.drain();
    assert_eq!(out.len(), 1);
    assert_eq!(msg_type_of(&out[0]), packet::MessageType::PingAck);

    let info = packet::preparse(&out[0]).unwrap();
    let msg = packet::Message::unmarshal(
        &out[0][info.message_offset..info.message_offset + info.message_len],
    )
    .unwrap();
    match msg {
        packet::Message::PingAck(ack) => {
            assert_eq!(ack.peer_endpoint_hash, [7; 8]);
            assert_eq!(ack.peer_ssrc, 0xfeed);
        }
        other => panic!("expected PingAck, got {other:?}"),
    }
}

#[test]
fn test_sas_relay_from_trusted_mitm() {
    let mut pbx_config = EngineConfig::new("pbx");
    pbx_config.is_mitm = true;

    let pbx = Endpoint::new(
        ZID_A,
        SignalingRole::Initiator,
        Profile::default(),
        pbx_config,
        Arc::new(InMemoryCache::new()),
    );
    let client = Endpoint::plain(ZID_B, SignalingRole::Responder);
    run_call(&pbx, &client);
    assert_eq!(client.stream.state(), State::Secure);

    let relayed_hash = [0x5a; 32];
    pbx.stream.relay_sas(&relayed_hash, SasId::B256).unwrap();
    pump(&pbx, &client);

    assert_eq!(pbx.stream.state(), State::Secure);
    assert!(client.events.saw_protocol(ProtocolEvent::LocalSasUpdated));
    assert!(pbx.events.saw_protocol(ProtocolEvent::RemoteSasUpdated));

    let sas = client.session.sas();
    assert_eq!(sas.sas1, crate::crypto::sas::render(SasId::B256, &relayed_hash).sas1);
}

#[test]
fn test_sas_relay_from_non_mitm_is_an_attack() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);
    run_call(&a, &b);

    // neither endpoint announced the MiTM flag; a relay is hostile
    let relay = packet::Message::SasRelay(packet::SasRelayMessage {
        hmac: [0; 8],
        iv: [0; 16],
        encrypted: vec![0; crate::packet::sasrelay::SASRELAY_ENCRYPTED_SIZE],
    })
    .marshal()
    .unwrap();
    let framed = packet::frame_packet(9100, 0x1, &relay);
    let _ = b.stream.process_srtp(&framed);

    assert!(b.events.saw_security(SecurityEvent::ProtocolError(
        ProtocolError::PossibleMitm3
    )));
}

#[test]
fn test_tampered_confirm_fails_auth_decrypt() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    let b = Endpoint::plain(ZID_B, SignalingRole::Responder);

    a.stream.start().unwrap();
    b.stream.start().unwrap();

    let mut seq = 7000u16;
    'outer: for _ in 0..32 {
        let pa = a.drain();
        let pb = b.drain();
        assert!(!(pa.is_empty() && pb.is_empty()), "exchange stalled");

        for p in pa.iter().chain(pb.iter()) {
            let target_a = pb.contains(p);
            if msg_type_of(p) == packet::MessageType::Confirm1 {
                let info = packet::preparse(p).unwrap();
                let msg = packet::Message::unmarshal(
                    &p[info.message_offset..info.message_offset + info.message_len],
                )
                .unwrap();
                let packet::Message::Confirm1(mut confirm) = msg else {
                    unreachable!();
                };
                confirm.hmac[0] ^= 0xff;
                let forged = packet::Message::Confirm1(confirm).marshal().unwrap();
                seq += 1;
                let framed = packet::frame_packet(seq, info.ssrc, &forged);
                let target = if target_a { &a } else { &b };
                let _ = target.stream.process_srtp(&framed);

                assert_eq!(target.stream.state(), State::InitiatingError);
                assert!(target.events.saw_security(SecurityEvent::ProtocolError(
                    ProtocolError::AuthDecryptFail
                )));
                break 'outer;
            }
        }

        for p in pa {
            let _ = b.stream.process_srtp(&p);
        }
        for p in pb {
            let _ = a.stream.process_srtp(&p);
        }
    }
}

#[test]
fn test_stop_is_reentrant_safe() {
    let a = Endpoint::plain(ZID_A, SignalingRole::Initiator);
    a.stream.start().unwrap();
    a.drain();

    a.stream.stop();
    assert_eq!(a.stream.state(), State::None);
    assert_eq!(a.sched.pending(TaskKind::Hello), 0);

    // a second stop is a no-op
    a.stream.stop();
    assert_eq!(a.stream.state(), State::None);
}
