use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::cache::InMemoryCache;
use crate::config::EngineConfig;
use crate::engine::{Callbacks, PacketSender, ZrtpEngine};
use crate::event::NullEventHandler;

#[derive(Default)]
struct CountingSender {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl PacketSender for CountingSender {
    fn send_packet(&self, _stream_id: u32, packet: &[u8]) -> crate::Result<usize> {
        self.sent.lock().unwrap().push(packet.to_vec());
        Ok(packet.len())
    }
}

fn engine_with_thread_scheduler() -> (Arc<ZrtpEngine>, Arc<CountingSender>, Arc<ThreadScheduler>)
{
    let sender = Arc::new(CountingSender::default());
    let sched = ThreadScheduler::new();
    let engine = ZrtpEngine::new(
        EngineConfig::new("sched test"),
        Callbacks {
            cache: Arc::new(InMemoryCache::new()),
            scheduler: sched.clone(),
            events: Arc::new(NullEventHandler),
            sender: sender.clone(),
        },
    );
    (engine, sender, sched)
}

#[test]
fn test_timer_thread_fires_retransmits() {
    let (engine, sender, _sched) = engine_with_thread_scheduler();
    let session = engine
        .session_init(
            crate::config::Profile::default(),
            [1; 12],
            crate::config::SignalingRole::Initiator,
        )
        .unwrap();
    let stream = session.attach_stream(0xabc).unwrap();
    stream.start().unwrap();

    // T1 starts at 50ms and doubles; within ~400ms several Hellos fire
    std::thread::sleep(Duration::from_millis(400));
    let count = sender.sent.lock().unwrap().len();
    assert!(count >= 3, "expected several Hello sends, saw {count}");

    stream.stop();
}

#[test]
fn test_stop_halts_retransmission() {
    let (engine, sender, _sched) = engine_with_thread_scheduler();
    let session = engine
        .session_init(
            crate::config::Profile::default(),
            [2; 12],
            crate::config::SignalingRole::Initiator,
        )
        .unwrap();
    let stream = session.attach_stream(0xdef).unwrap();
    stream.start().unwrap();
    std::thread::sleep(Duration::from_millis(80));

    // stop cancels and drains; nothing fires afterwards
    stream.stop();
    let count_after_stop = sender.sent.lock().unwrap().len();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(sender.sent.lock().unwrap().len(), count_after_stop);
}

#[test]
fn test_cancel_is_idempotent() {
    let (engine, _sender, sched) = engine_with_thread_scheduler();
    let session = engine
        .session_init(
            crate::config::Profile::default(),
            [3; 12],
            crate::config::SignalingRole::Initiator,
        )
        .unwrap();
    let stream = session.attach_stream(0x123).unwrap();
    stream.start().unwrap();

    sched.cancel_call_later(stream.id(), Some(TaskKind::Hello));
    sched.cancel_call_later(stream.id(), Some(TaskKind::Hello));
    sched.cancel_call_later(stream.id(), None);

    // the barrier returns promptly once nothing is queued
    sched.wait_call_later(stream.id());
}

#[test]
fn test_timing_profile_backoff() {
    let timing = TimingProfile::default();
    assert_eq!(timing.initial_timeout(TaskKind::Hello), 50);
    assert_eq!(timing.next_timeout(TaskKind::Hello, 50), 100);
    assert_eq!(timing.next_timeout(TaskKind::Hello, 100), 200);
    assert_eq!(timing.next_timeout(TaskKind::Hello, 200), 200);

    assert_eq!(timing.initial_timeout(TaskKind::Commit), 150);
    assert_eq!(timing.next_timeout(TaskKind::Commit, 150), 300);
    assert_eq!(timing.next_timeout(TaskKind::Commit, 1200), 1200);

    assert_eq!(timing.next_timeout(TaskKind::GoClear, 300), 300);
    assert_eq!(timing.next_timeout(TaskKind::Error, 150), 150);

    let csd = TimingProfile::csd();
    assert_eq!(csd.initial_timeout(TaskKind::Hello), 2400);
    assert_eq!(csd.initial_timeout(TaskKind::Commit), 2900);
}

#[test]
fn test_retry_task_generation_gates_stale_firings() {
    let task = RetryTask::new(TaskKind::Commit);
    let first = task.arm(100);
    assert!(task.is_enabled());
    assert_eq!(task.retries(), 0);

    let second = task.rearm(200);
    assert_ne!(first, second, "re-arm must invalidate queued firings");
    assert_eq!(task.generation(), second);

    task.cancel();
    assert!(!task.is_enabled());
}
