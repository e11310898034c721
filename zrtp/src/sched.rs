#[cfg(test)]
mod sched_test;

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::stream::Stream;

/// Retransmission timer constants, milliseconds. The defaults follow the
/// protocol recommendations; the CSD profile stretches everything for
/// slow circuit-switched links.
#[derive(Debug, Clone)]
pub struct TimingProfile {
    /// Hello timer start.
    pub t1: u32,
    pub t1_capping: u32,
    pub t1_max_count: u32,
    /// Extended Hello retry budget once the peer proved it speaks ZRTP.
    pub t1_max_count_ext: u32,
    /// Unanswered Hellos before the quick no-ZRTP event fires.
    pub no_zrtp_fast_count: u32,
    /// Non-Hello timer start.
    pub t2: u32,
    pub t2_capping: u32,
    pub t2_max_count: u32,
    /// GoClear resend period; GoClear retries are unbounded.
    pub t3: u32,
    pub et: u32,
    pub eti_max_count: u32,
    pub etr_max_count: u32,
    /// Delayed-start recall period when a concurrent exchange blocks us.
    pub process_t1: u32,
    pub process_t1_max_count: u32,
}

impl Default for TimingProfile {
    fn default() -> Self {
        TimingProfile {
            t1: 50,
            t1_capping: 200,
            t1_max_count: 20,
            t1_max_count_ext: 60,
            no_zrtp_fast_count: 5,
            t2: 150,
            t2_capping: 1200,
            t2_max_count: 10,
            t3: 300,
            et: 150,
            eti_max_count: 10,
            etr_max_count: 3,
            process_t1: 50,
            process_t1_max_count: 20000,
        }
    }
}

impl TimingProfile {
    /// Long schedule for circuit-switched transports.
    pub fn csd() -> Self {
        const T4PROC: u32 = 2000;
        TimingProfile {
            t1: 400 + T4PROC,
            t1_capping: 400 + T4PROC,
            t2: 900 + T4PROC,
            t2_capping: 900 + T4PROC,
            t3: 900 + T4PROC,
            et: 200 + T4PROC,
            ..TimingProfile::default()
        }
    }

    pub fn initial_timeout(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::Hello => self.t1,
            TaskKind::GoClear => self.t3,
            TaskKind::Error | TaskKind::ErrorAck => self.et,
            TaskKind::Process => self.process_t1,
            _ => self.t2,
        }
    }

    /// Doubled-and-capped timeout for the next resend of this kind.
    pub fn next_timeout(&self, kind: TaskKind, current: u32) -> u32 {
        match kind {
            TaskKind::Hello => (current * 2).min(self.t1_capping),
            TaskKind::GoClear => self.t3,
            TaskKind::Error | TaskKind::ErrorAck => self.et,
            TaskKind::Process => self.process_t1,
            _ => (current * 2).min(self.t2_capping),
        }
    }
}

/// One retry slot per retransmittable message kind per stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Hello,
    Commit,
    DhPart,
    Confirm,
    GoClear,
    Error,
    ErrorAck,
    SasRelay,
    /// Delayed protocol start, not a packet resend.
    Process,
}

pub const TASK_KIND_COUNT: usize = 9;

impl TaskKind {
    pub(crate) fn index(&self) -> usize {
        match self {
            TaskKind::Hello => 0,
            TaskKind::Commit => 1,
            TaskKind::DhPart => 2,
            TaskKind::Confirm => 3,
            TaskKind::GoClear => 4,
            TaskKind::Error => 5,
            TaskKind::ErrorAck => 6,
            TaskKind::SasRelay => 7,
            TaskKind::Process => 8,
        }
    }
}

/// Shared retry state. The same slot is reused across resends of one
/// message kind; the enabled gate plus the generation counter make
/// cancellation idempotent and race-free against a timer that already
/// fired.
pub struct RetryTask {
    kind: TaskKind,
    timeout_ms: AtomicU32,
    enabled: AtomicBool,
    retries: AtomicU32,
    busy: AtomicBool,
    generation: AtomicU32,
}

impl RetryTask {
    pub(crate) fn new(kind: TaskKind) -> Self {
        RetryTask {
            kind,
            timeout_ms: AtomicU32::new(0),
            enabled: AtomicBool::new(false),
            retries: AtomicU32::new(0),
            busy: AtomicBool::new(false),
            generation: AtomicU32::new(0),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn timeout_ms(&self) -> u32 {
        self.timeout_ms.load(Ordering::Acquire)
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Arms the slot for a fresh message: resets retries, bumps the
    /// generation so stale queued firings turn into no-ops.
    pub(crate) fn arm(&self, timeout_ms: u32) -> u32 {
        self.timeout_ms.store(timeout_ms, Ordering::Release);
        self.retries.store(0, Ordering::Release);
        self.enabled.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Re-arms for the next resend without resetting the retry count.
    pub(crate) fn rearm(&self, timeout_ms: u32) -> u32 {
        self.timeout_ms.store(timeout_ms, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn bump_retries(&self) -> u32 {
        self.retries.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn cancel(&self) {
        self.enabled.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }
}

/// A queued delay call: the stream, its retry slot, and the generation
/// the slot had when this call was submitted.
pub struct ScheduledTask {
    pub(crate) stream: Arc<Stream>,
    pub(crate) task: Arc<RetryTask>,
    pub(crate) generation: u32,
}

impl ScheduledTask {
    pub fn stream_id(&self) -> u32 {
        self.stream.id()
    }

    pub fn kind(&self) -> TaskKind {
        self.task.kind
    }

    pub fn timeout_ms(&self) -> u32 {
        self.task.timeout_ms()
    }

    /// Executes the delay call. Skips silently when the slot was
    /// canceled or re-armed after this call was queued.
    pub fn run(&self) {
        if !self.task.is_enabled() || self.task.generation() != self.generation {
            return;
        }
        self.task.busy.store(true, Ordering::Release);
        self.stream.handle_retry(self.task.kind);
        self.task.busy.store(false, Ordering::Release);
    }
}

/// Host-implementable delay-call surface.
///
/// `wait_call_later` must not return while any call for the stream is
/// queued or executing; the engine relies on it as a destruction
/// barrier.
pub trait Scheduler: Send + Sync {
    fn call_later(&self, task: ScheduledTask);

    fn cancel_call_later(&self, stream_id: u32, kind: Option<TaskKind>);

    fn wait_call_later(&self, stream_id: u32);
}

struct HeapEntry {
    deadline: Instant,
    seq: u64,
    task: ScheduledTask,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // min-heap on deadline
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

struct ThreadSchedulerShared {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    /// Stream ids with a callback currently executing.
    executing: Mutex<Vec<u32>>,
    cond: Condvar,
    running: AtomicBool,
    seq: AtomicU32,
}

/// Built-in scheduler: one timer thread draining a deadline heap.
pub struct ThreadScheduler {
    shared: Arc<ThreadSchedulerShared>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl ThreadScheduler {
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(ThreadSchedulerShared {
            heap: Mutex::new(BinaryHeap::new()),
            executing: Mutex::new(Vec::new()),
            cond: Condvar::new(),
            running: AtomicBool::new(true),
            seq: AtomicU32::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("zrtp-sched".into())
            .spawn(move || Self::run_loop(thread_shared))
            .expect("spawn scheduler thread");

        Arc::new(ThreadScheduler {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run_loop(shared: Arc<ThreadSchedulerShared>) {
        let mut heap = shared.heap.lock().expect("scheduler lock");
        while shared.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if let Some(entry) = heap.peek() {
                if entry.deadline <= now {
                    let entry = heap.pop().expect("peeked entry");
                    let stream_id = entry.task.stream_id();
                    shared
                        .executing
                        .lock()
                        .expect("scheduler lock")
                        .push(stream_id);
                    drop(heap);

                    entry.task.run();

                    let mut executing = shared.executing.lock().expect("scheduler lock");
                    if let Some(pos) = executing.iter().position(|id| *id == stream_id) {
                        executing.remove(pos);
                    }
                    drop(executing);
                    heap = shared.heap.lock().expect("scheduler lock");
                    shared.cond.notify_all();
                    continue;
                }
                let wait = entry.deadline - now;
                let (h, _) = shared
                    .cond
                    .wait_timeout(heap, wait)
                    .expect("scheduler lock");
                heap = h;
            } else {
                heap = shared.cond.wait(heap).expect("scheduler lock");
            }
        }
    }

    /// Stops the timer thread. Queued calls are dropped.
    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.cond.notify_all();
        if let Some(h) = self.handle.lock().expect("scheduler lock").take() {
            let _ = h.join();
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn call_later(&self, task: ScheduledTask) {
        let deadline = Instant::now() + Duration::from_millis(task.timeout_ms() as u64);
        let seq = self.shared.seq.fetch_add(1, Ordering::AcqRel) as u64;
        {
            let mut heap = self.shared.heap.lock().expect("scheduler lock");
            heap.push(HeapEntry {
                deadline,
                seq,
                task,
            });
        }
        self.shared.cond.notify_all();
    }

    fn cancel_call_later(&self, stream_id: u32, kind: Option<TaskKind>) {
        let mut heap = self.shared.heap.lock().expect("scheduler lock");
        heap.retain(|e| {
            !(e.task.stream_id() == stream_id && kind.map_or(true, |k| e.task.kind() == k))
        });
        self.shared.cond.notify_all();
    }

    fn wait_call_later(&self, stream_id: u32) {
        let mut heap = self.shared.heap.lock().expect("scheduler lock");
        loop {
            let queued = heap.iter().any(|e| e.task.stream_id() == stream_id);
            let executing = self
                .shared
                .executing
                .lock()
                .expect("scheduler lock")
                .contains(&stream_id);
            if !queued && !executing {
                return;
            }
            let (h, _) = self
                .shared
                .cond
                .wait_timeout(heap, Duration::from_millis(20))
                .expect("scheduler lock");
            heap = h;
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
