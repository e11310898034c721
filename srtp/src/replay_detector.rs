#[cfg(test)]
mod replay_detector_test;

/// Duplicate detection over a sliding window of packet indices.
///
/// `check` is called with the candidate index before the packet is
/// authenticated; `accept` is called only after authentication succeeds,
/// and commits the index into the window.
pub trait ReplayDetector: Send {
    fn check(&mut self, seq: u64) -> bool;
    fn accept(&mut self);
}

/// Fixed-size bit mask covering the `size` most recent indices below the
/// latest accepted one.
struct Window {
    bits: Vec<u64>,
    size: usize,
}

impl Window {
    fn new(size: usize) -> Self {
        Window {
            bits: vec![0; size.div_ceil(64)],
            size,
        }
    }

    fn lshift(&mut self, n: usize) {
        if n >= self.size {
            for w in &mut self.bits {
                *w = 0;
            }
            return;
        }
        let word_shift = n / 64;
        let bit_shift = n % 64;
        for i in (0..self.bits.len()).rev() {
            let mut v = if i >= word_shift {
                self.bits[i - word_shift] << bit_shift
            } else {
                0
            };
            if bit_shift > 0 && i > word_shift {
                v |= self.bits[i - word_shift - 1] >> (64 - bit_shift);
            }
            self.bits[i] = v;
        }
    }

    fn set(&mut self, i: usize) {
        self.bits[i / 64] |= 1 << (i % 64);
    }

    fn get(&self, i: usize) -> bool {
        self.bits[i / 64] & (1 << (i % 64)) != 0
    }
}

/// Sliding-window detector for monotonically growing indices
/// (48-bit extended RTP index, 31-bit SRTCP index).
pub struct SlidingWindowDetector {
    accepted: bool,
    seq: u64,
    latest_seq: u64,
    max_seq: u64,
    window: Window,
}

impl SlidingWindowDetector {
    pub fn new(window_size: usize, max_seq: u64) -> Self {
        SlidingWindowDetector {
            accepted: false,
            seq: 0,
            latest_seq: 0,
            max_seq,
            window: Window::new(window_size),
        }
    }
}

impl ReplayDetector for SlidingWindowDetector {
    fn check(&mut self, seq: u64) -> bool {
        self.accepted = false;

        if seq > self.max_seq {
            return false;
        }
        if seq <= self.latest_seq {
            let behind = (self.latest_seq - seq) as usize;
            if behind >= self.window.size {
                return false;
            }
            if self.window.get(behind) {
                return false;
            }
        }

        self.accepted = true;
        self.seq = seq;
        true
    }

    fn accept(&mut self) {
        if !self.accepted {
            return;
        }

        if self.seq > self.latest_seq {
            self.window.lshift((self.seq - self.latest_seq) as usize);
            self.latest_seq = self.seq;
        }
        let behind = (self.latest_seq - self.seq) as usize;
        self.window.set(behind);
    }
}

/// Sliding-window detector tolerating sequence wraparound: a candidate
/// close to zero while the window top is close to `max_seq` is read as a
/// rollover, and vice versa.
pub struct WrappedSlidingWindowDetector {
    accepted: bool,
    seq: u64,
    latest_seq: u64,
    started: bool,
    max_seq: u64,
    window: Window,
}

impl WrappedSlidingWindowDetector {
    pub fn new(window_size: usize, max_seq: u64) -> Self {
        WrappedSlidingWindowDetector {
            accepted: false,
            seq: 0,
            latest_seq: 0,
            started: false,
            max_seq,
            window: Window::new(window_size),
        }
    }
}

impl ReplayDetector for WrappedSlidingWindowDetector {
    fn check(&mut self, seq: u64) -> bool {
        self.accepted = false;

        if seq > self.max_seq {
            return false;
        }
        if !self.started {
            self.accepted = true;
            self.seq = seq;
            return true;
        }

        // Signed distance on the ring, candidate nearest the window top wins.
        let half = (self.max_seq + 1) / 2;
        let diff = if seq >= self.latest_seq {
            let fwd = seq - self.latest_seq;
            if fwd <= half {
                fwd as i64
            } else {
                -(((self.latest_seq + self.max_seq + 1) - seq) as i64)
            }
        } else {
            let back = self.latest_seq - seq;
            if back <= half {
                -(back as i64)
            } else {
                ((seq + self.max_seq + 1) - self.latest_seq) as i64
            }
        };

        if diff <= 0 {
            let behind = (-diff) as usize;
            if behind >= self.window.size {
                return false;
            }
            if self.window.get(behind) {
                return false;
            }
        }

        self.accepted = true;
        self.seq = seq;
        true
    }

    fn accept(&mut self) {
        if !self.accepted {
            return;
        }

        if !self.started {
            self.started = true;
            self.latest_seq = self.seq;
            self.window.set(0);
            return;
        }

        let half = (self.max_seq + 1) / 2;
        let ahead = self.seq >= self.latest_seq && self.seq - self.latest_seq <= half
            || self.seq < self.latest_seq && self.latest_seq - self.seq > half;

        if ahead {
            let advance = if self.seq >= self.latest_seq {
                self.seq - self.latest_seq
            } else {
                self.seq + self.max_seq + 1 - self.latest_seq
            };
            self.window.lshift(advance as usize);
            self.latest_seq = self.seq;
            self.window.set(0);
        } else {
            let behind = if self.latest_seq >= self.seq {
                self.latest_seq - self.seq
            } else {
                self.latest_seq + self.max_seq + 1 - self.seq
            } as usize;
            if behind < self.window.size {
                self.window.set(behind);
            }
        }
    }
}

/// Detector that accepts everything; used when replay protection is
/// explicitly disabled.
#[derive(Default)]
pub struct NoOpReplayDetector;

impl NoOpReplayDetector {
    pub fn new() -> Self {
        NoOpReplayDetector
    }
}

impl ReplayDetector for NoOpReplayDetector {
    fn check(&mut self, _seq: u64) -> bool {
        true
    }

    fn accept(&mut self) {}
}
