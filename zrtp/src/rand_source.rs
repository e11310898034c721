use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use rand::RngCore;
use sha2::{Digest, Sha512};

use crate::error::{Error, Result};

/// Entropy accumulator feeding every random value the engine produces.
///
/// Callers append entropy at any time; extraction finalizes a clone of
/// the running hash and immediately rekeys the accumulator with its own
/// output, so earlier outputs cannot be reconstructed from later state.
pub struct EntropyPool {
    ctx: Mutex<Sha512>,
    seeded: AtomicBool,
}

impl EntropyPool {
    pub fn new() -> Self {
        let pool = EntropyPool {
            ctx: Mutex::new(Sha512::new()),
            seeded: AtomicBool::new(false),
        };

        let mut seed = [0u8; 64];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        pool.add_entropy(&seed);
        pool
    }

    /// Mixes caller-supplied entropy into the pool.
    pub fn add_entropy(&self, data: &[u8]) {
        let mut ctx = self.ctx.lock().expect("rng lock");
        ctx.update(data);
        self.seeded.store(true, Ordering::Release);
    }

    /// Produces `len` random bytes by repeated extract-and-rekey.
    pub fn random_bytes(&self, len: usize) -> Result<Vec<u8>> {
        if !self.seeded.load(Ordering::Acquire) {
            return Err(Error::RngFail);
        }

        let mut out = Vec::with_capacity(len);
        let mut ctx = self.ctx.lock().expect("rng lock");
        while out.len() < len {
            let block: [u8; 64] = ctx.clone().finalize().into();
            ctx.update(block);
            let take = (len - out.len()).min(block.len());
            out.extend_from_slice(&block[..take]);
        }
        Ok(out)
    }

    pub fn random_array<const N: usize>(&self) -> Result<[u8; N]> {
        let v = self.random_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&v);
        Ok(out)
    }
}

impl Default for EntropyPool {
    fn default() -> Self {
        EntropyPool::new()
    }
}

#[cfg(test)]
mod rand_source_test {
    use super::*;

    #[test]
    fn test_outputs_differ() {
        let pool = EntropyPool::new();
        let a = pool.random_bytes(32).unwrap();
        let b = pool.random_bytes(32).unwrap();
        assert_ne!(a, b, "extract must rekey the accumulator");
    }

    #[test]
    fn test_long_output() {
        let pool = EntropyPool::new();
        let v = pool.random_bytes(200).unwrap();
        assert_eq!(v.len(), 200);
        assert_ne!(&v[..64], &v[64..128], "blocks must not repeat");
    }

    #[test]
    fn test_caller_entropy_changes_stream() {
        let pool = EntropyPool::new();
        let a = pool.random_bytes(16).unwrap();
        pool.add_entropy(b"some interrupt timing jitter");
        let b = pool.random_bytes(16).unwrap();
        assert_ne!(a, b);
    }
}
