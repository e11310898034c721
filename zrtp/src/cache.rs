#[cfg(test)]
mod cache_test;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::packet::ZID_SIZE;

pub type Zid = [u8; ZID_SIZE];

/// Cache entries are keyed by both ZIDs concatenated with the
/// lexicographically greater one first, so either endpoint computes the
/// same key.
pub fn entry_id(one: &Zid, another: &Zid) -> [u8; 2 * ZID_SIZE] {
    let (high, low) = if one >= another {
        (one, another)
    } else {
        (another, one)
    };
    let mut out = [0u8; 2 * ZID_SIZE];
    out[..ZID_SIZE].copy_from_slice(high);
    out[ZID_SIZE..].copy_from_slice(low);
    out
}

/// One retained secret as stored by the cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetainedSecret {
    /// Secret value, at most 64 bytes.
    pub value: Vec<u8>,
    /// Seconds since the epoch when the secret was last refreshed.
    pub lastused_at: u32,
    /// Lifetime in seconds; `u32::MAX` means no expiry.
    pub ttl: u32,
}

impl RetainedSecret {
    pub fn new(value: Vec<u8>, lastused_at: u32, ttl: u32) -> Self {
        RetainedSecret {
            value,
            lastused_at,
            ttl,
        }
    }

    pub fn is_expired(&self, now: u32) -> bool {
        if self.ttl == u32::MAX {
            return false;
        }
        now.saturating_sub(self.lastused_at) > self.ttl
    }
}

impl Drop for RetainedSecret {
    fn drop(&mut self) {
        for b in self.value.iter_mut() {
            *b = 0;
        }
    }
}

/// Host-provided persistent storage of retained secrets per ZID pair.
///
/// "Not found" is a normal outcome, not an error. Implementations must
/// provide their own mutual exclusion; the engine passes ZIDs and byte
/// strings only.
pub trait SecretCache: Send + Sync {
    /// Stores a freshly derived secret. The implementation rotates the
    /// current value into the previous slot before replacing it.
    fn put(&self, one: &Zid, another: &Zid, secret: &RetainedSecret);

    /// Fetches the current (or previous) secret for the pair.
    fn get(&self, one: &Zid, another: &Zid, prev_requested: bool) -> Option<RetainedSecret>;

    fn set_verified(&self, one: &Zid, another: &Zid, verified: bool);

    fn verified(&self, one: &Zid, another: &Zid) -> bool;

    fn preshared_counter(&self, one: &Zid, another: &Zid) -> u32;

    fn set_preshared_counter(&self, one: &Zid, another: &Zid, counter: u32);

    /// Stores the trusted-MiTM pairing secret.
    fn put_mitm(&self, one: &Zid, another: &Zid, secret: &RetainedSecret);

    fn get_mitm(&self, one: &Zid, another: &Zid) -> Option<RetainedSecret>;

    /// Optionally records when the pair first went secure.
    fn reset_since(&self, _one: &Zid, _another: &Zid, _now: u32) {}
}

#[derive(Default)]
struct CacheEntry {
    current: Option<RetainedSecret>,
    previous: Option<RetainedSecret>,
    mitm: Option<RetainedSecret>,
    verified: bool,
    presh_counter: u32,
    secure_since: Option<u32>,
}

/// Reference cache living in process memory. Tests and embedders without
/// persistent storage use it directly; production hosts keep their own
/// file or database backed implementation behind the same trait.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<[u8; 2 * ZID_SIZE], CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        InMemoryCache::default()
    }
}

impl SecretCache for InMemoryCache {
    fn put(&self, one: &Zid, another: &Zid, secret: &RetainedSecret) {
        let mut entries = self.entries.lock().expect("cache lock");
        let entry = entries.entry(entry_id(one, another)).or_default();
        entry.previous = entry.current.take();
        entry.current = Some(secret.clone());
    }

    fn get(&self, one: &Zid, another: &Zid, prev_requested: bool) -> Option<RetainedSecret> {
        let entries = self.entries.lock().expect("cache lock");
        let entry = entries.get(&entry_id(one, another))?;
        if prev_requested {
            entry.previous.clone()
        } else {
            entry.current.clone()
        }
    }

    fn set_verified(&self, one: &Zid, another: &Zid, verified: bool) {
        let mut entries = self.entries.lock().expect("cache lock");
        entries
            .entry(entry_id(one, another))
            .or_default()
            .verified = verified;
    }

    fn verified(&self, one: &Zid, another: &Zid) -> bool {
        let entries = self.entries.lock().expect("cache lock");
        entries
            .get(&entry_id(one, another))
            .map(|e| e.verified)
            .unwrap_or(false)
    }

    fn preshared_counter(&self, one: &Zid, another: &Zid) -> u32 {
        let entries = self.entries.lock().expect("cache lock");
        entries
            .get(&entry_id(one, another))
            .map(|e| e.presh_counter)
            .unwrap_or(0)
    }

    fn set_preshared_counter(&self, one: &Zid, another: &Zid, counter: u32) {
        let mut entries = self.entries.lock().expect("cache lock");
        entries
            .entry(entry_id(one, another))
            .or_default()
            .presh_counter = counter;
    }

    fn put_mitm(&self, one: &Zid, another: &Zid, secret: &RetainedSecret) {
        let mut entries = self.entries.lock().expect("cache lock");
        entries.entry(entry_id(one, another)).or_default().mitm = Some(secret.clone());
    }

    fn get_mitm(&self, one: &Zid, another: &Zid) -> Option<RetainedSecret> {
        let entries = self.entries.lock().expect("cache lock");
        entries.get(&entry_id(one, another))?.mitm.clone()
    }

    fn reset_since(&self, one: &Zid, another: &Zid, now: u32) {
        let mut entries = self.entries.lock().expect("cache lock");
        let entry = entries.entry(entry_id(one, another)).or_default();
        entry.secure_since.get_or_insert(now);
    }
}
