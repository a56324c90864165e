/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Set of block hashes currently being verified.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use crate::types::data_types::CryptoHash;

/// Tracks which blocks are being verified, so that each hash is verified by at most one thread at
/// a time. Acquisition never waits.
#[derive(Clone, Default)]
pub struct InFlightSet {
    hashes: Arc<Mutex<HashSet<CryptoHash>>>,
}

impl InFlightSet {
    pub fn new() -> InFlightSet {
        InFlightSet::default()
    }

    /// Mark `hash` as in flight. Returns `false` if it already was.
    pub fn try_acquire(&self, hash: CryptoHash) -> bool {
        self.hashes.lock().unwrap().insert(hash)
    }

    pub fn release(&self, hash: &CryptoHash) {
        self.hashes.lock().unwrap().remove(hash);
    }

    /// Acquire `hash` for the lifetime of the returned guard.
    pub fn guard(&self, hash: CryptoHash) -> Option<InFlightGuard> {
        if self.try_acquire(hash) {
            Some(InFlightGuard {
                set: self.clone(),
                hash,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, hash: &CryptoHash) -> bool {
        self.hashes.lock().unwrap().contains(hash)
    }
}

/// Releases its hash from the [`InFlightSet`] when dropped.
pub struct InFlightGuard {
    set: InFlightSet,
    hash: CryptoHash,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.release(&self.hash)
    }
}

#[test]
fn guard_releases_on_drop_test() {
    let set = InFlightSet::new();
    let hash = CryptoHash::new([3u8; 32]);

    let guard = set.guard(hash);
    assert!(guard.is_some());
    assert!(set.guard(hash).is_none());
    assert!(!set.try_acquire(hash));

    drop(guard);
    assert!(!set.contains(&hash));
    assert!(set.try_acquire(hash));
    set.release(&hash);
    assert!(!set.contains(&hash));
}
