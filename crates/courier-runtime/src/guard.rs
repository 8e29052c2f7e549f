//! Non-blocking reentrancy guards
//!
//! Both guards are local to the process. Contention never waits: a caller
//! that cannot acquire a guard gets `None` and treats the call as a no-op.

use core::hash::Hash;
use core::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;

// ----------------------------------------------------------------------------
// Keyed Guard
// ----------------------------------------------------------------------------

/// One in-progress flag per key
#[derive(Debug)]
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    active: DashSet<K>,
}

impl<K: Eq + Hash + Clone> Default for KeyedGuard<K> {
    fn default() -> Self {
        Self {
            active: DashSet::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedGuard<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as in progress, or return `None` if it already is
    pub fn try_acquire(&self, key: K) -> Option<KeyedToken<'_, K>> {
        if self.active.insert(key.clone()) {
            Some(KeyedToken { guard: self, key })
        } else {
            None
        }
    }

    pub fn is_held(&self, key: &K) -> bool {
        self.active.contains(key)
    }
}

/// Releases its key when dropped
#[derive(Debug)]
pub struct KeyedToken<'a, K: Eq + Hash + Clone> {
    guard: &'a KeyedGuard<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> Drop for KeyedToken<'_, K> {
    fn drop(&mut self) {
        self.guard.active.remove(&self.key);
    }
}

// ----------------------------------------------------------------------------
// Single Flight
// ----------------------------------------------------------------------------

/// A single in-progress flag
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightToken<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightToken { flight: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct FlightToken<'a> {
    flight: &'a SingleFlight,
}

impl Drop for FlightToken<'_> {
    fn drop(&mut self) {
        self.flight.running.store(false, Ordering::Release);
    }
}
