// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Mutex usable from ULT and native-thread contexts.
//!
//! Word lock. `lock` spins briefly and then backs off cooperatively: a
//! ULT caller re-enqueues itself and suspends so its stream can run the
//! holder; a native caller yields the OS thread. `spinlock` never
//! yields and is reserved for critical sections that cannot suspend.

use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::config::config;
use crate::context::{self, Caller};

/// Exclusive lock shared by ULTs and external threads.
///
/// There is no ownership check on `unlock`; callers uphold the
/// lock/unlock pairing.
pub struct WeftMutex {
    locked: AtomicBool,
}

impl WeftMutex {
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquire without blocking. Returns `false` when already held.
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Acquire, backing off cooperatively under contention.
    pub fn lock(&self) {
        loop {
            if self.try_lock() {
                return;
            }
            for _ in 0..config().mutex_spin {
                hint::spin_loop();
                if !self.locked.load(Ordering::Relaxed) {
                    break;
                }
            }
            if self.try_lock() {
                return;
            }
            match context::caller() {
                // Give the stream a chance to run the holder.
                Caller::Ult(ult) => ult.yield_to_pool(),
                _ => thread::yield_now(),
            }
        }
    }

    /// Acquire by pure spinning. Never suspends the caller.
    pub fn spinlock(&self) {
        while !self.try_lock() {
            hint::spin_loop();
        }
    }

    /// Release. No ownership check.
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Object identity: two handles name the same mutex.
    pub fn equal(&self, other: &WeftMutex) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Default for WeftMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WeftMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeftMutex")
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish()
    }
}
