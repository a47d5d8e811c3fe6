// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Condition variables.
//!
//! One FIFO waiter queue serves both ULTs and external native threads.
//! A ULT waiter is transitioned to BLOCKED and woken by READY + re-push
//! into its home pool; an external waiter parks its OS thread polling a
//! flag the wake side stores into. All waiters queued at the same time
//! must have agreed on one user mutex; the binding is established by
//! the first waiter and cleared when the queue empties.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::context::{self, Caller};
use crate::error::{RtError, RtResult};
use crate::mutex::WeftMutex;
use crate::ult::Ult;

enum Waiter {
    Ult(Arc<Ult>),
    /// Wake flag the external waiter polls; shared so it outlives the
    /// queue entry.
    External(Arc<AtomicU32>),
}

struct CondState {
    /// The user mutex all current waiters released; `None` iff the
    /// queue is empty.
    waiter_mutex: Option<Arc<WeftMutex>>,
    waiters: VecDeque<Waiter>,
}

/// A condition variable for ULTs and external threads.
pub struct WeftCond {
    /// Internal lock for the waiter state. Critical sections never
    /// suspend, so `wait` takes it with `spinlock`.
    lock: WeftMutex,
    state: UnsafeCell<CondState>,
}

// SAFETY: `state` is only accessed between `lock.spinlock()`/`lock()`
// and the matching `unlock`, which serializes all mutation; the
// payloads themselves are Send.
unsafe impl Send for WeftCond {}
unsafe impl Sync for WeftCond {}

impl WeftCond {
    /// Create a condition variable with room for the first waiter
    /// pre-allocated.
    pub fn create() -> Arc<WeftCond> {
        Arc::new(WeftCond {
            lock: WeftMutex::new(),
            state: UnsafeCell::new(CondState {
                waiter_mutex: None,
                waiters: VecDeque::with_capacity(1),
            }),
        })
    }

    /// Atomically release `mutex` and wait until signalled.
    ///
    /// The caller must hold `mutex` (not verified). On return the
    /// caller holds `mutex` again. All concurrent waiters must pass
    /// the same mutex; a mismatch fails with [`RtError::InvMutex`]
    /// without enqueuing.
    pub fn wait(&self, mutex: &Arc<WeftMutex>) -> RtResult<()> {
        let ult: Option<Arc<Ult>>;
        let flag: Option<Arc<AtomicU32>>;
        match context::caller() {
            Caller::Ult(u) => {
                ult = Some(u);
                flag = None;
            }
            Caller::Stream => return Err(RtError::NoUlt),
            Caller::External => {
                ult = None;
                flag = Some(Arc::new(AtomicU32::new(0)));
            }
        }

        self.lock.spinlock();
        // SAFETY: guarded by `lock` (see type-level invariant).
        let st = unsafe { &mut *self.state.get() };

        match &st.waiter_mutex {
            None => st.waiter_mutex = Some(mutex.clone()),
            Some(bound) => {
                if !bound.equal(mutex) {
                    self.lock.unlock();
                    return Err(RtError::InvMutex);
                }
            }
        }

        let entry = match (&ult, &flag) {
            (Some(u), _) => Waiter::Ult(u.clone()),
            (_, Some(f)) => Waiter::External(f.clone()),
            _ => unreachable!(),
        };
        st.waiters.push_back(entry);
        tracing::trace!(target: "weft::cond", num_waiters = st.waiters.len(), "wait");

        if let Some(u) = &ult {
            // BLOCKED before the internal lock is released, so a
            // concurrent signaller already sees a blocked descriptor.
            u.set_blocked();
        }

        self.lock.unlock();
        // The user mutex is released only after the enqueue completed;
        // a signaller that wins the race from here on finds us queued.
        mutex.unlock();

        if let Some(u) = &ult {
            u.suspend();
        } else if let Some(f) = &flag {
            let mut spins: u32 = 0;
            while f.load(Ordering::Acquire) == 0 {
                std::hint::spin_loop();
                spins = spins.wrapping_add(1);
                if spins % 1024 == 0 {
                    std::thread::yield_now();
                }
            }
        }

        mutex.lock();
        Ok(())
    }

    /// Wake the longest-waiting waiter, if any.
    pub fn signal(&self) -> RtResult<()> {
        self.lock.lock();
        // SAFETY: guarded by `lock`.
        let st = unsafe { &mut *self.state.get() };

        let Some(head) = st.waiters.pop_front() else {
            self.lock.unlock();
            return Ok(());
        };

        wake(head);
        if st.waiters.is_empty() {
            st.waiter_mutex = None;
        }
        tracing::trace!(target: "weft::cond", num_waiters = st.waiters.len(), "signal");

        self.lock.unlock();
        Ok(())
    }

    /// Wake every waiter, in FIFO order of their waits.
    pub fn broadcast(&self) -> RtResult<()> {
        self.lock.lock();
        // SAFETY: guarded by `lock`.
        let st = unsafe { &mut *self.state.get() };

        if st.waiters.is_empty() {
            self.lock.unlock();
            return Ok(());
        }

        while let Some(w) = st.waiters.pop_front() {
            wake(w);
        }
        st.waiter_mutex = None;
        tracing::trace!(target: "weft::cond", "broadcast");

        self.lock.unlock();
        Ok(())
    }

    /// Current queue length.
    pub fn num_waiters(&self) -> usize {
        self.lock.spinlock();
        // SAFETY: guarded by `lock`.
        let n = unsafe { (*self.state.get()).waiters.len() };
        self.lock.unlock();
        n
    }
}

fn wake(waiter: Waiter) {
    match waiter {
        Waiter::Ult(u) => u.set_ready(),
        Waiter::External(f) => f.store(1, Ordering::Release),
    }
}

impl Drop for WeftCond {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if !st.waiters.is_empty() && !std::thread::panicking() {
            panic!("condition variable dropped with waiters still queued");
        }
    }
}

impl std::fmt::Debug for WeftCond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeftCond")
            .field("num_waiters", &self.num_waiters())
            .finish()
    }
}
