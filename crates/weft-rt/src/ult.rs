// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! ULT descriptors and the scheduling state machine.
//!
//! A ULT is hosted on a dedicated native thread; cooperative
//! multiplexing is realized by a ticketed handoff (`Seat`): the
//! execution stream grants the ULT one run slice and blocks until the
//! ULT yields control back (suspension, yield, or termination). Only
//! one ULT per stream runs at a time, so the observable scheduling
//! semantics are those of a classic ULT runtime.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::context::{self, Caller};
use crate::error::{RtError, RtResult};
use crate::pool::Pool;

/// Scheduling state of a ULT.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UltState {
    /// Queued in its home pool, waiting to be dispatched.
    Ready = 0,
    /// Dispatched by a scheduler; absent from every pool.
    Running = 1,
    /// Suspended awaiting an explicit wake; absent from every pool and
    /// accounted in its home pool's `num_blocked`.
    Blocked = 2,
    /// Body returned.
    Terminated = 3,
}

impl UltState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Blocked,
            _ => Self::Terminated,
        }
    }
}

/// Opaque handle identifying a queued ULT.
///
/// Each unit is owned by at most one pool at a time; callers uphold
/// that a unit is never queued twice. Pools pass units through to their
/// backing without inspecting them.
#[derive(Clone)]
pub struct Unit(Arc<Ult>);

impl Unit {
    /// The descriptor this unit stands for.
    pub fn ult(&self) -> &Arc<Ult> {
        &self.0
    }

    /// Identity comparison (same descriptor).
    pub fn same(&self, other: &Unit) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("state", &self.0.state())
            .finish()
    }
}

#[derive(Default)]
struct SeatState {
    grants: u64,
    yields: u64,
}

/// Ticketed run-slice handoff between a stream and a ULT host thread.
///
/// Invariant: `yields <= grants <= yields + 1`; the ULT runs iff
/// `grants > yields`, and at most one slice is ever outstanding. A
/// stream that loses the race against a wake (the unit is back in a
/// pool before the previous slice ended) is refused instead of being
/// tied to a slice another stream is still attending.
pub(crate) struct Seat {
    state: Mutex<SeatState>,
    cv: Condvar,
}

impl Seat {
    fn new() -> Self {
        Self {
            state: Mutex::new(SeatState::default()),
            cv: Condvar::new(),
        }
    }

    /// Stream side: grant one run slice and wait until the ULT yields
    /// control back for this grant. Returns `false` without granting
    /// when the previous slice has not ended yet.
    fn try_grant_and_wait(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.grants > st.yields {
            return false;
        }
        st.grants += 1;
        let ticket = st.grants;
        self.cv.notify_all();
        while st.yields < ticket {
            st = self.cv.wait(st).unwrap();
        }
        true
    }

    /// ULT side: park until the first grant arrives.
    fn wait_for_grant(&self) {
        let mut st = self.state.lock().unwrap();
        while st.grants == st.yields {
            st = self.cv.wait(st).unwrap();
        }
    }

    /// ULT side: return control to the stream, then park until the
    /// next grant.
    fn yield_control(&self) {
        let mut st = self.state.lock().unwrap();
        st.yields += 1;
        self.cv.notify_all();
        while st.grants == st.yields {
            st = self.cv.wait(st).unwrap();
        }
    }

    /// ULT side: return control for the last time (termination).
    fn yield_final(&self) {
        let mut st = self.state.lock().unwrap();
        st.yields += 1;
        self.cv.notify_all();
    }
}

type UltBody = Box<dyn FnOnce() + Send + 'static>;

/// A user-level thread descriptor.
///
/// Created READY and pushed into its home pool; a scheduler pops the
/// unit, marks it RUNNING, and runs one slice. Synchronization
/// primitives move it through BLOCKED and back via [`Ult::set_blocked`]
/// and [`Ult::set_ready`].
pub struct Ult {
    state: AtomicU8,
    /// Home pool this ULT returns to when readied.
    pool: Arc<Pool>,
    seat: Seat,
    /// Completion signal for `join` (native-thread blocking).
    done: (Mutex<bool>, Condvar),
    host: Mutex<Option<JoinHandle<()>>>,
    /// Set when creation was rolled back before the first dispatch.
    abandoned: AtomicBool,
}

impl Ult {
    /// Create a ULT bound to `pool` and enqueue it READY.
    ///
    /// The producer identity recorded for the push is the calling
    /// native thread.
    pub fn create<F>(pool: &Arc<Pool>, body: F) -> RtResult<Arc<Ult>>
    where
        F: FnOnce() + Send + 'static,
    {
        let ult = Arc::new(Ult {
            state: AtomicU8::new(UltState::Ready as u8),
            pool: pool.clone(),
            seat: Seat::new(),
            done: (Mutex::new(false), Condvar::new()),
            host: Mutex::new(None),
            abandoned: AtomicBool::new(false),
        });

        let for_host = ult.clone();
        let handle = thread::Builder::new()
            .name("weft-ult".to_string())
            .spawn(move || host_main(for_host, Box::new(body)))
            .map_err(|_| RtError::Mem)?;
        *ult.host.lock().unwrap() = Some(handle);

        if let Err(e) = pool.add_ult(&ult, thread::current().id()) {
            // Roll back: run the host through an empty slice so it
            // exits, then surface the push failure.
            ult.abandoned.store(true, Ordering::Release);
            ult.seat.try_grant_and_wait();
            if let Some(h) = ult.host.lock().unwrap().take() {
                let _ = h.join();
            }
            return Err(e);
        }
        Ok(ult)
    }

    pub fn state(&self) -> UltState {
        UltState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Handle used to queue this ULT in a pool.
    pub fn unit(self: &Arc<Self>) -> Unit {
        Unit(self.clone())
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// RUNNING transition, performed by the scheduler after pop.
    pub(crate) fn set_running(&self) {
        self.state.store(UltState::Running as u8, Ordering::Release);
    }

    /// RUNNING → BLOCKED. The ULT is absent from every pool afterwards
    /// and accounted in its home pool's `num_blocked`.
    pub fn set_blocked(self: &Arc<Self>) {
        self.state.store(UltState::Blocked as u8, Ordering::Release);
        self.pool.inc_num_blocked();
    }

    /// BLOCKED → READY: uncount from `num_blocked`, then re-enqueue.
    ///
    /// The decrement precedes the push; the READY store itself is
    /// relaxed because the backing push releases it to whichever
    /// consumer pops the unit. The re-enqueue is a runtime-internal
    /// wake and is not subject to the home pool's producer check, so
    /// any thread may perform it.
    pub fn set_ready(self: &Arc<Self>) {
        self.pool.dec_num_blocked();
        self.pool.readd(self);
    }

    /// Cooperative suspension point. Control returns to the stream;
    /// the call returns when the ULT is next dispatched.
    pub fn suspend(&self) {
        self.seat.yield_control();
    }

    /// Block the calling native thread until this ULT terminates.
    pub fn join(&self) {
        let (lock, cv) = &self.done;
        let mut done = lock.lock().unwrap();
        while !*done {
            done = cv.wait(done).unwrap();
        }
        drop(done);
        if let Some(h) = self.host.lock().unwrap().take() {
            let _ = h.join();
        }
    }

    /// Re-enqueue READY and suspend until redispatched.
    pub(crate) fn yield_to_pool(self: &Arc<Self>) {
        self.pool.readd(self);
        self.seat.yield_control();
    }

    /// Run one slice: grant the host thread control and wait for it to
    /// come back (suspend, yield, or termination). Returns `false`
    /// without running anything when the previous slice is still
    /// winding down on another stream.
    pub(crate) fn run_slice(&self) -> bool {
        self.seat.try_grant_and_wait()
    }

    pub(crate) fn relaxed_store_ready(&self) {
        self.state.store(UltState::Ready as u8, Ordering::Relaxed);
    }
}

impl fmt::Debug for Ult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ult").field("state", &self.state()).finish()
    }
}

fn host_main(ult: Arc<Ult>, body: UltBody) {
    ult.seat.wait_for_grant();

    if !ult.abandoned.load(Ordering::Acquire) {
        context::enter_ult(ult.clone());
        body();
        context::exit_ult();
    }

    ult.state
        .store(UltState::Terminated as u8, Ordering::Release);

    let (lock, cv) = &ult.done;
    let mut done = lock.lock().unwrap();
    *done = true;
    cv.notify_all();
    drop(done);

    ult.seat.yield_final();
}

/// Yield the processor cooperatively.
///
/// A ULT re-enqueues itself READY in its home pool and suspends until
/// redispatched; any other caller just yields its OS thread.
pub fn yield_now() {
    match context::caller() {
        Caller::Ult(ult) => ult.yield_to_pool(),
        _ => thread::yield_now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, PoolAccess};
    use std::sync::atomic::AtomicI32;

    #[test]
    fn state_roundtrip() {
        assert_eq!(UltState::from_u8(UltState::Blocked as u8), UltState::Blocked);
        assert_eq!(UltState::from_u8(250), UltState::Terminated);
    }

    #[test]
    fn seat_handoff_across_threads() {
        let seat = Arc::new(Seat::new());
        let s = seat.clone();
        let worker = thread::spawn(move || {
            s.wait_for_grant();
            // first slice
            s.yield_control();
            // second slice
            s.yield_final();
        });
        assert!(seat.try_grant_and_wait());
        assert!(seat.try_grant_and_wait());
        worker.join().unwrap();
    }

    #[test]
    fn seat_refuses_overlapping_grant() {
        let seat = Arc::new(Seat::new());
        let in_slice = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));

        let s = seat.clone();
        let i = in_slice.clone();
        let r = release.clone();
        let worker = thread::spawn(move || {
            s.wait_for_grant();
            i.store(true, Ordering::Release);
            while !r.load(Ordering::Acquire) {
                std::hint::spin_loop();
            }
            s.yield_final();
        });

        let s = seat.clone();
        let dispatcher = thread::spawn(move || assert!(s.try_grant_and_wait()));

        while !in_slice.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
        // A grant attempted while the slice is still running is
        // refused rather than queued against a future yield.
        assert!(!seat.try_grant_and_wait());

        release.store(true, Ordering::Release);
        dispatcher.join().unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn create_enqueues_ready() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let ult = Ult::create(&pool, || {}).unwrap();
        assert_eq!(ult.state(), UltState::Ready);
        assert_eq!(pool.size(), 1);

        // Drain manually so the host thread exits.
        let unit = pool.pop().unwrap();
        assert!(unit.same(&ult.unit()));
        unit.ult().set_running();
        unit.ult().run_slice();
        ult.join();
        assert_eq!(ult.state(), UltState::Terminated);
    }

    #[test]
    fn body_runs_exactly_once() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let hits = Arc::new(AtomicI32::new(0));
        let h = hits.clone();
        let ult = Ult::create(&pool, move || {
            h.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();

        let unit = pool.pop().unwrap();
        unit.ult().set_running();
        unit.ult().run_slice();
        ult.join();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn unit_identity() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let a = Ult::create(&pool, || {}).unwrap();
        let b = Ult::create(&pool, || {}).unwrap();
        assert!(a.unit().same(&a.unit()));
        assert!(!a.unit().same(&b.unit()));

        // Drain.
        while let Some(u) = pool.pop() {
            u.ult().set_running();
            u.ult().run_slice();
        }
        a.join();
        b.join();
    }
}
