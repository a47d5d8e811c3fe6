// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler contract and the default FIFO scheduler.
//!
//! A scheduler owns a set of pools it has `retain`ed, draws units via
//! `pop`/`pop_timedwait`, and dispatches them with [`run_unit`]. Pool
//! selection policy beyond plain FIFO order is up to the
//! implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::pool::Pool;
use crate::ult::{Unit, UltState};

/// Contract an execution stream drives.
pub trait Scheduler: Send {
    /// Pools this scheduler draws from.
    fn pools(&self) -> &[Arc<Pool>];

    /// Scheduling loop. Runs until `stop` is observed set; READY work
    /// already queued must still be drained before returning.
    fn run(&mut self, stop: &AtomicBool);
}

/// Dispatch one popped unit: READY → RUNNING, then run one slice.
///
/// Returns when the ULT suspends, yields, or terminates. A unit whose
/// descriptor already terminated is skipped. When a wake re-queued the
/// unit before its previous slice finished on another stream, the
/// grant is refused and the unit is requeued for a later dispatch so
/// this stream is not tied to a slice it never started.
pub fn run_unit(unit: Unit) {
    let ult = unit.ult();
    if ult.state() == UltState::Terminated {
        return;
    }
    ult.set_running();
    if !ult.run_slice() {
        ult.pool().readd(ult);
    }
}

/// FIFO scheduler: drains its pools in order; parks in
/// `pop_timedwait` when idle so stopping is observed promptly without
/// busy-spinning.
pub struct FifoScheduler {
    pools: Vec<Arc<Pool>>,
    idle_wait: Duration,
}

impl FifoScheduler {
    /// Take a scheduler reference on every pool.
    pub fn new(pools: Vec<Arc<Pool>>) -> Self {
        assert!(!pools.is_empty(), "scheduler needs at least one pool");
        for pool in &pools {
            pool.retain();
        }
        Self {
            pools,
            idle_wait: Duration::from_millis(10),
        }
    }
}

impl Scheduler for FifoScheduler {
    fn pools(&self) -> &[Arc<Pool>] {
        &self.pools
    }

    fn run(&mut self, stop: &AtomicBool) {
        loop {
            let mut ran = false;
            for pool in &self.pools {
                while let Some(unit) = pool.pop() {
                    run_unit(unit);
                    ran = true;
                }
            }

            if stop.load(Ordering::Acquire) {
                // Drain anything readied since the last sweep.
                for pool in &self.pools {
                    while let Some(unit) = pool.pop() {
                        run_unit(unit);
                    }
                }
                break;
            }

            if !ran {
                let deadline = SystemTime::now() + self.idle_wait;
                if let Some(unit) = self.pools[0].pop_timedwait(deadline) {
                    run_unit(unit);
                }
            }
        }
    }
}

impl Drop for FifoScheduler {
    fn drop(&mut self) {
        for pool in &self.pools {
            pool.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolAccess;
    use crate::ult::Ult;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn scheduler_retains_and_releases_its_pools() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        {
            let sched = FifoScheduler::new(vec![pool.clone()]);
            assert_eq!(pool.num_scheds(), 1);
            assert_eq!(sched.pools().len(), 1);
        }
        assert_eq!(pool.num_scheds(), 0);
    }

    #[test]
    fn run_drains_queued_work_on_stop() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let counter = Arc::new(AtomicI32::new(0));
        let mut ults = vec![];
        for _ in 0..5 {
            let c = counter.clone();
            ults.push(
                Ult::create(&pool, move || {
                    c.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap(),
            );
        }

        let mut sched = FifoScheduler::new(vec![pool.clone()]);
        let stop = AtomicBool::new(true);
        sched.run(&stop);

        for u in &ults {
            u.join();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 5);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn run_unit_skips_terminated() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let ult = Ult::create(&pool, || {}).unwrap();
        let unit = pool.pop().unwrap();
        run_unit(unit.clone());
        ult.join();
        assert_eq!(ult.state(), UltState::Terminated);
        // A second dispatch of the same unit is a no-op.
        run_unit(unit);
    }
}
