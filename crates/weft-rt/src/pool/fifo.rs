// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Default FIFO backing.
//!
//! Mutex-protected VecDeque plus a condvar so `pop_timedwait` can idle
//! without busy-spinning. Internally synchronized, so it satisfies any
//! access mode up to MPMC.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::SystemTime;

use super::backing::PoolBacking;
use crate::ult::Unit;

pub struct FifoBacking {
    queue: Mutex<VecDeque<Unit>>,
    available: Condvar,
}

impl FifoBacking {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }
}

impl Default for FifoBacking {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBacking for FifoBacking {
    fn push(&self, unit: Unit) {
        let mut q = self.queue.lock().unwrap();
        q.push_back(unit);
        self.available.notify_one();
    }

    fn pop(&self) -> Option<Unit> {
        self.queue.lock().unwrap().pop_front()
    }

    fn pop_timedwait(&self, deadline: SystemTime) -> Option<Unit> {
        let mut q = self.queue.lock().unwrap();
        loop {
            if let Some(unit) = q.pop_front() {
                return Some(unit);
            }
            let Ok(left) = deadline.duration_since(SystemTime::now()) else {
                // Deadline already passed.
                return None;
            };
            let (guard, _timeout) = self.available.wait_timeout(q, left).unwrap();
            q = guard;
        }
    }

    fn remove(&self, unit: &Unit) -> bool {
        let mut q = self.queue.lock().unwrap();
        match q.iter().position(|u| u.same(unit)) {
            Some(idx) => {
                q.remove(idx);
                true
            }
            None => false,
        }
    }

    fn size(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, PoolAccess};
    use crate::ult::Ult;
    use std::sync::Arc;
    use std::time::Duration;

    fn drain_and_finish(pool: &Arc<Pool>, ults: &[Arc<Ult>]) {
        while let Some(u) = pool.pop() {
            u.ult().set_running();
            u.ult().run_slice();
        }
        for u in ults {
            u.join();
        }
    }

    #[test]
    fn fifo_order() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let a = Ult::create(&pool, || {}).unwrap();
        let b = Ult::create(&pool, || {}).unwrap();

        let backing = FifoBacking::new();
        backing.push(a.unit());
        backing.push(b.unit());
        assert!(backing.pop().unwrap().same(&a.unit()));
        assert!(backing.pop().unwrap().same(&b.unit()));
        assert!(backing.pop().is_none());

        drain_and_finish(&pool, &[a, b]);
    }

    #[test]
    fn remove_absent_is_false() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let a = Ult::create(&pool, || {}).unwrap();

        let backing = FifoBacking::new();
        assert!(!backing.remove(&a.unit()));
        backing.push(a.unit());
        assert!(backing.remove(&a.unit()));
        assert_eq!(backing.size(), 0);

        drain_and_finish(&pool, &[a]);
    }

    #[test]
    fn pop_timedwait_expires() {
        let backing = FifoBacking::new();
        let deadline = SystemTime::now() + Duration::from_millis(50);
        let start = std::time::Instant::now();
        assert!(backing.pop_timedwait(deadline).is_none());
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn pop_timedwait_past_deadline_returns_immediately() {
        let backing = FifoBacking::new();
        let deadline = SystemTime::now() - Duration::from_secs(1);
        let start = std::time::Instant::now();
        assert!(backing.pop_timedwait(deadline).is_none());
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn pop_timedwait_wakes_on_push() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let a = Ult::create(&pool, || {}).unwrap();
        let unit = pool.pop().unwrap();

        let backing = Arc::new(FifoBacking::new());
        let b2 = backing.clone();
        let pusher = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            b2.push(unit);
        });

        let deadline = SystemTime::now() + Duration::from_secs(5);
        let got = backing.pop_timedwait(deadline);
        assert!(got.is_some());
        pusher.join().unwrap();

        let u = got.unwrap();
        u.ult().set_running();
        u.ult().run_slice();
        a.join();
    }
}
