// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Execution streams.
//!
//! An execution stream is a named native thread hosting one scheduler.
//! Stopping is cooperative: the stream finishes dispatching, drains
//! READY work, and joins.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::context;
use crate::sched::Scheduler;

static NEXT_STREAM_ID: AtomicUsize = AtomicUsize::new(0);

/// A native thread driving a scheduler.
pub struct ExecutionStream {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ExecutionStream {
    /// Start a stream running `sched` on a new thread.
    pub fn spawn<S>(mut sched: S) -> ExecutionStream
    where
        S: Scheduler + 'static,
    {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let thread = thread::Builder::new()
            .name(format!("weft-es-{}", id))
            .spawn(move || {
                context::enter_stream();
                tracing::trace!(target: "weft::stream", id, "stream running");
                sched.run(&flag);
                tracing::trace!(target: "weft::stream", id, "stream stopped");
                context::exit_stream();
            })
            .expect("failed to spawn execution stream");

        ExecutionStream {
            stop,
            thread: Some(thread),
        }
    }

    /// Ask the scheduler loop to finish.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop and wait for the stream thread to exit.
    pub fn join(mut self) {
        self.stop();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for ExecutionStream {
    fn drop(&mut self) {
        if let Some(t) = self.thread.take() {
            self.stop.store(true, Ordering::Release);
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Pool, PoolAccess};
    use crate::sched::FifoScheduler;
    use crate::ult::Ult;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn stream_runs_queued_ults() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let es = ExecutionStream::spawn(FifoScheduler::new(vec![pool.clone()]));

        let counter = Arc::new(AtomicI32::new(0));
        let mut ults = vec![];
        for _ in 0..10 {
            let c = counter.clone();
            ults.push(
                Ult::create(&pool, move || {
                    c.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap(),
            );
        }

        for u in &ults {
            u.join();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        es.join();
        assert_eq!(pool.num_scheds(), 0);
    }

    #[test]
    fn two_streams_share_a_pool() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let es1 = ExecutionStream::spawn(FifoScheduler::new(vec![pool.clone()]));
        let es2 = ExecutionStream::spawn(FifoScheduler::new(vec![pool.clone()]));
        assert_eq!(pool.num_scheds(), 2);

        let counter = Arc::new(AtomicI32::new(0));
        let mut ults = vec![];
        for _ in 0..32 {
            let c = counter.clone();
            ults.push(
                Ult::create(&pool, move || {
                    c.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap(),
            );
        }
        for u in &ults {
            u.join();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 32);

        es1.join();
        es2.join();
        assert_eq!(pool.num_scheds(), 0);
    }

    #[test]
    fn yielding_ult_is_redispatched() {
        let pool = Pool::with_fifo(PoolAccess::Mpmc);
        let es = ExecutionStream::spawn(FifoScheduler::new(vec![pool.clone()]));

        let hops = Arc::new(AtomicI32::new(0));
        let h = hops.clone();
        let ult = Ult::create(&pool, move || {
            for _ in 0..3 {
                h.fetch_add(1, Ordering::Relaxed);
                crate::ult::yield_now();
            }
        })
        .unwrap();

        ult.join();
        assert_eq!(hops.load(Ordering::Relaxed), 3);
        es.join();
    }
}
