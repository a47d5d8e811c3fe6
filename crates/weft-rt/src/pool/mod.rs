// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work pools.
//!
//! A pool is an ordered queue of units with pluggable storage, plus the
//! accounting that makes a pool's population observable while units are
//! temporarily absent from the queue: `num_blocked` counts ULTs that
//! will return here when readied, `num_migrations` counts units in
//! flight toward this pool, and `num_scheds` counts the schedulers
//! currently holding the pool.

mod backing;
mod fifo;

pub use backing::PoolBacking;
pub use fifo::FifoBacking;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::SystemTime;

use crate::config::config;
use crate::error::{RtError, RtResult};
use crate::ult::{Ult, Unit};

/// Producer/consumer discipline a pool enforces.
///
/// "Single" sides bind to the first native thread that performs the
/// operation; any later thread on that side is rejected with
/// [`RtError::InvPoolAccess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAccess {
    /// Single producer, single consumer; storage needs no internal
    /// synchronization if callers serialize externally.
    Private,
    /// Single producer, single consumer.
    Spsc,
    /// Multiple producers, single consumer.
    Mpsc,
    /// Single producer, multiple consumers.
    Spmc,
    /// Multiple producers, multiple consumers.
    Mpmc,
}

impl PoolAccess {
    fn single_producer(self) -> bool {
        matches!(self, Self::Private | Self::Spsc | Self::Spmc)
    }

    fn single_consumer(self) -> bool {
        matches!(self, Self::Private | Self::Spsc | Self::Mpsc)
    }
}

/// An ordered queue of runnable work units.
pub struct Pool {
    backing: Box<dyn PoolBacking>,
    access: PoolAccess,
    /// ULTs owned-but-not-queued: BLOCKED, waiting to return here.
    num_blocked: AtomicI32,
    /// Units in flight toward this pool via migration.
    num_migrations: AtomicI32,
    /// Schedulers currently holding this pool.
    num_scheds: AtomicI32,
    producer: OnceLock<ThreadId>,
    consumer: OnceLock<ThreadId>,
}

impl Pool {
    /// Create a pool with explicit backing storage and access mode.
    pub fn create(backing: Box<dyn PoolBacking>, access: PoolAccess) -> Arc<Pool> {
        Arc::new(Pool {
            backing,
            access,
            num_blocked: AtomicI32::new(0),
            num_migrations: AtomicI32::new(0),
            num_scheds: AtomicI32::new(0),
            producer: OnceLock::new(),
            consumer: OnceLock::new(),
        })
    }

    /// Create a pool over the default FIFO backing.
    pub fn with_fifo(access: PoolAccess) -> Arc<Pool> {
        Self::create(Box::new(FifoBacking::new()), access)
    }

    /// Record `id` as this pool's producer, failing if the access mode
    /// restricts producers and a different one is already bound.
    fn set_producer(&self, id: ThreadId) -> RtResult<()> {
        if !config().producer_check || !self.access.single_producer() {
            return Ok(());
        }
        let bound = self.producer.get_or_init(|| id);
        if *bound == id {
            Ok(())
        } else {
            Err(RtError::InvPoolAccess)
        }
    }

    fn set_consumer(&self, id: ThreadId) -> RtResult<()> {
        if !config().consumer_check || !self.access.single_consumer() {
            return Ok(());
        }
        let bound = self.consumer.get_or_init(|| id);
        if *bound == id {
            Ok(())
        } else {
            Err(RtError::InvPoolAccess)
        }
    }

    /// Enqueue a unit. The backing is untouched when the producer
    /// check fails. Callers uphold that the unit is not already queued.
    pub fn push(&self, unit: Unit, producer: ThreadId) -> RtResult<()> {
        self.set_producer(producer)?;
        tracing::trace!(target: "weft::pool", producer = ?producer, "push");
        self.backing.push(unit);
        Ok(())
    }

    /// Mark a ULT READY and enqueue it in this pool.
    ///
    /// The READY store is relaxed; the backing push releases it to the
    /// consumer that pops the unit.
    pub fn add_ult(&self, ult: &Arc<Ult>, producer: ThreadId) -> RtResult<()> {
        ult.relaxed_store_ready();
        self.push(ult.unit(), producer)
    }

    /// Return a ULT to its home pool on a wake or yield.
    ///
    /// The identity checks bind external producers; the runtime
    /// re-enqueuing a ULT it already owns is exempt, so a waiter can
    /// always be woken no matter which thread signals.
    pub(crate) fn readd(&self, ult: &Arc<Ult>) {
        ult.relaxed_store_ready();
        tracing::trace!(target: "weft::pool", "readd");
        self.backing.push(ult.unit());
    }

    /// Dequeue the head unit without blocking.
    pub fn pop(&self) -> Option<Unit> {
        let unit = self.backing.pop();
        if unit.is_some() {
            tracing::trace!(target: "weft::pool", "pop");
        }
        unit
    }

    /// Dequeue the head unit, blocking the calling native thread until
    /// one arrives or the absolute `deadline` passes.
    pub fn pop_timedwait(&self, deadline: SystemTime) -> Option<Unit> {
        let unit = self.backing.pop_timedwait(deadline);
        if unit.is_some() {
            tracing::trace!(target: "weft::pool", "pop (timedwait)");
        }
        unit
    }

    /// Remove a specific unit from the queue.
    pub fn remove(&self, unit: &Unit, consumer: ThreadId) -> RtResult<()> {
        self.set_consumer(consumer)?;
        tracing::trace!(target: "weft::pool", consumer = ?consumer, "remove");
        if self.backing.remove(unit) {
            Ok(())
        } else {
            Err(RtError::UnitNotFound)
        }
    }

    /// A scheduler takes a reference to this pool.
    pub fn retain(&self) {
        self.num_scheds.fetch_add(1, Ordering::AcqRel);
    }

    /// A scheduler drops its reference; returns the new count.
    ///
    /// Unmatched releases are a programmer error and trap.
    pub fn release(&self) -> i32 {
        assert!(
            self.num_scheds.load(Ordering::Acquire) > 0,
            "pool released with no retaining scheduler"
        );
        self.num_scheds.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// A ULT bound to this pool went BLOCKED.
    pub fn inc_num_blocked(&self) {
        self.num_blocked.fetch_add(1, Ordering::AcqRel);
    }

    /// A previously blocked ULT is on its way back into the queue.
    pub fn dec_num_blocked(&self) {
        self.num_blocked.fetch_sub(1, Ordering::AcqRel);
    }

    /// A migration toward this pool is in flight; counted so
    /// `total_size` does not transiently undercount.
    pub fn inc_num_migrations(&self) {
        self.num_migrations.fetch_add(1, Ordering::AcqRel);
    }

    /// The migrated unit has arrived (or the migration was cancelled).
    pub fn dec_num_migrations(&self) {
        self.num_migrations.fetch_sub(1, Ordering::AcqRel);
    }

    /// Queued units only.
    pub fn size(&self) -> usize {
        self.backing.size()
    }

    /// Queued + blocked + in-migration.
    ///
    /// The three loads are not one atomic snapshot; treat the sum as
    /// an approximation consistent with some recent interleaving.
    pub fn total_size(&self) -> usize {
        let total = self.size() as i64
            + i64::from(self.num_blocked.load(Ordering::Acquire))
            + i64::from(self.num_migrations.load(Ordering::Acquire));
        total.max(0) as usize
    }

    pub fn num_scheds(&self) -> i32 {
        self.num_scheds.load(Ordering::Acquire)
    }

    pub fn num_blocked(&self) -> i32 {
        self.num_blocked.load(Ordering::Acquire)
    }

    pub fn num_migrations(&self) -> i32 {
        self.num_migrations.load(Ordering::Acquire)
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // Tearing down a pool a scheduler still holds is a programmer
        // error, like an unmatched release.
        if self.num_scheds.load(Ordering::Acquire) != 0 && !std::thread::panicking() {
            panic!("pool dropped while schedulers still hold it");
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("access", &self.access)
            .field("size", &self.size())
            .field("num_blocked", &self.num_blocked())
            .field("num_migrations", &self.num_migrations())
            .field("num_scheds", &self.num_scheds())
            .finish()
    }
}
