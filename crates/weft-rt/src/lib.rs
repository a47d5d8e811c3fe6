// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Weft user-level threading runtime core.
//!
//! ULTs (user-level threads) are cooperatively scheduled work units
//! multiplexed onto native OS threads ("execution streams"). Pools are
//! the queue abstraction schedulers draw runnable work from, and the
//! pluggable extension point of the runtime.
//!
//! Components:
//! - pool — ordered work queues with pluggable backing storage and
//!   producer/consumer access discipline
//! - ult — descriptors, the READY/RUNNING/BLOCKED/TERMINATED state
//!   machine, and cooperative suspension
//! - mutex/cond — synchronization usable from both ULT and native
//!   thread contexts
//! - sched/stream — the scheduler contract and execution streams

pub mod cond;
pub mod config;
pub mod context;
pub mod error;
pub mod mutex;
pub mod pool;
pub mod sched;
pub mod stream;
pub mod ult;

pub use cond::WeftCond;
pub use error::{RtError, RtResult};
pub use mutex::WeftMutex;
pub use pool::{FifoBacking, Pool, PoolAccess, PoolBacking};
pub use sched::{FifoScheduler, Scheduler};
pub use stream::ExecutionStream;
pub use ult::{Ult, UltState, Unit};
