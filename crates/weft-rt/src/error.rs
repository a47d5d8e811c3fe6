// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime errors.

use thiserror::Error;

/// Errors surfaced by pool and synchronization operations.
///
/// Failed operations leave observable state unchanged, with one
/// documented exception: a mutex-mismatch failure in [`crate::WeftCond::wait`]
/// releases the condvar's internal lock before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RtError {
    /// Allocation failed while creating a runtime object.
    #[error("allocation failed")]
    Mem,

    /// The condition variable is already bound to a different mutex.
    #[error("condition variable is bound to a different mutex")]
    InvMutex,

    /// The pool's access mode forbids this producer or consumer.
    #[error("pool access mode forbids this producer or consumer")]
    InvPoolAccess,

    /// The operation needs a ULT, but the calling context has none.
    ///
    /// Raised when a scheduler/stream thread that hosts no ULT calls an
    /// operation that must suspend a ULT.
    #[error("calling context has no user-level thread")]
    NoUlt,

    /// The unit is not queued in the pool.
    #[error("unit is not in the pool")]
    UnitNotFound,
}

pub type RtResult<T> = Result<T, RtError>;
