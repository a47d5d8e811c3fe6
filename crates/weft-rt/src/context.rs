// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime-local caller context.
//!
//! Each native thread is classified as one of: the host of a running
//! ULT, an execution-stream thread with no current ULT, or an external
//! thread the runtime knows nothing about. Synchronization primitives
//! branch on this to decide between ULT suspension and native blocking.

use std::cell::RefCell;
use std::sync::Arc;

use crate::ult::Ult;

/// What kind of execution context the calling native thread provides.
#[derive(Clone)]
pub(crate) enum Caller {
    /// Running as a ULT; wait operations suspend the descriptor.
    Ult(Arc<Ult>),
    /// A stream/scheduler thread with no ULT to suspend.
    Stream,
    /// A native thread outside the runtime; waits block the OS thread.
    External,
}

#[derive(Default)]
struct Slot {
    stream: bool,
    ult: Option<Arc<Ult>>,
}

thread_local! {
    static CONTEXT: RefCell<Slot> = RefCell::new(Slot::default());
}

/// The ULT hosted by the calling thread, if any.
pub fn current_ult() -> Option<Arc<Ult>> {
    CONTEXT.with(|c| c.borrow().ult.clone())
}

pub(crate) fn caller() -> Caller {
    CONTEXT.with(|c| {
        let slot = c.borrow();
        match (&slot.ult, slot.stream) {
            (Some(ult), _) => Caller::Ult(ult.clone()),
            (None, true) => Caller::Stream,
            (None, false) => Caller::External,
        }
    })
}

/// Mark the calling thread as an execution stream. Called once at
/// stream thread startup.
pub(crate) fn enter_stream() {
    CONTEXT.with(|c| c.borrow_mut().stream = true);
}

pub(crate) fn exit_stream() {
    CONTEXT.with(|c| c.borrow_mut().stream = false);
}

/// Bind a ULT to its host thread for the duration of its body.
pub(crate) fn enter_ult(ult: Arc<Ult>) {
    CONTEXT.with(|c| c.borrow_mut().ult = Some(ult));
}

pub(crate) fn exit_ult() {
    CONTEXT.with(|c| c.borrow_mut().ult = None);
}
