//! Owning-thread dispatch
//!
//! Externally-allocated resources are thread-affine: allocation and release
//! of device buffers must happen on one designated owning thread, driven by
//! a per-frame tick. This module defines the scheduler seam the pools and
//! command queues dispatch into — an injected value, not a process-wide
//! singleton, so the core stays testable without a live frame loop — plus
//! a blocking promise-style hop for callers on other threads.
//!
//! [`frame::FrameDispatcher`] is the reference implementation.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crossbeam::channel;
use thiserror::Error;

pub mod frame;

pub use frame::FrameDispatcher;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Ordered per-tick scheduling domains on the owning thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickPhase {
    /// Early tick, before frame logic
    Update,
    /// Late tick, after frame logic; allocation and release of device
    /// resources are dispatched here
    LateUpdate,
}

/// Errors from cross-thread dispatch
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The dispatcher shut down before the task completed
    #[error("owning-thread dispatcher shut down before the task completed")]
    SchedulerGone,
    /// The dispatched task panicked on the owning thread
    #[error("task panicked on the owning thread")]
    TaskPanicked,
}

/// Scheduler over the owning thread and a background worker domain
///
/// The two tick phases run in enqueue order on the owning thread, once per
/// frame each; the worker domain is unordered.
pub trait TickScheduler: Send + Sync + 'static {
    /// Queue a task for the given tick phase on the owning thread
    fn schedule(&self, phase: TickPhase, task: Task);

    /// Queue a task for the unordered background worker domain
    fn schedule_background(&self, task: Task);

    /// Whether the calling thread is the owning thread
    fn is_owning_thread(&self) -> bool;
}

/// Run `f` on the owning thread and block until its result is available
///
/// Runs inline when the caller already is the owning thread. Otherwise the
/// closure is queued for the late tick and the caller parks on a rendezvous
/// channel until the tick executes it.
pub fn run_on_owning_thread<S, F, T>(scheduler: &S, f: F) -> Result<T, DispatchError>
where
    S: TickScheduler + ?Sized,
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    if scheduler.is_owning_thread() {
        return Ok(f());
    }

    let (tx, rx) = channel::bounded(1);
    scheduler.schedule(
        TickPhase::LateUpdate,
        Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(result);
        }),
    );

    match rx.recv() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(DispatchError::TaskPanicked),
        Err(_) => Err(DispatchError::SchedulerGone),
    }
}
