//! # Coalescing Command Queue
//!
//! A double-buffered action queue that serializes and batches mutation of
//! shared render state. Producers on any thread enqueue closures; a flush
//! drains them in enqueue order, exactly once per logical flush cycle.
//!
//! ## Architecture
//!
//! - Two generation buffers: one is the "write" buffer (target of new
//!   enqueues), the other the "read" buffer being drained. Which is which
//!   flips atomically at the start of each cycle, under the enqueue lock,
//!   so enqueues during execution land in the next cycle and the current
//!   drain never races a producer.
//! - An `Idle`/`Flushing` state machine with a re-entrant request flag:
//!   flush calls while a cycle is executing collapse into exactly one
//!   follow-up cycle — never zero, never more than one extra.
//! - The follow-up cycle runs as a loop inside the current execution, not
//!   as recursion, so sustained contention cannot grow the call stack.
//!
//! ## Guarantees
//!
//! Every enqueued action executes exactly once; actions enqueued before a
//! cycle's buffer swap execute in that cycle in enqueue order; at most one
//! cycle per queue runs at a time. A panicking action is logged and does
//! not stop the remaining actions in its cycle.

use std::collections::VecDeque;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::dispatch::{Task, TickPhase, TickScheduler};

/// Where a queue's execute cycle runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Synchronously in whichever thread triggered the flush
    Immediate,
    /// Early tick on the owning thread
    Update,
    /// Late tick on the owning thread
    LateUpdate,
    /// Unordered background worker domain
    Background,
}

/// Two symmetric task buffers with an atomically flipping write side
///
/// Shared primitive behind [`CommandQueue`] and the per-phase queues of
/// [`crate::dispatch::FrameDispatcher`].
pub(crate) struct GenerationBuffers {
    queues: [VecDeque<Task>; 2],
    write_index: usize,
}

impl GenerationBuffers {
    pub(crate) fn new() -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new()],
            write_index: 0,
        }
    }

    /// Append to the current write buffer
    pub(crate) fn push(&mut self, task: Task) {
        self.queues[self.write_index].push_back(task);
    }

    /// Flip the write side and take the previous write buffer for draining
    pub(crate) fn swap_take(&mut self) -> VecDeque<Task> {
        self.write_index = 1 - self.write_index;
        mem::take(&mut self.queues[1 - self.write_index])
    }
}

struct FlushState {
    is_flushing: bool,
    flush_requested: bool,
}

/// Double-buffered action queue with coalesced, self-scheduling flushes
///
/// Shared across threads through an `Arc`; `enqueue` and `flush` take
/// `&Arc<Self>` so scheduled cycles can keep the queue alive while they
/// run in another dispatch domain.
pub struct CommandQueue {
    generations: Mutex<GenerationBuffers>,
    flush_state: Mutex<FlushState>,
    mode: FlushMode,
    scheduler: Option<Arc<dyn TickScheduler>>,
    after_execute: Option<Box<dyn Fn() + Send + Sync>>,
    auto_flush: bool,
}

impl CommandQueue {
    /// Create a queue whose cycles run synchronously in the flushing caller
    pub fn immediate() -> Self {
        Self {
            generations: Mutex::new(GenerationBuffers::new()),
            flush_state: Mutex::new(FlushState {
                is_flushing: false,
                flush_requested: false,
            }),
            mode: FlushMode::Immediate,
            scheduler: None,
            after_execute: None,
            auto_flush: false,
        }
    }

    /// Create a queue whose cycles are handed to a dispatch domain of
    /// `scheduler`
    pub fn scheduled(mode: FlushMode, scheduler: Arc<dyn TickScheduler>) -> Self {
        Self {
            scheduler: Some(scheduler),
            mode,
            ..Self::immediate()
        }
    }

    /// Run `hook` at the end of every execute cycle, after the drained
    /// actions and before the coalescing check
    pub fn with_after_execute(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_execute = Some(Box::new(hook));
        self
    }

    /// Make every `enqueue` immediately attempt a flush
    ///
    /// Gives at-least-one-flush-per-enqueue-burst behavior; the coalescing
    /// guarantee is unchanged.
    pub fn auto_flush(mut self) -> Self {
        self.auto_flush = true;
        self
    }

    /// Append an action to the current write buffer
    ///
    /// Never executes anything itself unless the queue was built with
    /// [`auto_flush`](Self::auto_flush).
    pub fn enqueue(self: &Arc<Self>, task: Task) {
        self.generations.lock().unwrap().push(task);

        if self.auto_flush {
            self.flush();
        }
    }

    /// Request a flush cycle
    ///
    /// If no cycle is in progress one is started (inline or dispatched,
    /// per the queue's [`FlushMode`]). If a cycle is already executing the
    /// request is coalesced into exactly one follow-up cycle.
    pub fn flush(self: &Arc<Self>) {
        if self.try_begin_flush() {
            self.dispatch_cycle();
        }
    }

    /// Attempt the `Idle -> Flushing` transition
    fn try_begin_flush(&self) -> bool {
        let mut state = self.flush_state.lock().unwrap();
        if state.is_flushing {
            state.flush_requested = true;
            false
        } else {
            state.is_flushing = true;
            true
        }
    }

    /// Hand the execute cycle to the configured dispatch domain
    fn dispatch_cycle(self: &Arc<Self>) {
        let phase = match self.mode {
            FlushMode::Immediate => {
                self.run_cycle();
                return;
            }
            FlushMode::Update => TickPhase::Update,
            FlushMode::LateUpdate => TickPhase::LateUpdate,
            FlushMode::Background => {
                let queue = Arc::clone(self);
                self.scheduler_ref()
                    .schedule_background(Box::new(move || queue.run_cycle()));
                return;
            }
        };

        let queue = Arc::clone(self);
        self.scheduler_ref()
            .schedule(phase, Box::new(move || queue.run_cycle()));
    }

    fn scheduler_ref(&self) -> &Arc<dyn TickScheduler> {
        match &self.scheduler {
            Some(scheduler) => scheduler,
            None => unreachable!("scheduled queue constructed without a scheduler"),
        }
    }

    /// Execute cycles until no flush request is pending
    ///
    /// Entered only by the thread that won the `Idle -> Flushing`
    /// transition, so at most one cycle per queue runs at a time.
    fn run_cycle(&self) {
        loop {
            let mut batch = self.generations.lock().unwrap().swap_take();
            log::debug!("command queue cycle draining {} actions", batch.len());

            for task in batch.drain(..) {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    log::error!("queued action panicked; continuing cycle");
                }
            }

            if let Some(hook) = &self.after_execute {
                hook();
            }

            let mut state = self.flush_state.lock().unwrap();
            if state.flush_requested {
                // coalesced follow-up: loop instead of re-dispatching
                state.flush_requested = false;
            } else {
                state.is_flushing = false;
                return;
            }
        }
    }
}
