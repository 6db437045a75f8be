//! Frame-driven reference dispatcher
//!
//! Owns the identity of the thread that creates it and two double-buffered
//! per-phase task queues which that thread pumps once per frame, plus a
//! pool of background worker threads fed over a channel. This is the
//! scheduler the pools and command queues are wired to in an application;
//! tests drive the pumps by hand instead of running a frame loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Sender};

use super::{Task, TickPhase, TickScheduler};
use crate::queue::GenerationBuffers;

/// Reference [`TickScheduler`] driven by a per-frame tick
///
/// Must be created on the owning thread; `pump_update` and
/// `pump_late_update` must be called from that same thread, typically once
/// per frame each. Worker threads shut down when the dispatcher is
/// dropped; tasks still queued for a tick phase at that point are dropped
/// unexecuted.
pub struct FrameDispatcher {
    owner: ThreadId,
    update: Mutex<GenerationBuffers>,
    late_update: Mutex<GenerationBuffers>,
    worker_tx: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl FrameDispatcher {
    /// Create a dispatcher owned by the calling thread, with one
    /// background worker
    pub fn new() -> Self {
        Self::with_workers(1)
    }

    /// Create a dispatcher owned by the calling thread, with
    /// `worker_count` background workers
    pub fn with_workers(worker_count: usize) -> Self {
        let (worker_tx, worker_rx) = channel::unbounded::<Task>();

        let workers = (0..worker_count)
            .map(|index| {
                let rx = worker_rx.clone();
                thread::Builder::new()
                    .name(format!("pool-worker-{index}"))
                    .spawn(move || {
                        while let Ok(task) = rx.recv() {
                            run_task(task, "background");
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        log::info!(
            "frame dispatcher created on {:?} with {} worker(s)",
            thread::current().id(),
            worker_count
        );

        Self {
            owner: thread::current().id(),
            update: Mutex::new(GenerationBuffers::new()),
            late_update: Mutex::new(GenerationBuffers::new()),
            worker_tx: Some(worker_tx),
            workers,
        }
    }

    /// Run every task queued for the early tick; owning thread only
    pub fn pump_update(&self) {
        self.pump(TickPhase::Update);
    }

    /// Run every task queued for the late tick; owning thread only
    pub fn pump_late_update(&self) {
        self.pump(TickPhase::LateUpdate);
    }

    fn pump(&self, phase: TickPhase) {
        assert!(
            self.is_owning_thread(),
            "tick pumps must run on the thread that created the dispatcher"
        );

        // the swap happens under the lock; the drain does not, so tasks
        // scheduled by a running task land in the next frame's buffer
        let mut batch = self.phase_queue(phase).lock().unwrap().swap_take();
        for task in batch.drain(..) {
            run_task(task, "tick");
        }
    }

    fn phase_queue(&self, phase: TickPhase) -> &Mutex<GenerationBuffers> {
        match phase {
            TickPhase::Update => &self.update,
            TickPhase::LateUpdate => &self.late_update,
        }
    }
}

impl Default for FrameDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TickScheduler for FrameDispatcher {
    fn schedule(&self, phase: TickPhase, task: Task) {
        self.phase_queue(phase).lock().unwrap().push(task);
    }

    fn schedule_background(&self, task: Task) {
        let Some(tx) = &self.worker_tx else {
            log::error!("background task dropped: worker channel closed");
            return;
        };
        if tx.send(task).is_err() {
            log::error!("background task dropped: all workers exited");
        }
    }

    fn is_owning_thread(&self) -> bool {
        thread::current().id() == self.owner
    }
}

impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        // closing the channel lets the workers drain and exit
        self.worker_tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread terminated by panic");
            }
        }
    }
}

/// Run a dispatched task, isolating panics from the caller's loop
fn run_task(task: Task, domain: &str) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        log::error!("dispatched {domain} task panicked");
    }
}
