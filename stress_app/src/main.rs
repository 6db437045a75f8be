//! Pool stress demo
//!
//! Drives the buffer pools and command queue the way a renderer would:
//! a main thread pumping frame ticks while worker threads rent, write,
//! and return buffers and push mutations through an auto-flushing queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use render_pool::prelude::*;

const WORKER_COUNT: usize = 4;
const FRAME_COUNT: usize = 300;
const FRAME_TIME: Duration = Duration::from_millis(8);

/// Stand-in for a GPU allocation; holds plain bytes but keeps the
/// thread-affine create/release shape of a real device buffer
struct SimDeviceBuffer {
    desc: StorageBufferDescriptor,
    storage: Mutex<Option<Vec<u8>>>,
}

impl SimDeviceBuffer {
    fn new(desc: StorageBufferDescriptor) -> Self {
        let bytes = desc.size_bytes() as usize;
        Self {
            desc,
            storage: Mutex::new(Some(vec![0u8; bytes])),
        }
    }
}

impl PooledBuffer for SimDeviceBuffer {
    type Descriptor = StorageBufferDescriptor;

    fn descriptor(&self) -> &StorageBufferDescriptor {
        &self.desc
    }

    fn release(&self) {
        self.storage.lock().unwrap().take();
    }

    fn is_released(&self) -> bool {
        self.storage.lock().unwrap().is_none()
    }
}

struct StressApp {
    dispatcher: Arc<FrameDispatcher>,
    storage_pool: Arc<StorageBufferPool<SimDeviceBuffer>>,
    host_pool: Arc<HostArrayPool<f32>>,
    queue: Arc<CommandQueue>,
    allocations: Arc<AtomicUsize>,
}

impl StressApp {
    fn new() -> Self {
        log::info!("Creating pool stress application...");

        // the main thread owns the dispatcher; device work lands here
        let dispatcher = Arc::new(FrameDispatcher::with_workers(2));

        let settings = StoragePoolSettings {
            pool: PoolSettings {
                mode: BufferMode::Batched,
                base_size: 64,
                batch_size: 32,
                ttl_seconds: 1,
            },
            stride: 16,
        };
        if let Err(e) = settings.validate() {
            panic!("bad built-in settings: {e}");
        }

        let allocations = Arc::new(AtomicUsize::new(0));
        let alloc_probe = Arc::clone(&allocations);
        let factory = move |desc: &StorageBufferDescriptor| {
            alloc_probe.fetch_add(1, Ordering::SeqCst);
            log::debug!("device alloc: {} x {} bytes", desc.count, desc.stride);
            Ok(SimDeviceBuffer::new(*desc))
        };

        let storage_pool = Arc::new(StorageBufferPool::new(
            settings.storage_params(BufferUsage::STORAGE | BufferUsage::COPY_DST),
            Arc::new(factory),
            Arc::clone(&dispatcher) as Arc<dyn TickScheduler>,
        ));

        let host_pool = Arc::new(HostArrayPool::new(settings.pool.host_params()));

        let queue = Arc::new(
            CommandQueue::scheduled(
                FlushMode::Update,
                Arc::clone(&dispatcher) as Arc<dyn TickScheduler>,
            )
            .auto_flush(),
        );

        log::info!(
            "Pools ready (base {}, batch {}, ttl {}s)",
            settings.pool.base_size,
            settings.pool.batch_size,
            settings.pool.ttl_seconds
        );

        Self {
            dispatcher,
            storage_pool,
            host_pool,
            queue,
            allocations,
        }
    }

    fn spawn_workers(&self, stop: &Arc<AtomicBool>) -> Vec<thread::JoinHandle<usize>> {
        let commands_run = Arc::new(AtomicUsize::new(0));

        (0..WORKER_COUNT)
            .map(|i| {
                let storage_pool = Arc::clone(&self.storage_pool);
                let host_pool = Arc::clone(&self.host_pool);
                let queue = Arc::clone(&self.queue);
                let stop = Arc::clone(stop);
                let commands_run = Arc::clone(&commands_run);

                thread::Builder::new()
                    .name(format!("stress-worker-{i}"))
                    .spawn(move || {
                        let mut rng = rand::thread_rng();
                        let mut rents = 0usize;

                        while !stop.load(Ordering::SeqCst) {
                            let count = rng.gen_range(1..=256);

                            // staging data on the host side
                            let staging = match host_pool.rent(count) {
                                Ok(buffer) => buffer,
                                Err(e) => {
                                    log::error!("host rent failed: {e}");
                                    break;
                                }
                            };
                            staging.write(&vec![0.5f32; count as usize]);

                            // device buffer rent blocks on the main thread tick
                            let device = match storage_pool.rent(count) {
                                Ok(buffer) => buffer,
                                Err(e) => {
                                    log::error!("device rent failed: {e}");
                                    break;
                                }
                            };
                            rents += 1;

                            // simulated upload command against shared state
                            let probe = Arc::clone(&commands_run);
                            queue.enqueue(Box::new(move || {
                                probe.fetch_add(1, Ordering::SeqCst);
                            }));

                            if !storage_pool.try_return(&device) {
                                log::warn!("device buffer refused by pool; releasing");
                                device.release();
                            }
                            if !host_pool.try_return(&staging) {
                                staging.release();
                            }

                            thread::sleep(Duration::from_micros(rng.gen_range(50..500)));
                        }
                        rents
                    })
                    .expect("failed to spawn stress worker")
            })
            .collect()
    }

    fn run(&self) {
        let stop = Arc::new(AtomicBool::new(false));
        let workers = self.spawn_workers(&stop);
        let started = Instant::now();

        log::info!("Running {FRAME_COUNT} frames with {WORKER_COUNT} workers...");
        for frame in 0..FRAME_COUNT {
            self.dispatcher.pump_update();
            self.dispatcher.pump_late_update();

            if frame % 60 == 0 {
                log::info!(
                    "frame {frame}: {} device allocations, {} free / {} rented",
                    self.allocations.load(Ordering::SeqCst),
                    self.storage_pool.engine().free_count(),
                    self.storage_pool.engine().rented_count(),
                );
            }
            thread::sleep(FRAME_TIME);
        }

        stop.store(true, Ordering::SeqCst);
        let total_rents: usize = workers
            .into_iter()
            .map(|w| {
                // workers may be parked on a rent hop; keep ticking until done
                loop {
                    if w.is_finished() {
                        break w.join().unwrap_or(0);
                    }
                    self.dispatcher.pump_late_update();
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .sum();

        self.queue.flush();
        self.dispatcher.pump_update();

        log::info!(
            "Done in {:.2?}: {total_rents} rents served by {} allocations",
            started.elapsed(),
            self.allocations.load(Ordering::SeqCst),
        );

        self.storage_pool.dispose();
        self.host_pool.dispose();
        self.dispatcher.pump_late_update();
    }
}

fn main() {
    render_pool::foundation::logging::init();
    log::info!("Starting pool stress demo");

    let app = StressApp::new();
    app.run();

    log::info!("Pool stress demo finished");
}
