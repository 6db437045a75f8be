//! End-to-end pool behavior across threads: owning-thread allocation hops,
//! TTL eviction dispatch, and handle reuse through the full stack.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use render_pool::prelude::*;

/// Minimal stand-in for a device allocation with thread-affine teardown
struct DeviceBuffer {
    desc: StorageBufferDescriptor,
    handle: Mutex<Option<u64>>,
}

impl DeviceBuffer {
    fn new(desc: StorageBufferDescriptor, handle: u64) -> Self {
        Self {
            desc,
            handle: Mutex::new(Some(handle)),
        }
    }
}

impl PooledBuffer for DeviceBuffer {
    type Descriptor = StorageBufferDescriptor;

    fn descriptor(&self) -> &StorageBufferDescriptor {
        &self.desc
    }

    fn release(&self) {
        self.handle.lock().unwrap().take();
    }

    fn is_released(&self) -> bool {
        self.handle.lock().unwrap().is_none()
    }
}

struct Harness {
    dispatcher: Arc<FrameDispatcher>,
    pool: StorageBufferPool<DeviceBuffer>,
    allocations: Arc<AtomicUsize>,
    factory_threads: Arc<Mutex<Vec<thread::ThreadId>>>,
}

fn harness(ttl: Duration) -> Harness {
    let dispatcher = Arc::new(FrameDispatcher::new());
    let allocations = Arc::new(AtomicUsize::new(0));
    let factory_threads = Arc::new(Mutex::new(Vec::new()));

    let params = StoragePoolParams {
        batch: BatchParams::batched(16, 8),
        stride: 16,
        usage: BufferUsage::STORAGE,
        ttl,
    };

    let alloc_probe = Arc::clone(&allocations);
    let thread_probe = Arc::clone(&factory_threads);
    let factory = move |desc: &StorageBufferDescriptor| {
        let handle = alloc_probe.fetch_add(1, Ordering::SeqCst) as u64;
        thread_probe.lock().unwrap().push(thread::current().id());
        Ok(DeviceBuffer::new(*desc, handle))
    };

    let pool = StorageBufferPool::new(
        params,
        Arc::new(factory),
        Arc::clone(&dispatcher) as Arc<dyn TickScheduler>,
    );

    Harness {
        dispatcher,
        pool,
        allocations,
        factory_threads,
    }
}

#[test]
fn test_off_thread_rent_allocates_on_owning_thread() {
    let h = harness(Duration::ZERO);
    let pool = Arc::new(h.pool);

    let renter_pool = Arc::clone(&pool);
    let renter = thread::spawn(move || renter_pool.rent(20));

    // the renter is parked on the hop until the owning thread ticks
    while !renter.is_finished() {
        h.dispatcher.pump_late_update();
        thread::sleep(Duration::from_millis(1));
    }

    let buffer = renter.join().unwrap().unwrap();
    assert_eq!(buffer.descriptor().count, 24);
    assert!(pool.is_rented(&buffer));

    let owning = thread::current().id();
    assert_eq!(*h.factory_threads.lock().unwrap(), vec![owning]);
}

#[test]
fn test_rent_return_rent_reuses_without_allocating() {
    let h = harness(Duration::ZERO);

    let buffer = h.pool.rent(20).unwrap();
    assert!(h.pool.try_return(&buffer));

    // 17 brackets to the same 24-element shape
    let again = h.pool.rent(17).unwrap();
    assert_eq!(h.allocations.load(Ordering::SeqCst), 1);
    assert!(h.pool.is_rented(&again));
    assert!(!buffer.is_released());
}

#[test]
fn test_ttl_eviction_releases_on_late_tick() {
    let h = harness(Duration::from_millis(40));

    let buffer = h.pool.rent(16).unwrap();
    assert!(h.pool.try_return(&buffer));

    // the sweeper removes the entry and schedules its release onto the
    // owning thread's late tick; nothing is released until we pump
    let deadline = Instant::now() + Duration::from_secs(5);
    while !buffer.is_released() && Instant::now() < deadline {
        h.dispatcher.pump_late_update();
        thread::sleep(Duration::from_millis(5));
    }

    assert!(buffer.is_released());
    assert!(!h.pool.is_registered(&buffer));
}

#[test]
fn test_resident_buffer_is_not_evicted_while_rented() {
    let h = harness(Duration::from_millis(40));

    let buffer = h.pool.rent(16).unwrap();

    // rented buffers are absent from the buckets; sweeps cannot touch them
    thread::sleep(Duration::from_millis(100));
    h.pool.engine().sweep_expired(Instant::now());
    h.dispatcher.pump_late_update();

    assert!(!buffer.is_released());
    assert!(h.pool.is_rented(&buffer));
}

#[test]
fn test_concurrent_renters_never_share_a_buffer() {
    let h = harness(Duration::ZERO);
    let pool = Arc::new(h.pool);

    let mut renters = Vec::new();
    for _ in 0..4 {
        let pool = Arc::clone(&pool);
        renters.push(thread::spawn(move || {
            let mut keys = Vec::new();
            for _ in 0..50 {
                let buffer = pool.rent(16).unwrap();
                keys.push(Arc::as_ptr(&buffer) as usize);
                assert!(pool.try_return(&buffer));
            }
            keys
        }));
    }

    let mut done = false;
    while !done {
        h.dispatcher.pump_late_update();
        done = renters.iter().all(thread::JoinHandle::is_finished);
        thread::sleep(Duration::from_millis(1));
    }
    for renter in renters {
        renter.join().unwrap();
    }

    // every buffer the factory made is accounted for exactly once
    let allocated = h.allocations.load(Ordering::SeqCst);
    assert!(allocated >= 1);
    assert_eq!(pool.engine().free_count() + pool.engine().rented_count(), allocated);
}
