//! # Buffer Pool Engine
//!
//! Generic pooling for expensive, externally-allocated buffers. The engine
//! tracks free versus reserved buffers, buckets free buffers by descriptor,
//! serves rent/return traffic from any thread, and reclaims buffers idle
//! past a time-to-live on a background sweeper.
//!
//! ## Invariants
//!
//! - A buffer is a member of exactly one of {free buckets, reserved set}
//!   at any instant.
//! - Bucket and reserved-set mutation happens under one mutex per pool,
//!   held only for the bookkeeping step — never across a factory call or a
//!   buffer release.
//! - Free buckets are served last-in-first-out, favoring driver and cache
//!   warmth of recently-used allocations.
//!
//! Two threads that miss concurrently for the same descriptor may both
//! allocate; the surplus buffer is simply pooled on return. This transient
//! over-provisioning is accepted in exchange for never blocking a renter
//! on another renter's factory call.

use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::buffer::{BufferKey, PooledBuffer};
use crate::dispatch::{DispatchError, TickPhase, TickScheduler};

pub mod host;
pub mod storage;

pub use host::{HostArrayPool, HostPoolParams};
pub use storage::{StorageBufferPool, StoragePoolParams};

/// Error produced by a buffer factory
pub type AllocError = Box<dyn Error + Send + Sync>;

/// Errors from pool operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// Requested element count was zero
    #[error("requested element count must be greater than zero")]
    InvalidCount,
    /// The injected factory failed to produce a buffer
    #[error("buffer allocation failed: {0}")]
    Allocation(#[from] AllocError),
    /// The pool has been disposed and is terminal
    #[error("pool has been disposed")]
    Disposed,
    /// The owning-thread hop for a thread-affine allocation failed
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Produces buffers for pool misses
///
/// Implemented for any matching `Fn` closure. Factories may be called from
/// the renting thread or, for thread-affine buffer kinds, from the owning
/// thread after a dispatch hop — the pool never holds its lock across the
/// call.
pub trait BufferFactory<B: PooledBuffer>: Send + Sync + 'static {
    /// Allocate a new buffer of exactly the given shape
    fn create(&self, desc: &B::Descriptor) -> Result<B, AllocError>;
}

impl<B, F> BufferFactory<B> for F
where
    B: PooledBuffer,
    F: Fn(&B::Descriptor) -> Result<B, AllocError> + Send + Sync + 'static,
{
    fn create(&self, desc: &B::Descriptor) -> Result<B, AllocError> {
        self(desc)
    }
}

/// A free buffer together with the instant it was last returned
struct PoolEntry<B> {
    buffer: Arc<B>,
    last_used: Instant,
}

/// Bookkeeping guarded by the pool mutex
struct PoolState<B: PooledBuffer> {
    /// Free buffers bucketed by descriptor; vector end is the LIFO top
    free_buckets: HashMap<B::Descriptor, Vec<PoolEntry<B>>>,
    /// Identity keys of every free buffer, for O(1) double-return checks
    free_keys: HashSet<BufferKey>,
    /// Buffers currently rented out
    reserved: HashMap<BufferKey, Arc<B>>,
    /// Terminal flag; set once by `dispose`
    disposed: bool,
    /// Dropping this stops the sweeper thread
    sweeper_stop: Option<Sender<()>>,
}

/// Generic pooling engine over one buffer kind
///
/// Constructed behind an `Arc` so the TTL sweeper can hold a weak
/// reference; dropping the last strong reference disposes the pool.
pub struct BufferPool<B: PooledBuffer> {
    state: Mutex<PoolState<B>>,
    ttl: Duration,
    scheduler: Option<Arc<dyn TickScheduler>>,
}

impl<B: PooledBuffer> BufferPool<B> {
    /// Create a pool
    ///
    /// A zero `ttl` disables eviction entirely. When a scheduler is given,
    /// evicted and disposed buffers are released on the owning thread's
    /// late tick; without one they are released inline (host-memory
    /// buffers have no owning thread).
    pub fn new(ttl: Duration, scheduler: Option<Arc<dyn TickScheduler>>) -> Arc<Self> {
        let pool = Arc::new(Self {
            state: Mutex::new(PoolState {
                free_buckets: HashMap::new(),
                free_keys: HashSet::new(),
                reserved: HashMap::new(),
                disposed: false,
                sweeper_stop: None,
            }),
            ttl,
            scheduler,
        });

        if !ttl.is_zero() {
            let (stop_tx, stop_rx) = channel::bounded::<()>(0);
            pool.state.lock().unwrap().sweeper_stop = Some(stop_tx);

            let weak = Arc::downgrade(&pool);
            thread::Builder::new()
                .name("buffer-pool-sweeper".into())
                .spawn(move || sweeper_loop(&weak, ttl, &stop_rx))
                .expect("failed to spawn pool sweeper thread");
        }

        log::info!("buffer pool created (ttl {ttl:?})");
        pool
    }

    /// Rent a buffer of exactly `desc`, allocating through `allocate` on a
    /// bucket miss
    ///
    /// The allocation runs outside the pool lock; see the module docs for
    /// the resulting concurrent-miss behavior. A factory failure leaves
    /// the pool untouched — the failed buffer is never registered.
    pub fn rent_with<F>(&self, desc: &B::Descriptor, allocate: F) -> Result<Arc<B>, PoolError>
    where
        F: FnOnce(&B::Descriptor) -> Result<B, PoolError>,
    {
        {
            let mut state = self.state.lock().unwrap();
            if state.disposed {
                return Err(PoolError::Disposed);
            }

            if let Some(bucket) = state.free_buckets.get_mut(desc) {
                if let Some(entry) = bucket.pop() {
                    if bucket.is_empty() {
                        state.free_buckets.remove(desc);
                    }
                    let key = BufferKey::of(&entry.buffer);
                    state.free_keys.remove(&key);
                    state.reserved.insert(key, Arc::clone(&entry.buffer));
                    log::debug!("pool hit for {desc:?}");
                    return Ok(entry.buffer);
                }
            }
        }

        log::debug!("pool miss for {desc:?}, allocating");
        let buffer = Arc::new(allocate(desc)?);

        let mut state = self.state.lock().unwrap();
        if state.disposed {
            // the pool went terminal while we were allocating
            drop(state);
            self.release_buffer(&buffer);
            return Err(PoolError::Disposed);
        }
        state
            .reserved
            .insert(BufferKey::of(&buffer), Arc::clone(&buffer));
        Ok(buffer)
    }

    /// Move a rented buffer back into its descriptor's free bucket
    ///
    /// Returns `false` if the buffer is already free (double return) or the
    /// pool is terminal; the caller keeps ownership in that case.
    /// Compatibility with pool parameters is the front-end's concern and
    /// must be checked before calling this.
    pub fn return_buffer(&self, buffer: &Arc<B>) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.disposed {
            return false;
        }

        let key = BufferKey::of(buffer);
        if state.free_keys.contains(&key) {
            log::warn!("double return of {:?} ignored", buffer.descriptor());
            return false;
        }

        state.reserved.remove(&key);
        state.free_keys.insert(key);
        state
            .free_buckets
            .entry(buffer.descriptor().clone())
            .or_default()
            .push(PoolEntry {
                buffer: Arc::clone(buffer),
                last_used: Instant::now(),
            });
        true
    }

    /// Whether the buffer is currently rented from this pool
    pub fn is_rented(&self, buffer: &Arc<B>) -> bool {
        self.state
            .lock()
            .unwrap()
            .reserved
            .contains_key(&BufferKey::of(buffer))
    }

    /// Whether the buffer is tracked by this pool at all, free or rented
    pub fn is_registered(&self, buffer: &Arc<B>) -> bool {
        let state = self.state.lock().unwrap();
        let key = BufferKey::of(buffer);
        state.reserved.contains_key(&key) || state.free_keys.contains(&key)
    }

    /// Number of free buffers across all buckets
    pub fn free_count(&self) -> usize {
        self.state.lock().unwrap().free_keys.len()
    }

    /// Number of buffers currently rented out
    pub fn rented_count(&self) -> usize {
        self.state.lock().unwrap().reserved.len()
    }

    /// Release every tracked buffer and make the pool terminal
    ///
    /// Idempotent. Subsequent `rent_with` calls fail with
    /// [`PoolError::Disposed`]; subsequent returns are refused.
    pub fn dispose(&self) {
        let doomed: Vec<Arc<B>> = {
            let mut guard = self.state.lock().unwrap();
            if guard.disposed {
                return;
            }
            let state = &mut *guard;
            state.disposed = true;
            state.sweeper_stop.take();
            state.free_keys.clear();

            state
                .free_buckets
                .drain()
                .flat_map(|(_, bucket)| bucket.into_iter().map(|entry| entry.buffer))
                .chain(state.reserved.drain().map(|(_, buffer)| buffer))
                .collect()
        };

        log::info!("disposing buffer pool, releasing {} buffers", doomed.len());
        for buffer in &doomed {
            self.release_buffer(buffer);
        }
    }

    /// Run one eviction pass as of `now`
    ///
    /// Every free entry idle longer than the TTL is removed from its bucket
    /// and released; younger entries keep their LIFO order. Buffers rented
    /// during the pass are absent from the buckets and unaffected. The
    /// background sweeper calls this once per TTL period; tests may call it
    /// directly.
    pub fn sweep_expired(&self, now: Instant) {
        let expired: Vec<Arc<B>> = {
            let mut guard = self.state.lock().unwrap();
            if guard.disposed {
                return;
            }
            let state = &mut *guard;

            let mut expired = Vec::new();
            let ttl = self.ttl;
            let free_keys = &mut state.free_keys;
            for bucket in state.free_buckets.values_mut() {
                bucket.retain(|entry| {
                    if now.duration_since(entry.last_used) > ttl {
                        free_keys.remove(&BufferKey::of(&entry.buffer));
                        expired.push(Arc::clone(&entry.buffer));
                        false
                    } else {
                        true
                    }
                });
            }
            state.free_buckets.retain(|_, bucket| !bucket.is_empty());
            expired
        };

        if expired.is_empty() {
            return;
        }

        log::debug!("evicting {} idle buffers", expired.len());
        for buffer in &expired {
            self.release_buffer(buffer);
        }
    }

    /// Release a buffer on the owning thread when one is designated,
    /// inline otherwise; never called while holding the pool lock
    fn release_buffer(&self, buffer: &Arc<B>) {
        match &self.scheduler {
            Some(scheduler) => {
                let buffer = Arc::clone(buffer);
                scheduler.schedule(TickPhase::LateUpdate, Box::new(move || buffer.release()));
            }
            None => buffer.release(),
        }
    }
}

impl<B: PooledBuffer> Drop for BufferPool<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Periodic eviction driver; exits when the pool is dropped or disposed
fn sweeper_loop<B: PooledBuffer>(
    pool: &Weak<BufferPool<B>>,
    period: Duration,
    stop: &channel::Receiver<()>,
) {
    loop {
        match stop.recv_timeout(period) {
            Err(RecvTimeoutError::Timeout) => match pool.upgrade() {
                Some(pool) => pool.sweep_expired(Instant::now()),
                None => return,
            },
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{HostArrayBuffer, HostArrayDescriptor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestPool = Arc<BufferPool<HostArrayBuffer<u32>>>;

    fn desc(count: u32) -> HostArrayDescriptor {
        HostArrayDescriptor { count }
    }

    fn counting_rent(
        pool: &TestPool,
        count: u32,
        allocations: &Arc<AtomicUsize>,
    ) -> Arc<HostArrayBuffer<u32>> {
        let allocations = Arc::clone(allocations);
        pool.rent_with(&desc(count), move |d| {
            allocations.fetch_add(1, Ordering::SeqCst);
            Ok(HostArrayBuffer::new(*d))
        })
        .unwrap()
    }

    #[test]
    fn test_rent_return_rent_reuses_handle() {
        let pool: TestPool = BufferPool::new(Duration::ZERO, None);
        let allocations = Arc::new(AtomicUsize::new(0));

        let first = counting_rent(&pool, 16, &allocations);
        let first_key = BufferKey::of(&first);
        assert!(pool.return_buffer(&first));
        drop(first);

        let second = counting_rent(&pool, 16, &allocations);
        assert_eq!(BufferKey::of(&second), first_key);
        assert_eq!(allocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lifo_reuse_prefers_most_recently_freed() {
        let pool: TestPool = BufferPool::new(Duration::ZERO, None);
        let allocations = Arc::new(AtomicUsize::new(0));

        let a = counting_rent(&pool, 8, &allocations);
        let b = counting_rent(&pool, 8, &allocations);
        let b_key = BufferKey::of(&b);

        assert!(pool.return_buffer(&a));
        assert!(pool.return_buffer(&b));

        // b was freed last, so it is rented first
        let next = counting_rent(&pool, 8, &allocations);
        assert_eq!(BufferKey::of(&next), b_key);
        assert_eq!(allocations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_membership_moves_between_sets() {
        let pool: TestPool = BufferPool::new(Duration::ZERO, None);
        let buffer = pool
            .rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();

        assert!(pool.is_rented(&buffer));
        assert!(pool.is_registered(&buffer));

        assert!(pool.return_buffer(&buffer));
        assert!(!pool.is_rented(&buffer));
        assert!(pool.is_registered(&buffer));
    }

    #[test]
    fn test_double_return_is_refused() {
        let pool: TestPool = BufferPool::new(Duration::ZERO, None);
        let buffer = pool
            .rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();

        assert!(pool.return_buffer(&buffer));
        assert!(!pool.return_buffer(&buffer));
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_factory_failure_registers_nothing() {
        let pool: TestPool = BufferPool::new(Duration::ZERO, None);
        let result = pool.rent_with(&desc(4), |_| {
            Err(PoolError::Allocation("out of device memory".into()))
        });

        assert!(matches!(result, Err(PoolError::Allocation(_))));
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.rented_count(), 0);
    }

    #[test]
    fn test_dispose_releases_everything_and_is_terminal() {
        let pool: TestPool = BufferPool::new(Duration::ZERO, None);
        let rented = pool
            .rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();
        let freed = pool
            .rent_with(&desc(8), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();
        assert!(pool.return_buffer(&freed));

        pool.dispose();
        assert!(rented.is_released());
        assert!(freed.is_released());
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.rented_count(), 0);

        // terminal: rents are rejected, second dispose is a no-op
        assert!(matches!(
            pool.rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d))),
            Err(PoolError::Disposed)
        ));
        pool.dispose();
    }

    #[test]
    fn test_sweep_evicts_only_entries_past_ttl() {
        let ttl = Duration::from_millis(50);
        let pool: TestPool = BufferPool::new(ttl, None);
        let old = pool
            .rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();
        let young = pool
            .rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();

        assert!(pool.return_buffer(&old));
        std::thread::sleep(Duration::from_millis(60));
        assert!(pool.return_buffer(&young));

        pool.sweep_expired(Instant::now());
        assert!(old.is_released());
        assert!(!young.is_released());
        assert_eq!(pool.free_count(), 1);
        assert!(pool.is_registered(&young));
        assert!(!pool.is_registered(&old));
    }

    #[test]
    fn test_rerented_buffer_survives_sweep() {
        let ttl = Duration::from_millis(50);
        let pool: TestPool = BufferPool::new(ttl, None);

        let buffer = pool
            .rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();
        assert!(pool.return_buffer(&buffer));
        std::thread::sleep(Duration::from_millis(30));

        // re-rent and re-return refreshes the idle clock
        let again = pool
            .rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();
        assert_eq!(BufferKey::of(&again), BufferKey::of(&buffer));
        assert!(pool.return_buffer(&again));
        std::thread::sleep(Duration::from_millis(30));

        // total age is past the ttl, age since last return is not
        pool.sweep_expired(Instant::now());
        assert!(!buffer.is_released());
        assert!(pool.is_registered(&buffer));
    }

    #[test]
    fn test_background_sweeper_evicts_idle_buffers() {
        let pool: TestPool = BufferPool::new(Duration::from_millis(20), None);
        let buffer = pool
            .rent_with(&desc(4), |d| Ok(HostArrayBuffer::new(*d)))
            .unwrap();
        assert!(pool.return_buffer(&buffer));

        // the sweeper runs every 20ms; give it a few periods
        let deadline = Instant::now() + Duration::from_secs(5);
        while !buffer.is_released() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(buffer.is_released());
        assert_eq!(pool.free_count(), 0);
    }
}
