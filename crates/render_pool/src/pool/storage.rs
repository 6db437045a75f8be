//! Device storage buffer pool
//!
//! Front-end over the generic [`BufferPool`] engine for thread-affine
//! device buffers. Requested counts are clamped and quantized by the
//! pool's sizing policy; the rest of the descriptor (stride, usage) is
//! fixed per pool, so every bucket holds interchangeable buffers.
//! Allocation hops to the owning thread when the renter is elsewhere.

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::{BufferUsage, PooledBuffer, StorageBufferDescriptor};
use crate::dispatch::{run_on_owning_thread, TickScheduler};
use crate::sizing::BatchParams;

use super::{BufferFactory, BufferPool, PoolError};

/// Fixed parameters of a storage buffer pool
#[derive(Debug, Clone, Copy)]
pub struct StoragePoolParams {
    /// Sizing policy
    pub batch: BatchParams,
    /// Element stride in bytes, shared by every buffer in the pool
    pub stride: u32,
    /// Device usage flags, shared by every buffer in the pool
    pub usage: BufferUsage,
    /// Idle time after which free buffers are evicted; zero disables
    pub ttl: Duration,
}

/// Pool of device storage buffers of one stride and usage
pub struct StorageBufferPool<B>
where
    B: PooledBuffer<Descriptor = StorageBufferDescriptor>,
{
    params: StoragePoolParams,
    factory: Arc<dyn BufferFactory<B>>,
    scheduler: Arc<dyn TickScheduler>,
    pool: Arc<BufferPool<B>>,
}

impl<B> StorageBufferPool<B>
where
    B: PooledBuffer<Descriptor = StorageBufferDescriptor>,
{
    /// Create a pool backed by `factory` for allocation and `scheduler`
    /// for owning-thread hops
    pub fn new(
        params: StoragePoolParams,
        factory: Arc<dyn BufferFactory<B>>,
        scheduler: Arc<dyn TickScheduler>,
    ) -> Self {
        let pool = BufferPool::new(params.ttl, Some(Arc::clone(&scheduler)));
        Self {
            params,
            factory,
            scheduler,
            pool,
        }
    }

    /// Fixed parameters this pool was created with
    pub fn params(&self) -> &StoragePoolParams {
        &self.params
    }

    /// Rent a buffer holding at least `count` elements
    ///
    /// The actual allocation size follows the pool's sizing policy. On a
    /// bucket miss the factory runs on the owning thread; callers on other
    /// threads block until the hop completes.
    pub fn rent(&self, count: u32) -> Result<Arc<B>, PoolError> {
        if count == 0 {
            return Err(PoolError::InvalidCount);
        }

        let desc = StorageBufferDescriptor {
            count: self.params.batch.quantize(count),
            stride: self.params.stride,
            usage: self.params.usage,
        };
        self.pool.rent_with(&desc, |d| self.allocate(d))
    }

    fn allocate(&self, desc: &StorageBufferDescriptor) -> Result<B, PoolError> {
        if self.scheduler.is_owning_thread() {
            return Ok(self.factory.create(desc)?);
        }

        let factory = Arc::clone(&self.factory);
        let desc = *desc;
        let created = run_on_owning_thread(self.scheduler.as_ref(), move || factory.create(&desc))?;
        Ok(created?)
    }

    /// Return a rented buffer to the pool
    ///
    /// Returns `false` — and leaves the buffer with the caller, who must
    /// release it — when the buffer is incompatible with the pool's
    /// parameters or was already returned.
    pub fn try_return(&self, buffer: &Arc<B>) -> bool {
        if self.pool.is_rented(buffer) || self.is_compatible(buffer.descriptor()) {
            self.pool.return_buffer(buffer)
        } else {
            false
        }
    }

    /// Whether `buffer` must be reallocated to hold `new_count` elements
    pub fn needs_reallocation(&self, buffer: &Arc<B>, new_count: u32) -> bool {
        let desc = buffer.descriptor();
        if !self.is_compatible(desc) {
            return true;
        }
        self.params.batch.needs_reallocation(desc.count, new_count)
    }

    /// Whether a descriptor matches this pool's fixed parameters and
    /// sizing policy
    pub fn is_compatible(&self, desc: &StorageBufferDescriptor) -> bool {
        0 < desc.count
            && self.params.batch.base_size <= desc.count
            && self.params.stride == desc.stride
            && self.params.usage == desc.usage
            && self.params.batch.is_count_compatible(desc.count)
    }

    /// Whether the buffer is currently rented from this pool
    pub fn is_rented(&self, buffer: &Arc<B>) -> bool {
        self.pool.is_rented(buffer)
    }

    /// Whether the buffer is tracked by this pool at all
    pub fn is_registered(&self, buffer: &Arc<B>) -> bool {
        self.pool.is_registered(buffer)
    }

    /// Release every pooled buffer and make the pool terminal
    pub fn dispose(&self) {
        self.pool.dispose();
    }

    /// The underlying generic engine
    pub fn engine(&self) -> &Arc<BufferPool<B>> {
        &self.pool
    }
}
