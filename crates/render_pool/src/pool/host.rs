//! Host array pool
//!
//! Front-end over the generic [`BufferPool`] engine for host-memory arrays
//! of POD elements. Each element type is its own monomorphized pool, so
//! buckets never mix element types and no runtime type keys exist. Host
//! memory has no owning thread: allocation and release run inline on the
//! calling thread.

use std::sync::Arc;
use std::time::Duration;

use bytemuck::Pod;

use crate::buffer::{HostArrayBuffer, HostArrayDescriptor, PooledBuffer};
use crate::sizing::BatchParams;

use super::{BufferPool, PoolError};

/// Fixed parameters of a host array pool
#[derive(Debug, Clone, Copy)]
pub struct HostPoolParams {
    /// Sizing policy
    pub batch: BatchParams,
    /// Idle time after which free arrays are evicted; zero disables
    pub ttl: Duration,
}

/// Pool of host arrays of one POD element type
pub struct HostArrayPool<T: Pod + Send + Sync> {
    params: HostPoolParams,
    pool: Arc<BufferPool<HostArrayBuffer<T>>>,
}

impl<T: Pod + Send + Sync> HostArrayPool<T> {
    /// Create a pool
    pub fn new(params: HostPoolParams) -> Self {
        Self {
            params,
            pool: BufferPool::new(params.ttl, None),
        }
    }

    /// Fixed parameters this pool was created with
    pub fn params(&self) -> &HostPoolParams {
        &self.params
    }

    /// Rent an array holding at least `count` elements
    ///
    /// The actual allocation size follows the pool's sizing policy.
    pub fn rent(&self, count: u32) -> Result<Arc<HostArrayBuffer<T>>, PoolError> {
        if count == 0 {
            return Err(PoolError::InvalidCount);
        }

        let desc = HostArrayDescriptor {
            count: self.params.batch.quantize(count),
        };
        self.pool.rent_with(&desc, |d| Ok(HostArrayBuffer::new(*d)))
    }

    /// Return a rented array to the pool
    ///
    /// Returns `false` when the array is incompatible with the pool's
    /// sizing policy or was already returned; the array stays with the
    /// caller in that case.
    pub fn try_return(&self, buffer: &Arc<HostArrayBuffer<T>>) -> bool {
        if self.pool.is_rented(buffer) || self.is_compatible(buffer.descriptor()) {
            self.pool.return_buffer(buffer)
        } else {
            false
        }
    }

    /// Whether `buffer` must be reallocated to hold `new_count` elements
    pub fn needs_reallocation(&self, buffer: &Arc<HostArrayBuffer<T>>, new_count: u32) -> bool {
        let desc = buffer.descriptor();
        if !self.is_compatible(desc) {
            return true;
        }
        self.params.batch.needs_reallocation(desc.count, new_count)
    }

    /// Whether a descriptor matches this pool's sizing policy
    pub fn is_compatible(&self, desc: &HostArrayDescriptor) -> bool {
        0 < desc.count
            && self.params.batch.base_size <= desc.count
            && self.params.batch.is_count_compatible(desc.count)
    }

    /// Whether the array is currently rented from this pool
    pub fn is_rented(&self, buffer: &Arc<HostArrayBuffer<T>>) -> bool {
        self.pool.is_rented(buffer)
    }

    /// Whether the array is tracked by this pool at all
    pub fn is_registered(&self, buffer: &Arc<HostArrayBuffer<T>>) -> bool {
        self.pool.is_registered(buffer)
    }

    /// Release every pooled array and make the pool terminal
    pub fn dispose(&self) {
        self.pool.dispose();
    }

    /// The underlying generic engine
    pub fn engine(&self) -> &Arc<BufferPool<HostArrayBuffer<T>>> {
        &self.pool
    }
}
