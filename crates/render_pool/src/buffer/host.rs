//! Host array buffers
//!
//! CPU-side counterpart to device storage buffers: a fixed-size native
//! array of plain-old-data elements. Each element type gets its own pool
//! through generic instantiation (see [`crate::pool::HostArrayPool`]), so
//! no runtime type keys are involved.

use std::sync::Mutex;

use bytemuck::Pod;

use super::PooledBuffer;

/// Allocation shape of a host array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostArrayDescriptor {
    /// Element count
    pub count: u32,
}

/// A fixed-size host array of POD elements
///
/// The backing storage is dropped on `release`; all accessors return
/// `false`/`None` once released. Dropping the buffer releases it, so the
/// storage is freed on every exit path even when a renter never returns it
/// to a pool.
pub struct HostArrayBuffer<T: Pod + Send + Sync> {
    descriptor: HostArrayDescriptor,
    storage: Mutex<Option<Box<[T]>>>,
}

impl<T: Pod + Send + Sync> HostArrayBuffer<T> {
    /// Allocate a zero-initialized array of `descriptor.count` elements
    pub fn new(descriptor: HostArrayDescriptor) -> Self {
        let storage = vec![T::zeroed(); descriptor.count as usize].into_boxed_slice();
        Self {
            descriptor,
            storage: Mutex::new(Some(storage)),
        }
    }

    /// Element count this buffer was allocated with
    pub fn len(&self) -> u32 {
        self.descriptor.count
    }

    /// Whether the buffer holds zero elements
    pub fn is_empty(&self) -> bool {
        self.descriptor.count == 0
    }

    /// Copy `data` into the front of the array
    ///
    /// Returns `false` if the buffer has been released or `data` does not
    /// fit.
    pub fn write(&self, data: &[T]) -> bool {
        let mut guard = self.storage.lock().unwrap();
        match guard.as_mut() {
            Some(storage) if data.len() <= storage.len() => {
                storage[..data.len()].copy_from_slice(data);
                true
            }
            _ => false,
        }
    }

    /// Copy the front of the array into `out`
    ///
    /// Returns `false` if the buffer has been released or `out` is larger
    /// than the array.
    pub fn read(&self, out: &mut [T]) -> bool {
        let guard = self.storage.lock().unwrap();
        match guard.as_ref() {
            Some(storage) if out.len() <= storage.len() => {
                out.copy_from_slice(&storage[..out.len()]);
                true
            }
            _ => false,
        }
    }

    /// Run `f` against the live contents, if any
    pub fn map_read<R>(&self, f: impl FnOnce(&[T]) -> R) -> Option<R> {
        let guard = self.storage.lock().unwrap();
        guard.as_ref().map(|storage| f(storage))
    }
}

impl<T: Pod + Send + Sync> PooledBuffer for HostArrayBuffer<T> {
    type Descriptor = HostArrayDescriptor;

    fn descriptor(&self) -> &HostArrayDescriptor {
        &self.descriptor
    }

    fn release(&self) {
        self.storage.lock().unwrap().take();
    }

    fn is_released(&self) -> bool {
        self.storage.lock().unwrap().is_none()
    }
}
