//! Managed buffer abstractions
//!
//! A pooled resource is an owned wrapper around one externally-allocated
//! handle plus the immutable [`BufferDescriptor`] it was allocated with.
//! Descriptors are structural value keys (hash and equality over all
//! fields); buffers themselves are identified by handle, never by
//! descriptor, so two buffers with identical shapes are still distinct
//! pool entries.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

pub mod host;
pub mod storage;

pub use host::{HostArrayBuffer, HostArrayDescriptor};
pub use storage::{BufferUsage, StorageBufferDescriptor};

/// Value key describing a buffer's allocation shape
///
/// Used as a hash-map key for free-bucket lookup, so hash and equality must
/// be consistent and total over all fields.
pub trait BufferDescriptor: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> BufferDescriptor for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// An owned wrapper around one externally-allocated native handle
///
/// The descriptor is fixed at construction and never mutated. `release`
/// must be idempotent: it tombstones the handle on first call and is a
/// no-op afterwards. Implementations with side-effecting teardown should
/// also call it from `Drop` so the handle is freed on every exit path.
pub trait PooledBuffer: Send + Sync + 'static {
    /// Descriptor type this buffer was allocated from
    type Descriptor: BufferDescriptor;

    /// The allocation shape this buffer was created with
    fn descriptor(&self) -> &Self::Descriptor;

    /// Release the underlying handle; idempotent
    fn release(&self);

    /// Whether the underlying handle has been released
    fn is_released(&self) -> bool;
}

/// Identity key for pool bookkeeping
///
/// Derived from the buffer's `Arc` allocation address, which stands in for
/// the native handle: stable for the buffer's lifetime and unique among
/// live buffers. Never derived from the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferKey(usize);

impl BufferKey {
    /// Identity key of a shared buffer
    pub fn of<B: PooledBuffer>(buffer: &Arc<B>) -> Self {
        Self(Arc::as_ptr(buffer) as usize)
    }
}
