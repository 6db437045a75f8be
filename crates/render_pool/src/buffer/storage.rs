//! Device storage buffer shape
//!
//! Descriptor and usage flags for GPU-side storage buffers. The crate never
//! talks to a graphics API itself; device buffers are produced by an
//! injected factory (see [`crate::pool::BufferFactory`]) and only their
//! shape is modeled here.

use bitflags::bitflags;

bitflags! {
    /// Intended device usage of a storage buffer
    ///
    /// Mirrors the usage bits a graphics backend would pass at allocation
    /// time. Part of the descriptor, so buffers with different usage never
    /// share a free bucket.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Shader read/write storage
        const STORAGE = 1 << 0;
        /// Vertex input
        const VERTEX = 1 << 1;
        /// Index input
        const INDEX = 1 << 2;
        /// Indirect draw/dispatch arguments
        const INDIRECT = 1 << 3;
        /// Transfer source
        const COPY_SRC = 1 << 4;
        /// Transfer destination
        const COPY_DST = 1 << 5;
    }
}

/// Allocation shape of a device storage buffer
///
/// Structural equality and hash over all fields; used as the free-bucket
/// key for [`crate::pool::StorageBufferPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageBufferDescriptor {
    /// Element count
    pub count: u32,
    /// Element stride in bytes
    pub stride: u32,
    /// Device usage flags
    pub usage: BufferUsage,
}

impl StorageBufferDescriptor {
    /// Total allocation size in bytes
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.count) * u64::from(self.stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_equality_is_structural() {
        let a = StorageBufferDescriptor {
            count: 64,
            stride: 16,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        };
        let b = a;
        assert_eq!(a, b);

        let c = StorageBufferDescriptor {
            usage: BufferUsage::STORAGE,
            ..a
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_size_bytes() {
        let desc = StorageBufferDescriptor {
            count: 1024,
            stride: 64,
            usage: BufferUsage::STORAGE,
        };
        assert_eq!(desc.size_bytes(), 65_536);
    }
}
