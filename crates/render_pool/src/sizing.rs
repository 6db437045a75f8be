//! Allocation sizing policy
//!
//! Maps a requested element count to the count actually allocated, under two
//! modes: `Precise` allocates the exact (base-clamped) request, `Batched`
//! quantizes requests up to a fixed batch multiple so that nearby sizes land
//! in the same bucket and can share pooled buffers.

use serde::{Deserialize, Serialize};

/// How requested sizes are mapped to allocation sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferMode {
    /// Allocate exactly the requested count, clamped to the base size
    Precise,
    /// Round the requested count up to the next batch multiple
    Batched,
}

/// Sizing parameters shared by all pools of one buffer shape
///
/// `batch_size` is only meaningful in [`BufferMode::Batched`]; the `precise`
/// constructor pins it to 1 so the quantization math stays total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchParams {
    /// Sizing mode
    pub mode: BufferMode,
    /// Minimum allocation size in elements (must be > 0)
    pub base_size: u32,
    /// Batch quantum in elements (must be > 0; used in Batched mode)
    pub batch_size: u32,
}

impl BatchParams {
    /// Create parameters for precise sizing
    pub fn precise(base_size: u32) -> Self {
        Self {
            mode: BufferMode::Precise,
            base_size,
            batch_size: 1,
        }
    }

    /// Create parameters for batched sizing
    pub fn batched(base_size: u32, batch_size: u32) -> Self {
        Self {
            mode: BufferMode::Batched,
            base_size,
            batch_size,
        }
    }

    /// Clamp a requested count up to the minimum allocation size
    pub fn ceil_to_base_size(&self, count: u32) -> u32 {
        count.max(self.base_size)
    }

    /// Clamp to base size, then round up to the next batch multiple
    ///
    /// Saturates at `u32::MAX` when the rounded count does not fit.
    pub fn ceil_to_batch(&self, count: u32) -> u32 {
        let x = self.ceil_to_base_size(count);
        x.div_ceil(self.batch_size).saturating_mul(self.batch_size)
    }

    /// Map a requested count to the count that would actually be allocated
    pub fn quantize(&self, count: u32) -> u32 {
        match self.mode {
            BufferMode::Precise => self.ceil_to_base_size(count),
            BufferMode::Batched => self.ceil_to_batch(count),
        }
    }

    /// Whether a stored count is one this policy could have produced
    pub fn is_count_compatible(&self, count: u32) -> bool {
        match self.mode {
            BufferMode::Precise => true,
            BufferMode::Batched => count % self.batch_size == 0,
        }
    }

    /// Whether a buffer of `count` elements must be reallocated to hold
    /// `new_count` elements under this policy
    ///
    /// In Batched mode any request that lands in the same quantized bracket
    /// is a non-event, which amortizes reallocation churn for sizes that
    /// fluctuate within one batch.
    pub fn needs_reallocation(&self, count: u32, new_count: u32) -> bool {
        match self.mode {
            BufferMode::Precise => count != self.ceil_to_base_size(new_count),
            BufferMode::Batched => self.ceil_to_batch(count) != self.ceil_to_batch(new_count),
        }
    }
}
