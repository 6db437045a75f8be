//! # Render Pool
//!
//! Generic pooling for expensive, externally-allocated render resources
//! (device storage buffers, host arrays), plus a coalescing command queue
//! for cross-thread mutation of shared render state.
//!
//! ## Features
//!
//! - **Buffer Pooling**: rent/return with per-descriptor LIFO free buckets
//!   and TTL-based eviction of idle buffers
//! - **Sizing Policies**: precise or batch-quantized allocation sizing
//! - **Thread Affinity**: device allocation and release dispatched to a
//!   designated owning thread through an injected scheduler
//! - **Command Queue**: double-buffered action queue where concurrent
//!   flush requests coalesce into exactly one follow-up cycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_pool::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! // the thread creating the dispatcher becomes the owning thread
//! let dispatcher = Arc::new(FrameDispatcher::new());
//!
//! let pool: HostArrayPool<u32> = HostArrayPool::new(HostPoolParams {
//!     batch: BatchParams::batched(16, 8),
//!     ttl: Duration::from_secs(5),
//! });
//!
//! let buffer = pool.rent(20)?;      // allocates 24 elements
//! buffer.write(&[1, 2, 3]);
//! assert!(pool.try_return(&buffer)); // pooled for reuse
//!
//! // per frame, on the owning thread:
//! dispatcher.pump_update();
//! dispatcher.pump_late_update();
//! # Ok::<(), render_pool::pool::PoolError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod foundation;
pub mod pool;
pub mod queue;
pub mod sizing;

/// Common imports for pool users
pub mod prelude {
    pub use crate::{
        buffer::{BufferUsage, HostArrayBuffer, PooledBuffer, StorageBufferDescriptor},
        config::{PoolSettings, Settings, StoragePoolSettings},
        dispatch::{run_on_owning_thread, FrameDispatcher, TickPhase, TickScheduler},
        pool::{
            BufferFactory, BufferPool, HostArrayPool, HostPoolParams, PoolError,
            StorageBufferPool, StoragePoolParams,
        },
        queue::{CommandQueue, FlushMode},
        sizing::{BatchParams, BufferMode},
    };
}
