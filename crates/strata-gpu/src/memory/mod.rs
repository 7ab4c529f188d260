//! CPU and GPU memory resources.

pub mod host;
pub mod resource;
pub mod staging;
pub mod tracking;

pub use host::HostAllocator;
pub use resource::{BufferDesc, GpuBuffer, GpuTexture, MemoryType, TextureDesc, UsageFlags};
pub use staging::{CpuBuffer, CpuTexture, StagingAllocator, StagingBlock};
pub use tracking::{AllocationStats, AllocationTracker};

use crate::repr::BufferRepr;

/// Anything that can be the source or destination of a buffer copy.
pub trait BufferResource {
    #[doc(hidden)]
    fn buffer_repr(&self) -> &BufferRepr;

    /// Size in bytes.
    fn byte_size(&self) -> u64;
}
