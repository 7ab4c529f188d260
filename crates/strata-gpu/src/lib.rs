//! Backend-polymorphic GPU runtime.
//!
//! This crate provides:
//! - A [`GraphicsApi`] dispatcher that loads one backend at a time
//! - Vulkan (ash + gpu-allocator), OpenGL (glow, `opengl` feature) and
//!   software CPU backends behind the [`GpuDevice`] trait
//! - Queues, command pools and the command buffer state machine
//! - Fences and semaphores
//! - CPU staging resources and GPU buffers and textures
//! - Allocation tracking and deferred deletion

pub mod api;
pub mod command;
pub mod deferred;
pub mod device;
pub mod error;
pub mod format;
pub mod memory;
#[cfg(feature = "opengl")]
pub mod opengl;
#[doc(hidden)]
pub mod repr;
pub mod shader;
pub mod software;
pub mod sync;
pub mod vulkan;

pub use api::{BackendConfig, BackendKind, GraphicsApi, LiveObjects, ObjectKind};
pub use command::{
    execute_one_shot, AccessFlags, BufferCopy, CommandBuffer, CommandBufferState, CommandPool,
    ImageBarrier, ImageLayout, PipelineStages,
};
pub use deferred::{DeferredDeletions, DeferredResource};
pub use device::{DeviceInfo, GpuDevice, GpuVendor, Queue, QueueFamily};
pub use error::{GpuError, Result, Status};
pub use format::{image_byte_size, pixel_size, TextureFormat};
pub use memory::{
    AllocationStats, AllocationTracker, BufferResource, CpuBuffer, CpuTexture, GpuBuffer,
    GpuTexture, HostAllocator, MemoryType, StagingAllocator, UsageFlags,
};
pub use shader::{Shader, ShaderLanguage, ShaderSource, ShaderStage};
pub use sync::{Fence, Semaphore};
