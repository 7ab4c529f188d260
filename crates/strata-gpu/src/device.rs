//! The backend device interface.
//!
//! Every backend implements [`GpuDevice`]. The public object types in
//! [`command`](crate::command), [`sync`](crate::sync) and
//! [`memory`](crate::memory) hold backend representations and forward to
//! the active device through [`GraphicsApi`](crate::GraphicsApi).

use crate::api::BackendKind;
use crate::command::Command;
use crate::error::Result;
use crate::memory::resource::{BufferDesc, TextureDesc};
use crate::memory::staging::StagingAllocator;
use crate::repr::{
    BufferRepr, CommandBufferRepr, CommandPoolRepr, FenceRepr, QueueRepr, SemaphoreRepr,
    ShaderRepr, TextureRepr,
};
use crate::shader::ShaderSource;
use crate::sync::{Fence, Semaphore};
use std::fmt;
use std::time::Duration;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    /// No physical vendor, e.g. the software backend.
    Cpu,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }

    /// Guess the vendor from an OpenGL vendor string.
    pub fn from_vendor_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("nvidia") {
            Self::Nvidia
        } else if lower.contains("amd") || lower.contains("ati ") {
            Self::Amd
        } else if lower.contains("intel") {
            Self::Intel
        } else if lower.contains("apple") {
            Self::Apple
        } else {
            Self::Other(0)
        }
    }
}

/// The kinds of queue a device exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueFamily {
    Graphics,
    Compute,
    Transfer,
}

/// A device queue and the index of its family.
///
/// Submissions to one queue execute in order. Callers sharing a queue
/// across threads must serialize their submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    family: QueueFamily,
    family_index: u32,
    repr: QueueRepr,
}

impl Queue {
    pub(crate) fn new(family: QueueFamily, family_index: u32, repr: QueueRepr) -> Self {
        Self {
            family,
            family_index,
            repr,
        }
    }

    /// The role this queue was requested for.
    pub fn family(&self) -> QueueFamily {
        self.family
    }

    /// Native queue family index. Roles may share a family.
    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    pub(crate) fn repr(&self) -> &QueueRepr {
        &self.repr
    }
}

/// Description of the selected device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub backend: BackendKind,
    pub name: String,
    pub vendor: GpuVendor,
    pub api_version: String,
    pub graphics_family: u32,
    pub compute_family: u32,
    pub transfer_family: u32,
}

impl DeviceInfo {
    /// One-line description for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) {} {}, queue families graphics={} compute={} transfer={}",
            self.name,
            self.vendor,
            self.backend,
            self.api_version,
            self.graphics_family,
            self.compute_family,
            self.transfer_family
        )
    }

    pub(crate) fn family_index(&self, family: QueueFamily) -> u32 {
        match family {
            QueueFamily::Graphics => self.graphics_family,
            QueueFamily::Compute => self.compute_family,
            QueueFamily::Transfer => self.transfer_family,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// One submission of an ended command buffer.
///
/// Wait semaphores are satisfied before any recorded command starts;
/// signal semaphores and the fence fire after every recorded command
/// has retired.
pub struct Submission<'a> {
    pub queue: &'a Queue,
    pub command_buffer: &'a CommandBufferRepr,
    pub wait_semaphores: &'a [&'a Semaphore],
    pub signal_semaphores: &'a [&'a Semaphore],
    pub fence: Option<&'a Fence>,
}

/// A backend's logical device.
///
/// Handles passed in must have been created by the same backend; a
/// foreign handle is a contract violation and panics.
pub trait GpuDevice: StagingAllocator + Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Selected device description.
    fn info(&self) -> &DeviceInfo;

    /// The queue exported for `family`.
    fn queue(&self, family: QueueFamily) -> Queue;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> Result<()>;

    /// Wait for idle and release the device. Idempotent.
    fn finalize(&mut self);

    fn create_command_pool(&self, queue: &Queue) -> Result<CommandPoolRepr>;
    fn destroy_command_pool(&self, pool: CommandPoolRepr);
    fn allocate_command_buffer(&self, pool: &CommandPoolRepr) -> Result<CommandBufferRepr>;
    fn free_command_buffer(&self, pool: &CommandPoolRepr, buffer: CommandBufferRepr);

    fn begin_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()>;
    fn end_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()>;
    fn reset_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()>;

    /// Record one command. Validation happens in the caller.
    fn record(&self, buffer: &mut CommandBufferRepr, command: &Command<'_>);

    /// Submit an ended command buffer. The single path to the GPU.
    fn execute(&self, submission: &Submission<'_>) -> Result<()>;

    fn create_fence(&self) -> Result<FenceRepr>;
    fn destroy_fence(&self, fence: FenceRepr);

    /// Wait for the fence, then reset it to unsignaled.
    ///
    /// `None` waits forever. On timeout the fence is left untouched.
    fn wait_fence(&self, fence: &FenceRepr, timeout: Option<Duration>) -> Result<()>;

    /// Non-blocking query.
    fn fence_signaled(&self, fence: &FenceRepr) -> Result<bool>;

    fn create_semaphore(&self) -> Result<SemaphoreRepr>;
    fn destroy_semaphore(&self, semaphore: SemaphoreRepr);

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferRepr>;
    fn destroy_buffer(&self, buffer: BufferRepr);

    /// Write host data into a host-visible device buffer.
    fn write_buffer(&self, buffer: &BufferRepr, offset: u64, data: &[u8]) -> Result<()>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureRepr>;
    fn destroy_texture(&self, texture: TextureRepr);

    fn create_shader(&self, source: &ShaderSource<'_>) -> Result<ShaderRepr>;
    fn destroy_shader(&self, shader: ShaderRepr);
}
