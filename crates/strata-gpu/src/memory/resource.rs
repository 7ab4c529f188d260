//! Device-memory buffers and textures.

use crate::api::{GraphicsApi, ObjectKind};
use crate::error::{GpuError, Result};
use crate::format::{image_byte_size, TextureFormat};
use crate::memory::BufferResource;
use crate::repr::{BufferRepr, TextureRepr};
use bitflags::bitflags;

/// Where a resource's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// Device-local, written through transfers.
    #[default]
    Vram,
    /// Host-visible device memory, updatable from the CPU.
    DynamicVram,
}

bitflags! {
    /// How a buffer or texture will be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UsageFlags: u32 {
        const VERTEX_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const UNIFORM_BUFFER = 1 << 2;
        const TRANSFER_SOURCE = 1 << 3;
        const TRANSFER_DESTINATION = 1 << 4;
        const SAMPLED = 1 << 5;
    }
}

/// Parameters of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: u64,
    pub usage: UsageFlags,
    pub memory_type: MemoryType,
}

/// Parameters of a device texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: UsageFlags,
    pub memory_type: MemoryType,
}

impl TextureDesc {
    /// Tightly packed size of the texture's pixels.
    pub fn byte_size(&self) -> u64 {
        image_byte_size(self.width, self.height, self.format)
    }
}

/// Buffer in device memory.
#[derive(Debug)]
pub struct GpuBuffer {
    repr: BufferRepr,
    desc: BufferDesc,
}

impl GpuBuffer {
    /// Allocate a buffer on the active backend.
    pub fn new(
        api: &GraphicsApi,
        size: u64,
        usage: UsageFlags,
        memory_type: MemoryType,
    ) -> Result<Self> {
        Self::with_desc(
            api,
            BufferDesc {
                size,
                usage,
                memory_type,
            },
        )
    }

    /// Allocate a buffer from a descriptor.
    pub fn with_desc(api: &GraphicsApi, desc: BufferDesc) -> Result<Self> {
        if desc.size == 0 {
            return Err(GpuError::AllocationFailed("zero-sized buffer".to_string()));
        }

        let repr = api.device()?.create_buffer(&desc)?;
        api.live().acquire(ObjectKind::Buffer);
        tracing::debug!(
            "Created {} byte {:?} buffer ({:?})",
            desc.size,
            desc.memory_type,
            desc.usage
        );

        Ok(Self { repr, desc })
    }

    /// Update a [`MemoryType::DynamicVram`] buffer from the CPU.
    ///
    /// The caller must ensure no in-flight GPU work reads the range.
    pub fn write(&self, api: &GraphicsApi, offset: u64, data: &[u8]) -> Result<()> {
        if self.desc.memory_type != MemoryType::DynamicVram {
            return Err(GpuError::InvalidState(
                "only DynamicVram buffers can be written from the CPU".to_string(),
            ));
        }
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if end > self.desc.size {
            return Err(GpuError::InvalidState(
                "Data range too large for buffer".to_string(),
            ));
        }

        api.device()?.write_buffer(&self.repr, offset, data)
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    /// Declared usage.
    pub fn usage(&self) -> UsageFlags {
        self.desc.usage
    }

    /// Memory type.
    pub fn memory_type(&self) -> MemoryType {
        self.desc.memory_type
    }

    /// Release the buffer and its memory.
    pub fn delete(self, api: &GraphicsApi) {
        api.active().destroy_buffer(self.repr);
        api.live().release(ObjectKind::Buffer);
    }
}

impl BufferResource for GpuBuffer {
    fn buffer_repr(&self) -> &BufferRepr {
        &self.repr
    }

    fn byte_size(&self) -> u64 {
        self.desc.size
    }
}

/// Two-dimensional texture in device memory.
#[derive(Debug)]
pub struct GpuTexture {
    repr: TextureRepr,
    desc: TextureDesc,
}

impl GpuTexture {
    /// Allocate a texture on the active backend.
    pub fn new(
        api: &GraphicsApi,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: UsageFlags,
        memory_type: MemoryType,
    ) -> Result<Self> {
        Self::with_desc(
            api,
            TextureDesc {
                width,
                height,
                format,
                usage,
                memory_type,
            },
        )
    }

    /// Allocate a texture from a descriptor.
    pub fn with_desc(api: &GraphicsApi, desc: TextureDesc) -> Result<Self> {
        if desc.byte_size() == 0 {
            return Err(GpuError::AllocationFailed(format!(
                "empty {}x{} {:?} texture",
                desc.width, desc.height, desc.format
            )));
        }

        let repr = api.device()?.create_texture(&desc)?;
        api.live().acquire(ObjectKind::Texture);
        tracing::debug!(
            "Created {}x{} {:?} texture",
            desc.width,
            desc.height,
            desc.format
        );

        Ok(Self { repr, desc })
    }

    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }

    /// Pixel format.
    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    /// Declared usage.
    pub fn usage(&self) -> UsageFlags {
        self.desc.usage
    }

    /// Memory type.
    pub fn memory_type(&self) -> MemoryType {
        self.desc.memory_type
    }

    /// Tightly packed size of the pixels in bytes.
    pub fn byte_size(&self) -> u64 {
        self.desc.byte_size()
    }

    pub(crate) fn repr(&self) -> &TextureRepr {
        &self.repr
    }

    /// Release the texture and its memory.
    pub fn delete(self, api: &GraphicsApi) {
        api.active().destroy_texture(self.repr);
        api.live().release(ObjectKind::Texture);
    }
}
