//! OpenGL backend.
//!
//! OpenGL has a single in-order command stream, so every queue family maps
//! to it and semaphores are satisfied by submission order. Command buffers
//! record [`GlOp`]s that are replayed on submit. Staging memory is plain
//! host memory from a [`HostAllocator`].
//!
//! The context is shared behind a mutex; the embedder keeps it current on
//! whichever thread drives the device.

use crate::api::{BackendConfig, BackendKind};
use crate::command::Command;
use crate::device::{DeviceInfo, GpuDevice, GpuVendor, Queue, QueueFamily, Submission};
use crate::error::{GpuError, Result};
use crate::format::TextureFormat;
use crate::memory::host::HostAllocator;
use crate::memory::resource::{BufferDesc, MemoryType, TextureDesc};
use crate::memory::staging::{StagingAllocator, StagingBlock};
use crate::memory::tracking::AllocationTracker;
use crate::repr::{
    foreign, BufferRepr, CommandBufferRepr, CommandPoolRepr, FenceRepr, QueueRepr, SemaphoreRepr,
    ShaderRepr, TextureRepr,
};
use crate::shader::{ShaderLanguage, ShaderSource, ShaderStage};
use glow::HasContext;
use parking_lot::{Mutex, MutexGuard};
use std::ops::Deref;
use std::ptr::NonNull;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A GL buffer object and its size.
#[derive(Debug, Clone, Copy)]
pub struct GlBuffer {
    pub(crate) buffer: glow::Buffer,
    pub(crate) size: u64,
}

/// A GL texture and its pixel transfer format.
#[derive(Debug, Clone, Copy)]
pub struct GlTexture {
    pub(crate) texture: glow::Texture,
    pub(crate) width: i32,
    pub(crate) height: i32,
    pub(crate) format: u32,
    pub(crate) ty: u32,
    pub(crate) byte_size: u64,
}

/// One end of a recorded transfer.
#[derive(Debug, Clone, Copy)]
pub enum GlSpan {
    Buffer { buffer: glow::Buffer, offset: u64 },
    Host { ptr: NonNull<u8>, offset: u64 },
}

// SAFETY: host spans point into staging blocks that outlive the submission.
unsafe impl Send for GlSpan {}
unsafe impl Sync for GlSpan {}

impl GlSpan {
    fn offset(&self) -> u64 {
        match *self {
            Self::Buffer { offset, .. } | Self::Host { offset, .. } => offset,
        }
    }
}

/// A `glFenceSync` object.
#[derive(Debug, Clone, Copy)]
pub struct GlSync(glow::Fence);

// SAFETY: sync objects are only used through the device's context lock.
unsafe impl Send for GlSync {}
unsafe impl Sync for GlSync {}

/// Fence state: the sync object of the last submission, if any.
pub type GlFence = Mutex<Option<GlSync>>;

struct GlContext(glow::Context);

// SAFETY: the context is only reached through `GlDevice::gl`'s mutex.
unsafe impl Send for GlContext {}

impl Deref for GlContext {
    type Target = glow::Context;

    fn deref(&self) -> &glow::Context {
        &self.0
    }
}

/// A recorded command, replayed at submit.
#[derive(Debug, Clone)]
pub enum GlOp {
    Barrier,
    Copy {
        src: GlSpan,
        dst: GlSpan,
        size: u64,
    },
    Fill {
        dst: GlSpan,
        size: u64,
        value: u32,
    },
    Upload {
        src: GlSpan,
        texture: GlTexture,
    },
    Download {
        texture: GlTexture,
        dst: GlSpan,
    },
}

/// (internal format, pixel format, pixel type)
fn texture_format(format: TextureFormat) -> Option<(u32, u32, u32)> {
    let mapped = match format {
        TextureFormat::Unknown => return None,
        TextureFormat::R8 => (glow::R8, glow::RED, glow::UNSIGNED_BYTE),
        TextureFormat::Rg8 => (glow::RG8, glow::RG, glow::UNSIGNED_BYTE),
        TextureFormat::Rgb8 => (glow::RGB8, glow::RGB, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba8 => (glow::RGBA8, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Bgra8 => (glow::RGBA8, glow::BGRA, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba16F => (glow::RGBA16F, glow::RGBA, glow::HALF_FLOAT),
        TextureFormat::Rgba32F => (glow::RGBA32F, glow::RGBA, glow::FLOAT),
        TextureFormat::Depth32F => (glow::DEPTH_COMPONENT32F, glow::DEPTH_COMPONENT, glow::FLOAT),
        TextureFormat::Depth24Stencil8 => (
            glow::DEPTH24_STENCIL8,
            glow::DEPTH_STENCIL,
            glow::UNSIGNED_INT_24_8,
        ),
    };
    Some(mapped)
}

fn gl_size(value: u64) -> Result<i32> {
    i32::try_from(value).map_err(|_| GpuError::OpenGl(format!("{value} exceeds GLint range")))
}

/// Reject ops whose offsets or sizes GL cannot express.
fn validate(op: &GlOp) -> Result<()> {
    match op {
        GlOp::Barrier => {}
        GlOp::Copy { src, dst, size } => {
            gl_size(src.offset())?;
            gl_size(dst.offset())?;
            gl_size(*size)?;
        }
        GlOp::Fill { dst, size, .. } => {
            gl_size(dst.offset())?;
            gl_size(*size)?;
        }
        GlOp::Upload { src: span, texture } | GlOp::Download { texture, dst: span } => {
            gl_size(span.offset())?;
            gl_size(texture.byte_size)?;
        }
    }
    Ok(())
}

fn span(repr: &BufferRepr, offset: u64) -> GlSpan {
    match repr {
        BufferRepr::OpenGl(buffer) => GlSpan::Buffer {
            buffer: buffer.buffer,
            offset,
        },
        BufferRepr::Host(block) => GlSpan::Host {
            ptr: NonNull::new(block.as_ptr().cast_mut()).unwrap_or(NonNull::dangling()),
            offset,
        },
        other => foreign("buffer", other.backend(), BackendKind::OpenGl),
    }
}

fn texture(repr: &TextureRepr) -> GlTexture {
    match repr {
        TextureRepr::OpenGl(texture) => *texture,
        other => foreign("texture", other.backend(), BackendKind::OpenGl),
    }
}

fn ops_mut(repr: &mut CommandBufferRepr) -> &mut Vec<GlOp> {
    match repr {
        CommandBufferRepr::OpenGl(ops) => ops,
        other => foreign("command buffer", other.backend(), BackendKind::OpenGl),
    }
}

fn sync_cell(repr: &FenceRepr) -> &GlFence {
    match repr {
        FenceRepr::OpenGl(sync) => sync,
        other => foreign("fence", other.backend(), BackendKind::OpenGl),
    }
}

/// The OpenGL device, wrapping a context made current by the windowing layer.
pub struct GlDevice {
    gl: Mutex<GlContext>,
    info: DeviceInfo,
    tracker: AllocationTracker,
    host: HostAllocator,
    finalized: bool,
}

impl GlDevice {
    /// Load GL entry points through the loader in `config`.
    pub fn initialize(config: &BackendConfig, tracker: AllocationTracker) -> Result<Self> {
        let loader = config.gl_loader.clone().ok_or_else(|| {
            GpuError::BackendInit("OpenGL backend needs a proc-address loader".to_string())
        })?;

        let gl = unsafe { glow::Context::from_loader_function(|name| loader(name)) };

        let (vendor, renderer, version) = unsafe {
            (
                gl.get_parameter_string(glow::VENDOR),
                gl.get_parameter_string(glow::RENDERER),
                gl.get_parameter_string(glow::VERSION),
            )
        };
        if version.is_empty() {
            return Err(GpuError::BackendInit(
                "no current OpenGL context".to_string(),
            ));
        }

        unsafe {
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
        }

        let info = DeviceInfo {
            backend: BackendKind::OpenGl,
            name: renderer,
            vendor: GpuVendor::from_vendor_name(&vendor),
            api_version: format!("OpenGL {version}"),
            graphics_family: 0,
            compute_family: 0,
            transfer_family: 0,
        };
        info!("OpenGL context: {}", info.summary());

        Ok(Self {
            gl: Mutex::new(GlContext(gl)),
            info,
            host: HostAllocator::new(tracker.clone()),
            tracker,
            finalized: false,
        })
    }

    fn gl(&self) -> MutexGuard<'_, GlContext> {
        self.gl.lock()
    }

    fn replay(gl: &glow::Context, op: &GlOp) -> Result<()> {
        match *op {
            GlOp::Barrier => unsafe { gl.memory_barrier(glow::ALL_BARRIER_BITS) },
            GlOp::Copy { src, dst, size } => match (src, dst) {
                (
                    GlSpan::Buffer {
                        buffer: src,
                        offset: src_offset,
                    },
                    GlSpan::Buffer {
                        buffer: dst,
                        offset: dst_offset,
                    },
                ) => unsafe {
                    bind_buffer(gl, glow::COPY_READ_BUFFER, src);
                    bind_buffer(gl, glow::COPY_WRITE_BUFFER, dst);
                    gl.copy_buffer_sub_data(
                        glow::COPY_READ_BUFFER,
                        glow::COPY_WRITE_BUFFER,
                        gl_size(src_offset)?,
                        gl_size(dst_offset)?,
                        gl_size(size)?,
                    );
                },
                (GlSpan::Host { ptr, offset }, GlSpan::Buffer { buffer, offset: dst }) => {
                    // SAFETY: the staging block outlives the submission.
                    let data = unsafe {
                        std::slice::from_raw_parts(ptr.as_ptr().add(offset as usize), size as usize)
                    };
                    bind_buffer(gl, glow::COPY_WRITE_BUFFER, buffer);
                    unsafe {
                        gl.buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, gl_size(dst)?, data);
                    }
                }
                (GlSpan::Buffer { buffer, offset: src }, GlSpan::Host { ptr, offset }) => {
                    let data = unsafe {
                        std::slice::from_raw_parts_mut(
                            ptr.as_ptr().add(offset as usize),
                            size as usize,
                        )
                    };
                    bind_buffer(gl, glow::COPY_READ_BUFFER, buffer);
                    unsafe {
                        gl.get_buffer_sub_data(glow::COPY_READ_BUFFER, gl_size(src)?, data);
                    }
                }
                (
                    GlSpan::Host { ptr: src, offset: src_offset },
                    GlSpan::Host { ptr: dst, offset: dst_offset },
                ) => unsafe {
                    std::ptr::copy(
                        src.as_ptr().add(src_offset as usize),
                        dst.as_ptr().add(dst_offset as usize),
                        size as usize,
                    );
                },
            },
            GlOp::Fill { dst, size, value } => {
                let pattern: Vec<u8> = std::iter::repeat(value.to_ne_bytes())
                    .take((size / 4) as usize)
                    .flatten()
                    .collect();
                match dst {
                    GlSpan::Buffer { buffer, offset } => {
                        bind_buffer(gl, glow::COPY_WRITE_BUFFER, buffer);
                        unsafe {
                            gl.buffer_sub_data_u8_slice(
                                glow::COPY_WRITE_BUFFER,
                                gl_size(offset)?,
                                &pattern,
                            );
                        }
                    }
                    GlSpan::Host { ptr, offset } => unsafe {
                        std::ptr::copy_nonoverlapping(
                            pattern.as_ptr(),
                            ptr.as_ptr().add(offset as usize),
                            pattern.len(),
                        );
                    },
                }
            }
            GlOp::Upload { src, texture } => unsafe {
                gl.bind_texture(glow::TEXTURE_2D, Some(texture.texture));
                let pixels = match src {
                    GlSpan::Buffer { buffer, offset } => {
                        bind_buffer(gl, glow::PIXEL_UNPACK_BUFFER, buffer);
                        glow::PixelUnpackData::BufferOffset(gl_size(offset)? as u32)
                    }
                    GlSpan::Host { ptr, offset } => {
                        gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
                        glow::PixelUnpackData::Slice(std::slice::from_raw_parts(
                            ptr.as_ptr().add(offset as usize),
                            texture.byte_size as usize,
                        ))
                    }
                };
                gl.tex_sub_image_2d(
                    glow::TEXTURE_2D,
                    0,
                    0,
                    0,
                    texture.width,
                    texture.height,
                    texture.format,
                    texture.ty,
                    pixels,
                );
                gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            },
            GlOp::Download { texture, dst } => unsafe {
                gl.bind_texture(glow::TEXTURE_2D, Some(texture.texture));
                let pixels = match dst {
                    GlSpan::Buffer { buffer, offset } => {
                        bind_buffer(gl, glow::PIXEL_PACK_BUFFER, buffer);
                        glow::PixelPackData::BufferOffset(gl_size(offset)? as u32)
                    }
                    GlSpan::Host { ptr, offset } => {
                        gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
                        glow::PixelPackData::Slice(std::slice::from_raw_parts_mut(
                            ptr.as_ptr().add(offset as usize),
                            texture.byte_size as usize,
                        ))
                    }
                };
                gl.get_tex_image(glow::TEXTURE_2D, 0, texture.format, texture.ty, pixels);
                gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            },
        }
        Ok(())
    }
}

fn bind_buffer(gl: &glow::Context, target: u32, buffer: glow::Buffer) {
    unsafe { gl.bind_buffer(target, Some(buffer)) };
}

impl StagingAllocator for GlDevice {
    fn allocate_staging(&self, size: u64) -> Result<StagingBlock> {
        self.host.allocate_staging(size)
    }

    fn free_staging(&self, block: StagingBlock) {
        self.host.free_staging(block);
    }
}

impl GpuDevice for GlDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenGl
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn queue(&self, family: QueueFamily) -> Queue {
        Queue::new(family, 0, QueueRepr::OpenGl)
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.gl().finish() };
        Ok(())
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        unsafe { self.gl().finish() };
        debug!("OpenGL device finalized");
    }

    fn create_command_pool(&self, queue: &Queue) -> Result<CommandPoolRepr> {
        match queue.repr() {
            QueueRepr::OpenGl => Ok(CommandPoolRepr::OpenGl),
            other => foreign("queue", other.backend(), BackendKind::OpenGl),
        }
    }

    fn destroy_command_pool(&self, pool: CommandPoolRepr) {
        if pool.backend() != BackendKind::OpenGl {
            foreign("command pool", pool.backend(), BackendKind::OpenGl);
        }
    }

    fn allocate_command_buffer(&self, pool: &CommandPoolRepr) -> Result<CommandBufferRepr> {
        match pool {
            CommandPoolRepr::OpenGl => Ok(CommandBufferRepr::OpenGl(Vec::new())),
            other => foreign("command pool", other.backend(), BackendKind::OpenGl),
        }
    }

    fn free_command_buffer(&self, _pool: &CommandPoolRepr, buffer: CommandBufferRepr) {
        if buffer.backend() != BackendKind::OpenGl {
            foreign("command buffer", buffer.backend(), BackendKind::OpenGl);
        }
    }

    fn begin_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()> {
        ops_mut(buffer).clear();
        Ok(())
    }

    fn end_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()> {
        ops_mut(buffer);
        Ok(())
    }

    fn reset_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()> {
        ops_mut(buffer).clear();
        Ok(())
    }

    fn record(&self, buffer: &mut CommandBufferRepr, command: &Command<'_>) {
        let ops = ops_mut(buffer);
        let op = match *command {
            // GL orders execution itself; only incoherent writes need a barrier.
            Command::PipelineBarrier { .. } => return,
            Command::MemoryBarrier { .. } | Command::ImageBarrier { .. } => GlOp::Barrier,
            Command::CopyBuffer { src, dst, region } => GlOp::Copy {
                src: span(src, region.src_offset),
                dst: span(dst, region.dst_offset),
                size: region.size,
            },
            Command::FillBuffer {
                dst,
                offset,
                size,
                value,
            } => GlOp::Fill {
                dst: span(dst, offset),
                size,
                value,
            },
            Command::CopyBufferToTexture {
                src,
                src_offset,
                dst,
            } => GlOp::Upload {
                src: span(src, src_offset),
                texture: texture(dst),
            },
            Command::CopyTextureToBuffer {
                src,
                dst,
                dst_offset,
            } => GlOp::Download {
                texture: texture(src),
                dst: span(dst, dst_offset),
            },
        };
        ops.push(op);
    }

    /// Every op is validated before the first is replayed, so a rejected
    /// submission has no effect. A failed `glFenceSync` after replay leaves
    /// the commands executed and the fence unarmed.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn execute(&self, submission: &Submission<'_>) -> Result<()> {
        if submission.queue.repr().backend() != BackendKind::OpenGl {
            foreign("queue", submission.queue.repr().backend(), BackendKind::OpenGl);
        }
        let ops = match submission.command_buffer {
            CommandBufferRepr::OpenGl(ops) => ops,
            other => foreign("command buffer", other.backend(), BackendKind::OpenGl),
        };
        for semaphore in submission
            .wait_semaphores
            .iter()
            .chain(submission.signal_semaphores)
        {
            if semaphore.repr().backend() != BackendKind::OpenGl {
                foreign("semaphore", semaphore.repr().backend(), BackendKind::OpenGl);
            }
        }
        ops.iter().try_for_each(validate)?;

        let gl = self.gl();
        for op in ops {
            Self::replay(&gl, op)?;
        }

        if let Some(fence) = submission.fence {
            let sync = unsafe { gl.fence_sync(glow::SYNC_GPU_COMMANDS_COMPLETE, 0) }
                .map_err(GpuError::OpenGl)?;
            if let Some(previous) = sync_cell(fence.repr()).lock().replace(GlSync(sync)) {
                unsafe { gl.delete_sync(previous.0) };
            }
        }
        unsafe { gl.flush() };
        Ok(())
    }

    fn create_fence(&self) -> Result<FenceRepr> {
        Ok(FenceRepr::OpenGl(Mutex::new(None)))
    }

    fn destroy_fence(&self, fence: FenceRepr) {
        let sync = sync_cell(&fence).lock().take();
        if let Some(GlSync(sync)) = sync {
            unsafe { self.gl().delete_sync(sync) };
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_fence(&self, fence: &FenceRepr, timeout: Option<Duration>) -> Result<()> {
        let cell = sync_cell(fence);
        let Some(GlSync(sync)) = *cell.lock() else {
            return Ok(());
        };
        let deadline = timeout.map(|t| Instant::now() + t);
        let gl = self.gl();

        loop {
            // client_wait_sync takes a signed 32-bit nanosecond timeout.
            let slice = deadline.map_or(i32::MAX, |d| {
                let remaining = d.saturating_duration_since(Instant::now()).as_nanos();
                i32::try_from(remaining).unwrap_or(i32::MAX)
            });
            let status = unsafe { gl.client_wait_sync(sync, glow::SYNC_FLUSH_COMMANDS_BIT, slice) };
            match status {
                glow::ALREADY_SIGNALED | glow::CONDITION_SATISFIED => {
                    cell.lock().take();
                    unsafe { gl.delete_sync(sync) };
                    return Ok(());
                }
                glow::TIMEOUT_EXPIRED => {
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(GpuError::Timeout);
                    }
                }
                _ => {
                    return Err(GpuError::DeviceLost(
                        "glClientWaitSync returned GL_WAIT_FAILED".to_string(),
                    ))
                }
            }
        }
    }

    fn fence_signaled(&self, fence: &FenceRepr) -> Result<bool> {
        let Some(GlSync(sync)) = *sync_cell(fence).lock() else {
            return Ok(false);
        };
        Ok(unsafe { self.gl().get_sync_status(sync) } == glow::SIGNALED)
    }

    fn create_semaphore(&self) -> Result<SemaphoreRepr> {
        Ok(SemaphoreRepr::OpenGl)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreRepr) {
        if semaphore.backend() != BackendKind::OpenGl {
            foreign("semaphore", semaphore.backend(), BackendKind::OpenGl);
        }
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferRepr> {
        let usage = match desc.memory_type {
            MemoryType::Vram => glow::STATIC_DRAW,
            MemoryType::DynamicVram => glow::DYNAMIC_DRAW,
        };
        let size = gl_size(desc.size)?;
        let gl = self.gl();
        let buffer = unsafe { gl.create_buffer() }.map_err(GpuError::OpenGl)?;
        bind_buffer(&gl, glow::COPY_WRITE_BUFFER, buffer);
        unsafe { gl.buffer_data_size(glow::COPY_WRITE_BUFFER, size, usage) };

        self.tracker.record_alloc(desc.size);
        Ok(BufferRepr::OpenGl(GlBuffer {
            buffer,
            size: desc.size,
        }))
    }

    fn destroy_buffer(&self, buffer: BufferRepr) {
        match buffer {
            BufferRepr::OpenGl(buffer) => {
                unsafe { self.gl().delete_buffer(buffer.buffer) };
                self.tracker.record_free(buffer.size);
            }
            other => foreign("buffer", other.backend(), BackendKind::OpenGl),
        }
    }

    fn write_buffer(&self, buffer: &BufferRepr, offset: u64, data: &[u8]) -> Result<()> {
        let BufferRepr::OpenGl(buffer) = buffer else {
            foreign("buffer", buffer.backend(), BackendKind::OpenGl)
        };
        let offset = gl_size(offset)?;
        let gl = self.gl();
        bind_buffer(&gl, glow::COPY_WRITE_BUFFER, buffer.buffer);
        unsafe { gl.buffer_sub_data_u8_slice(glow::COPY_WRITE_BUFFER, offset, data) };
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureRepr> {
        let (internal_format, format, ty) = texture_format(desc.format).ok_or_else(|| {
            GpuError::Unsupported(format!("{:?} has no OpenGL format", desc.format))
        })?;
        let width = gl_size(u64::from(desc.width))?;
        let height = gl_size(u64::from(desc.height))?;

        let gl = self.gl();
        let texture = unsafe { gl.create_texture() }.map_err(GpuError::OpenGl)?;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_storage_2d(glow::TEXTURE_2D, 1, internal_format, width, height);
        }

        let byte_size = desc.byte_size();
        self.tracker.record_alloc(byte_size);
        Ok(TextureRepr::OpenGl(GlTexture {
            texture,
            width,
            height,
            format,
            ty,
            byte_size,
        }))
    }

    fn destroy_texture(&self, texture: TextureRepr) {
        match texture {
            TextureRepr::OpenGl(texture) => {
                unsafe { self.gl().delete_texture(texture.texture) };
                self.tracker.record_free(texture.byte_size);
            }
            other => foreign("texture", other.backend(), BackendKind::OpenGl),
        }
    }

    fn create_shader(&self, source: &ShaderSource<'_>) -> Result<ShaderRepr> {
        if source.language != ShaderLanguage::Glsl {
            return Err(GpuError::Unsupported(
                "the OpenGL backend consumes GLSL only".to_string(),
            ));
        }
        let text = std::str::from_utf8(source.code)
            .map_err(|e| GpuError::ShaderCreation(format!("GLSL source is not UTF-8: {e}")))?;
        let stage = match source.stage {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
            ShaderStage::Compute => glow::COMPUTE_SHADER,
        };

        let gl = self.gl();
        unsafe {
            let shader = gl.create_shader(stage).map_err(GpuError::OpenGl)?;
            gl.shader_source(shader, text);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                let log = gl.get_shader_info_log(shader);
                gl.delete_shader(shader);
                return Err(GpuError::ShaderCreation(log));
            }
            Ok(ShaderRepr::OpenGl(shader))
        }
    }

    fn destroy_shader(&self, shader: ShaderRepr) {
        match shader {
            ShaderRepr::OpenGl(shader) => unsafe { self.gl().delete_shader(shader) },
            other => foreign("shader", other.backend(), BackendKind::OpenGl),
        }
    }
}

impl Drop for GlDevice {
    fn drop(&mut self) {
        self.finalize();
    }
}
