//! Command pools and command buffers.
//!
//! A [`CommandBuffer`] moves through `Initial -> Recording -> Executable ->
//! Pending`. Commands can only be recorded while `Recording`, and only an
//! `Executable` buffer can be submitted. A `Pending` buffer becomes
//! `Executable` again once its fence has been waited on or the device has
//! been waited idle. Misuse of the state machine is a contract violation
//! and panics.

use crate::api::{GraphicsApi, ObjectKind};
use crate::device::{Queue, Submission};
use crate::error::Result;
use crate::memory::resource::GpuTexture;
use crate::memory::BufferResource;
use crate::repr::{BufferRepr, CommandBufferRepr, CommandPoolRepr, TextureRepr};
use crate::sync::{Fence, InFlight, Semaphore, SubmissionTicket};
use bitflags::bitflags;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

bitflags! {
    /// Pipeline stages. Bit values match Vulkan's.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 0x1;
        const DRAW_INDIRECT = 0x2;
        const VERTEX_INPUT = 0x4;
        const VERTEX_SHADER = 0x8;
        const FRAGMENT_SHADER = 0x80;
        const EARLY_FRAGMENT_TESTS = 0x100;
        const LATE_FRAGMENT_TESTS = 0x200;
        const COLOR_ATTACHMENT_OUTPUT = 0x400;
        const COMPUTE_SHADER = 0x800;
        const TRANSFER = 0x1000;
        const BOTTOM_OF_PIPE = 0x2000;
        const HOST = 0x4000;
        const ALL_GRAPHICS = 0x8000;
        const ALL_COMMANDS = 0x10000;
    }
}

bitflags! {
    /// Memory access kinds. Bit values match Vulkan's.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 0x1;
        const INDEX_READ = 0x2;
        const VERTEX_ATTRIBUTE_READ = 0x4;
        const UNIFORM_READ = 0x8;
        const SHADER_READ = 0x20;
        const SHADER_WRITE = 0x40;
        const COLOR_ATTACHMENT_READ = 0x80;
        const COLOR_ATTACHMENT_WRITE = 0x100;
        const DEPTH_STENCIL_ATTACHMENT_READ = 0x200;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 0x400;
        const TRANSFER_READ = 0x800;
        const TRANSFER_WRITE = 0x1000;
        const HOST_READ = 0x2000;
        const HOST_WRITE = 0x4000;
        const MEMORY_READ = 0x8000;
        const MEMORY_WRITE = 0x10000;
    }
}

/// Texture layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    #[default]
    Undefined,
    General,
    ColorAttachment,
    DepthStencilAttachment,
    ShaderReadOnly,
    TransferSource,
    TransferDestination,
}

impl ImageLayout {
    /// Stages and accesses that use a texture in this layout.
    fn usage(self) -> (PipelineStages, AccessFlags) {
        match self {
            Self::Undefined => (PipelineStages::TOP_OF_PIPE, AccessFlags::empty()),
            Self::General => (
                PipelineStages::ALL_COMMANDS,
                AccessFlags::MEMORY_READ | AccessFlags::MEMORY_WRITE,
            ),
            Self::ColorAttachment => (
                PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                AccessFlags::COLOR_ATTACHMENT_READ | AccessFlags::COLOR_ATTACHMENT_WRITE,
            ),
            Self::DepthStencilAttachment => (
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS,
                AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            Self::ShaderReadOnly => (
                PipelineStages::FRAGMENT_SHADER | PipelineStages::COMPUTE_SHADER,
                AccessFlags::SHADER_READ,
            ),
            Self::TransferSource => (PipelineStages::TRANSFER, AccessFlags::TRANSFER_READ),
            Self::TransferDestination => (PipelineStages::TRANSFER, AccessFlags::TRANSFER_WRITE),
        }
    }
}

/// Layout transition of a whole texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub src_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_stages: PipelineStages,
    pub dst_access: AccessFlags,
    pub old_layout: ImageLayout,
    pub new_layout: ImageLayout,
}

impl ImageBarrier {
    /// Transition with the stages and accesses implied by each layout.
    pub fn layout_transition(old_layout: ImageLayout, new_layout: ImageLayout) -> Self {
        let (src_stages, src_access) = old_layout.usage();
        let (dst_stages, dst_access) = new_layout.usage();
        // Nothing written in the old layout needs to be made visible.
        let src_access = src_access
            & (AccessFlags::SHADER_WRITE
                | AccessFlags::COLOR_ATTACHMENT_WRITE
                | AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | AccessFlags::TRANSFER_WRITE
                | AccessFlags::MEMORY_WRITE);
        Self {
            src_stages,
            src_access,
            dst_stages,
            dst_access,
            old_layout,
            new_layout,
        }
    }
}

/// Byte ranges of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferCopy {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// A command as handed to the backend for recording.
#[derive(Debug)]
pub enum Command<'a> {
    PipelineBarrier {
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
    },
    MemoryBarrier {
        src_stages: PipelineStages,
        src_access: AccessFlags,
        dst_stages: PipelineStages,
        dst_access: AccessFlags,
    },
    ImageBarrier {
        texture: &'a TextureRepr,
        barrier: ImageBarrier,
    },
    CopyBuffer {
        src: &'a BufferRepr,
        dst: &'a BufferRepr,
        region: BufferCopy,
    },
    FillBuffer {
        dst: &'a BufferRepr,
        offset: u64,
        size: u64,
        value: u32,
    },
    /// Copy tightly packed pixels into a texture in `TransferDestination` layout.
    CopyBufferToTexture {
        src: &'a BufferRepr,
        src_offset: u64,
        dst: &'a TextureRepr,
    },
    /// Copy a texture in `TransferSource` layout out as tightly packed pixels.
    CopyTextureToBuffer {
        src: &'a TextureRepr,
        dst: &'a BufferRepr,
        dst_offset: u64,
    },
}

/// Lifecycle state of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferState {
    Initial,
    Recording,
    Executable,
    Pending,
    /// Recording failed; the buffer must be reset or begun again.
    Invalid,
}

#[derive(Debug, Default)]
struct PoolShared {
    live_buffers: AtomicUsize,
    in_flight: InFlight,
}

/// Allocator of command buffers for one queue family.
#[derive(Debug)]
pub struct CommandPool {
    repr: CommandPoolRepr,
    queue: Queue,
    shared: Arc<PoolShared>,
}

impl CommandPool {
    /// Create a pool whose buffers submit to `queue`.
    pub fn create(api: &GraphicsApi, queue: &Queue) -> Result<Self> {
        let repr = api.device()?.create_command_pool(queue)?;
        api.live().acquire(ObjectKind::CommandPool);
        debug!(
            "Created command pool for {:?} queue family {}",
            queue.family(),
            queue.family_index()
        );
        Ok(Self {
            repr,
            queue: *queue,
            shared: Arc::default(),
        })
    }

    /// The queue this pool's buffers submit to.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Number of buffers allocated from this pool and not yet destroyed.
    pub fn live_buffers(&self) -> usize {
        self.shared.live_buffers.load(Ordering::Relaxed)
    }

    /// Destroy the pool.
    ///
    /// Every buffer allocated from it must already be destroyed, and none
    /// may be pending.
    pub fn destroy(self, api: &GraphicsApi) {
        debug_assert!(
            !self.shared.in_flight.any_pending(),
            "CommandPool::destroy: pool destroyed while one of its command buffers is pending"
        );
        let live = self.live_buffers();
        debug_assert!(
            live == 0,
            "CommandPool::destroy: {live} command buffers were never destroyed"
        );
        api.active().destroy_command_pool(self.repr);
        api.live().release(ObjectKind::CommandPool);
        debug!("Destroyed command pool");
    }
}

/// A primary command buffer.
#[derive(Debug)]
pub struct CommandBuffer {
    repr: CommandBufferRepr,
    queue: Queue,
    pool: Arc<PoolShared>,
    state: CommandBufferState,
    submission: Option<Arc<SubmissionTicket>>,
}

impl CommandBuffer {
    /// Allocate a buffer from `pool`. It starts in the `Initial` state.
    pub fn create(api: &GraphicsApi, pool: &CommandPool) -> Result<Self> {
        let repr = api.device()?.allocate_command_buffer(&pool.repr)?;
        pool.shared.live_buffers.fetch_add(1, Ordering::Relaxed);
        api.live().acquire(ObjectKind::CommandBuffer);
        Ok(Self {
            repr,
            queue: pool.queue,
            pool: Arc::clone(&pool.shared),
            state: CommandBufferState::Initial,
            submission: None,
        })
    }

    /// Current state.
    pub fn state(&self) -> CommandBufferState {
        match (&self.state, &self.submission) {
            (CommandBufferState::Pending, Some(ticket)) if ticket.is_retired() => {
                CommandBufferState::Executable
            }
            (state, _) => *state,
        }
    }

    fn refresh(&mut self) {
        self.state = self.state();
        if self.state != CommandBufferState::Pending {
            self.submission = None;
        }
    }

    /// Whether the last submission has not been observed complete.
    pub fn is_pending(&self) -> bool {
        self.state() == CommandBufferState::Pending
    }

    /// Start recording. An `Executable` buffer is implicitly reset.
    ///
    /// # Panics
    /// If the buffer is already recording or is pending.
    pub fn begin(&mut self, api: &GraphicsApi) -> Result<()> {
        self.refresh();
        assert!(
            self.state != CommandBufferState::Recording,
            "CommandBuffer::begin: buffer is already recording"
        );
        assert!(
            self.state != CommandBufferState::Pending,
            "CommandBuffer::begin: buffer is pending execution"
        );

        if let Err(e) = api.active().begin_command_buffer(&mut self.repr) {
            self.state = CommandBufferState::Invalid;
            return Err(e);
        }
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Finish recording.
    ///
    /// # Panics
    /// If the buffer is not recording.
    pub fn end(&mut self, api: &GraphicsApi) -> Result<()> {
        self.expect_recording("end");
        match api.active().end_command_buffer(&mut self.repr) {
            Ok(()) => {
                self.state = CommandBufferState::Executable;
                Ok(())
            }
            Err(e) => {
                self.state = CommandBufferState::Invalid;
                Err(e)
            }
        }
    }

    /// Return the buffer to `Initial`, discarding recorded commands.
    ///
    /// # Panics
    /// If the buffer is pending.
    pub fn reset(&mut self, api: &GraphicsApi) -> Result<()> {
        self.refresh();
        assert!(
            self.state != CommandBufferState::Pending,
            "CommandBuffer::reset: buffer is pending execution"
        );
        api.active().reset_command_buffer(&mut self.repr)?;
        self.state = CommandBufferState::Initial;
        Ok(())
    }

    #[track_caller]
    fn expect_recording(&self, operation: &str) {
        assert!(
            self.state == CommandBufferState::Recording,
            "CommandBuffer::{operation}: buffer is {:?}, not recording",
            self.state
        );
    }

    #[track_caller]
    fn record(&mut self, api: &GraphicsApi, operation: &str, command: &Command<'_>) {
        self.expect_recording(operation);
        api.active().record(&mut self.repr, command);
    }

    /// Execution dependency between stages.
    pub fn pipeline_barrier(
        &mut self,
        api: &GraphicsApi,
        src_stages: PipelineStages,
        dst_stages: PipelineStages,
    ) {
        self.record(
            api,
            "pipeline_barrier",
            &Command::PipelineBarrier {
                src_stages,
                dst_stages,
            },
        );
    }

    /// Global memory dependency.
    pub fn memory_barrier(
        &mut self,
        api: &GraphicsApi,
        src_stages: PipelineStages,
        src_access: AccessFlags,
        dst_stages: PipelineStages,
        dst_access: AccessFlags,
    ) {
        self.record(
            api,
            "memory_barrier",
            &Command::MemoryBarrier {
                src_stages,
                src_access,
                dst_stages,
                dst_access,
            },
        );
    }

    /// Transition `texture` between layouts.
    pub fn image_barrier(&mut self, api: &GraphicsApi, texture: &GpuTexture, barrier: ImageBarrier) {
        self.record(
            api,
            "image_barrier",
            &Command::ImageBarrier {
                texture: texture.repr(),
                barrier,
            },
        );
    }

    /// Copy bytes between buffers.
    ///
    /// # Panics
    /// If either range is out of bounds.
    pub fn copy_buffer(
        &mut self,
        api: &GraphicsApi,
        src: &impl BufferResource,
        dst: &impl BufferResource,
        region: BufferCopy,
    ) {
        assert!(
            in_bounds(region.src_offset, region.size, src.byte_size())
                && in_bounds(region.dst_offset, region.size, dst.byte_size()),
            "CommandBuffer::copy_buffer: {region:?} exceeds source ({}) or destination ({})",
            src.byte_size(),
            dst.byte_size()
        );
        self.record(
            api,
            "copy_buffer",
            &Command::CopyBuffer {
                src: src.buffer_repr(),
                dst: dst.buffer_repr(),
                region,
            },
        );
    }

    /// Fill `size` bytes at `offset` with a repeated 32-bit `value`.
    ///
    /// # Panics
    /// If `offset` or `size` is not a multiple of 4 or the range is out of bounds.
    pub fn fill_buffer(
        &mut self,
        api: &GraphicsApi,
        dst: &impl BufferResource,
        offset: u64,
        size: u64,
        value: u32,
    ) {
        assert!(
            offset % 4 == 0 && size % 4 == 0,
            "CommandBuffer::fill_buffer: offset {offset} and size {size} must be multiples of 4"
        );
        assert!(
            in_bounds(offset, size, dst.byte_size()),
            "CommandBuffer::fill_buffer: {offset}+{size} exceeds {} bytes",
            dst.byte_size()
        );
        self.record(
            api,
            "fill_buffer",
            &Command::FillBuffer {
                dst: dst.buffer_repr(),
                offset,
                size,
                value,
            },
        );
    }

    /// Upload tightly packed pixels starting at `src_offset` into `dst`.
    ///
    /// `dst` must be in [`ImageLayout::TransferDestination`]. On Vulkan a
    /// depth-stencil texture receives its depth plane only.
    ///
    /// # Panics
    /// If the source range is out of bounds.
    pub fn copy_buffer_to_texture(
        &mut self,
        api: &GraphicsApi,
        src: &impl BufferResource,
        src_offset: u64,
        dst: &GpuTexture,
    ) {
        assert!(
            in_bounds(src_offset, dst.byte_size(), src.byte_size()),
            "CommandBuffer::copy_buffer_to_texture: texture needs {} bytes at offset {src_offset}, source has {}",
            dst.byte_size(),
            src.byte_size()
        );
        self.record(
            api,
            "copy_buffer_to_texture",
            &Command::CopyBufferToTexture {
                src: src.buffer_repr(),
                src_offset,
                dst: dst.repr(),
            },
        );
    }

    /// Read back `src` as tightly packed pixels at `dst_offset`.
    ///
    /// `src` must be in [`ImageLayout::TransferSource`].
    pub fn copy_texture_to_buffer(
        &mut self,
        api: &GraphicsApi,
        src: &GpuTexture,
        dst: &impl BufferResource,
        dst_offset: u64,
    ) {
        assert!(
            in_bounds(dst_offset, src.byte_size(), dst.byte_size()),
            "CommandBuffer::copy_texture_to_buffer: texture has {} bytes, destination has {} after offset {dst_offset}",
            src.byte_size(),
            dst.byte_size()
        );
        self.record(
            api,
            "copy_texture_to_buffer",
            &Command::CopyTextureToBuffer {
                src: src.repr(),
                dst: dst.buffer_repr(),
                dst_offset,
            },
        );
    }

    /// Submit to the pool's queue.
    ///
    /// Commands start only after every `wait` semaphore is signaled; every
    /// `signal` semaphore and `fence` fire after all commands retire.
    ///
    /// # Panics
    /// If the buffer is not `Executable`, or `fence` still guards an
    /// unresolved submission.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit(
        &mut self,
        api: &GraphicsApi,
        wait: &[&Semaphore],
        signal: &[&Semaphore],
        fence: Option<&Fence>,
    ) -> Result<()> {
        self.refresh();
        assert!(
            self.state == CommandBufferState::Executable,
            "CommandBuffer::submit: buffer is {:?}, not executable",
            self.state
        );
        if let Some(fence) = fence {
            assert!(
                !fence.is_pending(),
                "CommandBuffer::submit: fence still guards an unresolved submission"
            );
        }

        api.device()?.execute(&Submission {
            queue: &self.queue,
            command_buffer: &self.repr,
            wait_semaphores: wait,
            signal_semaphores: signal,
            fence,
        })?;

        let ticket = SubmissionTicket::new();
        if let Some(fence) = fence {
            fence.arm(Arc::clone(&ticket));
        }
        self.pool.in_flight.push(Arc::clone(&ticket));
        api.in_flight().push(Arc::clone(&ticket));
        self.submission = Some(ticket);
        self.state = CommandBufferState::Pending;
        Ok(())
    }

    /// Return the buffer to `pool`.
    ///
    /// # Panics
    /// If the buffer is pending or `pool` is not the pool it came from.
    pub fn destroy(self, api: &GraphicsApi, pool: &CommandPool) {
        assert!(
            Arc::ptr_eq(&self.pool, &pool.shared),
            "CommandBuffer::destroy: buffer returned to a pool it was not allocated from"
        );
        assert!(
            !self.is_pending(),
            "CommandBuffer::destroy: buffer is pending execution"
        );
        api.active().free_command_buffer(&pool.repr, self.repr);
        pool.shared.live_buffers.fetch_sub(1, Ordering::Relaxed);
        api.live().release(ObjectKind::CommandBuffer);
    }
}

/// Record, submit and wait for a throwaway command buffer.
pub fn execute_one_shot<F>(api: &GraphicsApi, pool: &CommandPool, record: F) -> Result<()>
where
    F: FnOnce(&mut CommandBuffer, &GraphicsApi),
{
    let mut cmd = CommandBuffer::create(api, pool)?;
    let fence = match Fence::create(api) {
        Ok(fence) => fence,
        Err(e) => {
            cmd.destroy(api, pool);
            return Err(e);
        }
    };

    let result = record_and_wait(api, &mut cmd, &fence, record);

    if result.is_err() && cmd.is_pending() && api.wait_idle().is_err() {
        error!("One-shot submission never completed; leaking its command buffer and fence");
        return result;
    }

    fence.destroy(api);
    cmd.destroy(api, pool);
    result
}

/// `offset..offset + size` lies inside `len` bytes without overflowing.
pub(crate) fn in_bounds(offset: u64, size: u64, len: u64) -> bool {
    offset.checked_add(size).is_some_and(|end| end <= len)
}

fn record_and_wait<F>(api: &GraphicsApi, cmd: &mut CommandBuffer, fence: &Fence, record: F) -> Result<()>
where
    F: FnOnce(&mut CommandBuffer, &GraphicsApi),
{
    cmd.begin(api)?;
    record(cmd, api);
    cmd.end(api)?;
    cmd.submit(api, &[], &[], Some(fence))?;
    fence.wait_for(api, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BackendConfig, BackendKind};
    use crate::device::QueueFamily;
    use crate::format::TextureFormat;
    use crate::memory::{AllocationTracker, CpuBuffer, GpuTexture, HostAllocator, MemoryType, UsageFlags};

    fn software() -> GraphicsApi {
        GraphicsApi::load(BackendKind::Software, &BackendConfig::default()).unwrap()
    }

    #[test]
    fn state_machine_round_trip() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Graphics);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let fence = Fence::create(&api).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);

        cmd.begin(&api).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Recording);
        cmd.pipeline_barrier(&api, PipelineStages::TRANSFER, PipelineStages::TRANSFER);
        cmd.end(&api).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);

        cmd.submit(&api, &[], &[], Some(&fence)).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Pending);

        fence.wait_for(&api, None).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);

        // Executable buffers can be resubmitted with the same fence.
        cmd.submit(&api, &[], &[], Some(&fence)).unwrap();
        fence.wait_for(&api, None).unwrap();

        cmd.reset(&api).unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Initial);

        cmd.destroy(&api, &pool);
        fence.destroy(&api);
        pool.destroy(&api);
        assert!(api.live().outstanding().is_empty());
    }

    #[test]
    fn wait_idle_completes_pending_buffers() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Compute);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();

        cmd.begin(&api).unwrap();
        cmd.end(&api).unwrap();
        cmd.submit(&api, &[], &[], None).unwrap();
        assert!(cmd.is_pending());

        api.wait_idle().unwrap();
        assert_eq!(cmd.state(), CommandBufferState::Executable);

        // Beginning an executable buffer resets it implicitly.
        cmd.begin(&api).unwrap();
        cmd.end(&api).unwrap();

        cmd.destroy(&api, &pool);
        pool.destroy(&api);
    }

    #[test]
    #[should_panic(expected = "already recording")]
    fn double_begin_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Graphics);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();

        cmd.begin(&api).unwrap();
        let _ = cmd.begin(&api);
    }

    #[test]
    #[should_panic(expected = "not executable")]
    fn submit_without_end_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Graphics);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();

        cmd.begin(&api).unwrap();
        let _ = cmd.submit(&api, &[], &[], None);
    }

    #[test]
    #[should_panic(expected = "not recording")]
    fn record_outside_recording_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Graphics);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();

        cmd.pipeline_barrier(&api, PipelineStages::TOP_OF_PIPE, PipelineStages::TRANSFER);
    }

    #[test]
    #[should_panic(expected = "pending execution")]
    fn reset_pending_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Graphics);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();

        cmd.begin(&api).unwrap();
        cmd.end(&api).unwrap();
        cmd.submit(&api, &[], &[], None).unwrap();
        let _ = cmd.reset(&api);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "pool destroyed while one of its command buffers is pending")]
    fn destroy_pool_with_pending_buffer_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Graphics);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();

        cmd.begin(&api).unwrap();
        cmd.end(&api).unwrap();
        cmd.submit(&api, &[], &[], None).unwrap();
        pool.destroy(&api);
    }

    #[test]
    #[should_panic(expected = "exceeds source")]
    fn wrapping_copy_region_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Transfer);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();
        let src = CpuBuffer::new(&api, 16).unwrap();
        let dst = CpuBuffer::new(&api, 16).unwrap();

        cmd.begin(&api).unwrap();
        cmd.copy_buffer(
            &api,
            &src,
            &dst,
            BufferCopy {
                src_offset: u64::MAX - 3,
                dst_offset: 0,
                size: 8,
            },
        );
    }

    #[test]
    #[should_panic(expected = "exceeds 16 bytes")]
    fn wrapping_fill_range_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Transfer);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();
        let dst = CpuBuffer::new(&api, 16).unwrap();

        cmd.begin(&api).unwrap();
        cmd.fill_buffer(&api, &dst, u64::MAX - 3, 8, 0);
    }

    #[test]
    #[should_panic(expected = "texture needs")]
    fn short_upload_source_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Graphics);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();
        let src = CpuBuffer::new(&api, 64).unwrap();
        let texture = GpuTexture::new(
            &api,
            4,
            4,
            TextureFormat::Rgba8,
            UsageFlags::TRANSFER_DESTINATION,
            MemoryType::Vram,
        )
        .unwrap();

        cmd.begin(&api).unwrap();
        cmd.copy_buffer_to_texture(&api, &src, 8, &texture);
    }

    #[test]
    #[should_panic(expected = "belongs to")]
    fn foreign_buffer_panics() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Transfer);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();
        let host = HostAllocator::new(AllocationTracker::new());
        let src = CpuBuffer::new(&host, 16).unwrap();
        let dst = CpuBuffer::new(&api, 16).unwrap();

        cmd.begin(&api).unwrap();
        cmd.copy_buffer(
            &api,
            &src,
            &dst,
            BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 16,
            },
        );
    }

    #[test]
    fn range_checks_reject_overflow() {
        assert!(in_bounds(0, 16, 16));
        assert!(in_bounds(16, 0, 16));
        assert!(!in_bounds(8, 9, 16));
        assert!(!in_bounds(u64::MAX - 3, 8, 16));
    }

    #[test]
    fn layout_transition_masks() {
        let barrier = ImageBarrier::layout_transition(
            ImageLayout::Undefined,
            ImageLayout::TransferDestination,
        );
        assert_eq!(barrier.src_stages, PipelineStages::TOP_OF_PIPE);
        assert!(barrier.src_access.is_empty());
        assert_eq!(barrier.dst_access, AccessFlags::TRANSFER_WRITE);

        let barrier = ImageBarrier::layout_transition(
            ImageLayout::TransferDestination,
            ImageLayout::ShaderReadOnly,
        );
        assert_eq!(barrier.src_access, AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access, AccessFlags::SHADER_READ);
    }

    #[test]
    fn one_shot_leaves_nothing_behind() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Transfer);
        let pool = CommandPool::create(&api, &queue).unwrap();

        execute_one_shot(&api, &pool, |cmd, api| {
            cmd.pipeline_barrier(api, PipelineStages::TRANSFER, PipelineStages::HOST);
        })
        .unwrap();

        assert_eq!(pool.live_buffers(), 0);
        pool.destroy(&api);
        assert!(api.live().outstanding().is_empty());
    }
}
