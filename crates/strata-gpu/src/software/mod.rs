//! CPU executor backend.
//!
//! Implements the device protocol without a GPU: memory is host memory,
//! recorded commands are replayed by the CPU, and each queue is a FIFO.
//! A submission runs once it reaches the front of its queue and every wait
//! semaphore is signaled; waiting consumes the signal. Work is driven on
//! submit and on fence queries, so there are no background threads. A
//! blocked fence wait sleeps until another thread's submission makes
//! progress or its timeout expires.

mod memory;

use crate::api::BackendKind;
use crate::command::{BufferCopy, Command};
use crate::device::{DeviceInfo, GpuDevice, GpuVendor, Queue, QueueFamily, Submission};
use crate::error::{GpuError, Result};
use crate::memory::resource::{BufferDesc, TextureDesc};
use crate::memory::staging::{StagingAllocator, StagingBlock};
use crate::memory::tracking::AllocationTracker;
use crate::repr::{
    foreign, BufferRepr, CommandBufferRepr, CommandPoolRepr, FenceRepr, QueueRepr, SemaphoreRepr,
    ShaderRepr, TextureRepr,
};
use crate::shader::ShaderSource;
use hashbrown::HashMap;
use memory::Memory;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Identifier of an object owned by the software device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(u64);

/// A recorded command in replayable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Copy {
        src: ResourceId,
        dst: ResourceId,
        region: BufferCopy,
    },
    Fill {
        dst: ResourceId,
        offset: u64,
        size: u64,
        value: u32,
    },
}

const QUEUE_COUNT: usize = 3;

#[derive(Debug)]
struct PendingSubmit {
    ops: Vec<Op>,
    waits: Vec<ResourceId>,
    signals: Vec<ResourceId>,
    fence: Option<ResourceId>,
}

#[derive(Debug, Default)]
struct SoftwareState {
    next_id: u64,
    memory: HashMap<ResourceId, Memory>,
    fences: HashMap<ResourceId, bool>,
    semaphores: HashMap<ResourceId, bool>,
    queues: [VecDeque<PendingSubmit>; QUEUE_COUNT],
}

impl SoftwareState {
    fn next_id(&mut self) -> ResourceId {
        self.next_id += 1;
        ResourceId(self.next_id)
    }

    fn ready(&self, submit: &PendingSubmit) -> bool {
        submit
            .waits
            .iter()
            .all(|id| self.semaphores.get(id).copied().unwrap_or(false))
    }

    /// Run every submission whose dependencies are met. Returns whether
    /// anything ran.
    fn pump(&mut self) -> bool {
        let mut ran = false;
        loop {
            let mut progressed = false;
            for queue in 0..QUEUE_COUNT {
                while let Some(front) = self.queues[queue].front() {
                    if !self.ready(front) {
                        break;
                    }
                    let Some(submit) = self.queues[queue].pop_front() else {
                        break;
                    };
                    self.run(submit);
                    progressed = true;
                }
            }
            if !progressed {
                return ran;
            }
            ran = true;
        }
    }

    fn run(&mut self, submit: PendingSubmit) {
        for id in &submit.waits {
            if let Some(signaled) = self.semaphores.get_mut(id) {
                *signaled = false;
            }
        }

        for op in &submit.ops {
            match *op {
                Op::Copy { src, dst, region } => {
                    match (self.memory.get(&src), self.memory.get(&dst)) {
                        (Some(src), Some(dst)) => Memory::copy(src, dst, region),
                        _ => error!("Software queue: copy references a destroyed buffer"),
                    }
                }
                Op::Fill {
                    dst,
                    offset,
                    size,
                    value,
                } => match self.memory.get(&dst) {
                    Some(dst) => dst.fill(offset, size, value),
                    None => error!("Software queue: fill references a destroyed buffer"),
                },
            }
        }

        for id in &submit.signals {
            if let Some(signaled) = self.semaphores.get_mut(id) {
                *signaled = true;
            }
        }
        if let Some(fence) = submit.fence {
            if let Some(signaled) = self.fences.get_mut(&fence) {
                *signaled = true;
            }
        }
    }

    fn blocked_queues(&self) -> usize {
        self.queues.iter().filter(|q| !q.is_empty()).count()
    }

    fn memory_len(&self, id: ResourceId) -> u64 {
        self.memory.get(&id).map_or(0, |m| m.len() as u64)
    }
}

/// The software device.
pub struct SoftwareDevice {
    info: DeviceInfo,
    tracker: AllocationTracker,
    state: Mutex<SoftwareState>,
    progress: Condvar,
    finalized: bool,
}

impl SoftwareDevice {
    /// Create the device. Never fails.
    pub fn new(tracker: AllocationTracker) -> Self {
        let info = DeviceInfo {
            backend: BackendKind::Software,
            name: "Strata CPU executor".to_string(),
            vendor: GpuVendor::Cpu,
            api_version: env!("CARGO_PKG_VERSION").to_string(),
            graphics_family: 0,
            compute_family: 1,
            transfer_family: 2,
        };
        info!("Software device ready");
        Self {
            info,
            tracker,
            state: Mutex::new(SoftwareState::default()),
            progress: Condvar::new(),
            finalized: false,
        }
    }

    fn allocate(&self, size: u64) -> Result<(ResourceId, Memory)> {
        let memory = Memory::new(size)?;
        let id = self.state.lock().next_id();
        Ok((id, memory))
    }

    fn insert_memory(&self, id: ResourceId, memory: Memory) {
        self.tracker.record_alloc(memory.len() as u64);
        self.state.lock().memory.insert(id, memory);
    }

    /// Pump the queues and wake blocked waiters if anything ran.
    fn pump(&self, state: &mut SoftwareState) {
        if state.pump() {
            self.progress.notify_all();
        }
    }

    fn release_memory(&self, id: ResourceId) {
        match self.state.lock().memory.remove(&id) {
            Some(memory) => self.tracker.record_free(memory.len() as u64),
            None => warn!("Software device: double free of {:?}", id),
        }
    }
}

fn buffer_id(repr: &BufferRepr) -> ResourceId {
    match repr {
        BufferRepr::Software(id) => *id,
        other => foreign("buffer", other.backend(), BackendKind::Software),
    }
}

fn texture_id(repr: &TextureRepr) -> ResourceId {
    match repr {
        TextureRepr::Software(id) => *id,
        other => foreign("texture", other.backend(), BackendKind::Software),
    }
}

fn semaphore_id(repr: &SemaphoreRepr) -> ResourceId {
    match repr {
        SemaphoreRepr::Software(id) => *id,
        other => foreign("semaphore", other.backend(), BackendKind::Software),
    }
}

fn fence_id(repr: &FenceRepr) -> ResourceId {
    match repr {
        FenceRepr::Software(id) => *id,
        other => foreign("fence", other.backend(), BackendKind::Software),
    }
}

fn ops_mut(repr: &mut CommandBufferRepr) -> &mut Vec<Op> {
    match repr {
        CommandBufferRepr::Software(ops) => ops,
        other => foreign("command buffer", other.backend(), BackendKind::Software),
    }
}

impl StagingAllocator for SoftwareDevice {
    fn allocate_staging(&self, size: u64) -> Result<StagingBlock> {
        if size == 0 {
            return Err(GpuError::AllocationFailed(
                "zero-sized staging allocation".to_string(),
            ));
        }
        let (id, memory) = self.allocate(size)?;
        let mapped = memory.mapped();
        self.insert_memory(id, memory);
        Ok(StagingBlock::new(BufferRepr::Software(id), mapped, size))
    }

    fn free_staging(&self, block: StagingBlock) {
        self.release_memory(buffer_id(block.repr()));
    }
}

impl GpuDevice for SoftwareDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn queue(&self, family: QueueFamily) -> Queue {
        let index = self.info.family_index(family);
        Queue::new(family, index, QueueRepr::Software(index as usize))
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.pump(&mut state);
        while state.blocked_queues() > 0 {
            self.progress.wait(&mut state);
        }
        Ok(())
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let mut state = self.state.lock();
        self.pump(&mut state);
        if state.blocked_queues() > 0 {
            warn!("Software device finalized with blocked submissions");
        }
        if !state.memory.is_empty() {
            warn!(
                "Software device finalized with {} live allocations",
                state.memory.len()
            );
        }
        *state = SoftwareState::default();
        debug!("Software device finalized");
    }

    fn create_command_pool(&self, queue: &Queue) -> Result<CommandPoolRepr> {
        match queue.repr() {
            QueueRepr::Software(_) => Ok(CommandPoolRepr::Software),
            other => foreign("queue", other.backend(), BackendKind::Software),
        }
    }

    fn destroy_command_pool(&self, pool: CommandPoolRepr) {
        if pool.backend() != BackendKind::Software {
            foreign("command pool", pool.backend(), BackendKind::Software);
        }
    }

    fn allocate_command_buffer(&self, pool: &CommandPoolRepr) -> Result<CommandBufferRepr> {
        match pool {
            CommandPoolRepr::Software => Ok(CommandBufferRepr::Software(Vec::new())),
            other => foreign("command pool", other.backend(), BackendKind::Software),
        }
    }

    fn free_command_buffer(&self, _pool: &CommandPoolRepr, buffer: CommandBufferRepr) {
        if buffer.backend() != BackendKind::Software {
            foreign("command buffer", buffer.backend(), BackendKind::Software);
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
        match *command {
            // Execution is serial, so barriers have nothing to order.
            Command::PipelineBarrier { .. } | Command::MemoryBarrier { .. } => {}
            Command::ImageBarrier { texture, .. } => {
                texture_id(texture);
            }
            Command::CopyBuffer { src, dst, region } => ops.push(Op::Copy {
                src: buffer_id(src),
                dst: buffer_id(dst),
                region,
            }),
            Command::FillBuffer {
                dst,
                offset,
                size,
                value,
            } => ops.push(Op::Fill {
                dst: buffer_id(dst),
                offset,
                size,
                value,
            }),
            Command::CopyBufferToTexture {
                src,
                src_offset,
                dst,
            } => {
                let dst = texture_id(dst);
                let size = self.state.lock().memory_len(dst);
                ops.push(Op::Copy {
                    src: buffer_id(src),
                    dst,
                    region: BufferCopy {
                        src_offset,
                        dst_offset: 0,
                        size,
                    },
                });
            }
            Command::CopyTextureToBuffer {
                src,
                dst,
                dst_offset,
            } => {
                let src = texture_id(src);
                let size = self.state.lock().memory_len(src);
                ops.push(Op::Copy {
                    src,
                    dst: buffer_id(dst),
                    region: BufferCopy {
                        src_offset: 0,
                        dst_offset,
                        size,
                    },
                });
            }
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn execute(&self, submission: &Submission<'_>) -> Result<()> {
        let queue = match submission.queue.repr() {
            QueueRepr::Software(index) => *index,
            other => foreign("queue", other.backend(), BackendKind::Software),
        };
        let ops = match submission.command_buffer {
            CommandBufferRepr::Software(ops) => ops.clone(),
            other => foreign("command buffer", other.backend(), BackendKind::Software),
        };
        let waits = submission
            .wait_semaphores
            .iter()
            .map(|s| semaphore_id(s.repr()))
            .collect();
        let signals = submission
            .signal_semaphores
            .iter()
            .map(|s| semaphore_id(s.repr()))
            .collect();
        let fence = submission.fence.map(|f| fence_id(f.repr()));

        let mut state = self.state.lock();
        if let Some(fence) = fence {
            state.fences.insert(fence, false);
        }
        state.queues[queue].push_back(PendingSubmit {
            ops,
            waits,
            signals,
            fence,
        });
        self.pump(&mut state);
        Ok(())
    }

    fn create_fence(&self) -> Result<FenceRepr> {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.fences.insert(id, false);
        Ok(FenceRepr::Software(id))
    }

    fn destroy_fence(&self, fence: FenceRepr) {
        let id = fence_id(&fence);
        self.state.lock().fences.remove(&id);
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_fence(&self, fence: &FenceRepr, timeout: Option<Duration>) -> Result<()> {
        let id = fence_id(fence);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        self.pump(&mut state);

        loop {
            match state.fences.get_mut(&id) {
                Some(signaled) if *signaled => {
                    *signaled = false;
                    return Ok(());
                }
                Some(_) => {}
                None => {
                    return Err(GpuError::InvalidState(
                        "fence was destroyed while being waited on".to_string(),
                    ))
                }
            }

            match deadline {
                Some(deadline) => {
                    if self.progress.wait_until(&mut state, deadline).timed_out() {
                        let signaled = state.fences.get(&id).copied().unwrap_or(false);
                        if !signaled {
                            return Err(GpuError::Timeout);
                        }
                    }
                }
                None => self.progress.wait(&mut state),
            }
        }
    }

    fn fence_signaled(&self, fence: &FenceRepr) -> Result<bool> {
        let id = fence_id(fence);
        let mut state = self.state.lock();
        self.pump(&mut state);
        Ok(state.fences.get(&id).copied().unwrap_or(false))
    }

    fn create_semaphore(&self) -> Result<SemaphoreRepr> {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.semaphores.insert(id, false);
        Ok(SemaphoreRepr::Software(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreRepr) {
        let id = semaphore_id(&semaphore);
        self.state.lock().semaphores.remove(&id);
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferRepr> {
        let (id, memory) = self.allocate(desc.size)?;
        self.insert_memory(id, memory);
        Ok(BufferRepr::Software(id))
    }

    fn destroy_buffer(&self, buffer: BufferRepr) {
        self.release_memory(buffer_id(&buffer));
    }

    fn write_buffer(&self, buffer: &BufferRepr, offset: u64, data: &[u8]) -> Result<()> {
        let id = buffer_id(buffer);
        let state = self.state.lock();
        let memory = state
            .memory
            .get(&id)
            .ok_or_else(|| GpuError::InvalidState("buffer was destroyed".to_string()))?;
        memory.write(offset, data);
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureRepr> {
        let (id, memory) = self.allocate(desc.byte_size())?;
        self.insert_memory(id, memory);
        Ok(TextureRepr::Software(id))
    }

    fn destroy_texture(&self, texture: TextureRepr) {
        self.release_memory(texture_id(&texture));
    }

    fn create_shader(&self, source: &ShaderSource<'_>) -> Result<ShaderRepr> {
        debug!(
            "Software device storing {:?} {:?} shader ({} bytes)",
            source.language,
            source.stage,
            source.code.len()
        );
        Ok(ShaderRepr::Software(source.code.to_vec()))
    }

    fn destroy_shader(&self, shader: ShaderRepr) {
        if shader.backend() != BackendKind::Software {
            foreign("shader", shader.backend(), BackendKind::Software);
        }
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        self.finalize();
    }
}
