//! Deferred resource deletion.
//!
//! A resource read or written by in-flight GPU work cannot be freed until
//! the fence guarding that work has been waited on. This queue holds such
//! resources and frees them once their fence retires.

use crate::api::GraphicsApi;
use crate::memory::{CpuBuffer, CpuTexture, GpuBuffer, GpuTexture};
use crate::sync::{Fence, SubmissionTicket};
use std::collections::VecDeque;
use std::sync::Arc;

/// A resource whose deletion can be deferred.
#[derive(Debug)]
pub enum DeferredResource {
    Buffer(GpuBuffer),
    Texture(GpuTexture),
    Staging(CpuBuffer),
    StagingTexture(CpuTexture),
}

impl DeferredResource {
    fn delete(self, api: &GraphicsApi) {
        match self {
            Self::Buffer(buffer) => buffer.delete(api),
            Self::Texture(texture) => texture.delete(api),
            Self::Staging(buffer) => buffer.delete(api),
            Self::StagingTexture(texture) => texture.delete(api),
        }
    }
}

impl From<GpuBuffer> for DeferredResource {
    fn from(buffer: GpuBuffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<GpuTexture> for DeferredResource {
    fn from(texture: GpuTexture) -> Self {
        Self::Texture(texture)
    }
}

impl From<CpuBuffer> for DeferredResource {
    fn from(buffer: CpuBuffer) -> Self {
        Self::Staging(buffer)
    }
}

impl From<CpuTexture> for DeferredResource {
    fn from(texture: CpuTexture) -> Self {
        Self::StagingTexture(texture)
    }
}

/// A resource pending deletion.
#[derive(Debug)]
struct PendingDeletion {
    resource: DeferredResource,
    /// Submissions the fence guarded when the resource was queued.
    tickets: Vec<Arc<SubmissionTicket>>,
}

impl PendingDeletion {
    fn is_retired(&self) -> bool {
        self.tickets.iter().all(|ticket| ticket.is_retired())
    }
}

/// Queue of resources freed once the GPU work using them has completed.
#[derive(Debug, Default)]
pub struct DeferredDeletions {
    pending: VecDeque<PendingDeletion>,
}

impl DeferredDeletions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `resource` for deletion once `fence`'s current submissions retire.
    ///
    /// A resource queued against a fence with nothing pending is freed by
    /// the next [`collect`](Self::collect).
    pub fn queue(&mut self, resource: impl Into<DeferredResource>, fence: &Fence) {
        self.pending.push_back(PendingDeletion {
            resource: resource.into(),
            tickets: fence.tickets(),
        });
    }

    /// Free every resource whose fence has been waited on.
    ///
    /// Returns how many resources were freed.
    pub fn collect(&mut self, api: &GraphicsApi) -> usize {
        let mut kept = VecDeque::with_capacity(self.pending.len());
        let mut freed = 0;

        while let Some(pending) = self.pending.pop_front() {
            if pending.is_retired() {
                pending.resource.delete(api);
                freed += 1;
            } else {
                kept.push_back(pending);
            }
        }
        self.pending = kept;

        if freed > 0 {
            tracing::trace!("Freed {} deferred resources", freed);
        }
        freed
    }

    /// Free all pending deletions immediately.
    ///
    /// Call during shutdown after [`GraphicsApi::wait_idle`].
    pub fn flush(&mut self, api: &GraphicsApi) {
        while let Some(pending) = self.pending.pop_front() {
            pending.resource.delete(api);
        }
    }

    /// Number of pending deletions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for DeferredDeletions {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                "{} deferred deletions dropped without flush",
                self.pending.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{BackendConfig, BackendKind};
    use crate::command::{BufferCopy, CommandBuffer, CommandPool};
    use crate::device::QueueFamily;
    use crate::memory::{MemoryType, UsageFlags};

    fn software() -> GraphicsApi {
        GraphicsApi::load(BackendKind::Software, &BackendConfig::default()).unwrap()
    }

    #[test]
    fn idle_fence_frees_on_next_collect() {
        let api = software();
        let fence = Fence::create(&api).unwrap();
        let mut deletions = DeferredDeletions::new();

        let buffer = GpuBuffer::new(&api, 64, UsageFlags::empty(), MemoryType::Vram).unwrap();
        deletions.queue(buffer, &fence);
        assert_eq!(deletions.pending_count(), 1);

        assert_eq!(deletions.collect(&api), 1);
        assert_eq!(deletions.pending_count(), 0);
        assert_eq!(api.tracker().in_use(), 0);

        fence.destroy(&api);
    }

    #[test]
    fn held_until_fence_waited() {
        let api = software();
        let queue = api.device().unwrap().queue(QueueFamily::Transfer);
        let pool = CommandPool::create(&api, &queue).unwrap();
        let mut cmd = CommandBuffer::create(&api, &pool).unwrap();
        let fence = Fence::create(&api).unwrap();

        let staging = CpuBuffer::new_with_data(&api, &[7u8; 32]).unwrap();
        let dst = GpuBuffer::new(&api, 32, UsageFlags::empty(), MemoryType::Vram).unwrap();

        cmd.begin(&api).unwrap();
        cmd.copy_buffer(
            &api,
            &staging,
            &dst,
            BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: 32,
            },
        );
        cmd.end(&api).unwrap();
        cmd.submit(&api, &[], &[], Some(&fence)).unwrap();

        let mut deletions = DeferredDeletions::new();
        deletions.queue(staging, &fence);
        assert_eq!(deletions.collect(&api), 0);

        fence.wait_for(&api, None).unwrap();
        assert_eq!(deletions.collect(&api), 1);

        deletions.queue(dst, &fence);
        deletions.flush(&api);
        assert_eq!(deletions.pending_count(), 0);
        assert_eq!(api.tracker().in_use(), 0);

        cmd.destroy(&api, &pool);
        pool.destroy(&api);
        fence.destroy(&api);
    }
}
