//! Tracked host heap allocator for staging memory.

use crate::error::{GpuError, Result};
use crate::memory::staging::{StagingAllocator, StagingBlock};
use crate::memory::tracking::AllocationTracker;
use crate::repr::BufferRepr;
use std::ptr::NonNull;

/// Heap block backing a host staging buffer.
///
/// The block's address never changes while it is alive.
#[derive(Debug)]
pub struct HostBlock {
    data: Box<[u8]>,
}

impl HostBlock {
    fn new(size: u64) -> Result<Self> {
        let len = usize::try_from(size)
            .map_err(|_| GpuError::AllocationFailed(format!("{size} bytes exceeds address space")))?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        data.resize(len, 0);

        Ok(Self {
            data: data.into_boxed_slice(),
        })
    }

    /// Base address of the block.
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Length of the block in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the block is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn mapped(&mut self) -> NonNull<u8> {
        NonNull::new(self.data.as_mut_ptr()).unwrap_or(NonNull::dangling())
    }
}

/// Staging allocator backed by the process heap.
///
/// Used by backends whose staging memory is ordinary host memory, and by
/// tests that need CPU resources without a device.
#[derive(Debug, Clone, Default)]
pub struct HostAllocator {
    tracker: AllocationTracker,
}

impl HostAllocator {
    /// Create an allocator reporting to `tracker`.
    pub fn new(tracker: AllocationTracker) -> Self {
        Self { tracker }
    }

    /// The tracker this allocator reports to.
    pub fn tracker(&self) -> &AllocationTracker {
        &self.tracker
    }
}

impl StagingAllocator for HostAllocator {
    fn allocate_staging(&self, size: u64) -> Result<StagingBlock> {
        if size == 0 {
            return Err(GpuError::AllocationFailed(
                "zero-sized staging allocation".to_string(),
            ));
        }

        let mut block = HostBlock::new(size)?;
        let mapped = block.mapped();
        self.tracker.record_alloc(size);

        Ok(StagingBlock::new(BufferRepr::Host(block), mapped, size))
    }

    fn free_staging(&self, block: StagingBlock) {
        let size = block.size();
        match block.into_repr() {
            BufferRepr::Host(data) => {
                drop(data);
                self.tracker.record_free(size);
            }
            other => panic!(
                "staging block from the {} backend freed through the host allocator",
                other.backend()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_zeroed_and_tracked() {
        let tracker = AllocationTracker::new();
        let allocator = HostAllocator::new(tracker.clone());

        let block = allocator.allocate_staging(256).unwrap();
        assert_eq!(block.size(), 256);
        assert_eq!(tracker.in_use(), 256);

        let bytes = unsafe { std::slice::from_raw_parts(block.mapped_ptr(), 256) };
        assert!(bytes.iter().all(|&b| b == 0));

        allocator.free_staging(block);
        assert_eq!(tracker.in_use(), 0);
        assert_eq!(tracker.free_calls(), 1);
    }

    #[test]
    fn zero_size_is_rejected() {
        let allocator = HostAllocator::default();
        assert!(matches!(
            allocator.allocate_staging(0),
            Err(GpuError::AllocationFailed(_))
        ));
        assert_eq!(allocator.tracker().alloc_calls(), 0);
    }
}
