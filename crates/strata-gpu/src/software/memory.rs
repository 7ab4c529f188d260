//! Fixed-address host allocations backing software buffers and textures.
//!
//! Staging allocations hand their base pointer to the CPU, so the executor
//! never forms references into this memory. All access goes through raw
//! pointer copies.

use crate::command::BufferCopy;
use crate::error::{GpuError, Result};
use std::fmt;
use std::ptr::NonNull;

pub(super) struct Memory {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the allocation is owned by `Memory`; the executor touches it only
// while holding the device state lock, and mapped staging writes follow the
// usual fence contract.
unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl Memory {
    pub(super) fn new(size: u64) -> Result<Self> {
        let len = usize::try_from(size)
            .map_err(|_| GpuError::AllocationFailed(format!("{size} bytes exceeds address space")))?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
        data.resize(len, 0u8);

        let raw = Box::into_raw(data.into_boxed_slice());
        let ptr = NonNull::new(raw.cast::<u8>()).unwrap_or(NonNull::dangling());
        Ok(Self { ptr, len })
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    pub(super) fn mapped(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Start of `offset..offset + size` as a host index.
    ///
    /// # Panics
    /// If the range leaves the allocation.
    fn checked_range(&self, offset: u64, size: u64) -> usize {
        assert!(
            offset
                .checked_add(size)
                .is_some_and(|end| end <= self.len as u64),
            "software memory access {offset}+{size} outside {} bytes",
            self.len
        );
        offset as usize
    }

    pub(super) fn copy(src: &Self, dst: &Self, region: BufferCopy) {
        let src_offset = src.checked_range(region.src_offset, region.size);
        let dst_offset = dst.checked_range(region.dst_offset, region.size);
        let size = region.size as usize;
        // SAFETY: both ranges lie inside their allocations; `copy` tolerates overlap.
        unsafe {
            std::ptr::copy(
                src.ptr.as_ptr().add(src_offset),
                dst.ptr.as_ptr().add(dst_offset),
                size,
            );
        }
    }

    pub(super) fn fill(&self, offset: u64, size: u64, value: u32) {
        let offset = self.checked_range(offset, size);
        let size = size as usize;
        let pattern = value.to_ne_bytes();
        for at in (offset..offset + size).step_by(4) {
            // SAFETY: `offset..offset + size` lies inside the allocation.
            unsafe {
                std::ptr::copy_nonoverlapping(pattern.as_ptr(), self.ptr.as_ptr().add(at), 4);
            }
        }
    }

    pub(super) fn write(&self, offset: u64, data: &[u8]) {
        let offset = self.checked_range(offset, data.len() as u64);
        // SAFETY: the range lies inside the allocation; `data` cannot alias device memory.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
    }

    #[cfg(test)]
    pub(super) fn to_vec(&self) -> Vec<u8> {
        // SAFETY: the allocation is `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }.to_vec()
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: `ptr` and `len` came from `Box::into_raw` of a boxed slice.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_then_copy_within_bounds() {
        let src = Memory::new(16).unwrap();
        let dst = Memory::new(16).unwrap();
        src.fill(0, 16, 0x0102_0304);
        Memory::copy(
            &src,
            &dst,
            BufferCopy {
                src_offset: 4,
                dst_offset: 8,
                size: 8,
            },
        );
        let pattern = 0x0102_0304u32.to_ne_bytes();
        assert_eq!(&dst.to_vec()[..8], &[0u8; 8]);
        assert_eq!(&dst.to_vec()[8..12], &pattern);
    }

    #[test]
    #[should_panic(expected = "outside 16 bytes")]
    fn wrapping_copy_range_panics() {
        let src = Memory::new(16).unwrap();
        let dst = Memory::new(16).unwrap();
        Memory::copy(
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
    #[should_panic(expected = "outside 8 bytes")]
    fn write_past_end_panics() {
        let memory = Memory::new(8).unwrap();
        memory.write(4, &[0u8; 8]);
    }
}
