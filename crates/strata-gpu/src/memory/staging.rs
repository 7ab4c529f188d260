//! CPU-side staging buffers and textures.
//!
//! Staging resources are host-visible, host-coherent memory used to move
//! data between the CPU and device resources. Their mapped pointer stays
//! valid from creation until `delete`.

use crate::error::Result;
use crate::format::{image_byte_size, TextureFormat};
use crate::memory::BufferResource;
use crate::repr::BufferRepr;
use std::ptr::NonNull;

/// Source of staging memory.
///
/// Implemented by every backend device, by [`GraphicsApi`] (forwarding to
/// the active backend) and by [`HostAllocator`].
///
/// [`GraphicsApi`]: crate::GraphicsApi
/// [`HostAllocator`]: crate::memory::HostAllocator
pub trait StagingAllocator {
    /// Allocate `size` bytes of mapped, host-coherent memory.
    fn allocate_staging(&self, size: u64) -> Result<StagingBlock>;

    /// Release a block obtained from this allocator.
    fn free_staging(&self, block: StagingBlock);
}

/// A mapped staging allocation.
#[derive(Debug)]
pub struct StagingBlock {
    repr: BufferRepr,
    mapped: NonNull<u8>,
    size: u64,
}

// SAFETY: the block owns its mapping until freed; CPU access goes through
// `&`/`&mut` borrows of the owning staging object.
unsafe impl Send for StagingBlock {}
unsafe impl Sync for StagingBlock {}

impl StagingBlock {
    pub(crate) fn new(repr: BufferRepr, mapped: NonNull<u8>, size: u64) -> Self {
        Self { repr, mapped, size }
    }

    /// Size of the block in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Mapped base address.
    pub fn mapped_ptr(&self) -> *mut u8 {
        self.mapped.as_ptr()
    }

    pub(crate) fn repr(&self) -> &BufferRepr {
        &self.repr
    }

    pub(crate) fn into_repr(self) -> BufferRepr {
        self.repr
    }
}

/// Host-visible buffer of a fixed byte size.
#[derive(Debug)]
pub struct CpuBuffer {
    block: StagingBlock,
}

impl CpuBuffer {
    /// Allocate a buffer of `size` bytes.
    pub fn new<A: StagingAllocator + ?Sized>(allocator: &A, size: u64) -> Result<Self> {
        let block = allocator.allocate_staging(size)?;
        tracing::debug!("Allocated {} byte staging buffer", size);
        Ok(Self { block })
    }

    /// Allocate a buffer sized to `data` and fill it.
    pub fn new_with_data<A: StagingAllocator + ?Sized>(allocator: &A, data: &[u8]) -> Result<Self> {
        let mut buffer = Self::new(allocator, data.len() as u64)?;
        buffer.copy_data(data);
        Ok(buffer)
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.block.size
    }

    /// Mapped pointer, stable until [`delete`](Self::delete).
    pub fn pointer(&self) -> *mut u8 {
        self.block.mapped_ptr()
    }

    /// View the mapped memory.
    ///
    /// The contents are only meaningful once any GPU write into this buffer
    /// has been waited on.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block maps exactly `size` bytes for as long as `self` lives.
        unsafe { std::slice::from_raw_parts(self.block.mapped_ptr(), self.block.size as usize) }
    }

    /// Mutable view of the mapped memory.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` makes this the only CPU view.
        unsafe {
            std::slice::from_raw_parts_mut(self.block.mapped_ptr(), self.block.size as usize)
        }
    }

    /// Copy exactly `size()` bytes from `source`.
    ///
    /// # Panics
    /// If `source` is shorter than the buffer.
    pub fn copy_data(&mut self, source: &[u8]) {
        let size = self.block.size as usize;
        assert!(
            source.len() >= size,
            "CpuBuffer::copy_data: source has {} bytes, buffer needs {}",
            source.len(),
            size
        );
        self.as_mut_slice().copy_from_slice(&source[..size]);
    }

    /// Write plain-old-data values starting at byte `offset`.
    ///
    /// # Panics
    /// If the write does not fit in the buffer.
    pub fn write_pod<T: bytemuck::Pod>(&mut self, offset: u64, values: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let start = offset as usize;
        let end = start + bytes.len();
        assert!(
            end as u64 <= self.block.size,
            "CpuBuffer::write_pod: range {start}..{end} exceeds {} bytes",
            self.block.size
        );
        self.as_mut_slice()[start..end].copy_from_slice(bytes);
    }

    /// Release the memory back to `allocator`.
    pub fn delete<A: StagingAllocator + ?Sized>(self, allocator: &A) {
        allocator.free_staging(self.block);
    }
}

impl BufferResource for CpuBuffer {
    fn buffer_repr(&self) -> &BufferRepr {
        self.block.repr()
    }

    fn byte_size(&self) -> u64 {
        self.block.size
    }
}

/// Host-visible pixel storage of `width * height * pixel_size(format)` bytes.
#[derive(Debug)]
pub struct CpuTexture {
    buffer: CpuBuffer,
    format: TextureFormat,
    width: u32,
    height: u32,
}

impl CpuTexture {
    /// Allocate storage for a `width` x `height` image.
    pub fn new<A: StagingAllocator + ?Sized>(
        allocator: &A,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self> {
        let buffer = CpuBuffer::new(allocator, image_byte_size(width, height, format))?;
        Ok(Self {
            buffer,
            format,
            width,
            height,
        })
    }

    /// Allocate and fill from tightly packed `pixels`.
    pub fn new_with_data<A: StagingAllocator + ?Sized>(
        allocator: &A,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
    ) -> Result<Self> {
        let mut texture = Self::new(allocator, width, height, format)?;
        texture.copy_data(pixels);
        Ok(texture)
    }

    /// Copy exactly `byte_size()` bytes of pixels from `source`.
    ///
    /// # Panics
    /// If `source` is shorter than the texture.
    pub fn copy_data(&mut self, source: &[u8]) {
        self.buffer.copy_data(source);
    }

    /// Mapped pointer, stable until [`delete`](Self::delete).
    pub fn pointer(&self) -> *mut u8 {
        self.buffer.pointer()
    }

    /// View the pixel bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Mutable view of the pixel bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel format.
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Size of the pixel storage in bytes.
    pub fn byte_size(&self) -> u64 {
        self.buffer.size()
    }

    /// Release the memory back to `allocator`.
    pub fn delete<A: StagingAllocator + ?Sized>(self, allocator: &A) {
        self.buffer.delete(allocator);
    }
}

impl BufferResource for CpuTexture {
    fn buffer_repr(&self) -> &BufferRepr {
        self.buffer.buffer_repr()
    }

    fn byte_size(&self) -> u64 {
        self.buffer.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GpuError;
    use crate::format::pixel_size;
    use crate::memory::{AllocationTracker, HostAllocator};

    #[test]
    fn texture_size_matches_format() {
        let tracker = AllocationTracker::new();
        let allocator = HostAllocator::new(tracker.clone());

        for format in TextureFormat::ALL {
            let (w, h) = (7, 5);
            let expected = (w * h * pixel_size(format)) as usize;
            let pattern: Vec<u8> = (0..expected).map(|i| (i * 31 % 251) as u8).collect();

            let texture = CpuTexture::new_with_data(&allocator, w, h, format, &pattern).unwrap();
            assert_eq!(texture.byte_size() as usize, expected, "{format:?}");
            assert_eq!(texture.as_slice(), &pattern[..], "{format:?}");
            assert_eq!(tracker.in_use() as usize, expected);

            texture.delete(&allocator);
            assert_eq!(tracker.in_use(), 0);
        }
    }

    #[test]
    fn solid_color_texture_leaves_nothing_behind() {
        let tracker = AllocationTracker::new();
        let allocator = HostAllocator::new(tracker.clone());

        let solid: Vec<u8> = [0x20, 0x40, 0x80, 0xFF].repeat(64 * 64);
        let mut texture = CpuTexture::new(&allocator, 64, 64, TextureFormat::Rgba8).unwrap();
        assert_eq!(tracker.in_use(), 64 * 64 * 4);

        texture.copy_data(&solid);
        assert!(texture.as_slice().chunks(4).all(|px| px == [0x20, 0x40, 0x80, 0xFF]));

        texture.delete(&allocator);
        assert_eq!(tracker.in_use(), 0);
        assert_eq!(tracker.alloc_calls(), tracker.free_calls());
    }

    #[test]
    fn copy_uses_exact_size() {
        let allocator = HostAllocator::default();
        let mut buffer = CpuBuffer::new(&allocator, 4).unwrap();

        buffer.copy_data(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(buffer.as_slice(), &[1, 2, 3, 4]);

        buffer.delete(&allocator);
    }

    #[test]
    #[should_panic(expected = "source has 2 bytes")]
    fn short_copy_source_panics() {
        let allocator = HostAllocator::default();
        let mut buffer = CpuBuffer::new(&allocator, 4).unwrap();
        buffer.copy_data(&[1, 2]);
    }

    #[test]
    fn write_pod_values() {
        let allocator = HostAllocator::default();
        let mut buffer = CpuBuffer::new(&allocator, 16).unwrap();

        buffer.write_pod(4, &[0xAABB_CCDDu32, 7]);
        let words: Vec<u32> = buffer
            .as_slice()
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(words, [0, 0xAABB_CCDD, 7, 0]);

        buffer.delete(&allocator);
    }

    #[test]
    fn unknown_format_cannot_allocate() {
        let allocator = HostAllocator::default();
        let result = CpuTexture::new(&allocator, 8, 8, TextureFormat::Unknown);
        assert!(matches!(result, Err(GpuError::AllocationFailed(_))));
    }
}
