//! Device memory through gpu-allocator.

use crate::error::{GpuError, Result};
use crate::memory::tracking::AllocationTracker;
use crate::vulkan::convert;
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::ptr::NonNull;
use std::sync::Arc;

/// A buffer with its allocation.
#[derive(Debug)]
pub struct VulkanBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) size: u64,
}

impl VulkanBuffer {
    /// Host address of the buffer, if its memory is mapped.
    pub(crate) fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(NonNull::cast)
    }
}

/// An image with its allocation.
#[derive(Debug)]
pub struct VulkanImage {
    pub(crate) image: vk::Image,
    pub(crate) allocation: Option<Allocation>,
    pub(crate) extent: vk::Extent3D,
    pub(crate) aspect: vk::ImageAspectFlags,
    pub(crate) byte_size: u64,
}

/// gpu-allocator wrapper reporting to an [`AllocationTracker`].
pub(crate) struct VulkanAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    tracker: AllocationTracker,
    queue_families: Vec<u32>,
}

impl VulkanAllocator {
    /// Buffers are shared by every family in `queue_families`.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub(crate) unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        tracker: AllocationTracker,
        queue_families: Vec<u32>,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
            tracker,
            queue_families,
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    /// Create a buffer and bind fresh memory to it.
    pub(crate) fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<VulkanBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(convert::sharing_mode(&self.queue_families))
            .queue_family_indices(&self.queue_families);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bind = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        let mut created = VulkanBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        };
        if let Err(e) = bind {
            self.release_buffer(&mut created);
            return Err(e.into());
        }

        self.tracker.record_alloc(size);
        Ok(created)
    }

    fn release_buffer(&mut self, buffer: &mut VulkanBuffer) {
        if let Some(allocation) = buffer.allocation.take() {
            if let Ok(allocator) = self.inner() {
                if let Err(e) = allocator.free(allocation) {
                    tracing::error!("Failed to free buffer memory: {}", e);
                }
            }
        }
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
        }
        buffer.buffer = vk::Buffer::null();
    }

    /// Free a buffer and its memory.
    pub(crate) fn free_buffer(&mut self, mut buffer: VulkanBuffer) {
        let size = buffer.size;
        self.release_buffer(&mut buffer);
        self.tracker.record_free(size);
    }

    /// Create an image and bind fresh memory to it.
    pub(crate) fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo,
        aspect: vk::ImageAspectFlags,
        byte_size: u64,
        location: MemoryLocation,
        name: &str,
    ) -> Result<VulkanImage> {
        let image = unsafe { self.device.create_image(create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let bind = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };

        let mut created = VulkanImage {
            image,
            allocation: Some(allocation),
            extent: create_info.extent,
            aspect,
            byte_size,
        };
        if let Err(e) = bind {
            self.release_image(&mut created);
            return Err(e.into());
        }

        self.tracker.record_alloc(byte_size);
        Ok(created)
    }

    fn release_image(&mut self, image: &mut VulkanImage) {
        if let Some(allocation) = image.allocation.take() {
            if let Ok(allocator) = self.inner() {
                if let Err(e) = allocator.free(allocation) {
                    tracing::error!("Failed to free image memory: {}", e);
                }
            }
        }
        unsafe {
            self.device.destroy_image(image.image, None);
        }
        image.image = vk::Image::null();
    }

    /// Free an image and its memory.
    pub(crate) fn free_image(&mut self, mut image: VulkanImage) {
        let size = image.byte_size;
        self.release_image(&mut image);
        self.tracker.record_free(size);
    }

    /// Drop the allocator, returning all device memory.
    ///
    /// Must run before the device is destroyed. Outstanding allocations are
    /// logged as leaks.
    pub(crate) fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for VulkanAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
