//! Vulkan backend.

mod allocator;
mod capabilities;
mod convert;
mod instance;

pub use allocator::{VulkanBuffer, VulkanImage};

use crate::api::{BackendConfig, BackendKind};
use crate::command::Command;
use crate::device::{DeviceInfo, GpuDevice, Queue, QueueFamily, Submission};
use crate::error::{GpuError, Result};
use crate::memory::resource::{BufferDesc, TextureDesc};
use crate::memory::staging::{StagingAllocator, StagingBlock};
use crate::memory::tracking::AllocationTracker;
use crate::repr::{
    foreign, BufferRepr, CommandBufferRepr, CommandPoolRepr, FenceRepr, QueueRepr, SemaphoreRepr,
    ShaderRepr, TextureRepr,
};
use crate::shader::{ShaderLanguage, ShaderSource};
use allocator::VulkanAllocator;
use ash::vk;
use capabilities::AdapterCapabilities;
use gpu_allocator::MemoryLocation;
use instance::{create_instance, select_physical_device, QueueFamilyIndices};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Map a native failure, singling out device loss.
fn vk_error(result: vk::Result) -> GpuError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => {
            GpuError::DeviceLost("Vulkan reported VK_ERROR_DEVICE_LOST".to_string())
        }
        other => GpuError::Vulkan(other),
    }
}

fn check_extent(desc: &TextureDesc, max: vk::Extent3D) -> Result<()> {
    if desc.width > max.width || desc.height > max.height {
        return Err(GpuError::Unsupported(format!(
            "{}x{} {:?} texture exceeds the device limit of {}x{}",
            desc.width, desc.height, desc.format, max.width, max.height
        )));
    }
    Ok(())
}

/// The Vulkan logical device and everything needed to tear it down.
pub struct VulkanDevice {
    // Entry must be kept alive for the lifetime of the instance
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    allocator: Mutex<VulkanAllocator>,
    info: DeviceInfo,
    queues: [vk::Queue; 3],
    queue_families: Vec<u32>,
    finalized: bool,
}

impl VulkanDevice {
    /// Create the instance, pick a physical device and open it.
    pub fn initialize(config: &BackendConfig, tracker: AllocationTracker) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::BackendInit(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, config) }?;

        let opened = unsafe { open_device(&instance, config) };
        let (physical_device, capabilities, families, device) = match opened {
            Ok(parts) => parts,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        let device = Arc::new(device);

        let queue_families =
            convert::unique_families([families.graphics, families.compute, families.transfer]);
        let allocator = match unsafe {
            VulkanAllocator::new(
                &instance,
                Arc::clone(&device),
                physical_device,
                tracker,
                queue_families.clone(),
            )
        } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let queues = unsafe {
            [
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.compute, 0),
                device.get_device_queue(families.transfer, 0),
            ]
        };

        info!("Selected GPU: {}", capabilities.summary());

        let info = DeviceInfo {
            backend: BackendKind::Vulkan,
            name: capabilities.device_name.clone(),
            vendor: capabilities.vendor,
            api_version: capabilities.version_string(),
            graphics_family: families.graphics,
            compute_family: families.compute,
            transfer_family: families.transfer,
        };

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            allocator: Mutex::new(allocator),
            info,
            queues,
            queue_families,
            finalized: false,
        })
    }

    /// The raw device, for interop with code outside this crate.
    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    /// The raw instance.
    pub fn raw_instance(&self) -> &ash::Instance {
        &self.instance
    }

    fn command_buffer(repr: &CommandBufferRepr) -> vk::CommandBuffer {
        match repr {
            CommandBufferRepr::Vulkan(cmd) => *cmd,
            other => foreign("command buffer", other.backend(), BackendKind::Vulkan),
        }
    }

    fn fence(repr: &FenceRepr) -> vk::Fence {
        match repr {
            FenceRepr::Vulkan(fence) => *fence,
            other => foreign("fence", other.backend(), BackendKind::Vulkan),
        }
    }

    fn semaphore(repr: &SemaphoreRepr) -> vk::Semaphore {
        match repr {
            SemaphoreRepr::Vulkan(semaphore) => *semaphore,
            other => foreign("semaphore", other.backend(), BackendKind::Vulkan),
        }
    }

    fn buffer(repr: &BufferRepr) -> &VulkanBuffer {
        match repr {
            BufferRepr::Vulkan(buffer) => buffer,
            other => foreign("buffer", other.backend(), BackendKind::Vulkan),
        }
    }

    fn image(repr: &TextureRepr) -> &VulkanImage {
        match repr {
            TextureRepr::Vulkan(image) => image,
            other => foreign("texture", other.backend(), BackendKind::Vulkan),
        }
    }

    fn copy_region(image: &VulkanImage, buffer_offset: u64) -> vk::BufferImageCopy {
        vk::BufferImageCopy::default()
            .buffer_offset(buffer_offset)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(convert::copy_aspect(image.aspect))
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(image.extent)
    }
}

/// Open a logical device on the best physical device.
///
/// # Safety
/// The instance must be valid.
unsafe fn open_device(
    instance: &ash::Instance,
    config: &BackendConfig,
) -> Result<(
    vk::PhysicalDevice,
    AdapterCapabilities,
    QueueFamilyIndices,
    ash::Device,
)> {
    let (physical_device, capabilities, families) = unsafe { select_physical_device(instance)? };

    let unique_families: HashSet<u32> = [families.graphics, families.compute, families.transfer]
        .into_iter()
        .collect();

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let mut extensions: Vec<&CStr> = config.device_extensions.iter().map(|e| e.as_c_str()).collect();
    // Portability implementations must have the subset extension enabled.
    let portability = c"VK_KHR_portability_subset";
    if capabilities.supports_extension(portability) {
        extensions.push(portability);
    }
    for extension in &extensions {
        if !capabilities.supports_extension(extension) {
            return Err(GpuError::Vulkan(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
        }
    }
    let extension_names: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };

    Ok((physical_device, capabilities, families, device))
}

impl StagingAllocator for VulkanDevice {
    fn allocate_staging(&self, size: u64) -> Result<StagingBlock> {
        if size == 0 {
            return Err(GpuError::AllocationFailed(
                "zero-sized staging allocation".to_string(),
            ));
        }

        let mut allocator = self.allocator.lock();
        let buffer = allocator.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::CpuToGpu,
            "staging",
        )?;
        let Some(mapped) = buffer.mapped_ptr() else {
            allocator.free_buffer(buffer);
            return Err(GpuError::AllocationFailed(
                "staging memory is not host-visible".to_string(),
            ));
        };

        Ok(StagingBlock::new(BufferRepr::Vulkan(buffer), mapped, size))
    }

    fn free_staging(&self, block: StagingBlock) {
        match block.into_repr() {
            BufferRepr::Vulkan(buffer) => self.allocator.lock().free_buffer(buffer),
            other => foreign("staging buffer", other.backend(), BackendKind::Vulkan),
        }
    }
}

impl GpuDevice for VulkanDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Vulkan
    }

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn queue(&self, family: QueueFamily) -> Queue {
        let handle = match family {
            QueueFamily::Graphics => self.queues[0],
            QueueFamily::Compute => self.queues[1],
            QueueFamily::Transfer => self.queues[2],
        };
        Queue::new(family, self.info.family_index(family), QueueRepr::Vulkan(handle))
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.map_err(vk_error)
    }

    fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        if let Err(e) = unsafe { self.device.device_wait_idle() } {
            warn!("Vulkan device did not go idle before teardown: {:?}", e);
        }
        unsafe {

            // Shutdown allocator BEFORE destroying device
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        debug!("Vulkan device finalized");
    }

    fn create_command_pool(&self, queue: &Queue) -> Result<CommandPoolRepr> {
        if queue.repr().backend() != BackendKind::Vulkan {
            foreign("queue", queue.repr().backend(), BackendKind::Vulkan);
        }
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue.family_index())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { self.device.create_command_pool(&create_info, None) }.map_err(vk_error)?;
        Ok(CommandPoolRepr::Vulkan(pool))
    }

    fn destroy_command_pool(&self, pool: CommandPoolRepr) {
        match pool {
            CommandPoolRepr::Vulkan(pool) => unsafe {
                self.device.destroy_command_pool(pool, None);
            },
            other => foreign("command pool", other.backend(), BackendKind::Vulkan),
        }
    }

    fn allocate_command_buffer(&self, pool: &CommandPoolRepr) -> Result<CommandBufferRepr> {
        let CommandPoolRepr::Vulkan(pool) = pool else {
            foreign("command pool", pool.backend(), BackendKind::Vulkan)
        };
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }.map_err(vk_error)?;
        buffers
            .into_iter()
            .next()
            .map(CommandBufferRepr::Vulkan)
            .ok_or_else(|| GpuError::Other("driver returned no command buffer".to_string()))
    }

    fn free_command_buffer(&self, pool: &CommandPoolRepr, buffer: CommandBufferRepr) {
        let CommandPoolRepr::Vulkan(pool) = pool else {
            foreign("command pool", pool.backend(), BackendKind::Vulkan)
        };
        let cmd = Self::command_buffer(&buffer);
        unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
    }

    fn begin_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()> {
        let cmd = Self::command_buffer(buffer);
        // No ONE_TIME_SUBMIT: executable buffers may be resubmitted.
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(vk_error)
    }

    fn end_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()> {
        let cmd = Self::command_buffer(buffer);
        unsafe { self.device.end_command_buffer(cmd) }.map_err(vk_error)
    }

    fn reset_command_buffer(&self, buffer: &mut CommandBufferRepr) -> Result<()> {
        let cmd = Self::command_buffer(buffer);
        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(vk_error)
    }

    fn record(&self, buffer: &mut CommandBufferRepr, command: &Command<'_>) {
        let cmd = Self::command_buffer(buffer);
        let device = &self.device;

        match *command {
            Command::PipelineBarrier {
                src_stages,
                dst_stages,
            } => unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    convert::stages(src_stages),
                    convert::stages(dst_stages),
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[],
                );
            },
            Command::MemoryBarrier {
                src_stages,
                src_access,
                dst_stages,
                dst_access,
            } => {
                let barrier = vk::MemoryBarrier::default()
                    .src_access_mask(convert::access(src_access))
                    .dst_access_mask(convert::access(dst_access));
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        convert::stages(src_stages),
                        convert::stages(dst_stages),
                        vk::DependencyFlags::empty(),
                        &[barrier],
                        &[],
                        &[],
                    );
                }
            }
            Command::ImageBarrier { texture, barrier } => {
                let image = Self::image(texture);
                let image_barrier = vk::ImageMemoryBarrier::default()
                    .src_access_mask(convert::access(barrier.src_access))
                    .dst_access_mask(convert::access(barrier.dst_access))
                    .old_layout(convert::layout(barrier.old_layout))
                    .new_layout(convert::layout(barrier.new_layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image.image)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(image.aspect)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );
                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        convert::stages(barrier.src_stages),
                        convert::stages(barrier.dst_stages),
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[image_barrier],
                    );
                }
            }
            Command::CopyBuffer { src, dst, region } => {
                let copy = vk::BufferCopy {
                    src_offset: region.src_offset,
                    dst_offset: region.dst_offset,
                    size: region.size,
                };
                unsafe {
                    device.cmd_copy_buffer(
                        cmd,
                        Self::buffer(src).buffer,
                        Self::buffer(dst).buffer,
                        &[copy],
                    );
                }
            }
            Command::FillBuffer {
                dst,
                offset,
                size,
                value,
            } => unsafe {
                device.cmd_fill_buffer(cmd, Self::buffer(dst).buffer, offset, size, value);
            },
            Command::CopyBufferToTexture {
                src,
                src_offset,
                dst,
            } => {
                let image = Self::image(dst);
                let region = Self::copy_region(image, src_offset);
                unsafe {
                    device.cmd_copy_buffer_to_image(
                        cmd,
                        Self::buffer(src).buffer,
                        image.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                }
            }
            Command::CopyTextureToBuffer {
                src,
                dst,
                dst_offset,
            } => {
                let image = Self::image(src);
                let region = Self::copy_region(image, dst_offset);
                unsafe {
                    device.cmd_copy_image_to_buffer(
                        cmd,
                        image.image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        Self::buffer(dst).buffer,
                        &[region],
                    );
                }
            }
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn execute(&self, submission: &Submission<'_>) -> Result<()> {
        let queue = match submission.queue.repr() {
            QueueRepr::Vulkan(queue) => *queue,
            other => foreign("queue", other.backend(), BackendKind::Vulkan),
        };
        let command_buffers = [Self::command_buffer(submission.command_buffer)];

        let wait_semaphores: Vec<vk::Semaphore> = submission
            .wait_semaphores
            .iter()
            .map(|s| Self::semaphore(s.repr()))
            .collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = submission
            .signal_semaphores
            .iter()
            .map(|s| Self::semaphore(s.repr()))
            .collect();

        let fence = match submission.fence {
            Some(fence) => {
                let fence = Self::fence(fence.repr());
                // Left signaled when the device was waited idle instead of the fence.
                if unsafe { self.device.get_fence_status(fence) }.map_err(vk_error)? {
                    unsafe { self.device.reset_fences(&[fence]) }.map_err(vk_error)?;
                }
                fence
            }
            None => vk::Fence::null(),
        };

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        unsafe { self.device.queue_submit(queue, &[submit_info], fence) }.map_err(vk_error)
    }

    fn create_fence(&self) -> Result<FenceRepr> {
        let create_info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&create_info, None) }.map_err(vk_error)?;
        Ok(FenceRepr::Vulkan(fence))
    }

    fn destroy_fence(&self, fence: FenceRepr) {
        let fence = Self::fence(&fence);
        unsafe { self.device.destroy_fence(fence, None) };
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_fence(&self, fence: &FenceRepr, timeout: Option<Duration>) -> Result<()> {
        let fence = Self::fence(fence);
        let timeout_ns =
            timeout.map_or(u64::MAX, |t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX));

        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => return Err(GpuError::Timeout),
            Err(e) => return Err(vk_error(e)),
        }
        unsafe { self.device.reset_fences(&[fence]) }.map_err(vk_error)
    }

    fn fence_signaled(&self, fence: &FenceRepr) -> Result<bool> {
        let fence = Self::fence(fence);
        unsafe { self.device.get_fence_status(fence) }.map_err(vk_error)
    }

    fn create_semaphore(&self) -> Result<SemaphoreRepr> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore =
            unsafe { self.device.create_semaphore(&create_info, None) }.map_err(vk_error)?;
        Ok(SemaphoreRepr::Vulkan(semaphore))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreRepr) {
        let semaphore = Self::semaphore(&semaphore);
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferRepr> {
        let buffer = self.allocator.lock().create_buffer(
            desc.size,
            convert::buffer_usage(desc.usage),
            convert::location(desc.memory_type),
            "buffer",
        )?;
        Ok(BufferRepr::Vulkan(buffer))
    }

    fn destroy_buffer(&self, buffer: BufferRepr) {
        match buffer {
            BufferRepr::Vulkan(buffer) => self.allocator.lock().free_buffer(buffer),
            other => foreign("buffer", other.backend(), BackendKind::Vulkan),
        }
    }

    fn write_buffer(&self, buffer: &BufferRepr, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = Self::buffer(buffer);
        let ptr = buffer
            .mapped_ptr()
            .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<TextureRepr> {
        let format = convert::format(desc.format).ok_or_else(|| {
            GpuError::Unsupported(format!("{:?} has no Vulkan format", desc.format))
        })?;
        let usage = convert::image_usage(desc.usage, desc.format);

        // Reports ERROR_FORMAT_NOT_SUPPORTED for e.g. RGB8 on most desktop GPUs.
        let properties = unsafe {
            self.instance.get_physical_device_image_format_properties(
                self.physical_device,
                format,
                vk::ImageType::TYPE_2D,
                vk::ImageTiling::OPTIMAL,
                usage,
                vk::ImageCreateFlags::empty(),
            )
        }
        .map_err(|e| match e {
            vk::Result::ERROR_FORMAT_NOT_SUPPORTED => {
                GpuError::Unsupported(format!("{:?} is not supported by this device", desc.format))
            }
            other => vk_error(other),
        })?;
        check_extent(desc, properties.max_extent)?;

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(convert::sharing_mode(&self.queue_families))
            .queue_family_indices(&self.queue_families)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = self.allocator.lock().create_image(
            &create_info,
            convert::aspect(desc.format),
            desc.byte_size(),
            convert::location(desc.memory_type),
            "texture",
        )?;
        Ok(TextureRepr::Vulkan(image))
    }

    fn destroy_texture(&self, texture: TextureRepr) {
        match texture {
            TextureRepr::Vulkan(image) => self.allocator.lock().free_image(image),
            other => foreign("texture", other.backend(), BackendKind::Vulkan),
        }
    }

    fn create_shader(&self, source: &ShaderSource<'_>) -> Result<ShaderRepr> {
        if source.language != ShaderLanguage::SpirV {
            return Err(GpuError::Unsupported(
                "the Vulkan backend consumes SPIR-V only".to_string(),
            ));
        }

        let code = ash::util::read_spv(&mut std::io::Cursor::new(source.code))
            .map_err(|e| GpuError::ShaderCreation(e.to_string()))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { self.device.create_shader_module(&create_info, None) }
            .map_err(|e| GpuError::ShaderCreation(e.to_string()))?;
        Ok(ShaderRepr::Vulkan(module))
    }

    fn destroy_shader(&self, shader: ShaderRepr) {
        match shader {
            ShaderRepr::Vulkan(module) => unsafe {
                self.device.destroy_shader_module(module, None);
            },
            other => foreign("shader", other.backend(), BackendKind::Vulkan),
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        self.finalize();
    }
}
