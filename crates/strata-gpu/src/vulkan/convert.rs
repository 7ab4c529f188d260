//! Mapping of backend-neutral types to Vulkan.

use crate::command::{AccessFlags, ImageLayout, PipelineStages};
use crate::format::TextureFormat;
use crate::memory::resource::{MemoryType, UsageFlags};
use ash::vk;
use gpu_allocator::MemoryLocation;

pub(crate) fn format(format: TextureFormat) -> Option<vk::Format> {
    match format {
        TextureFormat::Unknown => None,
        TextureFormat::R8 => Some(vk::Format::R8_UNORM),
        TextureFormat::Rg8 => Some(vk::Format::R8G8_UNORM),
        TextureFormat::Rgb8 => Some(vk::Format::R8G8B8_UNORM),
        TextureFormat::Rgba8 => Some(vk::Format::R8G8B8A8_UNORM),
        TextureFormat::Bgra8 => Some(vk::Format::B8G8R8A8_UNORM),
        TextureFormat::Rgba16F => Some(vk::Format::R16G16B16A16_SFLOAT),
        TextureFormat::Rgba32F => Some(vk::Format::R32G32B32A32_SFLOAT),
        TextureFormat::Depth32F => Some(vk::Format::D32_SFLOAT),
        TextureFormat::Depth24Stencil8 => Some(vk::Format::D24_UNORM_S8_UINT),
    }
}

/// Aspects covered by layout transitions.
pub(crate) fn aspect(format: TextureFormat) -> vk::ImageAspectFlags {
    if format.has_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Aspect addressed by buffer/image copies, which take one aspect at a time.
///
/// Depth-stencil textures copy their depth plane only; stencil contents are
/// not transferred.
pub(crate) fn copy_aspect(aspect: vk::ImageAspectFlags) -> vk::ImageAspectFlags {
    if aspect.contains(vk::ImageAspectFlags::DEPTH) {
        vk::ImageAspectFlags::DEPTH
    } else {
        aspect
    }
}

/// Distinct queue family indices, in first-seen order.
pub(crate) fn unique_families(families: [u32; 3]) -> Vec<u32> {
    let mut unique = Vec::with_capacity(3);
    for family in families {
        if !unique.contains(&family) {
            unique.push(family);
        }
    }
    unique
}

/// Resources shared by more than one family are created concurrent, so
/// semaphore-ordered access from any queue needs no ownership transfer.
pub(crate) fn sharing_mode(families: &[u32]) -> vk::SharingMode {
    if families.len() > 1 {
        vk::SharingMode::CONCURRENT
    } else {
        vk::SharingMode::EXCLUSIVE
    }
}

pub(crate) fn layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    }
}

pub(crate) fn stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    if stages.is_empty() {
        // Vulkan rejects an empty stage mask.
        return vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    vk::PipelineStageFlags::from_raw(stages.bits())
}

pub(crate) fn access(access: AccessFlags) -> vk::AccessFlags {
    vk::AccessFlags::from_raw(access.bits())
}

/// Buffers can always take part in copies and fills.
pub(crate) fn buffer_usage(usage: UsageFlags) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    if usage.contains(UsageFlags::VERTEX_BUFFER) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(UsageFlags::INDEX_BUFFER) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(UsageFlags::UNIFORM_BUFFER) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    flags
}

pub(crate) fn image_usage(usage: UsageFlags, format: TextureFormat) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if usage.contains(UsageFlags::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if format.is_depth() {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    flags
}

pub(crate) fn location(memory_type: MemoryType) -> MemoryLocation {
    match memory_type {
        MemoryType::Vram => MemoryLocation::GpuOnly,
        MemoryType::DynamicVram => MemoryLocation::CpuToGpu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_known_format_maps() {
        for f in TextureFormat::ALL {
            assert!(format(f).is_some(), "{f:?}");
        }
        assert_eq!(format(TextureFormat::Unknown), None);
    }

    #[test]
    fn stage_and_access_bits_match() {
        assert_eq!(
            stages(PipelineStages::TRANSFER | PipelineStages::COMPUTE_SHADER),
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::COMPUTE_SHADER
        );
        assert_eq!(
            stages(PipelineStages::ALL_COMMANDS),
            vk::PipelineStageFlags::ALL_COMMANDS
        );
        assert_eq!(stages(PipelineStages::empty()), vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(
            access(AccessFlags::TRANSFER_WRITE | AccessFlags::SHADER_READ),
            vk::AccessFlags::TRANSFER_WRITE | vk::AccessFlags::SHADER_READ
        );
        assert_eq!(
            access(AccessFlags::MEMORY_WRITE | AccessFlags::HOST_READ),
            vk::AccessFlags::MEMORY_WRITE | vk::AccessFlags::HOST_READ
        );
    }

    #[test]
    fn depth_aspects() {
        let ds = aspect(TextureFormat::Depth24Stencil8);
        assert_eq!(
            ds,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(copy_aspect(ds), vk::ImageAspectFlags::DEPTH);
        assert_eq!(aspect(TextureFormat::Rgba8), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn distinct_families_share_concurrently() {
        assert_eq!(unique_families([0, 0, 0]), vec![0]);
        assert_eq!(sharing_mode(&unique_families([0, 0, 0])), vk::SharingMode::EXCLUSIVE);

        let families = unique_families([0, 2, 1]);
        assert_eq!(families, vec![0, 2, 1]);
        assert_eq!(sharing_mode(&families), vk::SharingMode::CONCURRENT);

        assert_eq!(unique_families([0, 1, 0]), vec![0, 1]);
    }

    #[test]
    fn memory_locations() {
        assert_eq!(location(MemoryType::Vram), MemoryLocation::GpuOnly);
        assert_eq!(location(MemoryType::DynamicVram), MemoryLocation::CpuToGpu);
    }
}
