//! Physical device capability detection.

use crate::device::GpuVendor;
use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// Minimum Vulkan version the backend runs on.
pub(crate) const MIN_API_VERSION: u32 = vk::API_VERSION_1_1;

/// Detected properties of a physical device.
#[derive(Debug, Clone)]
pub(crate) struct AdapterCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub device_local_memory_mb: u64,
    pub available_extensions: HashSet<String>,
}

impl AdapterCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub(crate) unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let (properties, memory_properties, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let available_extensions = extensions
            .iter()
            .filter_map(|ext| {
                ext.extension_name_as_c_str()
                    .ok()
                    .and_then(|name| name.to_str().ok())
                    .map(String::from)
            })
            .collect();

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown device".to_string());

        let device_local_memory_mb = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            device_local_memory_mb,
            available_extensions,
        }
    }

    pub(crate) fn supports_extension(&self, name: &CStr) -> bool {
        name.to_str()
            .is_ok_and(|name| self.available_extensions.contains(name))
    }

    /// Whether the device can run the backend at all.
    pub(crate) fn meets_requirements(&self) -> bool {
        self.api_version >= MIN_API_VERSION
    }

    /// Selection score: discrete over integrated over virtual, then VRAM.
    pub(crate) fn score(&self) -> i64 {
        if !self.meets_requirements() {
            return -1;
        }

        let mut score = match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
            _ => 0,
        };
        // +1 per GB
        score += (self.device_local_memory_mb / 1024) as i64;
        score
    }

    /// "major.minor.patch" of the device's Vulkan version.
    pub(crate) fn version_string(&self) -> String {
        format!(
            "Vulkan {}.{}.{}",
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
        )
    }

    /// Human-readable summary.
    pub(crate) fn summary(&self) -> String {
        format!(
            "{} ({:?}) - {} - {} MB VRAM",
            self.device_name,
            self.vendor,
            self.version_string(),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter(device_type: vk::PhysicalDeviceType, vram_mb: u64, api_version: u32) -> AdapterCapabilities {
        AdapterCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test".to_string(),
            device_type,
            api_version,
            device_local_memory_mb: vram_mb,
            available_extensions: HashSet::from(["VK_KHR_swapchain".to_string()]),
        }
    }

    #[test]
    fn discrete_beats_integrated() {
        let discrete = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 2048, vk::API_VERSION_1_2);
        let integrated = adapter(vk::PhysicalDeviceType::INTEGRATED_GPU, 16384, vk::API_VERSION_1_3);
        assert!(discrete.score() > integrated.score());
    }

    #[test]
    fn more_vram_breaks_ties() {
        let small = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 4096, vk::API_VERSION_1_1);
        let large = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 8192, vk::API_VERSION_1_1);
        assert!(large.score() > small.score());
    }

    #[test]
    fn vulkan_1_0_is_rejected() {
        let old = adapter(vk::PhysicalDeviceType::DISCRETE_GPU, 8192, vk::API_VERSION_1_0);
        assert!(!old.meets_requirements());
        assert_eq!(old.score(), -1);
    }

    #[test]
    fn extension_lookup() {
        let a = adapter(vk::PhysicalDeviceType::CPU, 0, vk::API_VERSION_1_1);
        assert!(a.supports_extension(c"VK_KHR_swapchain"));
        assert!(!a.supports_extension(c"VK_KHR_portability_subset"));
        assert_eq!(a.version_string(), "Vulkan 1.1.0");
    }
}
