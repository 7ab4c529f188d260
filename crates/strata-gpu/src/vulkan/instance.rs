//! Vulkan instance creation and physical device selection.

use super::capabilities::{AdapterCapabilities, MIN_API_VERSION};
use crate::api::BackendConfig;
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions the backend itself needs.
fn required_instance_extensions() -> Vec<&'static CStr> {
    vec![
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ]
}

/// Create a Vulkan instance.
///
/// Validation layers that are not installed are skipped with a warning.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub(crate) unsafe fn create_instance(
    entry: &ash::Entry,
    config: &BackendConfig,
) -> Result<ash::Instance> {
    let app_name = CString::new(config.app_name.as_str())
        .map_err(|_| GpuError::BackendInit("application name contains NUL".to_string()))?;
    let engine_name = c"Strata";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(MIN_API_VERSION);

    let extension_names: Vec<*const std::ffi::c_char> = required_instance_extensions()
        .into_iter()
        .chain(config.instance_extensions.iter().map(CString::as_c_str))
        .map(CStr::as_ptr)
        .collect();

    let mut layers = Vec::new();
    if config.enable_validation {
        let available = unsafe { entry.enumerate_instance_layer_properties()? };
        let found = available
            .iter()
            .any(|props| props.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
        if found {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!(
                "Validation layer {} not available",
                VALIDATION_LAYER.to_string_lossy()
            );
        }
    }

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layers)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None)? };
    Ok(instance)
}

/// Queue family indices chosen for each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

/// Pick queue families, preferring dedicated compute and transfer families.
///
/// Compute falls back to the graphics family, and transfer to compute.
pub(crate) fn pick_queue_families(families: &[vk::QueueFamilyProperties]) -> Option<QueueFamilyIndices> {
    let mut graphics_family = None;
    let mut compute_family = None;
    let mut transfer_family = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }
        let flags = family.queue_flags;

        if flags.contains(vk::QueueFlags::COMPUTE)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && compute_family.is_none()
        {
            compute_family = Some(i);
        }

        if flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && !flags.contains(vk::QueueFlags::COMPUTE)
            && transfer_family.is_none()
        {
            transfer_family = Some(i);
        }

        if flags.contains(vk::QueueFlags::GRAPHICS) && graphics_family.is_none() {
            graphics_family = Some(i);
        }
    }

    let graphics = graphics_family?;
    let compute = compute_family.unwrap_or(graphics);
    let transfer = transfer_family.unwrap_or(compute);

    Some(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// Select the best physical device that has a graphics queue family.
///
/// # Safety
/// The instance must be valid.
pub(crate) unsafe fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, AdapterCapabilities, QueueFamilyIndices)> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    let mut best = None;
    let mut best_score = -1;

    for device in devices {
        let capabilities = unsafe { AdapterCapabilities::query(instance, device) };
        let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        let Some(indices) = pick_queue_families(&families) else {
            tracing::debug!("Skipping {}: no graphics queue", capabilities.device_name);
            continue;
        };

        let score = capabilities.score();
        tracing::debug!("Candidate GPU {} scored {}", capabilities.summary(), score);
        if score > best_score {
            best_score = score;
            best = Some((device, capabilities, indices));
        }
    }

    best.ok_or(GpuError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_families_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(
            pick_queue_families(&families),
            Some(QueueFamilyIndices {
                graphics: 0,
                compute: 1,
                transfer: 2
            })
        );
    }

    #[test]
    fn single_family_shared() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        assert_eq!(
            pick_queue_families(&families),
            Some(QueueFamilyIndices {
                graphics: 0,
                compute: 0,
                transfer: 0
            })
        );
    }

    #[test]
    fn graphics_is_required() {
        let families = [family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER)];
        assert_eq!(pick_queue_families(&families), None);
    }
}
