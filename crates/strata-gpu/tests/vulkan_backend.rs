//! The shared scenarios on a real Vulkan device.
//!
//! These tests require a GPU and will be skipped in CI without GPU support.

mod common;

use strata_gpu::{
    BackendConfig, BackendKind, GpuError, GraphicsApi, Shader, ShaderSource, ShaderStage,
};

fn vulkan() -> GraphicsApi {
    common::init_logging();
    GraphicsApi::load(BackendKind::Vulkan, &BackendConfig::default().validation(true)).unwrap()
}

#[test]
#[ignore = "Requires GPU hardware"]
fn device_info_is_populated() {
    let api = vulkan();
    let info = api.device().unwrap().info();
    assert_eq!(info.backend, BackendKind::Vulkan);
    assert!(!info.name.is_empty());
    assert!(info.api_version.starts_with("Vulkan 1."));
}

#[test]
#[ignore = "Requires GPU hardware"]
fn fence_is_reusable() {
    let api = vulkan();
    common::fence_is_reusable(&api);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn semaphore_orders_queues() {
    let api = vulkan();
    common::semaphore_orders_queues(&api, false);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn texture_round_trip() {
    let api = vulkan();
    common::texture_round_trip(&api);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn resources_balance() {
    let api = vulkan();
    common::resources_balance(&api);
}

#[test]
#[ignore = "Requires GPU hardware"]
fn glsl_is_unsupported() {
    let api = vulkan();
    let result = Shader::new(
        &api,
        &ShaderSource::glsl(ShaderStage::Compute, "#version 450\nvoid main() {}"),
    );
    assert!(matches!(result, Err(GpuError::Unsupported(_))));
}
