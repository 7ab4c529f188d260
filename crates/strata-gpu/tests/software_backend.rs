mod common;

use std::time::Duration;
use strata_gpu::{
    execute_one_shot, AllocationTracker, BackendConfig, BackendKind, BufferCopy, CommandBuffer,
    CommandPool, CpuBuffer, CpuTexture, Fence, GpuBuffer, GpuError, GraphicsApi, MemoryType,
    QueueFamily, Semaphore, Shader, ShaderSource, ShaderStage, TextureFormat, UsageFlags,
};

fn software() -> GraphicsApi {
    common::init_logging();
    GraphicsApi::load(BackendKind::Software, &BackendConfig::default()).unwrap()
}

#[test]
fn fence_is_reusable() {
    let api = software();
    common::fence_is_reusable(&api);
}

#[test]
fn semaphore_orders_queues() {
    let api = software();
    common::semaphore_orders_queues(&api, false);
}

#[test]
fn waiter_submitted_before_signaler() {
    let api = software();
    common::semaphore_orders_queues(&api, true);
}

#[test]
fn threads_share_the_context() {
    let api = software();
    common::threads_share_the_context(&api);
}

#[test]
fn texture_round_trip() {
    let api = software();
    common::texture_round_trip(&api);
}

#[test]
fn resources_balance() {
    let api = software();
    common::resources_balance(&api);
}

#[test]
fn unsupported_backend_leaves_nothing_active() {
    common::init_logging();
    let mut api = GraphicsApi::new();

    let result = api.create_backend(BackendKind::None, &BackendConfig::default());
    assert!(matches!(result, Err(GpuError::Unsupported(_))));
    assert_eq!(api.current(), BackendKind::None);

    assert!(matches!(api.device(), Err(GpuError::NoBackend)));
    assert!(matches!(Fence::create(&api), Err(GpuError::NoBackend)));
    assert!(matches!(Semaphore::create(&api), Err(GpuError::NoBackend)));
    assert!(matches!(
        GpuBuffer::new(&api, 16, UsageFlags::empty(), MemoryType::Vram),
        Err(GpuError::NoBackend)
    ));
    assert!(matches!(
        CpuTexture::new(&api, 4, 4, TextureFormat::Rgba8),
        Err(GpuError::NoBackend)
    ));
}

#[test]
fn injected_tracker_sees_every_allocation() {
    common::init_logging();
    let tracker = AllocationTracker::new();
    let mut api = GraphicsApi::with_tracker(tracker.clone());
    api.create_backend(BackendKind::Software, &BackendConfig::default())
        .unwrap();

    let solid: Vec<u8> = [0x20, 0x40, 0x80, 0xFF].repeat(64 * 64);
    let mut texture = CpuTexture::new(&api, 64, 64, TextureFormat::Rgba8).unwrap();
    assert_eq!(tracker.in_use(), 64 * 64 * 4);
    texture.copy_data(&solid);
    texture.delete(&api);

    api.destroy_backend();
    assert_eq!(tracker.in_use(), 0);
    assert_eq!(tracker.alloc_calls(), 1);
    assert_eq!(tracker.free_calls(), 1);
}

#[test]
fn bounded_wait_times_out_then_recovers() {
    let api = software();
    let queue = api.device().unwrap().queue(QueueFamily::Compute);
    let pool = CommandPool::create(&api, &queue).unwrap();
    let mut waiter = CommandBuffer::create(&api, &pool).unwrap();
    let gate = Semaphore::create(&api).unwrap();
    let fence = Fence::create(&api).unwrap();

    waiter.begin(&api).unwrap();
    waiter.end(&api).unwrap();
    waiter.submit(&api, &[&gate], &[], Some(&fence)).unwrap();

    let result = fence.wait_for(&api, Some(Duration::from_millis(5)));
    assert!(matches!(result, Err(GpuError::Timeout)));
    assert!(fence.is_pending());

    // The waiter is at the front of the same queue, so signal from another.
    let transfer = CommandPool::create(&api, &api.device().unwrap().queue(QueueFamily::Transfer))
        .unwrap();
    let mut unblock = CommandBuffer::create(&api, &transfer).unwrap();
    unblock.begin(&api).unwrap();
    unblock.end(&api).unwrap();
    unblock.submit(&api, &[], &[&gate], None).unwrap();

    fence.wait_for(&api, Some(Duration::from_secs(1))).unwrap();
    api.wait_idle().unwrap();

    unblock.destroy(&api, &transfer);
    transfer.destroy(&api);
    waiter.destroy(&api, &pool);
    fence.destroy(&api);
    gate.destroy(&api);
    pool.destroy(&api);
}

#[test]
fn copy_between_device_buffers() {
    let api = software();
    let pool = CommandPool::create(&api, &api.device().unwrap().queue(QueueFamily::Transfer))
        .unwrap();
    let src = GpuBuffer::new(&api, 64, UsageFlags::TRANSFER_SOURCE, MemoryType::DynamicVram)
        .unwrap();
    let dst = GpuBuffer::new(&api, 64, UsageFlags::TRANSFER_DESTINATION, MemoryType::Vram).unwrap();
    let readback = CpuBuffer::new(&api, 32).unwrap();
    src.write(&api, 0, &[9u8; 64]).unwrap();

    execute_one_shot(&api, &pool, |cmd, api| {
        cmd.copy_buffer(
            api,
            &src,
            &dst,
            BufferCopy {
                src_offset: 16,
                dst_offset: 32,
                size: 32,
            },
        );
        cmd.copy_buffer(
            api,
            &dst,
            &readback,
            BufferCopy {
                src_offset: 24,
                dst_offset: 0,
                size: 32,
            },
        );
    })
    .unwrap();

    let mut expected = vec![0u8; 8];
    expected.extend([9u8; 24]);
    assert_eq!(readback.as_slice(), expected.as_slice());

    readback.delete(&api);
    dst.delete(&api);
    src.delete(&api);
    pool.destroy(&api);
}

#[test]
fn shader_blob_is_accepted() {
    let api = software();
    let words = [0x0723_0203u32, 0x0001_0000];
    let shader = Shader::new(
        &api,
        &ShaderSource::spirv(ShaderStage::Compute, bytemuck::cast_slice(&words)),
    )
    .unwrap();
    assert_eq!(shader.stage(), ShaderStage::Compute);
    shader.delete(&api);
}

#[test]
#[should_panic(expected = "not executable")]
fn submit_without_end_panics() {
    let api = software();
    let pool = CommandPool::create(&api, &api.device().unwrap().queue(QueueFamily::Graphics))
        .unwrap();
    let mut cmd = CommandBuffer::create(&api, &pool).unwrap();
    cmd.begin(&api).unwrap();
    let _ = cmd.submit(&api, &[], &[], None);
}

#[test]
#[cfg(debug_assertions)]
#[should_panic(expected = "pending")]
fn destroying_pool_with_pending_buffer_panics() {
    let api = software();
    let pool = CommandPool::create(&api, &api.device().unwrap().queue(QueueFamily::Graphics))
        .unwrap();
    let mut cmd = CommandBuffer::create(&api, &pool).unwrap();
    cmd.begin(&api).unwrap();
    cmd.end(&api).unwrap();
    cmd.submit(&api, &[], &[], None).unwrap();
    pool.destroy(&api);
}
