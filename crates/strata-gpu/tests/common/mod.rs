//! Scenarios shared by the per-backend integration tests.

#![allow(dead_code)]

use strata_gpu::{
    execute_one_shot, AccessFlags, BufferCopy, CommandBuffer, CommandBufferState, CommandPool,
    CpuBuffer, CpuTexture, Fence, GpuBuffer, GpuTexture, GraphicsApi, ImageBarrier, ImageLayout,
    MemoryType, PipelineStages, QueueFamily, Semaphore, TextureFormat, UsageFlags,
};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("strata_gpu=debug")
        .try_init();
}

fn words(buffer: &CpuBuffer) -> Vec<u32> {
    buffer
        .as_slice()
        .chunks_exact(4)
        .map(|word| u32::from_ne_bytes(word.try_into().unwrap()))
        .collect()
}

/// Submit, wait, and submit again with the same fence.
pub fn fence_is_reusable(api: &GraphicsApi) {
    let queue = api.device().unwrap().queue(QueueFamily::Graphics);
    let pool = CommandPool::create(api, &queue).unwrap();
    let mut cmd = CommandBuffer::create(api, &pool).unwrap();
    let fence = Fence::create(api).unwrap();
    let target = CpuBuffer::new(api, 16).unwrap();

    for value in [0x1111_1111u32, 0x2222_2222] {
        cmd.begin(api).unwrap();
        cmd.fill_buffer(api, &target, 0, 16, value);
        cmd.end(api).unwrap();
        cmd.submit(api, &[], &[], Some(&fence)).unwrap();
        assert!(fence.is_pending());

        fence.wait_for(api, None).unwrap();
        assert!(!fence.is_pending());
        assert!(!fence.is_signaled(api).unwrap());
        assert_eq!(cmd.state(), CommandBufferState::Executable);
        assert_eq!(words(&target), [value; 4]);
    }

    target.delete(api);
    fence.destroy(api);
    cmd.destroy(api, &pool);
    pool.destroy(api);
}

/// Buffer B waits on a semaphore buffer A signals, on another queue, and
/// observes everything A wrote.
pub fn semaphore_orders_queues(api: &GraphicsApi, consumer_first: bool) {
    let device = api.device().unwrap();
    let transfer = CommandPool::create(api, &device.queue(QueueFamily::Transfer)).unwrap();
    let compute = CommandPool::create(api, &device.queue(QueueFamily::Compute)).unwrap();
    let mut producer = CommandBuffer::create(api, &transfer).unwrap();
    let mut consumer = CommandBuffer::create(api, &compute).unwrap();
    let ready = Semaphore::create(api).unwrap();
    let done = Fence::create(api).unwrap();

    let shared = GpuBuffer::new(
        api,
        256,
        UsageFlags::TRANSFER_SOURCE | UsageFlags::TRANSFER_DESTINATION,
        MemoryType::Vram,
    )
    .unwrap();
    let readback = CpuBuffer::new(api, 256).unwrap();

    producer.begin(api).unwrap();
    producer.fill_buffer(api, &shared, 0, 256, 0xCAFE_F00D);
    producer.end(api).unwrap();

    consumer.begin(api).unwrap();
    consumer.memory_barrier(
        api,
        PipelineStages::TRANSFER,
        AccessFlags::TRANSFER_WRITE,
        PipelineStages::TRANSFER,
        AccessFlags::TRANSFER_READ,
    );
    consumer.copy_buffer(
        api,
        &shared,
        &readback,
        BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: 256,
        },
    );
    consumer.end(api).unwrap();

    if consumer_first {
        consumer.submit(api, &[&ready], &[], Some(&done)).unwrap();
        producer.submit(api, &[], &[&ready], None).unwrap();
    } else {
        producer.submit(api, &[], &[&ready], None).unwrap();
        consumer.submit(api, &[&ready], &[], Some(&done)).unwrap();
    }
    done.wait_for(api, None).unwrap();
    api.wait_idle().unwrap();

    assert_eq!(words(&readback), [0xCAFE_F00D; 64]);

    readback.delete(api);
    shared.delete(api);
    done.destroy(api);
    ready.destroy(api);
    consumer.destroy(api, &compute);
    producer.destroy(api, &transfer);
    compute.destroy(api);
    transfer.destroy(api);
}

/// A producer thread and a consumer thread share one context; each owns its
/// pool and submits to its own queue, ordered only by a semaphore.
pub fn threads_share_the_context(api: &GraphicsApi) {
    let shared = GpuBuffer::new(
        api,
        64,
        UsageFlags::TRANSFER_SOURCE | UsageFlags::TRANSFER_DESTINATION,
        MemoryType::Vram,
    )
    .unwrap();
    let ready = Semaphore::create(api).unwrap();

    let read = std::thread::scope(|scope| {
        let consumer = scope.spawn(|| {
            let pool = CommandPool::create(api, &api.device().unwrap().queue(QueueFamily::Compute))
                .unwrap();
            let mut cmd = CommandBuffer::create(api, &pool).unwrap();
            let readback = CpuBuffer::new(api, 64).unwrap();
            let done = Fence::create(api).unwrap();

            cmd.begin(api).unwrap();
            cmd.copy_buffer(
                api,
                &shared,
                &readback,
                BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: 64,
                },
            );
            cmd.end(api).unwrap();
            cmd.submit(api, &[&ready], &[], Some(&done)).unwrap();
            done.wait_for(api, None).unwrap();

            let read = words(&readback);
            readback.delete(api);
            done.destroy(api);
            cmd.destroy(api, &pool);
            pool.destroy(api);
            read
        });

        scope.spawn(|| {
            let pool = CommandPool::create(api, &api.device().unwrap().queue(QueueFamily::Transfer))
                .unwrap();
            let mut cmd = CommandBuffer::create(api, &pool).unwrap();
            cmd.begin(api).unwrap();
            cmd.fill_buffer(api, &shared, 0, 64, 0x5EED_1234);
            cmd.end(api).unwrap();
            cmd.submit(api, &[], &[&ready], None).unwrap();
            api.wait_idle().unwrap();
            cmd.destroy(api, &pool);
            pool.destroy(api);
        });

        consumer.join().unwrap()
    });

    assert_eq!(read, [0x5EED_1234; 16]);
    ready.destroy(api);
    shared.delete(api);
}

/// Pixels survive a trip through a device texture.
pub fn texture_round_trip(api: &GraphicsApi) {
    let (width, height) = (32, 16);
    let pixels: Vec<u8> = (0..width * height * 4).map(|i| (i % 253) as u8).collect();
    let upload = CpuTexture::new_with_data(api, width, height, TextureFormat::Rgba8, &pixels).unwrap();
    let readback = CpuTexture::new(api, width, height, TextureFormat::Rgba8).unwrap();
    let texture = GpuTexture::new(
        api,
        width,
        height,
        TextureFormat::Rgba8,
        UsageFlags::TRANSFER_SOURCE | UsageFlags::TRANSFER_DESTINATION,
        MemoryType::Vram,
    )
    .unwrap();
    let pool = CommandPool::create(api, &api.device().unwrap().queue(QueueFamily::Graphics)).unwrap();

    execute_one_shot(api, &pool, |cmd, api| {
        cmd.image_barrier(
            api,
            &texture,
            ImageBarrier::layout_transition(ImageLayout::Undefined, ImageLayout::TransferDestination),
        );
        cmd.copy_buffer_to_texture(api, &upload, 0, &texture);
        cmd.image_barrier(
            api,
            &texture,
            ImageBarrier::layout_transition(
                ImageLayout::TransferDestination,
                ImageLayout::TransferSource,
            ),
        );
        cmd.copy_texture_to_buffer(api, &texture, &readback, 0);
    })
    .unwrap();

    assert_eq!(readback.as_slice(), pixels.as_slice());

    pool.destroy(api);
    texture.delete(api);
    readback.delete(api);
    upload.delete(api);
}

/// Every allocation made through the context is returned.
pub fn resources_balance(api: &GraphicsApi) {
    let solid: Vec<u8> = [0x10, 0x20, 0x30, 0xFF].repeat(64 * 64);
    let mut staging = CpuTexture::new(api, 64, 64, TextureFormat::Rgba8).unwrap();
    staging.copy_data(&solid);
    let dynamic = GpuBuffer::new(api, 1024, UsageFlags::UNIFORM_BUFFER, MemoryType::DynamicVram).unwrap();
    dynamic.write(api, 512, &[1, 2, 3, 4]).unwrap();
    assert!(api.tracker().in_use() >= 64 * 64 * 4 + 1024);

    dynamic.delete(api);
    staging.delete(api);
    assert_eq!(api.tracker().in_use(), 0);
    assert_eq!(api.tracker().alloc_calls(), api.tracker().free_calls());
    assert!(api.live().outstanding().is_empty());
}
