//! Strata GPU backend probe
//!
//! Loads a backend, prints the selected device, runs an upload / copy /
//! readback round trip through a device buffer and a device texture, and
//! reports the allocation balance.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p strata-probe -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)
//! - `STRATA_BACKEND`: Backend used when `--backend` is not given
//! - `STRATA_VALIDATION`: Default for validation layers

use anyhow::{bail, ensure, Context};
use strata_gpu::{
    execute_one_shot, AccessFlags, BackendConfig, BackendKind, BufferCopy, CommandPool, CpuBuffer,
    GpuBuffer, GpuTexture, GraphicsApi, ImageBarrier, ImageLayout, MemoryType, PipelineStages,
    QueueFamily, TextureFormat, UsageFlags,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_SIZE: u64 = 64 * 1024;
const TEXTURE_SIZE: u32 = 64;

/// Probe options from the command line.
#[derive(Debug, Clone)]
struct ProbeParams {
    backend: BackendKind,
    validation: Option<bool>,
    size: u64,
}

impl ProbeParams {
    fn from_args() -> anyhow::Result<Self> {
        let mut params = Self {
            backend: BackendKind::from_env().unwrap_or(BackendKind::Software),
            validation: None,
            size: DEFAULT_SIZE,
        };
        let mut args = std::env::args().skip(1);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--backend" => {
                    let value = args.next().context("--backend needs a value")?;
                    params.backend = value.parse()?;
                }
                "--validation" => params.validation = Some(true),
                "--no-validation" => params.validation = Some(false),
                "--size" => {
                    let value = args.next().context("--size needs a value")?;
                    params.size = value
                        .parse()
                        .with_context(|| format!("invalid --size {value:?}"))?;
                }
                other => bail!("unknown argument {other:?} (see --help)"),
            }
        }

        ensure!(
            params.size >= 4 && params.size % 4 == 0,
            "--size must be a non-zero multiple of 4"
        );
        Ok(params)
    }
}

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let params = ProbeParams::from_args()?;
    let mut config = BackendConfig::from_env().app_name("strata-probe");
    if let Some(validation) = params.validation {
        config = config.validation(validation);
    }

    let mut api = GraphicsApi::load(params.backend, &config)
        .with_context(|| format!("failed to load the {} backend", params.backend))?;
    info!("Device: {}", api.device()?.info());

    let outcome = buffer_round_trip(&api, params.size)
        .and_then(|()| texture_round_trip(&api, TEXTURE_SIZE));

    let stats = api.tracker().stats();
    info!(
        "Allocations: {} calls / {} bytes, frees: {} calls / {} bytes, in use: {} bytes",
        stats.alloc_calls,
        stats.allocated,
        stats.free_calls,
        stats.freed,
        stats.in_use()
    );
    for (kind, count) in api.live().outstanding() {
        error!("{} {:?} objects still alive", count, kind);
    }

    // On failure the context is dropped with whatever the round trip left behind.
    outcome?;
    api.destroy_backend();
    ensure!(stats.in_use() == 0, "{} bytes leaked", stats.in_use());
    info!("Probe passed");
    Ok(())
}

fn pattern(words: usize) -> Vec<u32> {
    (0..words as u32)
        .map(|i| i.wrapping_mul(0x9E37_79B9) ^ 0xA5A5_A5A5)
        .collect()
}

fn buffer_round_trip(api: &GraphicsApi, size: u64) -> anyhow::Result<()> {
    let expected = pattern((size / 4) as usize);
    let upload = CpuBuffer::new_with_data(api, bytemuck::cast_slice(&expected))?;
    let readback = CpuBuffer::new(api, size)?;
    let device_buffer = GpuBuffer::new(
        api,
        size,
        UsageFlags::TRANSFER_SOURCE | UsageFlags::TRANSFER_DESTINATION,
        MemoryType::Vram,
    )?;
    let pool = CommandPool::create(api, &api.device()?.queue(QueueFamily::Transfer))?;

    let region = BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    let result = execute_one_shot(api, &pool, |cmd, api| {
        cmd.copy_buffer(api, &upload, &device_buffer, region);
        cmd.memory_barrier(
            api,
            PipelineStages::TRANSFER,
            AccessFlags::TRANSFER_WRITE,
            PipelineStages::TRANSFER,
            AccessFlags::TRANSFER_READ,
        );
        cmd.copy_buffer(api, &device_buffer, &readback, region);
    });
    let matches = readback.as_slice() == bytemuck::cast_slice::<u32, u8>(&expected);

    pool.destroy(api);
    device_buffer.delete(api);
    readback.delete(api);
    upload.delete(api);

    result?;
    ensure!(matches, "buffer readback differs from the uploaded data");
    info!("Buffer round trip of {} bytes succeeded", size);
    Ok(())
}

fn texture_round_trip(api: &GraphicsApi, extent: u32) -> anyhow::Result<()> {
    let pixels: Vec<u8> = [0x20, 0x40, 0x80, 0xFF].repeat((extent * extent) as usize);
    let upload = CpuBuffer::new_with_data(api, &pixels)?;
    let readback = CpuBuffer::new(api, pixels.len() as u64)?;
    let texture = GpuTexture::new(
        api,
        extent,
        extent,
        TextureFormat::Rgba8,
        UsageFlags::TRANSFER_SOURCE | UsageFlags::TRANSFER_DESTINATION | UsageFlags::SAMPLED,
        MemoryType::Vram,
    )?;
    let pool = CommandPool::create(api, &api.device()?.queue(QueueFamily::Graphics))?;

    let result = execute_one_shot(api, &pool, |cmd, api| {
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
    });
    let matches = readback.as_slice() == pixels.as_slice();

    pool.destroy(api);
    texture.delete(api);
    readback.delete(api);
    upload.delete(api);

    result?;
    ensure!(matches, "texture readback differs from the uploaded pixels");
    info!("Texture round trip of {}x{} RGBA8 succeeded", extent, extent);
    Ok(())
}

fn print_help() {
    eprintln!(
        "Strata GPU backend probe

USAGE:
    cargo run -p strata-probe -- [OPTIONS]

OPTIONS:
    --backend <KIND>        Backend to load: vulkan, opengl, software
                            Default: $STRATA_BACKEND or software
    --validation            Enable validation layers
    --no-validation         Disable validation layers
    --size <BYTES>          Bytes moved in the buffer round trip (multiple of 4)
                            Default: {DEFAULT_SIZE}
    -h, --help              Print this help message

EXAMPLES:
    # Exercise the CPU executor
    cargo run -p strata-probe

    # Vulkan with validation layers
    cargo run -p strata-probe -- --backend vulkan --validation

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)
    STRATA_BACKEND          Default backend
    STRATA_VALIDATION       Default validation setting (1/0)"
    );
}
