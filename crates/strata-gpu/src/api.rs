//! Backend selection and the graphics API context.
//!
//! [`GraphicsApi`] owns exactly one active backend device and is passed by
//! reference to every object that needs device access. Objects created
//! through it must be destroyed through it before the backend is torn down.

use crate::device::GpuDevice;
use crate::error::{GpuError, Result};
use crate::memory::staging::{StagingAllocator, StagingBlock};
use crate::memory::tracking::AllocationTracker;
use crate::software::SoftwareDevice;
use crate::sync::InFlight;
use crate::vulkan::VulkanDevice;
use std::ffi::{c_void, CString};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Native API implementing the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    #[default]
    None,
    Vulkan,
    OpenGl,
    /// CPU executor, always compiled in.
    Software,
}

impl BackendKind {
    /// Read the backend named by `STRATA_BACKEND`, if set and valid.
    pub fn from_env() -> Option<Self> {
        let value = std::env::var("STRATA_BACKEND").ok()?;
        match value.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                warn!("Ignoring STRATA_BACKEND: {}", e);
                None
            }
        }
    }

    /// Whether an implementation of this backend is compiled into this build.
    pub fn is_compiled_in(self) -> bool {
        match self {
            Self::None => false,
            Self::Vulkan | Self::Software => true,
            Self::OpenGl => cfg!(feature = "opengl"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Vulkan => "Vulkan",
            Self::OpenGl => "OpenGL",
            Self::Software => "software",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = GpuError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "vulkan" | "vk" => Ok(Self::Vulkan),
            "opengl" | "gl" => Ok(Self::OpenGl),
            "software" | "sw" | "cpu" => Ok(Self::Software),
            other => Err(GpuError::Unsupported(format!("unknown backend '{other}'"))),
        }
    }
}

/// Resolves OpenGL entry points; supplied by the windowing layer that owns the context.
pub type GlLoader = Arc<dyn Fn(&str) -> *const c_void>;

/// Backend initialization options.
#[derive(Clone)]
pub struct BackendConfig {
    pub(crate) app_name: String,
    pub(crate) enable_validation: bool,
    pub(crate) instance_extensions: Vec<CString>,
    pub(crate) device_extensions: Vec<CString>,
    pub(crate) gl_loader: Option<GlLoader>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            app_name: "Strata".to_string(),
            enable_validation: cfg!(debug_assertions),
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
            gl_loader: None,
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("app_name", &self.app_name)
            .field("enable_validation", &self.enable_validation)
            .field("instance_extensions", &self.instance_extensions)
            .field("device_extensions", &self.device_extensions)
            .field("gl_loader", &self.gl_loader.is_some())
            .finish()
    }
}

impl BackendConfig {
    /// Create a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `STRATA_VALIDATION` (`1`/`true`/`on` or `0`/`false`/`off`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var("STRATA_VALIDATION") {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" => config.enable_validation = true,
                "0" | "false" | "off" => config.enable_validation = false,
                other => warn!("Ignoring STRATA_VALIDATION={}", other),
            }
        }
        config
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Request an extra instance extension, e.g. a surface extension.
    pub fn instance_extension(mut self, name: &str) -> Result<Self> {
        self.instance_extensions.push(extension_name(name)?);
        Ok(self)
    }

    /// Request an extra device extension, e.g. the swapchain extension.
    pub fn device_extension(mut self, name: &str) -> Result<Self> {
        self.device_extensions.push(extension_name(name)?);
        Ok(self)
    }

    /// Provide the OpenGL entry point loader.
    pub fn gl_loader(mut self, loader: impl Fn(&str) -> *const c_void + 'static) -> Self {
        self.gl_loader = Some(Arc::new(loader));
        self
    }

    /// Whether validation is requested.
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation
    }
}

fn extension_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| GpuError::Other(format!("extension name {name:?} contains NUL")))
}

/// Kinds of device-scoped objects counted by [`LiveObjects`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
    StagingBuffer,
    Buffer,
    Texture,
    Shader,
}

impl ObjectKind {
    const ALL: [Self; 8] = [
        Self::CommandPool,
        Self::CommandBuffer,
        Self::Fence,
        Self::Semaphore,
        Self::StagingBuffer,
        Self::Buffer,
        Self::Texture,
        Self::Shader,
    ];
}

/// Counts of outstanding device-scoped objects.
#[derive(Default)]
pub struct LiveObjects {
    counts: [AtomicUsize; 8],
}

impl LiveObjects {
    pub(crate) fn acquire(&self, kind: ObjectKind) {
        self.counts[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release(&self, kind: ObjectKind) {
        let previous = self.counts[kind as usize].fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "{kind:?} released more often than created");
    }

    /// Number of live objects of `kind`.
    pub fn count(&self, kind: ObjectKind) -> usize {
        self.counts[kind as usize].load(Ordering::Relaxed)
    }

    /// Kinds with live objects, with their counts.
    pub fn outstanding(&self) -> Vec<(ObjectKind, usize)> {
        ObjectKind::ALL
            .iter()
            .map(|&kind| (kind, self.count(kind)))
            .filter(|&(_, n)| n > 0)
            .collect()
    }
}

/// The graphics API context: one active backend device plus bookkeeping.
pub struct GraphicsApi {
    device: Option<Box<dyn GpuDevice>>,
    tracker: AllocationTracker,
    live: LiveObjects,
    in_flight: InFlight,
}

impl Default for GraphicsApi {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsApi {
    /// A context with no backend selected.
    pub fn new() -> Self {
        Self::with_tracker(AllocationTracker::new())
    }

    /// A context reporting allocations to `tracker`.
    pub fn with_tracker(tracker: AllocationTracker) -> Self {
        Self {
            device: None,
            tracker,
            live: LiveObjects::default(),
            in_flight: InFlight::default(),
        }
    }

    /// Create a context and load `kind` in one step.
    pub fn load(kind: BackendKind, config: &BackendConfig) -> Result<Self> {
        let mut api = Self::new();
        api.create_backend(kind, config)?;
        Ok(api)
    }

    /// Select and initialize a backend.
    ///
    /// Returns [`GpuError::Unsupported`] if `kind` is not compiled in, and
    /// the backend's initialization error otherwise. On error no backend is
    /// active (unless one already was, in which case it is left untouched).
    pub fn create_backend(&mut self, kind: BackendKind, config: &BackendConfig) -> Result<()> {
        if let Some(active) = &self.device {
            return Err(GpuError::InvalidState(format!(
                "{} backend is already active; destroy it before loading {}",
                active.kind(),
                kind
            )));
        }

        let device: Box<dyn GpuDevice> = match kind {
            BackendKind::None => {
                warn!("GraphicsApi: no backend requested");
                return Err(GpuError::Unsupported("no backend requested".to_string()));
            }
            BackendKind::Vulkan => Box::new(
                VulkanDevice::initialize(config, self.tracker.clone())
                    .inspect_err(|e| error!("Vulkan backend failed to initialize: {}", e))?,
            ),
            #[cfg(feature = "opengl")]
            BackendKind::OpenGl => Box::new(
                crate::opengl::GlDevice::initialize(config, self.tracker.clone())
                    .inspect_err(|e| error!("OpenGL backend failed to initialize: {}", e))?,
            ),
            #[cfg(not(feature = "opengl"))]
            BackendKind::OpenGl => {
                warn!("GraphicsApi: OpenGL backend is not compiled in");
                return Err(GpuError::Unsupported(
                    "OpenGL backend is not compiled in".to_string(),
                ));
            }
            BackendKind::Software => Box::new(SoftwareDevice::new(self.tracker.clone())),
        };

        info!("Loaded {} backend: {}", kind, device.info().summary());
        self.device = Some(device);
        Ok(())
    }

    /// Tear down the active backend, if any.
    ///
    /// Every object created through this context must already be destroyed.
    pub fn destroy_backend(&mut self) {
        self.teardown(true);
    }

    fn teardown(&mut self, strict: bool) {
        let Some(mut device) = self.device.take() else {
            return;
        };

        let outstanding = self.live.outstanding();
        if !outstanding.is_empty() {
            error!(
                "Destroying {} backend with live objects: {:?}",
                device.kind(),
                outstanding
            );
            if strict {
                debug_assert!(
                    outstanding.is_empty(),
                    "backend destroyed with live objects: {outstanding:?}"
                );
            }
        }

        device.finalize();
        self.in_flight.retire_all();
        info!("{} backend destroyed", device.kind());
    }

    /// Active backend kind, `BackendKind::None` when nothing is loaded.
    pub fn current(&self) -> BackendKind {
        self.device
            .as_ref()
            .map_or(BackendKind::None, |device| device.kind())
    }

    /// The active device.
    pub fn device(&self) -> Result<&dyn GpuDevice> {
        self.device.as_deref().ok_or(GpuError::NoBackend)
    }

    /// The active device for operations on objects it already created.
    #[track_caller]
    pub(crate) fn active(&self) -> &dyn GpuDevice {
        match self.device.as_deref() {
            Some(device) => device,
            None => panic!("device object used after its backend was destroyed"),
        }
    }

    /// Block until every queue is idle. Retires the submissions outstanding
    /// when the call began.
    pub fn wait_idle(&self) -> Result<()> {
        // Submissions made by other threads during the wait stay pending.
        let tickets = self.in_flight.snapshot();
        self.device()?.wait_idle()?;
        for ticket in tickets {
            ticket.retire();
        }
        Ok(())
    }

    /// Allocation tracker shared with the backends.
    pub fn tracker(&self) -> &AllocationTracker {
        &self.tracker
    }

    /// Outstanding object counts.
    pub fn live(&self) -> &LiveObjects {
        &self.live
    }

    pub(crate) fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }
}

impl StagingAllocator for GraphicsApi {
    fn allocate_staging(&self, size: u64) -> Result<StagingBlock> {
        let block = self.device()?.allocate_staging(size)?;
        self.live.acquire(ObjectKind::StagingBuffer);
        Ok(block)
    }

    fn free_staging(&self, block: StagingBlock) {
        self.active().free_staging(block);
        self.live.release(ObjectKind::StagingBuffer);
    }
}

impl Drop for GraphicsApi {
    fn drop(&mut self) {
        self.teardown(false);
    }
}

impl fmt::Debug for GraphicsApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsApi")
            .field("backend", &self.current())
            .field("tracker", &self.tracker)
            .field("live", &self.live.outstanding())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backend_names() {
        assert_eq!("vulkan".parse::<BackendKind>().unwrap(), BackendKind::Vulkan);
        assert_eq!("GL".parse::<BackendKind>().unwrap(), BackendKind::OpenGl);
        assert_eq!(" software ".parse::<BackendKind>().unwrap(), BackendKind::Software);
        assert!("metal".parse::<BackendKind>().is_err());
    }

    #[test]
    fn none_is_unsupported() {
        let mut api = GraphicsApi::new();
        let result = api.create_backend(BackendKind::None, &BackendConfig::default());

        assert!(matches!(result, Err(GpuError::Unsupported(_))));
        assert_eq!(api.current(), BackendKind::None);
        assert!(matches!(api.device(), Err(GpuError::NoBackend)));
        assert!(matches!(api.wait_idle(), Err(GpuError::NoBackend)));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "backend destroyed with live objects")]
    fn destroying_backend_with_live_fence_panics() {
        let mut api = GraphicsApi::load(BackendKind::Software, &BackendConfig::default()).unwrap();
        let _fence = crate::sync::Fence::create(&api).unwrap();
        api.destroy_backend();
    }

    #[test]
    fn context_and_handles_cross_threads() {
        fn shareable<T: Send + Sync>() {}
        shareable::<GraphicsApi>();
        shareable::<crate::sync::Semaphore>();
        shareable::<crate::memory::GpuBuffer>();
        shareable::<crate::memory::CpuBuffer>();
    }

    #[test]
    fn drop_tolerates_live_objects() {
        let api = GraphicsApi::load(BackendKind::Software, &BackendConfig::default()).unwrap();
        let _fence = crate::sync::Fence::create(&api).unwrap();
        assert_eq!(api.live().outstanding(), vec![(ObjectKind::Fence, 1)]);
        drop(api);
    }

    #[cfg(not(feature = "opengl"))]
    #[test]
    fn opengl_without_feature_is_unsupported() {
        let mut api = GraphicsApi::new();
        let result = api.create_backend(BackendKind::OpenGl, &BackendConfig::default());
        assert!(result.unwrap_err().is_unsupported());
        assert_eq!(api.current(), BackendKind::None);
    }

    #[test]
    fn software_backend_lifecycle() {
        let mut api = GraphicsApi::new();
        api.create_backend(BackendKind::Software, &BackendConfig::default())
            .unwrap();
        assert_eq!(api.current(), BackendKind::Software);

        // A second backend cannot be loaded over the first.
        let again = api.create_backend(BackendKind::Vulkan, &BackendConfig::default());
        assert!(matches!(again, Err(GpuError::InvalidState(_))));
        assert_eq!(api.current(), BackendKind::Software);

        api.destroy_backend();
        assert_eq!(api.current(), BackendKind::None);

        // Destroying twice is harmless.
        api.destroy_backend();
    }

    #[test]
    fn live_object_counts() {
        let live = LiveObjects::default();
        live.acquire(ObjectKind::Fence);
        live.acquire(ObjectKind::Fence);
        live.acquire(ObjectKind::Buffer);
        assert_eq!(live.outstanding(), vec![(ObjectKind::Fence, 2), (ObjectKind::Buffer, 1)]);

        live.release(ObjectKind::Fence);
        live.release(ObjectKind::Fence);
        live.release(ObjectKind::Buffer);
        assert!(live.outstanding().is_empty());
    }

    #[test]
    fn config_builder() {
        let config = BackendConfig::new()
            .app_name("config-test")
            .validation(false)
            .device_extension("VK_KHR_swapchain")
            .unwrap();
        assert!(!config.validation_enabled());
        assert_eq!(config.device_extensions.len(), 1);
        assert!(BackendConfig::new().instance_extension("bad\0name").is_err());
    }
}
