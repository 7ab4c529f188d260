//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The requested backend or feature is not compiled in or not available.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// No backend is active on the graphics API.
    #[error("No graphics backend is active")]
    NoBackend,

    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Backend instance or device initialization failed.
    #[error("Backend initialization failed: {0}")]
    BackendInit(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Shader module creation failed.
    #[error("Shader creation failed: {0}")]
    ShaderCreation(String),

    /// OpenGL error.
    #[error("OpenGL error: {0}")]
    OpenGl(String),

    /// A bounded fence wait expired.
    #[error("Timed out waiting for the GPU")]
    Timeout,

    /// The device can no longer make progress.
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Coarse outcome of a backend or resource operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Failure,
    Unsupported,
}

impl Status {
    /// Classify the outcome of an operation.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.status(),
        }
    }
}

impl GpuError {
    /// Classify this error as a capability problem or a plain failure.
    pub fn status(&self) -> Status {
        match self {
            Self::Unsupported(_) | Self::NoBackend => Status::Unsupported,
            Self::Vulkan(vk::Result::ERROR_FEATURE_NOT_PRESENT)
            | Self::Vulkan(vk::Result::ERROR_EXTENSION_NOT_PRESENT)
            | Self::Vulkan(vk::Result::ERROR_LAYER_NOT_PRESENT)
            | Self::Vulkan(vk::Result::ERROR_FORMAT_NOT_SUPPORTED) => Status::Unsupported,
            _ => Status::Failure,
        }
    }

    /// Whether this error means the request can never succeed on this build or machine.
    pub fn is_unsupported(&self) -> bool {
        self.status() == Status::Unsupported
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            GpuError::Unsupported("opengl".into()).status(),
            Status::Unsupported
        );
        assert_eq!(GpuError::NoBackend.status(), Status::Unsupported);
        assert_eq!(GpuError::NoSuitableDevice.status(), Status::Failure);
        assert_eq!(
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).status(),
            Status::Failure
        );

        let ok: Result<()> = Ok(());
        assert_eq!(Status::of(&ok), Status::Success);
    }
}
