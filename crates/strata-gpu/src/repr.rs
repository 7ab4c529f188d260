//! Backend representations of shared objects.
//!
//! Each public object stores one of these tagged unions. The variant is
//! fixed by the backend that created the object, and a backend handed a
//! variant it does not own treats it as a contract violation.

use crate::api::BackendKind;
use crate::memory::host::HostBlock;
use crate::software::{Op, ResourceId};
use crate::vulkan::{VulkanBuffer, VulkanImage};
use ash::vk;

#[cfg(feature = "opengl")]
use crate::opengl::{GlBuffer, GlFence, GlOp, GlTexture};

/// Queue handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRepr {
    Vulkan(vk::Queue),
    #[cfg(feature = "opengl")]
    OpenGl,
    Software(usize),
}

/// Command pool handle.
#[derive(Debug)]
pub enum CommandPoolRepr {
    Vulkan(vk::CommandPool),
    #[cfg(feature = "opengl")]
    OpenGl,
    Software,
}

/// Command buffer handle or recorded command list.
#[derive(Debug)]
pub enum CommandBufferRepr {
    Vulkan(vk::CommandBuffer),
    #[cfg(feature = "opengl")]
    OpenGl(Vec<GlOp>),
    Software(Vec<Op>),
}

/// Fence handle.
#[derive(Debug)]
pub enum FenceRepr {
    Vulkan(vk::Fence),
    #[cfg(feature = "opengl")]
    OpenGl(GlFence),
    Software(ResourceId),
}

/// Semaphore handle.
#[derive(Debug)]
pub enum SemaphoreRepr {
    Vulkan(vk::Semaphore),
    #[cfg(feature = "opengl")]
    OpenGl,
    Software(ResourceId),
}

/// Buffer storage: a native buffer, or plain host memory for backends
/// without a staging buffer object.
#[derive(Debug)]
pub enum BufferRepr {
    Vulkan(VulkanBuffer),
    #[cfg(feature = "opengl")]
    OpenGl(GlBuffer),
    Host(HostBlock),
    Software(ResourceId),
}

/// Texture storage.
#[derive(Debug)]
pub enum TextureRepr {
    Vulkan(VulkanImage),
    #[cfg(feature = "opengl")]
    OpenGl(GlTexture),
    Software(ResourceId),
}

/// Shader object.
#[derive(Debug)]
pub enum ShaderRepr {
    Vulkan(vk::ShaderModule),
    #[cfg(feature = "opengl")]
    OpenGl(glow::Shader),
    Software(Vec<u8>),
}

impl QueueRepr {
    /// Backend that created this handle.
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "opengl")]
            Self::OpenGl => BackendKind::OpenGl,
            Self::Software(_) => BackendKind::Software,
        }
    }
}

/// Panic for a handle that reached a backend that did not create it.
#[track_caller]
pub(crate) fn foreign(what: &str, owner: BackendKind, current: BackendKind) -> ! {
    panic!("{what} belongs to the {owner} backend but was passed to the {current} backend")
}

impl CommandPoolRepr {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "opengl")]
            Self::OpenGl => BackendKind::OpenGl,
            Self::Software => BackendKind::Software,
        }
    }
}

impl CommandBufferRepr {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "opengl")]
            Self::OpenGl(_) => BackendKind::OpenGl,
            Self::Software(_) => BackendKind::Software,
        }
    }
}

impl FenceRepr {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "opengl")]
            Self::OpenGl(_) => BackendKind::OpenGl,
            Self::Software(_) => BackendKind::Software,
        }
    }
}

impl SemaphoreRepr {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "opengl")]
            Self::OpenGl => BackendKind::OpenGl,
            Self::Software(_) => BackendKind::Software,
        }
    }
}

impl BufferRepr {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "opengl")]
            Self::OpenGl(_) => BackendKind::OpenGl,
            Self::Host(_) => BackendKind::None,
            Self::Software(_) => BackendKind::Software,
        }
    }
}

impl TextureRepr {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "opengl")]
            Self::OpenGl(_) => BackendKind::OpenGl,
            Self::Software(_) => BackendKind::Software,
        }
    }
}

impl ShaderRepr {
    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Vulkan(_) => BackendKind::Vulkan,
            #[cfg(feature = "opengl")]
            Self::OpenGl(_) => BackendKind::OpenGl,
            Self::Software(_) => BackendKind::Software,
        }
    }
}
