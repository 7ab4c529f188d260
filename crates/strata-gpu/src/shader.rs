//! Shader modules.

use crate::api::{GraphicsApi, ObjectKind};
use crate::error::Result;
use crate::repr::ShaderRepr;

/// Source language of a shader blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderLanguage {
    Glsl,
    SpirV,
}

/// Pipeline stage a shader is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// A shader blob and how to interpret it.
#[derive(Debug, Clone, Copy)]
pub struct ShaderSource<'a> {
    pub language: ShaderLanguage,
    pub stage: ShaderStage,
    pub code: &'a [u8],
}

impl<'a> ShaderSource<'a> {
    /// SPIR-V bytecode.
    pub fn spirv(stage: ShaderStage, code: &'a [u8]) -> Self {
        Self {
            language: ShaderLanguage::SpirV,
            stage,
            code,
        }
    }

    /// GLSL source text.
    pub fn glsl(stage: ShaderStage, source: &'a str) -> Self {
        Self {
            language: ShaderLanguage::Glsl,
            stage,
            code: source.as_bytes(),
        }
    }
}

/// A compiled shader module owned by the active backend.
#[derive(Debug)]
pub struct Shader {
    repr: ShaderRepr,
    stage: ShaderStage,
}

impl Shader {
    /// Create a shader module.
    ///
    /// Vulkan takes SPIR-V only, OpenGL takes GLSL only. Languages a backend
    /// cannot consume are [`GpuError::Unsupported`](crate::GpuError::Unsupported).
    pub fn new(api: &GraphicsApi, source: &ShaderSource<'_>) -> Result<Self> {
        let repr = api.device()?.create_shader(source)?;
        api.live().acquire(ObjectKind::Shader);
        tracing::debug!(
            "Created {:?} shader from {} bytes of {:?}",
            source.stage,
            source.code.len(),
            source.language
        );
        Ok(Self {
            repr,
            stage: source.stage,
        })
    }

    /// Stage this shader was created for.
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Destroy the module.
    pub fn delete(self, api: &GraphicsApi) {
        api.active().destroy_shader(self.repr);
        api.live().release(ObjectKind::Shader);
    }
}
