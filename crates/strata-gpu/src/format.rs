//! Pixel formats.

/// Texture pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    #[default]
    Unknown,
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Bgra8,
    Rgba16F,
    Rgba32F,
    Depth32F,
    Depth24Stencil8,
}

impl TextureFormat {
    /// Every format with a defined size.
    pub const ALL: [Self; 9] = [
        Self::R8,
        Self::Rg8,
        Self::Rgb8,
        Self::Rgba8,
        Self::Bgra8,
        Self::Rgba16F,
        Self::Rgba32F,
        Self::Depth32F,
        Self::Depth24Stencil8,
    ];

    /// Size of one pixel in bytes. No row or texel alignment is applied.
    pub const fn pixel_size(self) -> u32 {
        pixel_size(self)
    }

    /// Whether the format has a depth component.
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth32F | Self::Depth24Stencil8)
    }

    /// Whether the format has a stencil component.
    pub const fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }
}

/// Size of one pixel of `format` in bytes.
///
/// `Unknown` has size zero.
pub const fn pixel_size(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Unknown => 0,
        TextureFormat::R8 => 1,
        TextureFormat::Rg8 => 2,
        TextureFormat::Rgb8 => 3,
        TextureFormat::Rgba8 | TextureFormat::Bgra8 => 4,
        TextureFormat::Rgba16F => 8,
        TextureFormat::Rgba32F => 16,
        TextureFormat::Depth32F | TextureFormat::Depth24Stencil8 => 4,
    }
}

/// Tightly packed byte size of a `width` x `height` image.
pub const fn image_byte_size(width: u32, height: u32, format: TextureFormat) -> u64 {
    width as u64 * height as u64 * pixel_size(format) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_sizes() {
        assert_eq!(pixel_size(TextureFormat::R8), 1);
        assert_eq!(pixel_size(TextureFormat::Rgb8), 3);
        assert_eq!(pixel_size(TextureFormat::Rgba8), 4);
        assert_eq!(pixel_size(TextureFormat::Rgba32F), 16);
        assert_eq!(pixel_size(TextureFormat::Unknown), 0);
    }

    #[test]
    fn sizes_are_unaligned() {
        // 3x3 RGB8 is 27 bytes, not padded to rows of 4
        assert_eq!(image_byte_size(3, 3, TextureFormat::Rgb8), 27);
        assert_eq!(image_byte_size(64, 64, TextureFormat::Rgba8), 16384);
    }

    #[test]
    fn depth_formats() {
        assert!(TextureFormat::Depth32F.is_depth());
        assert!(!TextureFormat::Depth32F.has_stencil());
        assert!(TextureFormat::Depth24Stencil8.has_stencil());
        assert!(!TextureFormat::Rgba8.is_depth());
    }
}
