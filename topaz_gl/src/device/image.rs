/// Image, image format and sampler types

use std::any::Any;
use std::ptr::NonNull;
use bitflags::bitflags;
use glam::UVec2;
use crate::device::MemoryResidency;

/// Pixel formats understood by the frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum ImageFormat {
    /// 8-bit RGBA, unorm
    RGBA32,
    /// 8-bit BGRA, unorm
    BGRA32,
    /// 8-bit RGBA, sRGB
    RGBA32_SRGB,
    /// 8-bit BGRA, sRGB
    BGRA32_SRGB,
    /// Single 32-bit float channel
    R32_SFLOAT,
    /// Four 32-bit float channels
    RGBA128_SFLOAT,
    /// 32-bit float depth
    Depth32_SFLOAT,
}

impl ImageFormat {
    /// Size of one texel in bytes
    pub fn pixel_size_bytes(&self) -> usize {
        match self {
            ImageFormat::RGBA32
            | ImageFormat::BGRA32
            | ImageFormat::RGBA32_SRGB
            | ImageFormat::BGRA32_SRGB
            | ImageFormat::R32_SFLOAT
            | ImageFormat::Depth32_SFLOAT => 4,
            ImageFormat::RGBA128_SFLOAT => 16,
        }
    }

    /// Whether this is a depth format
    pub fn is_depth(&self) -> bool {
        matches!(self, ImageFormat::Depth32_SFLOAT)
    }

    /// Whether images of this format may be rendered into as colour attachments
    pub fn is_colour_renderable(&self) -> bool {
        !self.is_depth()
    }

    /// Byte length of a tightly packed image of these dimensions
    pub fn image_size_bytes(&self, dimensions: UVec2) -> usize {
        self.pixel_size_bytes() * dimensions.x as usize * dimensions.y as usize
    }
}

bitflags! {
    /// How an image may be used by the GPU
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        /// Sampled from shaders
        const SAMPLED = 1 << 0;
        /// Destination of a transfer
        const TRANSFER_DST = 1 << 1;
        /// Colour attachment of a render pass
        const COLOUR_ATTACHMENT = 1 << 2;
        /// Depth attachment of a render pass
        const DEPTH_ATTACHMENT = 1 << 3;
    }
}

/// Descriptor for creating an image
///
/// Host-resident images use linear tiling and stay persistently mapped.
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub format: ImageFormat,
    pub dimensions: UVec2,
    pub usage: ImageUsage,
    pub residency: MemoryResidency,
    pub debug_name: String,
}

/// Image resource trait
///
/// Backends create a full-image view alongside the image, so an `Image`
/// can be used directly as an attachment or in a descriptor.
pub trait Image: Send + Sync + Any {
    fn format(&self) -> ImageFormat;
    fn dimensions(&self) -> UVec2;

    /// Pointer to persistently mapped texel memory (host-resident images only)
    fn mapped_ptr(&self) -> Option<NonNull<u8>>;

    fn as_any(&self) -> &dyn Any;
}

/// Texel lookup filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

/// Texture coordinate addressing outside [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirroredRepeat,
}

/// Descriptor for creating a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerDesc {
    /// Used for min, mag and mip lookups
    pub filter: Filter,
    /// Used for u, v and w
    pub address_mode: AddressMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::Nearest,
            address_mode: AddressMode::ClampToEdge,
        }
    }
}

/// Sampler object trait
pub trait Sampler: Send + Sync + Any {
    fn desc(&self) -> SamplerDesc;
    fn as_any(&self) -> &dyn Any;
}
