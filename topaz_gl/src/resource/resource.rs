/// User-declared renderer resources (buffers and images).
///
/// A Resource is a CPU-side description plus a canonical byte buffer.
/// When a renderer instantiates a dynamic resource, the bytes are moved into
/// persistently mapped GPU memory and the resource's accessor is re-pointed
/// at that mapping, so writes through a renderer's `get_resource_mut()`
/// reach the GPU directly.
///
/// Architecture:
/// - Resource: closed enum { Buffer, Image }
/// - ResourceAccess: StaticFixed / DynamicFixed / DynamicVariable
/// - ResourceFlags: index / draw-indirect / renderer-output / sampler flags
/// - ResourceData: owned bytes or an alias of mapped GPU memory

use std::fmt;
use std::ptr::NonNull;
use bitflags::bitflags;
use bytemuck::Pod;
use glam::UVec2;
use crate::device::{AddressMode, Filter, ImageFormat, SamplerDesc};
use crate::error::{Error, Result};
use crate::engine_error;

// ===== ACCESS & FLAGS =====

/// How a resource may change after renderer creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceAccess {
    /// Device-local; rewritten only through write edits (staged copies)
    #[default]
    StaticFixed,
    /// Host-mapped; writable every frame, never resized
    DynamicFixed,
    /// Host-mapped; writable every frame and resizable through edits
    DynamicVariable,
}

impl ResourceAccess {
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, ResourceAccess::StaticFixed)
    }
}

bitflags! {
    /// Optional resource flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceFlags: u32 {
        /// Buffer of u32 indices; excluded from descriptors
        const INDEX_BUFFER = 1 << 0;
        /// Buffer of indirect draw commands; excluded from descriptors
        const DRAW_INDIRECT_BUFFER = 1 << 1;
        /// Image usable as a renderer's colour output
        const RENDERER_OUTPUT = 1 << 2;
        const IMAGE_FILTER_NEAREST = 1 << 3;
        const IMAGE_FILTER_LINEAR = 1 << 4;
        const IMAGE_WRAP_CLAMP_EDGE = 1 << 5;
        const IMAGE_WRAP_REPEAT = 1 << 6;
        const IMAGE_WRAP_MIRRORED_REPEAT = 1 << 7;
    }
}

impl ResourceFlags {
    const BUFFER_ONLY: ResourceFlags = ResourceFlags::INDEX_BUFFER.union(ResourceFlags::DRAW_INDIRECT_BUFFER);
    const FILTERS: ResourceFlags = ResourceFlags::IMAGE_FILTER_NEAREST.union(ResourceFlags::IMAGE_FILTER_LINEAR);
    const WRAPS: ResourceFlags = ResourceFlags::IMAGE_WRAP_CLAMP_EDGE
        .union(ResourceFlags::IMAGE_WRAP_REPEAT)
        .union(ResourceFlags::IMAGE_WRAP_MIRRORED_REPEAT);
    const IMAGE_ONLY: ResourceFlags = ResourceFlags::RENDERER_OUTPUT
        .union(ResourceFlags::FILTERS)
        .union(ResourceFlags::WRAPS);
}

/// Buffer or image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Buffer,
    Image,
}

/// Index of a resource within one renderer
///
/// Stays valid for the renderer's lifetime, across resizes and re-seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u32);

impl ResourceHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ===== RESOURCE DATA =====

enum Storage {
    Owned(Vec<u8>),
    /// Alias of persistently mapped GPU memory owned by a component
    Mapped { ptr: NonNull<u8>, len: usize },
}

/// Canonical bytes of a resource
///
/// Cloning always produces owned bytes, even from a mapped alias.
pub struct ResourceData {
    storage: Storage,
}

// The mapped pointer is only dereferenced while the owning component (and
// therefore the mapping) is alive; the component keeps the resource and the
// GPU object together.
unsafe impl Send for ResourceData {}
unsafe impl Sync for ResourceData {}

impl ResourceData {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { storage: Storage::Owned(bytes) }
    }

    pub fn size_bytes(&self) -> usize {
        match &self.storage {
            Storage::Owned(bytes) => bytes.len(),
            Storage::Mapped { len, .. } => *len,
        }
    }

    /// Whether the bytes alias mapped GPU memory
    pub fn is_mapped(&self) -> bool {
        matches!(self.storage, Storage::Mapped { .. })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(bytes) => bytes,
            // SAFETY: ptr/len describe a live mapping (see Send/Sync note)
            Storage::Mapped { ptr, len } => unsafe { std::slice::from_raw_parts(ptr.as_ptr(), *len) },
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.storage {
            Storage::Owned(bytes) => bytes,
            Storage::Mapped { ptr, len } => unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), *len) },
        }
    }

    /// Typed view of the bytes, if size and alignment allow it
    pub fn as_slice<T: Pod>(&self) -> Option<&[T]> {
        bytemuck::try_cast_slice(self.as_bytes()).ok()
    }

    /// Mutable typed view of the bytes, if size and alignment allow it
    pub fn as_slice_mut<T: Pod>(&mut self) -> Option<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.as_bytes_mut()).ok()
    }

    /// Read the `index`-th `T`, regardless of alignment
    pub fn read<T: Pod>(&self, index: usize) -> Option<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self.as_bytes().get(index * size..(index + 1) * size)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Write the `index`-th `T`, regardless of alignment
    pub fn write<T: Pod>(&mut self, index: usize, value: T) -> Result<()> {
        let size = std::mem::size_of::<T>();
        let len = self.size_bytes();
        match self.as_bytes_mut().get_mut(index * size..(index + 1) * size) {
            Some(slot) => {
                slot.copy_from_slice(bytemuck::bytes_of(&value));
                Ok(())
            }
            None => Err(Error::InvalidResource(format!(
                "element {} of {} bytes is past the end of {} bytes",
                index, size, len
            ))),
        }
    }

    /// Move the bytes into `ptr` and alias it from now on
    ///
    /// # Safety
    ///
    /// `ptr` must point to at least `len` writable bytes that stay valid
    /// until this data is re-pointed or dropped.
    pub(crate) unsafe fn map_onto(&mut self, ptr: NonNull<u8>, len: usize) {
        let current = self.as_bytes();
        let copied = current.len().min(len);
        std::ptr::copy_nonoverlapping(current.as_ptr(), ptr.as_ptr(), copied);
        if len > copied {
            std::ptr::write_bytes(ptr.as_ptr().add(copied), 0, len - copied);
        }
        self.storage = Storage::Mapped { ptr, len };
    }

    /// Replace the bytes with `len` bytes, keeping the common prefix
    pub(crate) fn resize_owned(&mut self, len: usize) {
        let mut bytes = self.as_bytes().to_vec();
        bytes.resize(len, 0);
        self.storage = Storage::Owned(bytes);
    }
}

impl Clone for ResourceData {
    fn clone(&self) -> Self {
        Self::from_bytes(self.as_bytes().to_vec())
    }
}

impl fmt::Debug for ResourceData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceData")
            .field("size_bytes", &self.size_bytes())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

// ===== BUFFER RESOURCE =====

/// A shader storage buffer (or index / draw-indirect buffer)
#[derive(Debug, Clone)]
pub struct BufferResource {
    data: ResourceData,
    access: ResourceAccess,
    flags: ResourceFlags,
}

impl BufferResource {
    /// Buffer holding a single value
    pub fn from_one<T: Pod>(value: T) -> Self {
        Self::from_bytes(bytemuck::bytes_of(&value).to_vec())
    }

    /// Buffer holding a tightly packed array of values
    pub fn from_many<T: Pod>(values: &[T]) -> Self {
        Self::from_bytes(bytemuck::cast_slice(values).to_vec())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: ResourceData::from_bytes(bytes),
            access: ResourceAccess::StaticFixed,
            flags: ResourceFlags::empty(),
        }
    }

    /// Placeholder buffer: a single zero u32
    pub fn null() -> Self {
        Self::from_one(0u32)
    }

    pub fn with_access(mut self, access: ResourceAccess) -> Self {
        self.access = access;
        self
    }

    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }
}

// ===== IMAGE RESOURCE =====

/// A sampled 2D image
#[derive(Debug, Clone)]
pub struct ImageResource {
    data: ResourceData,
    access: ResourceAccess,
    flags: ResourceFlags,
    format: ImageFormat,
    dimensions: UVec2,
}

impl ImageResource {
    /// Zero-filled image
    pub fn from_uninitialised(format: ImageFormat, dimensions: UVec2) -> Self {
        Self {
            data: ResourceData::from_bytes(vec![0; format.image_size_bytes(dimensions)]),
            access: ResourceAccess::StaticFixed,
            flags: ResourceFlags::empty(),
            format,
            dimensions,
        }
    }

    /// Image initialised from tightly packed texels
    ///
    /// Fails if `bytes` is not exactly `w * h * pixel_size` long.
    pub fn from_memory(bytes: &[u8], format: ImageFormat, dimensions: UVec2) -> Result<Self> {
        let expected = format.image_size_bytes(dimensions);
        if bytes.len() != expected {
            engine_error!(
                "topaz::Resource",
                "Image data is {} bytes, {:?} {}x{} needs {}",
                bytes.len(), format, dimensions.x, dimensions.y, expected
            );
            return Err(Error::InvalidResource(format!(
                "image data is {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }
        let mut image = Self::from_uninitialised(format, dimensions);
        image.data = ResourceData::from_bytes(bytes.to_vec());
        Ok(image)
    }

    /// 2x2 RGBA32 magenta/black checker, used for missing textures
    pub fn null() -> Self {
        const MAGENTA: [u8; 4] = [255, 0, 255, 255];
        const BLACK: [u8; 4] = [0, 0, 0, 255];
        let texels = [MAGENTA, BLACK, BLACK, MAGENTA].concat();
        let mut image = Self::from_uninitialised(ImageFormat::RGBA32, UVec2::new(2, 2));
        image.data = ResourceData::from_bytes(texels);
        image
    }

    pub fn with_access(mut self, access: ResourceAccess) -> Self {
        self.access = access;
        self
    }

    pub fn with_flags(mut self, flags: ResourceFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn dimensions(&self) -> UVec2 {
        self.dimensions
    }

    /// Sampler state implied by the filter and wrap flags
    pub fn sampler_desc(&self) -> SamplerDesc {
        let filter = if self.flags.contains(ResourceFlags::IMAGE_FILTER_LINEAR) {
            Filter::Linear
        } else {
            Filter::Nearest
        };
        let address_mode = if self.flags.contains(ResourceFlags::IMAGE_WRAP_REPEAT) {
            AddressMode::Repeat
        } else if self.flags.contains(ResourceFlags::IMAGE_WRAP_MIRRORED_REPEAT) {
            AddressMode::MirroredRepeat
        } else {
            AddressMode::ClampToEdge
        };
        SamplerDesc { filter, address_mode }
    }

    pub(crate) fn set_dimensions(&mut self, dimensions: UVec2) {
        self.dimensions = dimensions;
    }
}

// ===== RESOURCE =====

/// A buffer or image resource
#[derive(Debug, Clone)]
pub enum Resource {
    Buffer(BufferResource),
    Image(ImageResource),
}

impl From<BufferResource> for Resource {
    fn from(buffer: BufferResource) -> Self {
        Resource::Buffer(buffer)
    }
}

impl From<ImageResource> for Resource {
    fn from(image: ImageResource) -> Self {
        Resource::Image(image)
    }
}

impl Resource {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::Buffer(_) => ResourceType::Buffer,
            Resource::Image(_) => ResourceType::Image,
        }
    }

    pub fn access(&self) -> ResourceAccess {
        match self {
            Resource::Buffer(b) => b.access,
            Resource::Image(i) => i.access,
        }
    }

    pub fn flags(&self) -> ResourceFlags {
        match self {
            Resource::Buffer(b) => b.flags,
            Resource::Image(i) => i.flags,
        }
    }

    pub fn data(&self) -> &ResourceData {
        match self {
            Resource::Buffer(b) => &b.data,
            Resource::Image(i) => &i.data,
        }
    }

    /// Mutable bytes
    ///
    /// Crate-only: swapping the data out would carry a mapped alias away
    /// from the component that owns the mapping.
    pub(crate) fn data_mut(&mut self) -> &mut ResourceData {
        match self {
            Resource::Buffer(b) => &mut b.data,
            Resource::Image(i) => &mut i.data,
        }
    }

    pub fn as_image(&self) -> Option<&ImageResource> {
        match self {
            Resource::Image(i) => Some(i),
            Resource::Buffer(_) => None,
        }
    }

    /// Image dimensions (None for buffers)
    pub fn dimensions(&self) -> Option<UVec2> {
        self.as_image().map(|i| i.dimensions)
    }

    /// Image format (None for buffers)
    pub fn format(&self) -> Option<ImageFormat> {
        self.as_image().map(|i| i.format)
    }

    pub(crate) fn image_mut(&mut self) -> Option<&mut ImageResource> {
        match self {
            Resource::Image(i) => Some(i),
            Resource::Buffer(_) => None,
        }
    }

    /// Check everything that can be known about a resource on its own
    pub fn validate(&self) -> Result<()> {
        let flags = self.flags();
        let problem = match self {
            Resource::Buffer(b) => {
                if b.data.size_bytes() == 0 {
                    Some("zero-sized buffer".to_string())
                } else if flags.intersects(ResourceFlags::IMAGE_ONLY) {
                    Some(format!("image-only flags on a buffer: {:?}", flags & ResourceFlags::IMAGE_ONLY))
                } else if flags.contains(ResourceFlags::BUFFER_ONLY) {
                    Some("a buffer cannot be both an index and a draw-indirect buffer".to_string())
                } else {
                    None
                }
            }
            Resource::Image(i) => {
                if i.dimensions.x == 0 || i.dimensions.y == 0 {
                    Some(format!("zero-area image {}x{}", i.dimensions.x, i.dimensions.y))
                } else if i.data.size_bytes() != i.format.image_size_bytes(i.dimensions) {
                    Some("image data does not match its format and dimensions".to_string())
                } else if flags.intersects(ResourceFlags::BUFFER_ONLY) {
                    Some(format!("buffer-only flags on an image: {:?}", flags & ResourceFlags::BUFFER_ONLY))
                } else if (flags & ResourceFlags::FILTERS).bits().count_ones() > 1 {
                    Some("conflicting image filter flags".to_string())
                } else if (flags & ResourceFlags::WRAPS).bits().count_ones() > 1 {
                    Some("conflicting image wrap flags".to_string())
                } else if i.format.is_depth()
                    && (!flags.contains(ResourceFlags::RENDERER_OUTPUT) || i.access.is_dynamic())
                {
                    Some("depth images must be static renderer outputs".to_string())
                } else {
                    None
                }
            }
        };
        match problem {
            Some(message) => {
                engine_error!("topaz::Resource", "Invalid resource: {}", message);
                Err(Error::InvalidResource(message))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "resource_tests.rs"]
mod tests;
