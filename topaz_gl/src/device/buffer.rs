/// Buffer trait and buffer descriptor

use std::any::Any;
use std::ptr::NonNull;
use bitflags::bitflags;
use crate::error::Result;

bitflags! {
    /// How a buffer may be used by the GPU
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Shader storage buffer (descriptor-visible)
        const STORAGE = 1 << 0;
        /// Index buffer (u32 indices)
        const INDEX = 1 << 1;
        /// Draw-indirect parameter buffer
        const INDIRECT = 1 << 2;
        /// Source of a transfer (staging)
        const TRANSFER_SRC = 1 << 3;
        /// Destination of a transfer
        const TRANSFER_DST = 1 << 4;
    }
}

/// Where the memory backing a buffer or image lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryResidency {
    /// Device-local, not host accessible. Written through staging copies.
    Device,
    /// Host-visible and persistently mapped for the object's lifetime
    Host,
}

/// Descriptor for creating a buffer
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes (must be > 0)
    pub size: u64,
    /// Buffer usage
    pub usage: BufferUsage,
    /// Memory residency
    pub residency: MemoryResidency,
    /// Name attached for debugging tools
    pub debug_name: String,
}

/// Buffer resource trait
///
/// Implemented by backend-specific buffer types. The buffer is destroyed
/// when the last `Arc` is dropped.
pub trait Buffer: Send + Sync + Any {
    /// Size in bytes
    fn size(&self) -> u64;

    /// Write `data` at `offset` through the persistent mapping
    ///
    /// Fails for device-local buffers.
    fn update(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Pointer to persistently mapped memory
    ///
    /// Returns None if the buffer is not host-visible.
    /// The pointer remains valid for the lifetime of the buffer.
    fn mapped_ptr(&self) -> Option<NonNull<u8>>;

    fn as_any(&self) -> &dyn Any;
}
