/// Buffer - Vulkan implementation of the device Buffer trait

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::any::Any;
use std::ptr::NonNull;
use std::sync::Arc;
use topaz_gl::device::{Buffer as DeviceBuffer, BufferDesc, MemoryResidency};
use topaz_gl::topaz::{Error, Result};
use topaz_gl::{engine_bail, engine_err, engine_error};

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::buffer_usage_to_vk;

/// Vulkan buffer implementation
pub struct Buffer {
    /// Shared GPU context (device, allocator, queues)
    ctx: Arc<GpuContext>,
    pub(crate) buffer: vk::Buffer,
    /// GPU memory allocation
    allocation: Option<Allocation>,
    size: u64,
}

impl Buffer {
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &BufferDesc) -> Result<Self> {
        if desc.size == 0 {
            return Err(Error::InvalidResource(format!("Buffer '{}' has zero size", desc.debug_name)));
        }

        let (sharing_mode, families) = ctx.sharing();
        let create_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(buffer_usage_to_vk(desc.usage))
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families);

        unsafe {
            let buffer = ctx.device.create_buffer(&create_info, None).map_err(|e| {
                engine_err!("topaz::vulkan", "Failed to create buffer '{}' of {} bytes: {:?}", desc.debug_name, desc.size, e)
            })?;

            let requirements = ctx.device.get_buffer_memory_requirements(buffer);
            let location = match desc.residency {
                MemoryResidency::Device => MemoryLocation::GpuOnly,
                MemoryResidency::Host => MemoryLocation::CpuToGpu,
            };

            let allocation = ctx.allocator().and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: &desc.debug_name,
                        requirements,
                        location,
                        linear: true,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|_| {
                        let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                        engine_error!("topaz::vulkan", "Out of GPU memory for buffer '{}' (required: {:.2} MB)", desc.debug_name, size_mb);
                        Error::OutOfMemory
                    })
            });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    ctx.device.destroy_buffer(buffer, None);
                    return Err(e);
                }
            };

            // From here on Drop releases both the buffer and its memory
            let buffer = Self {
                ctx: Arc::clone(ctx),
                buffer,
                allocation: Some(allocation),
                size: desc.size,
            };

            if let Some(allocation) = &buffer.allocation {
                ctx.device
                    .bind_buffer_memory(buffer.buffer, allocation.memory(), allocation.offset())
                    .map_err(|e| engine_err!("topaz::vulkan", "Failed to bind buffer memory: {:?}", e))?;
            }

            Ok(buffer)
        }
    }
}

impl DeviceBuffer for Buffer {
    fn size(&self) -> u64 {
        self.size
    }

    fn update(&self, offset: u64, data: &[u8]) -> Result<()> {
        let Some(mapped) = self.mapped_ptr() else {
            engine_bail!("topaz::vulkan", "Buffer update failed: buffer is not host-visible");
        };
        if offset + data.len() as u64 > self.size {
            return Err(Error::InvalidResource(format!(
                "Write of {} bytes at offset {} exceeds buffer size {}",
                data.len(),
                offset,
                self.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.as_ptr().add(offset as usize), data.len());
        }
        Ok(())
    }

    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .map(|ptr| ptr.cast::<u8>())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if let Some(allocation) = self.allocation.take() {
                // Don't panic if the lock fails, the buffer must still be destroyed
                if let Ok(mut allocator) = self.ctx.allocator.lock() {
                    allocator.free(allocation).ok();
                }
            }
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Vulkan handle behind a device buffer
pub(crate) fn vk_buffer(buffer: &Arc<dyn DeviceBuffer>) -> Result<vk::Buffer> {
    buffer
        .as_any()
        .downcast_ref::<Buffer>()
        .map(|b| b.buffer)
        .ok_or_else(|| engine_err!("topaz::vulkan", "Buffer was not created by the Vulkan device"))
}
