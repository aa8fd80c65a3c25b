/// GpuContext - Vulkan state shared by every backend object
///
/// Every buffer, image, pipeline and command buffer keeps an `Arc<GpuContext>`,
/// so the device, allocator and instance are destroyed only after the last
/// object that needs them.

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};
use topaz_gl::topaz::{Error, Result};
use topaz_gl::device::QueueType;
use topaz_gl::{engine_debug, engine_err};

/// Queue handles, shared when two roles map to the same queue
///
/// Queue access must be externally synchronised, hence the mutexes.
pub(crate) struct Queues {
    pub graphics: Arc<Mutex<vk::Queue>>,
    pub compute: Arc<Mutex<vk::Queue>>,
    pub present: Arc<Mutex<vk::Queue>>,
    pub graphics_family: u32,
    pub compute_family: u32,
    pub present_family: u32,
}

impl Queues {
    pub fn for_type(&self, queue: QueueType) -> &Arc<Mutex<vk::Queue>> {
        match queue {
            QueueType::Graphics => &self.graphics,
            QueueType::Compute => &self.compute,
        }
    }

    pub fn family(&self, queue: QueueType) -> u32 {
        match queue {
            QueueType::Graphics => self.graphics_family,
            QueueType::Compute => self.compute_family,
        }
    }

    /// Distinct families resources may be used from
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = vec![self.graphics_family, self.compute_family, self.present_family];
        families.sort_unstable();
        families.dedup();
        families
    }
}

/// Window surface the swapchain is built on
///
/// Holds the window so it outlives the surface.
pub(crate) struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::khr::surface::Instance,
    pub window: Arc<winit::window::Window>,
}

/// Validation layer messenger, present when validation is enabled
#[cfg(feature = "vulkan-validation")]
pub(crate) struct DebugMessenger {
    pub loader: ash::ext::debug_utils::Instance,
    pub messenger: vk::DebugUtilsMessengerEXT,
}

pub(crate) struct GpuContext {
    pub device: ash::Device,
    pub instance: ash::Instance,
    pub physical_device: vk::PhysicalDevice,

    /// Dropped before the device in `Drop`
    pub allocator: ManuallyDrop<Mutex<Allocator>>,

    pub queues: Queues,
    pub surface: Surface,

    /// Pool for blocking one-shot work (initial image layouts)
    upload_pool: Mutex<vk::CommandPool>,

    #[cfg(feature = "vulkan-validation")]
    pub debug: Option<DebugMessenger>,

    /// Keeps the Vulkan loader alive
    _entry: ash::Entry,
}

impl GpuContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entry: ash::Entry,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        allocator: Allocator,
        queues: Queues,
        surface: Surface,
        #[cfg(feature = "vulkan-validation")] debug: Option<DebugMessenger>,
    ) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queues.graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let upload_pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
            Error::InitializationFailed(format!("Failed to create upload command pool: {:?}", e))
        })?;

        Ok(Self {
            device,
            instance,
            physical_device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            queues,
            surface,
            upload_pool: Mutex::new(upload_pool),
            #[cfg(feature = "vulkan-validation")]
            debug,
            _entry: entry,
        })
    }

    pub fn allocator(&self) -> Result<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| engine_err!("topaz::vulkan", "GPU allocator mutex poisoned"))
    }

    pub fn lock_queue(queue: &Mutex<vk::Queue>) -> Result<MutexGuard<'_, vk::Queue>> {
        queue.lock().map_err(|_| engine_err!("topaz::vulkan", "Queue mutex poisoned"))
    }

    /// Sharing mode and family list for a new buffer or image
    pub fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        let families = self.queues.unique_families();
        if families.len() > 1 {
            (vk::SharingMode::CONCURRENT, families)
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }

    /// Record `record` into a fresh command buffer, run it on the graphics
    /// queue and block until it completes
    pub fn one_shot<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let pool = self
            .upload_pool
            .lock()
            .map_err(|_| engine_err!("topaz::vulkan", "Upload pool mutex poisoned"))?;

        unsafe {
            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(*pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = self
                .device
                .allocate_command_buffers(&allocate_info)
                .map_err(|e| engine_err!("topaz::vulkan", "Failed to allocate one-shot command buffer: {:?}", e))?[0];

            let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            let result = self
                .device
                .begin_command_buffer(command_buffer, &begin_info)
                .map_err(|e| engine_err!("topaz::vulkan", "Failed to begin one-shot command buffer: {:?}", e))
                .and_then(|_| {
                    record(command_buffer);
                    self.device
                        .end_command_buffer(command_buffer)
                        .map_err(|e| engine_err!("topaz::vulkan", "Failed to end one-shot command buffer: {:?}", e))
                })
                .and_then(|_| self.submit_and_wait(command_buffer));

            self.device.free_command_buffers(*pool, &[command_buffer]);
            result
        }
    }

    unsafe fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let fence = self
            .device
            .create_fence(&vk::FenceCreateInfo::default(), None)
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create one-shot fence: {:?}", e))?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        let result = Self::lock_queue(&self.queues.graphics)
            .and_then(|queue| {
                self.device
                    .queue_submit(*queue, &[submit_info], fence)
                    .map_err(|e| engine_err!("topaz::vulkan", "Failed to submit one-shot commands: {:?}", e))
            })
            .and_then(|_| {
                self.device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(|e| engine_err!("topaz::vulkan", "Failed to wait for one-shot fence: {:?}", e))
            });

        self.device.destroy_fence(fence, None);
        result
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();

            if let Ok(pool) = self.upload_pool.get_mut() {
                self.device.destroy_command_pool(*pool, None);
            }

            // Allocator frees its memory blocks, which needs the device alive
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            self.surface.loader.destroy_surface(self.surface.surface, None);

            #[cfg(feature = "vulkan-validation")]
            if let Some(debug) = self.debug.take() {
                crate::debug::cleanup_debug_config();
                debug.loader.destroy_debug_utils_messenger(debug.messenger, None);
            }

            self.instance.destroy_instance(None);
        }
        engine_debug!("topaz::vulkan", "GPU context destroyed");
    }
}
