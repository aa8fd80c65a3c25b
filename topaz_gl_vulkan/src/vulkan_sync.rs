/// Fences and semaphores

use ash::vk;
use std::any::Any;
use std::sync::Arc;
use topaz_gl::device::{Fence as DeviceFence, Semaphore as DeviceSemaphore};
use topaz_gl::topaz::Result;
use topaz_gl::{engine_bail, engine_err};

use crate::vulkan_context::GpuContext;

pub struct Fence {
    ctx: Arc<GpuContext>,
    pub(crate) fence: vk::Fence,
}

impl Fence {
    pub(crate) fn create(ctx: &Arc<GpuContext>, signalled: bool) -> Result<Self> {
        let flags = if signalled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { ctx.device.create_fence(&vk::FenceCreateInfo::default().flags(flags), None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create fence: {:?}", e))?;
        Ok(Self { ctx: Arc::clone(ctx), fence })
    }
}

impl DeviceFence for Fence {
    fn wait(&self) -> Result<()> {
        unsafe { self.ctx.device.wait_for_fences(&[self.fence], true, u64::MAX) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to wait for fence: {:?}", e))
    }

    fn reset(&self) -> Result<()> {
        unsafe { self.ctx.device.reset_fences(&[self.fence]) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to reset fence: {:?}", e))
    }

    fn is_signalled(&self) -> Result<bool> {
        unsafe { self.ctx.device.get_fence_status(self.fence) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to query fence status: {:?}", e))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_fence(self.fence, None);
        }
    }
}

/// Binary or timeline semaphore
pub struct Semaphore {
    ctx: Arc<GpuContext>,
    pub(crate) semaphore: vk::Semaphore,
    timeline: bool,
}

impl Semaphore {
    pub(crate) fn binary(ctx: &Arc<GpuContext>) -> Result<Self> {
        let semaphore = unsafe { ctx.device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create semaphore: {:?}", e))?;
        Ok(Self { ctx: Arc::clone(ctx), semaphore, timeline: false })
    }

    pub(crate) fn timeline(ctx: &Arc<GpuContext>, initial_value: u64) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore = unsafe { ctx.device.create_semaphore(&create_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create timeline semaphore: {:?}", e))?;
        Ok(Self { ctx: Arc::clone(ctx), semaphore, timeline: true })
    }
}

impl DeviceSemaphore for Semaphore {
    fn is_timeline(&self) -> bool {
        self.timeline
    }

    fn value(&self) -> Result<u64> {
        if !self.timeline {
            engine_bail!("topaz::vulkan", "Counter value requested from a binary semaphore");
        }
        unsafe { self.ctx.device.get_semaphore_counter_value(self.semaphore) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to read semaphore counter: {:?}", e))
    }

    fn signal(&self, value: u64) -> Result<()> {
        if !self.timeline {
            engine_bail!("topaz::vulkan", "Host signal requested on a binary semaphore");
        }
        let signal_info = vk::SemaphoreSignalInfo::default().semaphore(self.semaphore).value(value);
        unsafe { self.ctx.device.signal_semaphore(&signal_info) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to signal semaphore to {}: {:?}", value, e))
    }

    fn wait(&self, value: u64) -> Result<()> {
        if !self.timeline {
            engine_bail!("topaz::vulkan", "Host wait requested on a binary semaphore");
        }
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default().semaphores(&semaphores).values(&values);
        unsafe { self.ctx.device.wait_semaphores(&wait_info, u64::MAX) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to wait for semaphore value {}: {:?}", value, e))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

pub(crate) fn vk_semaphore(semaphore: &Arc<dyn DeviceSemaphore>) -> Result<vk::Semaphore> {
    semaphore
        .as_any()
        .downcast_ref::<Semaphore>()
        .map(|s| s.semaphore)
        .ok_or_else(|| engine_err!("topaz::vulkan", "Semaphore was not created by the Vulkan device"))
}

pub(crate) fn vk_fence(fence: &Arc<dyn DeviceFence>) -> Result<vk::Fence> {
    fence
        .as_any()
        .downcast_ref::<Fence>()
        .map(|f| f.fence)
        .ok_or_else(|| engine_err!("topaz::vulkan", "Fence was not created by the Vulkan device"))
}
