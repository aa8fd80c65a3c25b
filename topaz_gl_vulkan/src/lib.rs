/*!
# Topaz GL - Vulkan Backend

Vulkan implementation of the `topaz_gl` device traits.

The backend uses Ash for the Vulkan bindings, gpu-allocator for memory
management and spirq to read entry points out of SPIR-V. Presentation goes
through a winit window handed to `VulkanGraphicsDevice::new`.

Validation layer support is compiled in only with the `vulkan-validation`
feature.

```no_run
use std::sync::Arc;
use topaz_gl_vulkan::topaz::{VulkanConfig, VulkanGraphicsDevice};
# fn run(window: Arc<winit::window::Window>) -> topaz_gl::topaz::Result<()> {
let device = Arc::new(VulkanGraphicsDevice::new(window, VulkanConfig::default())?);
# Ok(())
# }
```
*/

mod vulkan_context;
mod vulkan_config;
mod vulkan_device;
mod vulkan_format;
mod vulkan_buffer;
mod vulkan_image;
mod vulkan_sampler;
mod vulkan_descriptor;
mod vulkan_render_pass;
mod vulkan_pipeline;
mod vulkan_command_buffer;
mod vulkan_sync;
mod vulkan_swapchain;

#[cfg(feature = "vulkan-validation")]
mod debug;

pub use vulkan_config::VulkanConfig;
pub use vulkan_device::VulkanGraphicsDevice;

// Re-export debug utilities
#[cfg(feature = "vulkan-validation")]
pub use debug::{get_validation_stats, print_validation_stats_report, DebugSeverity, ValidationStats};

/// Backend namespace, mirroring `topaz_gl::topaz`
pub mod topaz {
    pub use crate::vulkan_config::VulkanConfig;
    pub use crate::vulkan_device::VulkanGraphicsDevice;
}
