/// Vulkan backend configuration

/// Settings for `VulkanGraphicsDevice::new`
#[derive(Debug, Clone)]
pub struct VulkanConfig {
    /// Enable the Khronos validation layer and route its messages to the
    /// engine logger. Ignored unless the `vulkan-validation` feature is on.
    pub enable_validation: bool,

    /// Application name reported to the driver
    pub app_name: String,

    /// Application version reported to the driver (`vk::make_api_version`)
    pub app_version: u32,

    /// Requested number of presentable images, clamped to what the surface
    /// supports. Also the number of frames in flight.
    pub preferred_image_count: u32,
}

impl Default for VulkanConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(feature = "vulkan-validation"),
            app_name: "Topaz Application".to_string(),
            app_version: ash::vk::make_api_version(0, 1, 0, 0),
            preferred_image_count: 3,
        }
    }
}
