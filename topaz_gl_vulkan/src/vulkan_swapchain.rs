/// Swapchain - presentable images of the window surface
///
/// A retired swapchain is destroyed only when the last image borrowed from it
/// is dropped, so frontend objects built on old images stay valid until they
/// are rebuilt.

use ash::vk;
use glam::UVec2;
use std::sync::Arc;
use topaz_gl::device::{AcquireResult, Image as DeviceImage, ImageFormat, PresentResult};
use topaz_gl::topaz::{Error, Result};
use topaz_gl::{engine_debug, engine_err, engine_warn};

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::image_format_from_vk;
use crate::vulkan_image::Image;

/// Owner of a `vk::SwapchainKHR`
pub(crate) struct SwapchainHandle {
    /// Outlives the swapchain
    _ctx: Arc<GpuContext>,
    loader: ash::khr::swapchain::Device,
    pub swapchain: vk::SwapchainKHR,
}

impl Drop for SwapchainHandle {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Current swapchain and the images it presents
pub(crate) struct Swapchain {
    handle: Arc<SwapchainHandle>,
    pub images: Vec<Arc<dyn DeviceImage>>,
    pub extent: UVec2,
}

/// Surface format the device presents with, chosen once
#[derive(Clone, Copy)]
pub(crate) struct PresentFormat {
    pub surface_format: vk::SurfaceFormatKHR,
    pub format: ImageFormat,
}

/// Pick an sRGB 8-bit format when available, otherwise the first one the
/// frontend understands
pub(crate) fn choose_present_format(ctx: &GpuContext) -> Result<PresentFormat> {
    let formats = unsafe {
        ctx.surface
            .loader
            .get_physical_device_surface_formats(ctx.physical_device, ctx.surface.surface)
    }
    .map_err(|e| Error::InitializationFailed(format!("Failed to query surface formats: {:?}", e)))?;

    let preferred = formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB || f.format == vk::Format::R8G8B8A8_SRGB)
        .or_else(|| formats.iter().find(|f| image_format_from_vk(f.format).is_some()));

    preferred
        .and_then(|f| image_format_from_vk(f.format).map(|format| PresentFormat { surface_format: *f, format }))
        .ok_or_else(|| Error::InitializationFailed("Surface offers no supported colour format".to_string()))
}

/// Clamp the requested image count to what the surface supports
pub(crate) fn clamp_image_count(requested: u32, capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Extent to create the swapchain with, zero when the window is minimised
pub(crate) fn choose_extent(window: UVec2, capabilities: &vk::SurfaceCapabilitiesKHR) -> UVec2 {
    if capabilities.current_extent.width != u32::MAX {
        return UVec2::new(capabilities.current_extent.width, capabilities.current_extent.height);
    }
    UVec2::new(
        window.x.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
        window.y.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
    )
}

pub(crate) fn surface_capabilities(ctx: &GpuContext) -> Result<vk::SurfaceCapabilitiesKHR> {
    unsafe {
        ctx.surface
            .loader
            .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface.surface)
    }
    .map_err(|e| engine_err!("topaz::vulkan", "Failed to get surface capabilities: {:?}", e))
}

impl Swapchain {
    /// Create a swapchain for the current surface
    ///
    /// Returns `None` when the surface has no area (minimised window).
    pub fn create(
        ctx: &Arc<GpuContext>,
        loader: &ash::khr::swapchain::Device,
        present_format: PresentFormat,
        window: UVec2,
        image_count: u32,
        old: Option<&Swapchain>,
    ) -> Result<Option<Self>> {
        let capabilities = surface_capabilities(ctx)?;
        let extent = choose_extent(window, &capabilities);
        if extent.x == 0 || extent.y == 0 {
            return Ok(None);
        }

        let (sharing_mode, families) = ctx.sharing();
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface.surface)
            .min_image_count(clamp_image_count(image_count, &capabilities))
            .image_format(present_format.surface_format.format)
            .image_color_space(present_format.surface_format.color_space)
            .image_extent(vk::Extent2D { width: extent.x, height: extent.y })
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(old.map(|o| o.handle.swapchain).unwrap_or_default());

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create swapchain: {:?}", e))?;
        let handle = Arc::new(SwapchainHandle {
            _ctx: Arc::clone(ctx),
            loader: loader.clone(),
            swapchain,
        });

        let vk_images = unsafe { loader.get_swapchain_images(swapchain) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to get swapchain images: {:?}", e))?;

        let images = vk_images
            .into_iter()
            .map(|image| {
                Image::from_swapchain(ctx, &handle, image, present_format.format, extent)
                    .map(|image| Arc::new(image) as Arc<dyn DeviceImage>)
            })
            .collect::<Result<Vec<_>>>()?;

        engine_debug!("topaz::vulkan", "Swapchain created: {}x{}, {} images", extent.x, extent.y, images.len());

        Ok(Some(Self { handle, images, extent }))
    }

    pub fn acquire(&self, signal: vk::Semaphore) -> Result<AcquireResult> {
        let result = unsafe {
            self.handle
                .loader
                .acquire_next_image(self.handle.swapchain, u64::MAX, signal, vk::Fence::null())
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireResult::Acquired { image_index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                engine_debug!("topaz::vulkan", "Swapchain out of date during acquire");
                Ok(AcquireResult::OutOfDate)
            }
            Err(e) => Err(engine_err!("topaz::vulkan", "Failed to acquire next swapchain image: {:?}", e)),
        }
    }

    pub fn present(&self, queue: vk::Queue, image_index: u32, waits: &[vk::Semaphore]) -> Result<PresentResult> {
        let swapchains = [self.handle.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(waits)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.handle.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentResult::Presented),
            Ok(true) => Ok(PresentResult::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                engine_debug!("topaz::vulkan", "Swapchain out of date during present");
                Ok(PresentResult::OutOfDate)
            }
            Err(e) => Err(engine_err!("topaz::vulkan", "Failed to present swapchain image: {:?}", e)),
        }
    }

    /// Warn when a recreated swapchain no longer matches the frame count
    pub fn check_image_count(&self, frames_in_flight: usize) {
        if self.images.len() != frames_in_flight {
            engine_warn!(
                "topaz::vulkan",
                "Recreated swapchain has {} images, frames in flight stays at {}",
                self.images.len(),
                frames_in_flight
            );
        }
    }
}
