/// Image - Vulkan implementation of the device Image trait
///
/// Every image carries a full-image view. Images are either allocated here
/// or borrowed from a swapchain, in which case they keep the swapchain alive
/// until the last reference is dropped.

use ash::vk;
use glam::UVec2;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::any::Any;
use std::ptr::NonNull;
use std::sync::Arc;
use topaz_gl::device::{Image as DeviceImage, ImageDesc, ImageFormat, ImageUsage, MemoryResidency};
use topaz_gl::topaz::{Error, Result};
use topaz_gl::{engine_err, engine_error, engine_warn};

use crate::vulkan_context::GpuContext;
use crate::vulkan_format::{aspect_mask, image_format_to_vk, image_usage_to_vk, layout_barrier};
use crate::vulkan_swapchain::SwapchainHandle;

enum Backing {
    /// Memory owned by this image
    Allocated(Option<Allocation>),
    /// Presentable image owned by a swapchain
    Swapchain(Arc<SwapchainHandle>),
}

/// Vulkan image implementation
pub struct Image {
    ctx: Arc<GpuContext>,
    pub(crate) image: vk::Image,
    pub(crate) view: vk::ImageView,
    backing: Backing,
    format: ImageFormat,
    dimensions: UVec2,
    residency: MemoryResidency,
}

impl Image {
    pub(crate) fn create(ctx: &Arc<GpuContext>, desc: &ImageDesc) -> Result<Self> {
        if desc.dimensions.x == 0 || desc.dimensions.y == 0 {
            return Err(Error::InvalidResource(format!("Image '{}' has zero dimensions", desc.debug_name)));
        }

        let format = image_format_to_vk(desc.format);
        let (tiling, initial_layout, location) = match desc.residency {
            MemoryResidency::Device => (vk::ImageTiling::OPTIMAL, vk::ImageLayout::UNDEFINED, MemoryLocation::GpuOnly),
            MemoryResidency::Host => (vk::ImageTiling::LINEAR, vk::ImageLayout::PREINITIALIZED, MemoryLocation::CpuToGpu),
        };

        let (sharing_mode, families) = ctx.sharing();
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: desc.dimensions.x,
                height: desc.dimensions.y,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(image_usage_to_vk(desc.usage))
            .sharing_mode(sharing_mode)
            .queue_family_indices(&families)
            .initial_layout(initial_layout);

        unsafe {
            let image = ctx.device.create_image(&create_info, None).map_err(|e| {
                engine_err!("topaz::vulkan", "Failed to create image '{}' ({}x{}): {:?}", desc.debug_name, desc.dimensions.x, desc.dimensions.y, e)
            })?;

            let requirements = ctx.device.get_image_memory_requirements(image);
            let allocation = ctx.allocator().and_then(|mut allocator| {
                allocator
                    .allocate(&AllocationCreateDesc {
                        name: &desc.debug_name,
                        requirements,
                        location,
                        linear: tiling == vk::ImageTiling::LINEAR,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|_| {
                        let size_mb = requirements.size as f64 / (1024.0 * 1024.0);
                        engine_error!("topaz::vulkan", "Out of GPU memory for image '{}' (required: {:.2} MB)", desc.debug_name, size_mb);
                        Error::OutOfMemory
                    })
            });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    ctx.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            if let Err(e) = ctx.device.bind_image_memory(image, allocation.memory(), allocation.offset()) {
                if let Ok(mut allocator) = ctx.allocator() {
                    allocator.free(allocation).ok();
                }
                ctx.device.destroy_image(image, None);
                return Err(engine_err!("topaz::vulkan", "Failed to bind image memory: {:?}", e));
            }

            let view = match create_view(&ctx.device, image, desc.format) {
                Ok(view) => view,
                Err(e) => {
                    if let Ok(mut allocator) = ctx.allocator() {
                        allocator.free(allocation).ok();
                    }
                    ctx.device.destroy_image(image, None);
                    return Err(e);
                }
            };

            let image = Self {
                ctx: Arc::clone(ctx),
                image,
                view,
                backing: Backing::Allocated(Some(allocation)),
                format: desc.format,
                dimensions: desc.dimensions,
                residency: desc.residency,
            };

            if desc.residency == MemoryResidency::Host {
                image.check_row_pitch(&desc.debug_name);
            }
            if desc.usage.contains(ImageUsage::SAMPLED) {
                image.transition(initial_layout, image.sampled_layout())?;
            }

            Ok(image)
        }
    }

    /// Wrap a presentable image owned by `swapchain`
    pub(crate) fn from_swapchain(
        ctx: &Arc<GpuContext>,
        swapchain: &Arc<SwapchainHandle>,
        image: vk::Image,
        format: ImageFormat,
        dimensions: UVec2,
    ) -> Result<Self> {
        let view = create_view(&ctx.device, image, format)?;
        Ok(Self {
            ctx: Arc::clone(ctx),
            image,
            view,
            backing: Backing::Swapchain(Arc::clone(swapchain)),
            format,
            dimensions,
            residency: MemoryResidency::Device,
        })
    }

    /// Layout the image rests in while sampled by shaders
    ///
    /// Host-written images stay in GENERAL so the mapping remains valid.
    pub(crate) fn sampled_layout(&self) -> vk::ImageLayout {
        match self.residency {
            MemoryResidency::Host => vk::ImageLayout::GENERAL,
            MemoryResidency::Device => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    fn transition(&self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Result<()> {
        let (barrier, src_stage, dst_stage) = layout_barrier(self.image, aspect_mask(self.format), old_layout, new_layout);
        self.ctx.one_shot(|command_buffer| unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }

    /// Mapped texels are written tightly packed, warn when the driver pads rows
    fn check_row_pitch(&self, debug_name: &str) {
        let subresource = vk::ImageSubresource {
            aspect_mask: aspect_mask(self.format),
            mip_level: 0,
            array_layer: 0,
        };
        let layout = unsafe { self.ctx.device.get_image_subresource_layout(self.image, subresource) };
        let packed = self.format.pixel_size_bytes() as u64 * self.dimensions.x as u64;
        if layout.row_pitch != packed || layout.offset != 0 {
            engine_warn!(
                "topaz::vulkan",
                "Host image '{}' has row pitch {} (expected {}), mapped texels will be skewed",
                debug_name,
                layout.row_pitch,
                packed
            );
        }
    }
}

fn create_view(device: &ash::Device, image: vk::Image, format: ImageFormat) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(image_format_to_vk(format))
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: aspect_mask(format),
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });
    unsafe { device.create_image_view(&view_info, None) }
        .map_err(|e| engine_err!("topaz::vulkan", "Failed to create image view: {:?}", e))
}

impl DeviceImage for Image {
    fn format(&self) -> ImageFormat {
        self.format
    }

    fn dimensions(&self) -> UVec2 {
        self.dimensions
    }

    fn mapped_ptr(&self) -> Option<NonNull<u8>> {
        match &self.backing {
            Backing::Allocated(Some(allocation)) if self.residency == MemoryResidency::Host => {
                allocation.mapped_ptr().map(|ptr| ptr.cast::<u8>())
            }
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_image_view(self.view, None);

            if let Backing::Allocated(allocation) = &mut self.backing {
                if let Some(allocation) = allocation.take() {
                    if let Ok(mut allocator) = self.ctx.allocator.lock() {
                        allocator.free(allocation).ok();
                    }
                }
                self.ctx.device.destroy_image(self.image, None);
            }
        }
    }
}

/// Vulkan image behind a device image
pub(crate) fn vk_image(image: &Arc<dyn DeviceImage>) -> Result<&Image> {
    image
        .as_any()
        .downcast_ref::<Image>()
        .ok_or_else(|| engine_err!("topaz::vulkan", "Image was not created by the Vulkan device"))
}
