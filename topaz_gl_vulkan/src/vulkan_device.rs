/// VulkanGraphicsDevice - Vulkan implementation of the GraphicsDevice trait
///
/// Owns the instance, device, queues and the window swapchain. Every object
/// it creates shares the `GpuContext`, so the device may be dropped before
/// the objects built from it.

use ash::vk;
use glam::UVec2;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use topaz_gl::device::{
    AcquireResult, Buffer as DeviceBuffer, BufferDesc, CommandPool as DeviceCommandPool, ComputePipelineDesc,
    DescriptorLayout as DeviceDescriptorLayout, DescriptorLayoutDesc, DescriptorPool as DeviceDescriptorPool,
    DescriptorPoolDesc, DescriptorWrite, Fence as DeviceFence, Framebuffer as DeviceFramebuffer, FramebufferDesc,
    GraphicsDevice, GraphicsPipelineDesc, Image as DeviceImage, ImageDesc, ImageFormat, Pipeline as DevicePipeline,
    PipelineLayout as DevicePipelineLayout, PipelineLayoutDesc, PresentResult, QueueType,
    RenderPass as DeviceRenderPass, RenderPassDesc, Sampler as DeviceSampler, SamplerDesc,
    Semaphore as DeviceSemaphore, SubmitInfo,
};
use topaz_gl::topaz::{Error, Result};
use topaz_gl::{engine_bail, engine_debug, engine_err, engine_error, engine_info, engine_warn};
use winit::window::Window;

use crate::vulkan_buffer::Buffer;
use crate::vulkan_command_buffer::{vk_command_buffer, CommandPool};
use crate::vulkan_config::VulkanConfig;
use crate::vulkan_context::{GpuContext, Queues, Surface};
use crate::vulkan_descriptor::{update_descriptor_sets, DescriptorLayout, DescriptorPool};
use crate::vulkan_image::Image;
use crate::vulkan_pipeline::{Pipeline, PipelineLayout};
use crate::vulkan_render_pass::{Framebuffer, RenderPass};
use crate::vulkan_sampler::SamplerCache;
use crate::vulkan_swapchain::{choose_present_format, clamp_image_count, surface_capabilities, PresentFormat, Swapchain};
use crate::vulkan_sync::{vk_fence, vk_semaphore, Fence, Semaphore};

/// Vulkan device implementation
pub struct VulkanGraphicsDevice {
    ctx: Arc<GpuContext>,
    swapchain_loader: ash::khr::swapchain::Device,
    present_format: PresentFormat,
    /// None while the window is minimised
    swapchain: Mutex<Option<Swapchain>>,
    generation: AtomicU64,
    frames_in_flight: usize,
    samplers: SamplerCache,
}

/// Queue families chosen for a physical device
struct QueueFamilies {
    graphics: u32,
    compute: u32,
    present: u32,
}

/// Optional features the device was created with
#[derive(Debug, Clone, Copy)]
struct EnabledFeatures {
    fill_mode_non_solid: bool,
    tessellation_shader: bool,
    draw_indirect_count: bool,
}

impl VulkanGraphicsDevice {
    /// Create a device presenting to `window`
    ///
    /// # Arguments
    ///
    /// * `window` - Window to present to, kept alive by the device
    /// * `config` - Backend configuration
    pub fn new(window: Arc<Window>, config: VulkanConfig) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            engine_error!("topaz::vulkan", "Failed to load Vulkan library: {:?}", e);
            Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
        })?;

        let display_handle = window.display_handle().map_err(|e| {
            engine_error!("topaz::vulkan", "Failed to get display handle: {}", e);
            Error::InitializationFailed(format!("Failed to get display handle: {}", e))
        })?;
        let window_handle = window.window_handle().map_err(|e| {
            engine_error!("topaz::vulkan", "Failed to get window handle: {}", e);
            Error::InitializationFailed(format!("Failed to get window handle: {}", e))
        })?;

        let validation = validation_requested(&config);
        let instance = create_instance(&entry, &config, display_handle.as_raw(), validation)?;

        #[cfg(feature = "vulkan-validation")]
        let debug = if validation { Some(create_debug_messenger(&entry, &instance)?) } else { None };

        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle.as_raw(), window_handle.as_raw(), None)
        }
        .map_err(|e| {
            engine_error!("topaz::vulkan", "Failed to create surface: {:?}", e);
            Error::InitializationFailed(format!("Failed to create surface: {:?}", e))
        })?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let (physical_device, families) = pick_physical_device(&instance, &surface_loader, surface)?;
        let (device, features) = create_logical_device(&instance, physical_device, &families)?;

        let queues = {
            let graphics = Arc::new(Mutex::new(unsafe { device.get_device_queue(families.graphics, 0) }));
            let compute = if families.compute == families.graphics {
                Arc::clone(&graphics)
            } else {
                Arc::new(Mutex::new(unsafe { device.get_device_queue(families.compute, 0) }))
            };
            let present = if families.present == families.graphics {
                Arc::clone(&graphics)
            } else if families.present == families.compute {
                Arc::clone(&compute)
            } else {
                Arc::new(Mutex::new(unsafe { device.get_device_queue(families.present, 0) }))
            };
            Queues {
                graphics,
                compute,
                present,
                graphics_family: families.graphics,
                compute_family: families.compute,
                present_family: families.present,
            }
        };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            engine_error!("topaz::vulkan", "Failed to create GPU allocator: {:?}", e);
            Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
        })?;

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        let ctx = Arc::new(GpuContext::new(
            entry,
            instance,
            physical_device,
            device,
            allocator,
            queues,
            Surface { surface, loader: surface_loader, window },
            #[cfg(feature = "vulkan-validation")]
            debug,
        )?);

        let present_format = choose_present_format(&ctx)?;
        let window_size = window_dimensions(&ctx.surface.window);
        let swapchain = Swapchain::create(
            &ctx,
            &swapchain_loader,
            present_format,
            window_size,
            config.preferred_image_count,
            None,
        )?;

        let frames_in_flight = match &swapchain {
            Some(swapchain) => swapchain.images.len(),
            None => clamp_image_count(config.preferred_image_count, &surface_capabilities(&ctx)?) as usize,
        };

        engine_info!(
            "topaz::vulkan",
            "Vulkan device ready: {:?} surface, {} frames in flight, {:?}",
            present_format.format,
            frames_in_flight,
            features
        );

        Ok(Self {
            ctx,
            swapchain_loader,
            present_format,
            swapchain: Mutex::new(swapchain),
            generation: AtomicU64::new(0),
            frames_in_flight,
            samplers: SamplerCache::new(),
        })
    }

    fn lock_swapchain(&self) -> Result<MutexGuard<'_, Option<Swapchain>>> {
        self.swapchain
            .lock()
            .map_err(|_| engine_err!("topaz::vulkan", "Swapchain mutex poisoned"))
    }
}

fn window_dimensions(window: &Window) -> UVec2 {
    let size = window.inner_size();
    UVec2::new(size.width, size.height)
}

// ============================================================================
// Instance and device creation
// ============================================================================

fn validation_requested(config: &VulkanConfig) -> bool {
    if config.enable_validation && !cfg!(feature = "vulkan-validation") {
        engine_warn!(
            "topaz::vulkan",
            "Validation requested but the crate was built without the 'vulkan-validation' feature"
        );
    }
    config.enable_validation && cfg!(feature = "vulkan-validation")
}

fn create_instance(
    entry: &ash::Entry,
    config: &VulkanConfig,
    display_handle: raw_window_handle::RawDisplayHandle,
    validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(config.app_name.as_str())
        .map_err(|_| Error::InvalidConfiguration("Application name contains a NUL byte".to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(config.app_version)
        .engine_name(c"Topaz")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_2);

    let mut extension_names = ash_window::enumerate_required_extensions(display_handle)
        .map_err(|e| {
            engine_error!("topaz::vulkan", "Failed to get required extensions: {}", e);
            Error::InitializationFailed(format!("Failed to get required extensions: {}", e))
        })?
        .to_vec();

    let mut layer_names: Vec<*const std::os::raw::c_char> = Vec::new();
    if validation {
        extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
        layer_names.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layer_names)
        .enabled_extension_names(&extension_names);

    unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        engine_error!("topaz::vulkan", "Failed to create Vulkan instance: {:?}", e);
        Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
    })
}

#[cfg(feature = "vulkan-validation")]
fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<crate::vulkan_context::DebugMessenger> {
    use crate::debug::{init_debug_config, messenger_create_info, Config, DebugSeverity};

    let severity = DebugSeverity::default();
    init_debug_config(Config { severity, panic_on_error: false });

    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let messenger = unsafe { loader.create_debug_utils_messenger(&messenger_create_info(severity), None) }
        .map_err(|e| {
            engine_error!("topaz::vulkan", "Failed to create debug messenger: {:?}", e);
            Error::InitializationFailed(format!("Failed to create debug messenger: {:?}", e))
        })?;

    Ok(crate::vulkan_context::DebugMessenger { loader, messenger })
}

/// Queue families of `physical_device`, if it can render and present
fn find_queue_families(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Option<QueueFamilies> {
    let properties = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let supports_present = |index: u32| unsafe {
        surface_loader
            .get_physical_device_surface_support(physical_device, index, surface)
            .unwrap_or(false)
    };

    let graphics = properties
        .iter()
        .position(|qf| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE))? as u32;

    // A dedicated compute family lets compute renderers run beside graphics
    let compute = properties
        .iter()
        .position(|qf| qf.queue_flags.contains(vk::QueueFlags::COMPUTE) && !qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
        .unwrap_or(graphics);

    let present = if supports_present(graphics) {
        graphics
    } else {
        (0..properties.len() as u32).find(|&index| supports_present(index))?
    };

    Some(QueueFamilies { graphics, compute, present })
}

fn supports_timeline_semaphores(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> bool {
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut features12);
    unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
    features12.timeline_semaphore == vk::TRUE
}

/// Prefer a discrete GPU, then an integrated one, among devices that can
/// render, present and use timeline semaphores
fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        engine_error!("topaz::vulkan", "Failed to enumerate physical devices: {:?}", e);
        Error::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
    })?;

    let mut best: Option<(u32, vk::PhysicalDevice, QueueFamilies)> = None;
    for physical_device in physical_devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = properties
            .device_name_as_c_str()
            .map(CStr::to_string_lossy)
            .unwrap_or_default()
            .into_owned();

        if properties.api_version < vk::API_VERSION_1_2 {
            engine_debug!("topaz::vulkan", "Skipping '{}': Vulkan 1.2 not supported", name);
            continue;
        }
        if !supports_timeline_semaphores(instance, physical_device) {
            engine_debug!("topaz::vulkan", "Skipping '{}': no timeline semaphores", name);
            continue;
        }
        let Some(families) = find_queue_families(instance, surface_loader, surface, physical_device) else {
            engine_debug!("topaz::vulkan", "Skipping '{}': cannot render and present", name);
            continue;
        };

        let score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 3,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
            _ => 0,
        };
        if best.as_ref().map_or(true, |(best_score, _, _)| score > *best_score) {
            engine_debug!("topaz::vulkan", "Candidate GPU '{}' (score {})", name, score);
            best = Some((score, physical_device, families));
        }
    }

    best.map(|(_, physical_device, families)| (physical_device, families)).ok_or_else(|| {
        engine_error!("topaz::vulkan", "No suitable Vulkan 1.2 GPU found");
        Error::InitializationFailed("No suitable Vulkan 1.2 GPU found".to_string())
    })
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    families: &QueueFamilies,
) -> Result<(ash::Device, EnabledFeatures)> {
    let mut unique_families = vec![families.graphics, families.compute, families.present];
    unique_families.sort_unstable();
    unique_families.dedup();

    let queue_priorities = [1.0];
    let queue_create_infos: Vec<_> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
        })
        .collect();

    // What the hardware offers
    let mut supported12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut supported2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut supported12);
    unsafe { instance.get_physical_device_features2(physical_device, &mut supported2) };
    let supported = supported2.features;

    let enabled = EnabledFeatures {
        fill_mode_non_solid: supported.fill_mode_non_solid == vk::TRUE,
        tessellation_shader: supported.tessellation_shader == vk::TRUE,
        draw_indirect_count: supported12.draw_indirect_count == vk::TRUE,
    };
    if !enabled.fill_mode_non_solid {
        engine_warn!("topaz::vulkan", "GPU lacks fillModeNonSolid, wireframe pipelines will fail");
    }
    if !enabled.draw_indirect_count {
        engine_warn!("topaz::vulkan", "GPU lacks drawIndirectCount, DRAW_INDIRECT_COUNT renderers will fail");
    }

    let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .draw_indirect_count(enabled.draw_indirect_count)
        .descriptor_indexing(supported12.descriptor_indexing == vk::TRUE)
        .descriptor_binding_partially_bound(supported12.descriptor_binding_partially_bound == vk::TRUE)
        .runtime_descriptor_array(supported12.runtime_descriptor_array == vk::TRUE)
        .shader_sampled_image_array_non_uniform_indexing(
            supported12.shader_sampled_image_array_non_uniform_indexing == vk::TRUE,
        );
    let core_features = vk::PhysicalDeviceFeatures::default()
        .fill_mode_non_solid(enabled.fill_mode_non_solid)
        .tessellation_shader(enabled.tessellation_shader);
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(core_features)
        .push_next(&mut features12);

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
        engine_error!("topaz::vulkan", "Failed to create logical device: {:?}", e);
        Error::InitializationFailed(format!("Failed to create device: {:?}", e))
    })?;

    Ok((device, enabled))
}

// ============================================================================
// GraphicsDevice implementation
// ============================================================================

impl GraphicsDevice for VulkanGraphicsDevice {
    fn surface_images(&self) -> Vec<Arc<dyn DeviceImage>> {
        match self.swapchain.lock() {
            Ok(swapchain) => swapchain.as_ref().map(|s| s.images.clone()).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn surface_format(&self) -> ImageFormat {
        self.present_format.format
    }

    fn surface_dimensions(&self) -> UVec2 {
        let window = window_dimensions(&self.ctx.surface.window);
        if window.x == 0 || window.y == 0 {
            return UVec2::ZERO;
        }
        match self.swapchain.lock() {
            Ok(swapchain) => swapchain.as_ref().map(|s| s.extent).unwrap_or(window),
            Err(_) => window,
        }
    }

    fn surface_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn recreate_surface(&self) -> Result<()> {
        self.wait_idle()?;

        let mut swapchain = self.lock_swapchain()?;
        let recreated = Swapchain::create(
            &self.ctx,
            &self.swapchain_loader,
            self.present_format,
            window_dimensions(&self.ctx.surface.window),
            self.frames_in_flight as u32,
            swapchain.as_ref(),
        )?;

        match &recreated {
            Some(new) => new.check_image_count(self.frames_in_flight),
            None => engine_debug!("topaz::vulkan", "Window minimised, swapchain released"),
        }
        *swapchain = recreated;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn acquire_image(&self, signal: &Arc<dyn DeviceSemaphore>) -> Result<AcquireResult> {
        let semaphore = vk_semaphore(signal)?;
        let swapchain = self.lock_swapchain()?;
        match swapchain.as_ref() {
            Some(swapchain) => swapchain.acquire(semaphore),
            None => Ok(AcquireResult::OutOfDate),
        }
    }

    fn present(&self, image_index: u32, waits: &[Arc<dyn DeviceSemaphore>]) -> Result<PresentResult> {
        let waits = waits.iter().map(vk_semaphore).collect::<Result<Vec<_>>>()?;
        let swapchain = self.lock_swapchain()?;
        let Some(swapchain) = swapchain.as_ref() else {
            return Ok(PresentResult::OutOfDate);
        };
        let queue = GpuContext::lock_queue(&self.ctx.queues.present)?;
        swapchain.present(*queue, image_index, &waits)
    }

    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn DeviceBuffer>> {
        Ok(Arc::new(Buffer::create(&self.ctx, desc)?))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn DeviceImage>> {
        Ok(Arc::new(Image::create(&self.ctx, desc)?))
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Arc<dyn DeviceSampler>> {
        Ok(self.samplers.get(&self.ctx, desc)?)
    }

    fn create_descriptor_layout(&self, desc: &DescriptorLayoutDesc) -> Result<Arc<dyn DeviceDescriptorLayout>> {
        Ok(Arc::new(DescriptorLayout::create(&self.ctx, desc)?))
    }

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<Box<dyn DeviceDescriptorPool>> {
        Ok(Box::new(DescriptorPool::create(&self.ctx, desc)?))
    }

    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) -> Result<()> {
        update_descriptor_sets(&self.ctx, writes)
    }

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<dyn DeviceRenderPass>> {
        Ok(Arc::new(RenderPass::create(&self.ctx, desc)?))
    }

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn DeviceFramebuffer>> {
        Ok(Arc::new(Framebuffer::create(&self.ctx, desc)?))
    }

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<Arc<dyn DevicePipelineLayout>> {
        Ok(Arc::new(PipelineLayout::create(&self.ctx, desc)?))
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<Arc<dyn DevicePipeline>> {
        Ok(Arc::new(Pipeline::create_graphics(&self.ctx, desc)?))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<Arc<dyn DevicePipeline>> {
        Ok(Arc::new(Pipeline::create_compute(&self.ctx, desc)?))
    }

    fn create_command_pool(&self, queue: QueueType) -> Result<Box<dyn DeviceCommandPool>> {
        Ok(Box::new(CommandPool::create(&self.ctx, queue)?))
    }

    fn create_fence(&self, signalled: bool) -> Result<Arc<dyn DeviceFence>> {
        Ok(Arc::new(Fence::create(&self.ctx, signalled)?))
    }

    fn create_semaphore(&self) -> Result<Arc<dyn DeviceSemaphore>> {
        Ok(Arc::new(Semaphore::binary(&self.ctx)?))
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<Arc<dyn DeviceSemaphore>> {
        Ok(Arc::new(Semaphore::timeline(&self.ctx, initial_value)?))
    }

    fn submit(&self, info: &SubmitInfo) -> Result<()> {
        let command_buffer = vk_command_buffer(info.command_buffer)?;
        if self.ctx.queues.family(command_buffer.queue) != self.ctx.queues.family(info.queue) {
            engine_bail!(
                "topaz::vulkan",
                "{:?} command buffer submitted to the {:?} queue",
                command_buffer.queue,
                info.queue
            );
        }

        let wait_semaphores = info.waits.iter().map(|w| vk_semaphore(&w.semaphore)).collect::<Result<Vec<_>>>()?;
        let wait_values: Vec<u64> = info.waits.iter().map(|w| w.value).collect();
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
        let signal_semaphores = info.signals.iter().map(|s| vk_semaphore(&s.semaphore)).collect::<Result<Vec<_>>>()?;
        let signal_values: Vec<u64> = info.signals.iter().map(|s| s.value).collect();
        let command_buffers = [command_buffer.command_buffer];
        let fence = info.fence.map(vk_fence).transpose()?.unwrap_or_default();

        // Binary semaphores ignore their value entries
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        let queue = GpuContext::lock_queue(self.ctx.queues.for_type(info.queue))?;
        match unsafe { self.ctx.device.queue_submit(*queue, &[submit_info], fence) } {
            Ok(()) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                engine_error!("topaz::vulkan", "Out of memory submitting to the {:?} queue", info.queue);
                Err(Error::OutOfMemory)
            }
            Err(e) => Err(engine_err!("topaz::vulkan", "Failed to submit to the {:?} queue: {:?}", info.queue, e)),
        }
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.ctx.device.device_wait_idle() }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to wait for device idle: {:?}", e))
    }
}

impl Drop for VulkanGraphicsDevice {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();
        }
        engine_debug!(
            "topaz::vulkan",
            "Vulkan device dropped ({} cached samplers, surface generation {})",
            self.samplers.len(),
            self.generation.load(Ordering::Acquire)
        );
    }
}
