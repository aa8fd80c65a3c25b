/// GraphicsDevice trait - the backend factory and queue interface

use std::sync::Arc;
use glam::UVec2;
use crate::error::Result;
use crate::device::{
    Buffer, BufferDesc, Image, ImageDesc, ImageFormat, Sampler, SamplerDesc,
    DescriptorLayout, DescriptorLayoutDesc, DescriptorPool, DescriptorPoolDesc, DescriptorWrite,
    RenderPass, RenderPassDesc, Framebuffer, FramebufferDesc,
    PipelineLayout, PipelineLayoutDesc, Pipeline, GraphicsPipelineDesc, ComputePipelineDesc,
    CommandBuffer, CommandPool, QueueType, Fence, Semaphore,
};

/// A semaphore wait or signal attached to a submission
///
/// `value` is only read for timeline semaphores.
#[derive(Clone)]
pub struct SemaphoreSubmit {
    pub semaphore: Arc<dyn Semaphore>,
    pub value: u64,
}

impl SemaphoreSubmit {
    pub fn binary(semaphore: Arc<dyn Semaphore>) -> Self {
        Self { semaphore, value: 0 }
    }

    pub fn timeline(semaphore: Arc<dyn Semaphore>, value: u64) -> Self {
        Self { semaphore, value }
    }
}

/// One queue submission
pub struct SubmitInfo<'a> {
    pub queue: QueueType,
    pub command_buffer: &'a dyn CommandBuffer,
    pub waits: &'a [SemaphoreSubmit],
    pub signals: &'a [SemaphoreSubmit],
    /// Fence signalled when the work completes
    pub fence: Option<&'a Arc<dyn Fence>>,
}

/// Result of acquiring a presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// `suboptimal` images can still be rendered to and presented
    Acquired { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Graphics device trait
///
/// Central factory interface for GPU objects, queue submission, and the
/// window surface the device presents to. Implemented by backend-specific
/// devices (e.g. `VulkanGraphicsDevice`). Objects are destroyed when their
/// last `Arc` (or `Box`) is dropped; callers keep them alive while the GPU
/// may still use them.
pub trait GraphicsDevice: Send + Sync {
    // ===== WINDOW SURFACE =====

    /// Current presentable images, in swapchain order
    fn surface_images(&self) -> Vec<Arc<dyn Image>>;

    /// Pixel format of the presentable images
    fn surface_format(&self) -> ImageFormat;

    /// Current window dimensions in pixels (zero when minimised)
    fn surface_dimensions(&self) -> UVec2;

    /// Monotonically increasing counter bumped whenever the surface is recreated
    fn surface_generation(&self) -> u64;

    /// Recreate the presentable images to match the window
    ///
    /// Waits for the device to be idle first. Bumps the surface generation.
    fn recreate_surface(&self) -> Result<()>;

    /// Acquire the next presentable image, signalling `signal` once it is ready
    ///
    /// # Arguments
    ///
    /// * `signal` - Binary semaphore signalled when the image can be written
    fn acquire_image(&self, signal: &Arc<dyn Semaphore>) -> Result<AcquireResult>;

    /// Queue `image_index` for presentation once `waits` are signalled
    fn present(&self, image_index: u32, waits: &[Arc<dyn Semaphore>]) -> Result<PresentResult>;

    /// Number of frames that may be in flight at once
    ///
    /// Fixed for the lifetime of the device and equal to the number of
    /// presentable images.
    fn frames_in_flight(&self) -> usize;

    // ===== RESOURCES =====

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Arc<dyn Buffer>>;

    fn create_image(&self, desc: &ImageDesc) -> Result<Arc<dyn Image>>;

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<Arc<dyn Sampler>>;

    // ===== DESCRIPTORS =====

    fn create_descriptor_layout(&self, desc: &DescriptorLayoutDesc) -> Result<Arc<dyn DescriptorLayout>>;

    fn create_descriptor_pool(&self, desc: &DescriptorPoolDesc) -> Result<Box<dyn DescriptorPool>>;

    /// Apply descriptor writes
    ///
    /// The sets must not be in use by the GPU.
    fn update_descriptor_sets(&self, writes: &[DescriptorWrite]) -> Result<()>;

    // ===== PASSES & PIPELINES =====

    fn create_render_pass(&self, desc: &RenderPassDesc) -> Result<Arc<dyn RenderPass>>;

    fn create_framebuffer(&self, desc: &FramebufferDesc) -> Result<Arc<dyn Framebuffer>>;

    fn create_pipeline_layout(&self, desc: &PipelineLayoutDesc) -> Result<Arc<dyn PipelineLayout>>;

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<Arc<dyn Pipeline>>;

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<Arc<dyn Pipeline>>;

    // ===== COMMANDS & SYNC =====

    fn create_command_pool(&self, queue: QueueType) -> Result<Box<dyn CommandPool>>;

    fn create_fence(&self, signalled: bool) -> Result<Arc<dyn Fence>>;

    fn create_semaphore(&self) -> Result<Arc<dyn Semaphore>>;

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<Arc<dyn Semaphore>>;

    /// Submit recorded commands to a queue
    fn submit(&self, info: &SubmitInfo) -> Result<()>;

    /// Wait for all queues to be idle
    fn wait_idle(&self) -> Result<()>;
}
