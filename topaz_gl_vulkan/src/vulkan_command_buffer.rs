/// CommandBuffer and CommandPool - Vulkan implementations
///
/// Command buffers are recorded once and submitted many times, so they are
/// begun with SIMULTANEOUS_USE and never freed individually: the pool
/// releases them when both the pool object and every buffer are gone.

use ash::vk;
use std::any::Any;
use std::sync::Arc;
use topaz_gl::device::{
    Buffer as DeviceBuffer, ClearValue, CommandBuffer as DeviceCommandBuffer, CommandPool as DeviceCommandPool,
    DescriptorSet as DeviceDescriptorSet, Framebuffer as DeviceFramebuffer, Image as DeviceImage, ImageLayout,
    Pipeline as DevicePipeline, QueueType, Rect2D, RenderPass as DeviceRenderPass,
};
use topaz_gl::topaz::{Error, Result};
use topaz_gl::{engine_bail, engine_err, engine_warn};

use crate::vulkan_buffer::vk_buffer;
use crate::vulkan_context::GpuContext;
use crate::vulkan_descriptor::vk_descriptor_set;
use crate::vulkan_format::{aspect_mask, clear_value_to_vk, image_layout_to_vk, layout_barrier};
use crate::vulkan_image::vk_image;
use crate::vulkan_pipeline::vk_pipeline;
use crate::vulkan_render_pass::{vk_framebuffer, vk_render_pass};

/// Buffers one pool hands out before the caller must open another
pub(crate) const COMMAND_POOL_CAPACITY: u32 = 64;

/// Owner of a `vk::CommandPool`, shared by the pool and its buffers
struct PoolHandle {
    ctx: Arc<GpuContext>,
    pool: vk::CommandPool,
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_command_pool(self.pool, None);
        }
    }
}

pub struct CommandPool {
    handle: Arc<PoolHandle>,
    queue: QueueType,
    allocated: u32,
}

impl CommandPool {
    pub(crate) fn create(ctx: &Arc<GpuContext>, queue: QueueType) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.queues.family(queue))
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { ctx.device.create_command_pool(&create_info, None) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to create {:?} command pool: {:?}", queue, e))?;

        Ok(Self {
            handle: Arc::new(PoolHandle { ctx: Arc::clone(ctx), pool }),
            queue,
            allocated: 0,
        })
    }
}

impl DeviceCommandPool for CommandPool {
    fn allocate(&mut self, count: u32) -> Result<Vec<Box<dyn DeviceCommandBuffer>>> {
        if self.allocated + count > COMMAND_POOL_CAPACITY {
            return Err(Error::OutOfMemory);
        }

        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.handle.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = match unsafe { self.handle.ctx.device.allocate_command_buffers(&allocate_info) } {
            Ok(buffers) => buffers,
            Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => {
                engine_warn!("topaz::vulkan", "Command pool out of memory after {} buffers", self.allocated);
                return Err(Error::OutOfMemory);
            }
            Err(e) => engine_bail!("topaz::vulkan", "Failed to allocate {} command buffers: {:?}", count, e),
        };
        self.allocated += count;

        Ok(buffers
            .into_iter()
            .map(|command_buffer| {
                Box::new(CommandBuffer {
                    pool: Arc::clone(&self.handle),
                    command_buffer,
                    queue: self.queue,
                    is_recording: false,
                    in_render_pass: false,
                }) as Box<dyn DeviceCommandBuffer>
            })
            .collect())
    }
}

/// Vulkan command buffer
pub struct CommandBuffer {
    pool: Arc<PoolHandle>,
    pub(crate) command_buffer: vk::CommandBuffer,
    pub(crate) queue: QueueType,
    is_recording: bool,
    in_render_pass: bool,
}

impl CommandBuffer {
    fn device(&self) -> &ash::Device {
        &self.pool.ctx.device
    }

    fn require_recording(&self, command: &str) -> Result<()> {
        if !self.is_recording {
            engine_bail!("topaz::vulkan", "{}: command buffer not recording", command);
        }
        Ok(())
    }

    fn require_render_pass(&self, command: &str) -> Result<()> {
        self.require_recording(command)?;
        if !self.in_render_pass {
            engine_bail!("topaz::vulkan", "{}: not inside a render pass", command);
        }
        Ok(())
    }

    fn require_outside_render_pass(&self, command: &str) -> Result<()> {
        self.require_recording(command)?;
        if self.in_render_pass {
            engine_bail!("topaz::vulkan", "{}: not allowed inside a render pass", command);
        }
        Ok(())
    }
}

impl DeviceCommandBuffer for CommandBuffer {
    fn begin(&mut self) -> Result<()> {
        if self.is_recording {
            engine_bail!("topaz::vulkan", "begin: command buffer already recording");
        }

        let begin_info = vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        unsafe { self.device().begin_command_buffer(self.command_buffer, &begin_info) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to begin command buffer: {:?}", e))?;

        self.is_recording = true;
        self.in_render_pass = false;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.require_outside_render_pass("end")?;
        unsafe { self.device().end_command_buffer(self.command_buffer) }
            .map_err(|e| engine_err!("topaz::vulkan", "Failed to end command buffer: {:?}", e))?;
        self.is_recording = false;
        Ok(())
    }

    fn begin_render_pass(
        &mut self,
        render_pass: &Arc<dyn DeviceRenderPass>,
        framebuffer: &Arc<dyn DeviceFramebuffer>,
        clear_values: &[ClearValue],
    ) -> Result<()> {
        self.require_outside_render_pass("begin_render_pass")?;

        let framebuffer = vk_framebuffer(framebuffer)?;
        let dimensions = DeviceFramebuffer::dimensions(framebuffer);
        let vk_clear_values: Vec<vk::ClearValue> = clear_values.iter().copied().map(clear_value_to_vk).collect();

        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(vk_render_pass(render_pass)?)
            .framebuffer(framebuffer.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width: dimensions.x, height: dimensions.y },
            })
            .clear_values(&vk_clear_values);

        unsafe {
            self.device()
                .cmd_begin_render_pass(self.command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
        self.in_render_pass = true;
        Ok(())
    }

    fn end_render_pass(&mut self) -> Result<()> {
        self.require_render_pass("end_render_pass")?;
        unsafe {
            self.device().cmd_end_render_pass(self.command_buffer);
        }
        self.in_render_pass = false;
        Ok(())
    }

    fn bind_pipeline(&mut self, pipeline: &Arc<dyn DevicePipeline>) -> Result<()> {
        self.require_recording("bind_pipeline")?;
        let pipeline = vk_pipeline(pipeline)?;
        unsafe {
            self.device()
                .cmd_bind_pipeline(self.command_buffer, pipeline.vk_bind_point(), pipeline.pipeline);
        }
        Ok(())
    }

    fn bind_descriptor_set(&mut self, pipeline: &Arc<dyn DevicePipeline>, set: &Arc<dyn DeviceDescriptorSet>) -> Result<()> {
        self.require_recording("bind_descriptor_set")?;
        let pipeline = vk_pipeline(pipeline)?;
        let set = vk_descriptor_set(set)?;
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                self.command_buffer,
                pipeline.vk_bind_point(),
                pipeline.layout,
                0,
                &[set],
                &[],
            );
        }
        Ok(())
    }

    fn set_scissor(&mut self, scissor: Rect2D) -> Result<()> {
        self.require_recording("set_scissor")?;
        let rect = vk::Rect2D {
            offset: vk::Offset2D { x: scissor.x, y: scissor.y },
            extent: vk::Extent2D { width: scissor.width, height: scissor.height },
        };
        unsafe {
            self.device().cmd_set_scissor(self.command_buffer, 0, &[rect]);
        }
        Ok(())
    }

    fn bind_index_buffer(&mut self, buffer: &Arc<dyn DeviceBuffer>) -> Result<()> {
        self.require_recording("bind_index_buffer")?;
        let buffer = vk_buffer(buffer)?;
        unsafe {
            self.device()
                .cmd_bind_index_buffer(self.command_buffer, buffer, 0, vk::IndexType::UINT32);
        }
        Ok(())
    }

    fn draw(&mut self, vertex_count: u32) -> Result<()> {
        self.require_render_pass("draw")?;
        unsafe {
            self.device().cmd_draw(self.command_buffer, vertex_count, 1, 0, 0);
        }
        Ok(())
    }

    fn draw_indexed(&mut self, index_count: u32) -> Result<()> {
        self.require_render_pass("draw_indexed")?;
        unsafe {
            self.device().cmd_draw_indexed(self.command_buffer, index_count, 1, 0, 0, 0);
        }
        Ok(())
    }

    fn draw_indirect(&mut self, buffer: &Arc<dyn DeviceBuffer>, offset: u64, draw_count: u32, stride: u32) -> Result<()> {
        self.require_render_pass("draw_indirect")?;
        let buffer = vk_buffer(buffer)?;
        unsafe {
            self.device()
                .cmd_draw_indirect(self.command_buffer, buffer, offset, draw_count, stride);
        }
        Ok(())
    }

    fn draw_indexed_indirect(&mut self, buffer: &Arc<dyn DeviceBuffer>, offset: u64, draw_count: u32, stride: u32) -> Result<()> {
        self.require_render_pass("draw_indexed_indirect")?;
        let buffer = vk_buffer(buffer)?;
        unsafe {
            self.device()
                .cmd_draw_indexed_indirect(self.command_buffer, buffer, offset, draw_count, stride);
        }
        Ok(())
    }

    fn draw_indirect_count(
        &mut self,
        buffer: &Arc<dyn DeviceBuffer>,
        offset: u64,
        count_buffer: &Arc<dyn DeviceBuffer>,
        count_offset: u64,
        max_draw_count: u32,
        stride: u32,
    ) -> Result<()> {
        self.require_render_pass("draw_indirect_count")?;
        let buffer = vk_buffer(buffer)?;
        let count_buffer = vk_buffer(count_buffer)?;
        unsafe {
            self.device().cmd_draw_indirect_count(
                self.command_buffer,
                buffer,
                offset,
                count_buffer,
                count_offset,
                max_draw_count,
                stride,
            );
        }
        Ok(())
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<()> {
        self.require_outside_render_pass("dispatch")?;
        unsafe {
            self.device().cmd_dispatch(self.command_buffer, x, y, z);
        }
        Ok(())
    }

    fn copy_buffer(&mut self, src: &Arc<dyn DeviceBuffer>, dst: &Arc<dyn DeviceBuffer>, size: u64) -> Result<()> {
        self.require_outside_render_pass("copy_buffer")?;
        if size > src.size() || size > dst.size() {
            return Err(Error::InvalidResource(format!(
                "Copy of {} bytes exceeds source ({}) or destination ({})",
                size,
                src.size(),
                dst.size()
            )));
        }

        let src = vk_buffer(src)?;
        let dst = vk_buffer(dst)?;
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };

        // Copied data is read by shaders, index fetch or indirect draws
        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(
                vk::AccessFlags::SHADER_READ
                    | vk::AccessFlags::SHADER_WRITE
                    | vk::AccessFlags::INDEX_READ
                    | vk::AccessFlags::INDIRECT_COMMAND_READ,
            )
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(dst)
            .offset(0)
            .size(size);

        unsafe {
            self.device().cmd_copy_buffer(self.command_buffer, src, dst, &[region]);
            self.device().cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
        Ok(())
    }

    fn copy_buffer_to_image(
        &mut self,
        src: &Arc<dyn DeviceBuffer>,
        dst: &Arc<dyn DeviceImage>,
        final_layout: ImageLayout,
    ) -> Result<()> {
        self.require_outside_render_pass("copy_buffer_to_image")?;

        let required = dst.format().image_size_bytes(dst.dimensions()) as u64;
        if src.size() < required {
            return Err(Error::InvalidResource(format!(
                "Staging buffer of {} bytes is smaller than the {} byte image",
                src.size(),
                required
            )));
        }

        let src = vk_buffer(src)?;
        let image = vk_image(dst)?;
        let aspect = aspect_mask(dst.format());
        let dimensions = dst.dimensions();

        let (to_transfer, to_transfer_src, to_transfer_dst) =
            layout_barrier(image.image, aspect, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        let (to_final, to_final_src, to_final_dst) = layout_barrier(
            image.image,
            aspect,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            image_layout_to_vk(final_layout),
        );

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D { width: dimensions.x, height: dimensions.y, depth: 1 });

        unsafe {
            let device = self.device();
            device.cmd_pipeline_barrier(
                self.command_buffer,
                to_transfer_src,
                to_transfer_dst,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_transfer],
            );
            device.cmd_copy_buffer_to_image(
                self.command_buffer,
                src,
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            device.cmd_pipeline_barrier(
                self.command_buffer,
                to_final_src,
                to_final_dst,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_final],
            );
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn vk_command_buffer(command_buffer: &dyn DeviceCommandBuffer) -> Result<&CommandBuffer> {
    command_buffer
        .as_any()
        .downcast_ref::<CommandBuffer>()
        .ok_or_else(|| engine_err!("topaz::vulkan", "Command buffer was not created by the Vulkan device"))
}
